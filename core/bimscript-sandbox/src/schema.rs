//! Declarative description of the host methods exposed to scripts.
//!
//! A [`MethodSchema`] says how to unmarshal each argument, how to marshal
//! the result, and which backend call to make. The bridge never calls a
//! capability any other way, so adding a capability means adding one row
//! to the registry.

use crate::backend::{CapabilityBackend, CapabilityResult};
use crate::error::{CapabilityError, SchemaError};
use crate::permissions::Permission;
use bimscript_types::EntityRef;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// How one positional script argument becomes a native argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    /// A string; `undefined`/`null`/absent yields the missing sentinel.
    String,
    /// A number; `undefined`/`null`/absent yields the missing sentinel.
    Number,
    /// Any value, dumped recursively.
    GenericValue,
    /// An array of wrapped (`{ref: {...}}`) or bare `{modelId, expressId}`
    /// objects.
    EntityRefList,
    /// Every remaining argument, coerced to string. Must be last.
    RestStrings,
}

impl ArgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::GenericValue => "genericValue",
            Self::EntityRefList => "entityRefList",
            Self::RestStrings => "...string",
        }
    }
}

/// How a native result becomes a script value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnType {
    /// Nothing is produced; the script sees `undefined`.
    Void,
    /// A string, or `null` when the backend returned anything else.
    String,
    /// Any JSON-like value, marshaled recursively.
    GenericValue,
}

impl ReturnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::String => "string",
            Self::GenericValue => "genericValue",
        }
    }
}

/// An unmarshaled argument, one per [`ArgType`] tag.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeArg {
    String(Option<String>),
    Number(Option<f64>),
    Value(Value),
    EntityRefs(Vec<EntityRef>),
    Strings(Vec<String>),
}

static NULL: Value = Value::Null;

impl NativeArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => s.as_deref(),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => *n,
            _ => None,
        }
    }

    /// The dumped value; `null` for any other variant.
    pub fn value(&self) -> &Value {
        match self {
            Self::Value(v) => v,
            _ => &NULL,
        }
    }

    pub fn entity_refs(&self) -> &[EntityRef] {
        match self {
            Self::EntityRefs(refs) => refs,
            _ => &[],
        }
    }

    pub fn strings(&self) -> &[String] {
        match self {
            Self::Strings(items) => items,
            _ => &[],
        }
    }

    /// JSON view of the argument, as recorded by test backends.
    pub fn to_value(&self) -> Value {
        match self {
            Self::String(s) => s.clone().map_or(Value::Null, Value::String),
            Self::Number(n) => n
                .and_then(serde_json::Number::from_f64)
                .map_or(Value::Null, Value::Number),
            Self::Value(v) => v.clone(),
            Self::EntityRefs(refs) => Value::Array(refs.iter().map(EntityRef::to_value).collect()),
            Self::Strings(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

/// Native result of a capability call. `Void` methods return `null`.
pub type NativeResult = CapabilityResult<Value>;

/// The backend call behind a method, typed by how many argument groups it
/// takes. A rest argument counts as one group.
#[derive(Clone, Copy)]
pub enum Invoke {
    Nullary(fn(&dyn CapabilityBackend) -> NativeResult),
    Unary(fn(&dyn CapabilityBackend, &NativeArg) -> NativeResult),
    Binary(fn(&dyn CapabilityBackend, &NativeArg, &NativeArg) -> NativeResult),
    Ternary(fn(&dyn CapabilityBackend, &NativeArg, &NativeArg, &NativeArg) -> NativeResult),
    Quaternary(
        fn(&dyn CapabilityBackend, &NativeArg, &NativeArg, &NativeArg, &NativeArg) -> NativeResult,
    ),
}

impl Invoke {
    pub fn arity(&self) -> usize {
        match self {
            Self::Nullary(_) => 0,
            Self::Unary(_) => 1,
            Self::Binary(_) => 2,
            Self::Ternary(_) => 3,
            Self::Quaternary(_) => 4,
        }
    }

    pub fn call(&self, backend: &dyn CapabilityBackend, args: &[NativeArg]) -> NativeResult {
        match (self, args) {
            (Self::Nullary(f), []) => f(backend),
            (Self::Unary(f), [a]) => f(backend, a),
            (Self::Binary(f), [a, b]) => f(backend, a, b),
            (Self::Ternary(f), [a, b, c]) => f(backend, a, b, c),
            (Self::Quaternary(f), [a, b, c, d]) => f(backend, a, b, c, d),
            _ => Err(CapabilityError::InvalidArgument(format!(
                "expected {} argument group(s), got {}",
                self.arity(),
                args.len()
            ))),
        }
    }
}

impl fmt::Debug for Invoke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invoke/{}", self.arity())
    }
}

/// One script-callable host method.
#[derive(Debug)]
pub struct MethodSchema {
    pub name: &'static str,
    pub args: &'static [ArgType],
    pub returns: ReturnType,
    pub invoke: Invoke,
}

impl MethodSchema {
    /// Human-readable signature, e.g. `colorize(entityRefList, string): void`.
    pub fn signature(&self) -> String {
        let args: Vec<&str> = self.args.iter().map(ArgType::as_str).collect();
        format!("{}({}): {}", self.name, args.join(", "), self.returns.as_str())
    }

    fn validate(&self, namespace: &'static str) -> Result<(), SchemaError> {
        if let Some(pos) = self.args.iter().position(|a| *a == ArgType::RestStrings) {
            if pos + 1 != self.args.len() {
                return Err(SchemaError::RestNotLast {
                    namespace,
                    method: self.name,
                });
            }
        }
        if self.invoke.arity() != self.args.len() {
            return Err(SchemaError::ArityMismatch {
                namespace,
                method: self.name,
                declared: self.args.len(),
                arity: self.invoke.arity(),
            });
        }
        Ok(())
    }
}

/// A permission-gated group of methods, installed as `bim.<name>`.
#[derive(Debug)]
pub struct NamespaceSchema {
    pub name: &'static str,
    pub permission: Permission,
    pub methods: &'static [MethodSchema],
}

impl NamespaceSchema {
    pub fn method(&self, name: &str) -> Option<&MethodSchema> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.iter().map(|m| m.name)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.permission.key() != self.name {
            return Err(SchemaError::PermissionMismatch {
                namespace: self.name,
                permission: self.permission.key(),
            });
        }
        if self.methods.is_empty() {
            return Err(SchemaError::EmptyNamespace(self.name));
        }
        let mut seen = HashSet::new();
        for method in self.methods {
            if !seen.insert(method.name) {
                return Err(SchemaError::DuplicateMethod {
                    namespace: self.name,
                    method: method.name,
                });
            }
            method.validate(self.name)?;
        }
        Ok(())
    }
}

/// Checks every row of a registry. Returns the first broken row.
pub fn validate_registry(namespaces: &[NamespaceSchema]) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for namespace in namespaces {
        if !seen.insert(namespace.name) {
            return Err(SchemaError::DuplicateNamespace(namespace.name));
        }
        namespace.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingBackend;

    fn nothing(_: &dyn CapabilityBackend) -> NativeResult {
        Ok(Value::Null)
    }

    fn one(_: &dyn CapabilityBackend, _: &NativeArg) -> NativeResult {
        Ok(Value::Null)
    }

    fn two(_: &dyn CapabilityBackend, _: &NativeArg, _: &NativeArg) -> NativeResult {
        Ok(Value::Null)
    }

    #[test]
    fn signature_lists_tags() {
        let method = MethodSchema {
            name: "colorize",
            args: &[ArgType::EntityRefList, ArgType::String],
            returns: ReturnType::Void,
            invoke: Invoke::Binary(two),
        };
        assert_eq!(method.signature(), "colorize(entityRefList, string): void");
    }

    #[test]
    fn rest_must_be_last() {
        static BAD: &[NamespaceSchema] = &[NamespaceSchema {
            name: "query",
            permission: Permission::Query,
            methods: &[MethodSchema {
                name: "byType",
                args: &[ArgType::RestStrings, ArgType::String],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Binary(two),
            }],
        }];
        assert_eq!(
            validate_registry(BAD),
            Err(SchemaError::RestNotLast {
                namespace: "query",
                method: "byType"
            })
        );
    }

    #[test]
    fn arity_must_match_tags() {
        static BAD: &[NamespaceSchema] = &[NamespaceSchema {
            name: "viewer",
            permission: Permission::Viewer,
            methods: &[MethodSchema {
                name: "colorize",
                args: &[ArgType::EntityRefList, ArgType::String],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(one),
            }],
        }];
        assert!(matches!(
            validate_registry(BAD),
            Err(SchemaError::ArityMismatch {
                declared: 2,
                arity: 1,
                ..
            })
        ));
    }

    #[test]
    fn duplicates_rejected() {
        static DUP_METHOD: &[NamespaceSchema] = &[NamespaceSchema {
            name: "lens",
            permission: Permission::Lens,
            methods: &[
                MethodSchema {
                    name: "clear",
                    args: &[],
                    returns: ReturnType::Void,
                    invoke: Invoke::Nullary(nothing),
                },
                MethodSchema {
                    name: "clear",
                    args: &[],
                    returns: ReturnType::Void,
                    invoke: Invoke::Nullary(nothing),
                },
            ],
        }];
        assert!(matches!(
            validate_registry(DUP_METHOD),
            Err(SchemaError::DuplicateMethod { method: "clear", .. })
        ));

        static LENS: NamespaceSchema = NamespaceSchema {
            name: "lens",
            permission: Permission::Lens,
            methods: &[MethodSchema {
                name: "clear",
                args: &[],
                returns: ReturnType::Void,
                invoke: Invoke::Nullary(nothing),
            }],
        };
        assert!(validate_registry(std::slice::from_ref(&LENS)).is_ok());
    }

    #[test]
    fn permission_must_match_name() {
        static BAD: &[NamespaceSchema] = &[NamespaceSchema {
            name: "viewer",
            permission: Permission::Export,
            methods: &[MethodSchema {
                name: "hide",
                args: &[ArgType::EntityRefList],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(one),
            }],
        }];
        assert!(matches!(
            validate_registry(BAD),
            Err(SchemaError::PermissionMismatch { .. })
        ));

        static EMPTY: &[NamespaceSchema] = &[NamespaceSchema {
            name: "model",
            permission: Permission::Model,
            methods: &[],
        }];
        assert_eq!(validate_registry(EMPTY), Err(SchemaError::EmptyNamespace("model")));
    }

    #[test]
    fn invoke_rejects_wrong_group_count() {
        let backend = RecordingBackend::new();
        let invoke = Invoke::Binary(two);
        assert_eq!(invoke.arity(), 2);
        let err = invoke
            .call(&backend, &[NativeArg::String(None)])
            .unwrap_err();
        assert!(err.to_string().contains("expected 2 argument group(s), got 1"));
        assert_eq!(
            invoke.call(&backend, &[NativeArg::String(None), NativeArg::Number(None)]),
            Ok(Value::Null)
        );
    }

    #[test]
    fn native_arg_accessors() {
        let refs = NativeArg::EntityRefs(vec![EntityRef::new("m1", 7)]);
        assert_eq!(refs.entity_refs().len(), 1);
        assert_eq!(refs.as_str(), None);
        assert_eq!(refs.value(), &Value::Null);
        assert_eq!(
            refs.to_value(),
            serde_json::json!([{"modelId": "m1", "expressId": 7}])
        );

        let s = NativeArg::String(Some("#ff0000".into()));
        assert_eq!(s.as_str(), Some("#ff0000"));
        assert_eq!(NativeArg::String(None).to_value(), Value::Null);

        let n = NativeArg::Number(Some(42.0));
        assert_eq!(n.as_number(), Some(42.0));

        let rest = NativeArg::Strings(vec!["IfcWall".into(), "IfcDoor".into()]);
        assert_eq!(rest.strings(), ["IfcWall", "IfcDoor"]);
    }
}
