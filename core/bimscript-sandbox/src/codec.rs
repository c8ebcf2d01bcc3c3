//! Conversion between VM values and host values.
//!
//! VM values are `rquickjs::Value<'js>` handles tied to the context
//! lifetime. Every handle created here is owned by a local binding or moved
//! straight into its parent container, so it is released when it goes out
//! of scope, including on the error path.
//!
//! Dumping runs on the host, outside the VM's heap ceiling and interrupt
//! handler. A [`DumpBudget`] bounds the output size and checks the eval
//! deadline while walking, so a value with shared sub-graphs cannot expand
//! into unbounded host work.

use crate::error::CodecError;
use crate::limits::{DEFAULT_MEMORY_BYTES, Deadline};
use crate::schema::{ArgType, NativeArg, ReturnType};
use bimscript_types::EntityRef;
use rquickjs::convert::Coerced;
use rquickjs::{Array, Ctx, Object, Value};
use serde_json::{Map, Number, Value as Json};
use std::sync::Arc;

/// Deepest nesting followed in either direction. Cyclic VM objects stop
/// here instead of recursing forever.
pub const MAX_DEPTH: usize = 64;

/// Bytes charged for every dumped value on top of its string payload.
pub const NODE_COST: usize = 16;

/// Values visited between deadline checks.
const DEADLINE_STRIDE: usize = 1024;

/// Largest magnitude at which every integer is exactly representable as a
/// JS number.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Limits on host-side work for one conversion out of the VM.
#[derive(Debug, Clone)]
pub struct DumpBudget {
    max_bytes: usize,
    deadline: Option<Arc<Deadline>>,
}

impl DumpBudget {
    /// A budget of `max_bytes` of output with no deadline.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            deadline: None,
        }
    }

    pub(crate) fn with_deadline(mut self, deadline: Arc<Deadline>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The same deadline with a smaller byte allowance.
    pub fn capped(&self, max_bytes: usize) -> Self {
        Self {
            max_bytes: self.max_bytes.min(max_bytes),
            deadline: self.deadline.clone(),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub(crate) fn deadline_expired(&self) -> bool {
        self.deadline.as_ref().is_some_and(|d| d.expired())
    }
}

impl Default for DumpBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BYTES)
    }
}

/// Converts positional script arguments into native arguments, one per tag.
/// Missing trailing arguments are treated as `undefined`.
pub fn unmarshal_args<'js>(
    tags: &[ArgType],
    args: &[Value<'js>],
    budget: &DumpBudget,
) -> Result<Vec<NativeArg>, CodecError> {
    let mut native = Vec::with_capacity(tags.len());
    for (i, tag) in tags.iter().enumerate() {
        let arg = args.get(i);
        let value = match tag {
            ArgType::String => NativeArg::String(match arg.filter(|v| !is_nullish(v)) {
                Some(v) => Some(v.get::<Coerced<String>>()?.0),
                None => None,
            }),
            ArgType::Number => NativeArg::Number(match arg.filter(|v| !is_nullish(v)) {
                Some(v) => Some(v.get::<Coerced<f64>>()?.0),
                None => None,
            }),
            ArgType::GenericValue => NativeArg::Value(match arg {
                Some(v) => dump_with(v, budget)?,
                None => Json::Null,
            }),
            ArgType::EntityRefList => NativeArg::EntityRefs(match arg {
                Some(v) => entity_refs(&dump_with(v, budget)?),
                None => Vec::new(),
            }),
            ArgType::RestStrings => NativeArg::Strings(
                args.iter()
                    .skip(i)
                    .map(|v| v.get::<Coerced<String>>().map(|c| c.0))
                    .collect::<rquickjs::Result<_>>()?,
            ),
        };
        native.push(value);
    }
    Ok(native)
}

fn is_nullish(value: &Value<'_>) -> bool {
    value.is_undefined() || value.is_null()
}

/// Items that are neither wrapped nor bare references are skipped. A single
/// reference object is accepted as a one-element list.
fn entity_refs(value: &Json) -> Vec<EntityRef> {
    match value {
        Json::Array(items) => items.iter().filter_map(EntityRef::from_value).collect(),
        Json::Object(_) => EntityRef::from_value(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Recursively converts any VM value into the equivalent host value under
/// the default budget and no deadline.
///
/// `undefined`, functions and non-finite numbers become `null`; object
/// properties holding `undefined` or a function are omitted. Numbers are
/// normalized: an integral value within the safe-integer range comes back
/// as a JSON integer, so `2.0` marshaled in dumps as `2`.
pub fn dump(value: &Value<'_>) -> Result<Json, CodecError> {
    dump_with(value, &DumpBudget::default())
}

/// [`dump`] under an explicit budget. Fails with [`CodecError::TooLarge`]
/// once the output would exceed the budget and with
/// [`CodecError::DeadlineExpired`] once the deadline passes.
pub fn dump_with(value: &Value<'_>, budget: &DumpBudget) -> Result<Json, CodecError> {
    Walk {
        budget,
        spent: 0,
        visited: 0,
    }
    .dump_at(value, 0)
}

struct Walk<'a> {
    budget: &'a DumpBudget,
    spent: usize,
    visited: usize,
}

impl Walk<'_> {
    fn charge(&mut self, payload: usize) -> Result<(), CodecError> {
        self.spent = self.spent.saturating_add(NODE_COST).saturating_add(payload);
        if self.spent > self.budget.max_bytes {
            return Err(CodecError::TooLarge(self.budget.max_bytes));
        }
        self.visited += 1;
        if self.visited % DEADLINE_STRIDE == 0 && self.budget.deadline_expired() {
            return Err(CodecError::DeadlineExpired);
        }
        Ok(())
    }

    fn dump_at(&mut self, value: &Value<'_>, depth: usize) -> Result<Json, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::TooDeep(MAX_DEPTH));
        }
        self.charge(0)?;
        if is_nullish(value) || value.is_function() {
            return Ok(Json::Null);
        }
        if let Some(b) = value.as_bool() {
            return Ok(Json::Bool(b));
        }
        if let Some(i) = value.as_int() {
            return Ok(Json::from(i));
        }
        if let Some(f) = value.as_float() {
            return Ok(number(f));
        }
        if let Some(s) = value.as_string() {
            let s = s.to_string()?;
            self.charge(s.len())?;
            return Ok(Json::String(s));
        }
        if let Some(array) = value.as_array() {
            let mut items = Vec::new();
            for item in array.iter::<Value>() {
                items.push(self.dump_at(&item?, depth + 1)?);
            }
            return Ok(Json::Array(items));
        }
        if let Some(exception) = value.as_exception() {
            let mut map = Map::new();
            let name: Option<String> = exception.get("name")?;
            map.insert("name".into(), name.map_or(Json::Null, Json::String));
            map.insert(
                "message".into(),
                exception.message().map_or(Json::Null, Json::String),
            );
            return Ok(Json::Object(map));
        }
        if let Some(object) = value.as_object() {
            let mut map = Map::new();
            for prop in object.props::<String, Value>() {
                let (key, item) = prop?;
                if item.is_undefined() || item.is_function() {
                    continue;
                }
                self.charge(key.len())?;
                map.insert(key, self.dump_at(&item, depth + 1)?);
            }
            return Ok(Json::Object(map));
        }
        // Symbols, big integers and other exotic values have no host shape.
        Ok(Json::Null)
    }
}

fn number(f: f64) -> Json {
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
        Json::from(f as i64)
    } else {
        Number::from_f64(f).map_or(Json::Null, Json::Number)
    }
}

/// Recursively converts a host value into a fresh VM value.
pub fn marshal<'js>(ctx: &Ctx<'js>, value: &Json) -> Result<Value<'js>, CodecError> {
    marshal_at(ctx, value, 0)
}

fn marshal_at<'js>(ctx: &Ctx<'js>, value: &Json, depth: usize) -> Result<Value<'js>, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep(MAX_DEPTH));
    }
    let marshaled = match value {
        Json::Null => Value::new_null(ctx.clone()),
        Json::Bool(b) => Value::new_bool(ctx.clone(), *b),
        Json::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => Value::new_int(ctx.clone(), i),
            None => Value::new_float(ctx.clone(), n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        Json::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, marshal_at(ctx, item, depth + 1)?)?;
            }
            array.into_value()
        }
        Json::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), marshal_at(ctx, item, depth + 1)?)?;
            }
            object.into_value()
        }
    };
    Ok(marshaled)
}

/// Converts a capability result according to the method's return tag.
pub fn marshal_return<'js>(
    ctx: &Ctx<'js>,
    returns: ReturnType,
    value: &Json,
) -> Result<Value<'js>, CodecError> {
    match returns {
        ReturnType::Void => Ok(Value::new_undefined(ctx.clone())),
        ReturnType::String => match value {
            Json::String(s) => Ok(rquickjs::String::from_str(ctx.clone(), s)?.into_value()),
            _ => Ok(Value::new_null(ctx.clone())),
        },
        ReturnType::GenericValue => marshal(ctx, value),
    }
}
