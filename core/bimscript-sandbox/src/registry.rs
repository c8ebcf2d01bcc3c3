//! The capability table: every host method a script can reach.
//!
//! Process-wide, read-only, built at compile time. Each row's `invoke` only
//! picks arguments out of the unmarshaled list and forwards them to the
//! backend; all VM handle work happens in the bridge.

use crate::backend::CapabilityResult;
use crate::error::CapabilityError;
use crate::permissions::Permission;
use crate::schema::ArgType::{EntityRefList, GenericValue, Number as Num, RestStrings, String as Str};
use crate::schema::{Invoke, MethodSchema, NamespaceSchema, NativeArg, NativeResult, ReturnType};
use serde_json::Value;

fn required_string<'a>(arg: &'a NativeArg, what: &str) -> CapabilityResult<&'a str> {
    arg.as_str()
        .ok_or_else(|| CapabilityError::InvalidArgument(format!("{what} is required")))
}

fn required_express_id(arg: &NativeArg) -> CapabilityResult<u32> {
    let n = arg
        .as_number()
        .ok_or_else(|| CapabilityError::InvalidArgument("expressId is required".into()))?;
    if n.fract() == 0.0 && n >= 0.0 && n <= f64::from(u32::MAX) {
        Ok(n as u32)
    } else {
        Err(CapabilityError::InvalidArgument(format!(
            "expressId must be a non-negative integer (got {n})"
        )))
    }
}

fn void(result: CapabilityResult<()>) -> NativeResult {
    result.map(|()| Value::Null)
}

pub static NAMESPACES: &[NamespaceSchema] = &[
    NamespaceSchema {
        name: "model",
        permission: Permission::Model,
        methods: &[
            MethodSchema {
                name: "list",
                args: &[],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Nullary(|b| b.model().list()),
            },
            MethodSchema {
                name: "active",
                args: &[],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Nullary(|b| b.model().active()),
            },
            MethodSchema {
                name: "activeId",
                args: &[],
                returns: ReturnType::String,
                invoke: Invoke::Nullary(|b| {
                    Ok(b.model().active_id()?.map_or(Value::Null, Value::String))
                }),
            },
        ],
    },
    NamespaceSchema {
        name: "query",
        permission: Permission::Query,
        methods: &[
            MethodSchema {
                name: "all",
                args: &[],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Nullary(|b| b.query().all()),
            },
            MethodSchema {
                name: "byType",
                args: &[RestStrings],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Unary(|b, types| b.query().by_type(types.strings())),
            },
            MethodSchema {
                name: "entity",
                args: &[Str, Num],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Binary(|b, model_id, express_id| {
                    b.query().entity(
                        required_string(model_id, "modelId")?,
                        required_express_id(express_id)?,
                    )
                }),
            },
            MethodSchema {
                name: "attributes",
                args: &[GenericValue],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Unary(|b, entity| b.query().attributes(entity.value())),
            },
            MethodSchema {
                name: "properties",
                args: &[GenericValue],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Unary(|b, entity| b.query().properties(entity.value())),
            },
            MethodSchema {
                name: "quantities",
                args: &[GenericValue],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Unary(|b, entity| b.query().quantities(entity.value())),
            },
            MethodSchema {
                name: "related",
                args: &[GenericValue, Str, Str],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Ternary(|b, entity, relationship, direction| {
                    b.query().related(
                        entity.value(),
                        required_string(relationship, "relationship")?,
                        required_string(direction, "direction")?,
                    )
                }),
            },
        ],
    },
    NamespaceSchema {
        name: "viewer",
        permission: Permission::Viewer,
        methods: &[
            MethodSchema {
                name: "colorize",
                args: &[EntityRefList, Str],
                returns: ReturnType::Void,
                invoke: Invoke::Binary(|b, refs, color| {
                    void(b.viewer().colorize(refs.entity_refs(), required_string(color, "color")?))
                }),
            },
            MethodSchema {
                name: "colorizeAll",
                args: &[GenericValue],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(|b, batches| void(b.viewer().colorize_all(batches.value()))),
            },
            MethodSchema {
                name: "hide",
                args: &[EntityRefList],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(|b, refs| void(b.viewer().hide(refs.entity_refs()))),
            },
            MethodSchema {
                name: "show",
                args: &[EntityRefList],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(|b, refs| void(b.viewer().show(refs.entity_refs()))),
            },
            MethodSchema {
                name: "isolate",
                args: &[EntityRefList],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(|b, refs| void(b.viewer().isolate(refs.entity_refs()))),
            },
            MethodSchema {
                name: "select",
                args: &[EntityRefList],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(|b, refs| void(b.viewer().select(refs.entity_refs()))),
            },
            MethodSchema {
                name: "flyTo",
                args: &[EntityRefList],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(|b, refs| void(b.viewer().fly_to(refs.entity_refs()))),
            },
            MethodSchema {
                name: "resetColors",
                args: &[],
                returns: ReturnType::Void,
                invoke: Invoke::Nullary(|b| void(b.viewer().reset_colors())),
            },
            MethodSchema {
                name: "resetVisibility",
                args: &[],
                returns: ReturnType::Void,
                invoke: Invoke::Nullary(|b| void(b.viewer().reset_visibility())),
            },
        ],
    },
    // No batch method: it would need a script callback across the boundary.
    NamespaceSchema {
        name: "mutate",
        permission: Permission::Mutate,
        methods: &[
            MethodSchema {
                name: "setProperty",
                args: &[GenericValue, Str, Str, GenericValue],
                returns: ReturnType::Void,
                invoke: Invoke::Quaternary(|b, entity, pset, property, value| {
                    void(b.mutate().set_property(
                        entity.value(),
                        required_string(pset, "psetName")?,
                        required_string(property, "propName")?,
                        value.value(),
                    ))
                }),
            },
            MethodSchema {
                name: "deleteProperty",
                args: &[GenericValue, Str, Str],
                returns: ReturnType::Void,
                invoke: Invoke::Ternary(|b, entity, pset, property| {
                    void(b.mutate().delete_property(
                        entity.value(),
                        required_string(pset, "psetName")?,
                        required_string(property, "propName")?,
                    ))
                }),
            },
            MethodSchema {
                name: "undo",
                args: &[Str],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Unary(|b, model_id| {
                    b.mutate().undo(required_string(model_id, "modelId")?)
                }),
            },
            MethodSchema {
                name: "redo",
                args: &[Str],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Unary(|b, model_id| {
                    b.mutate().redo(required_string(model_id, "modelId")?)
                }),
            },
        ],
    },
    NamespaceSchema {
        name: "lens",
        permission: Permission::Lens,
        methods: &[
            MethodSchema {
                name: "presets",
                args: &[],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Nullary(|b| b.lens().presets()),
            },
            MethodSchema {
                name: "create",
                args: &[GenericValue],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Unary(|b, config| b.lens().create(config.value())),
            },
            MethodSchema {
                name: "activate",
                args: &[Str],
                returns: ReturnType::Void,
                invoke: Invoke::Unary(|b, id| void(b.lens().activate(required_string(id, "lensId")?))),
            },
            MethodSchema {
                name: "clear",
                args: &[],
                returns: ReturnType::Void,
                invoke: Invoke::Nullary(|b| void(b.lens().clear())),
            },
        ],
    },
    NamespaceSchema {
        name: "export",
        permission: Permission::Export,
        methods: &[
            MethodSchema {
                name: "csv",
                args: &[EntityRefList, GenericValue],
                returns: ReturnType::String,
                invoke: Invoke::Binary(|b, refs, options| {
                    b.export().csv(refs.entity_refs(), options.value()).map(Value::String)
                }),
            },
            MethodSchema {
                name: "json",
                args: &[EntityRefList, RestStrings],
                returns: ReturnType::GenericValue,
                invoke: Invoke::Binary(|b, refs, columns| {
                    b.export().json(refs.entity_refs(), columns.strings())
                }),
            },
            MethodSchema {
                name: "download",
                args: &[Str, Str, Str],
                returns: ReturnType::Void,
                invoke: Invoke::Ternary(|b, content, filename, mime_type| {
                    void(b.export().download(
                        required_string(content, "content")?,
                        required_string(filename, "filename")?,
                        mime_type.as_str().unwrap_or("text/plain"),
                    ))
                }),
            },
        ],
    },
];

/// Looks up a namespace in the built-in table.
pub fn namespace(name: &str) -> Option<&'static NamespaceSchema> {
    NAMESPACES.iter().find(|ns| ns.name == name)
}
