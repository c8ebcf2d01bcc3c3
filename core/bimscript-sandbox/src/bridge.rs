//! Generic bridge builder.
//!
//! Installs the permitted namespaces of a [`ScriptModule`] into a VM context
//! as `bim.<namespace>.<method>`. Every binding runs the same sequence:
//! unmarshal by argument tag, invoke, marshal by return tag. There is no
//! per-method binding code.

use crate::backend::CapabilityBackend;
use crate::codec::{self, DumpBudget};
use crate::error::CodecError;
use crate::module::ScriptModule;
use crate::permissions::Permissions;
use crate::schema::{MethodSchema, NamespaceSchema};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Object, Value};
use std::sync::Arc;
use tracing::debug;

/// Name of the script-visible root object.
pub const ROOT_NAME: &str = "bim";

/// Freezes the raw namespace objects and wraps each in a proxy that turns a
/// read of an unknown method into a `TypeError` naming it. The root itself
/// is a frozen plain object, so a missing namespace reads as `undefined`.
pub(crate) const HARDEN_ROOT: &str = r#"
(function (raw, rootName) {
  'use strict';
  const passthrough = new Set(['toJSON', 'then']);
  const root = {};
  for (const ns of Object.keys(raw)) {
    const target = Object.freeze(Object.assign({}, raw[ns]));
    const available = Object.keys(target).sort().join(', ');
    root[ns] = new Proxy(target, {
      get(t, key, receiver) {
        if (typeof key !== 'string' || key in t || passthrough.has(key)) {
          return Reflect.get(t, key, receiver);
        }
        throw new TypeError(
          `${rootName}.${ns}.${key} is not a function (available: ${available})`
        );
      },
    });
  }
  Object.defineProperty(globalThis, rootName, {
    value: Object.freeze(root),
    enumerable: true,
    writable: false,
    configurable: false,
  });
})
"#;

/// Installs every namespace whose permission is granted and returns the
/// installed namespace names. Denied namespaces are absent from the root.
/// `budget` bounds the conversion of each call's arguments.
pub(crate) fn build<'js>(
    ctx: &Ctx<'js>,
    backend: &Arc<dyn CapabilityBackend>,
    permissions: &Permissions,
    module: &ScriptModule,
    budget: &DumpBudget,
) -> rquickjs::Result<Vec<&'static str>> {
    let raw = Object::new(ctx.clone())?;
    let mut installed = Vec::new();
    for namespace in module.namespaces() {
        if !permissions.is_granted(namespace.permission) {
            continue;
        }
        let object = Object::new(ctx.clone())?;
        for method in namespace.methods {
            object.set(method.name, bind_method(ctx, backend, budget, namespace, method)?)?;
        }
        raw.set(namespace.name, object)?;
        installed.push(namespace.name);
    }

    let harden: Function = ctx.eval(module.prelude())?;
    harden.call::<_, ()>((raw, ROOT_NAME))?;
    Ok(installed)
}

fn bind_method<'js>(
    ctx: &Ctx<'js>,
    backend: &Arc<dyn CapabilityBackend>,
    budget: &DumpBudget,
    namespace: &'static NamespaceSchema,
    method: &'static MethodSchema,
) -> rquickjs::Result<Function<'js>> {
    let backend = Arc::clone(backend);
    let budget = budget.clone();
    Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        dispatch(&ctx, backend.as_ref(), &budget, namespace, method, &args.0)
    })?
    .with_name(method.name)
}

/// The one call path shared by every capability method.
fn dispatch<'js>(
    ctx: &Ctx<'js>,
    backend: &dyn CapabilityBackend,
    budget: &DumpBudget,
    namespace: &NamespaceSchema,
    method: &MethodSchema,
    args: &[Value<'js>],
) -> rquickjs::Result<Value<'js>> {
    debug!(
        namespace = namespace.name,
        method = method.name,
        argc = args.len(),
        "Capability call"
    );

    let native = codec::unmarshal_args(method.args, args, budget)
        .map_err(|e| codec_exception(ctx, namespace, method, e))?;

    let result = method.invoke.call(backend, &native).map_err(|e| {
        debug!(
            namespace = namespace.name,
            method = method.name,
            error = %e,
            "Capability call failed"
        );
        Exception::throw_message(
            ctx,
            &format!("{ROOT_NAME}.{}.{}: {e}", namespace.name, method.name),
        )
    })?;

    codec::marshal_return(ctx, method.returns, &result)
        .map_err(|e| codec_exception(ctx, namespace, method, e))
}

fn codec_exception(
    ctx: &Ctx<'_>,
    namespace: &NamespaceSchema,
    method: &MethodSchema,
    err: CodecError,
) -> rquickjs::Error {
    let message = format!("{ROOT_NAME}.{}.{}: {err}", namespace.name, method.name);
    match err {
        // Already a pending VM exception (e.g. a throwing toString()).
        CodecError::Engine(e) => e,
        // The deadline has tripped; the eval reports a timeout whatever
        // the script does with this exception.
        CodecError::DeadlineExpired => Exception::throw_internal(ctx, &message),
        CodecError::TooLarge(_) => Exception::throw_range(ctx, &message),
        CodecError::TooDeep(_) => Exception::throw_type(ctx, &message),
    }
}
