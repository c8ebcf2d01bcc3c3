//! Script sandbox: one QuickJS runtime and context per session.
//!
//! Each `Sandbox` owns:
//! - A VM runtime with heap and stack ceilings and a deadline interrupt
//! - A single context holding the `bim` root and a capturing `console`
//! - A log buffer cleared at the start of every `eval()`
//!
//! The capability backend is shared with the caller and the script module
//! is shared with every other sandbox in the process.

use crate::backend::CapabilityBackend;
use crate::bridge;
use crate::codec::{self, DumpBudget};
use crate::config::SandboxConfig;
use crate::console::{self, LogBuffer};
use crate::envelope::{self, FaultKind, ScriptError, ScriptResult};
use crate::error::SandboxError;
use crate::limits::{ResourceLimiter, ResourceLimits};
use crate::module::ScriptModule;
use crate::permissions::Permissions;
use crate::transpile::{self, Transpiler};
use bimscript_types::SessionId;
use rquickjs::{Context, Ctx, Runtime, Value};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Filename reported for scripts evaluated without one.
pub const DEFAULT_FILENAME: &str = "script.js";

/// Largest thrown non-error value rendered into an error message.
const MAX_THROWN_BYTES: usize = 64 * 1024;

/// Per-call options for [`Sandbox::eval_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalOptions {
    /// Name reported in errors and logs.
    pub filename: Option<String>,
    /// `Some(true)` forces transpilation, `Some(false)` disables it and
    /// `None` decides from the source.
    pub use_alt_dialect: Option<bool>,
}

impl EvalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_alt_dialect(mut self, enabled: bool) -> Self {
        self.use_alt_dialect = Some(enabled);
        self
    }
}

/// VM heap usage for a sandbox session.
/// Used for leak checks across repeated evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SandboxResourceMetrics {
    /// Bytes currently allocated by the VM allocator.
    pub malloc_size: i64,
    /// Bytes in use by live VM structures.
    pub memory_used_size: i64,
    /// Live VM objects.
    pub obj_count: i64,
    /// Configured heap ceiling in bytes.
    pub memory_limit_bytes: usize,
}

struct VmSession {
    // Declared before `runtime`: the context is released first.
    context: Context,
    runtime: Runtime,
    namespaces: Vec<&'static str>,
}

enum SessionState {
    Uninitialized,
    Ready(VmSession),
    /// Kept alive only so `resource_metrics()` can still report on it.
    Poisoned(VmSession, FaultKind),
    Disposed,
}

/// An isolated script session.
///
/// Lifecycle: [`new`](Self::new) → [`init`](Self::init) → any number of
/// [`eval`](Self::eval) calls → [`dispose`](Self::dispose). Dropping a
/// sandbox disposes it. Calls are strictly sequential; a sandbox is not
/// shared between threads.
pub struct Sandbox {
    id: SessionId,
    backend: Arc<dyn CapabilityBackend>,
    permissions: Permissions,
    limiter: ResourceLimiter,
    module: Option<Arc<ScriptModule>>,
    transpiler: Option<Arc<dyn Transpiler>>,
    logs: LogBuffer,
    state: SessionState,
}

impl Sandbox {
    /// Creates an uninitialized sandbox, resolving `config` over the defaults.
    pub fn new(
        backend: Arc<dyn CapabilityBackend>,
        config: &SandboxConfig,
    ) -> Result<Self, SandboxError> {
        let (permissions, limits) = config.resolve()?;
        Ok(Self::with_resolved(backend, permissions, limits))
    }

    /// Creates an uninitialized sandbox with default permissions and limits.
    pub fn with_defaults(backend: Arc<dyn CapabilityBackend>) -> Self {
        Self::with_resolved(backend, Permissions::defaults(), ResourceLimits::default())
    }

    fn with_resolved(
        backend: Arc<dyn CapabilityBackend>,
        permissions: Permissions,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            id: SessionId::new(),
            backend,
            permissions,
            limiter: ResourceLimiter::new(limits),
            module: None,
            transpiler: None,
            logs: LogBuffer::default(),
            state: SessionState::Uninitialized,
        }
    }

    /// Installs the collaborator used for typed-dialect sources.
    pub fn with_transpiler(mut self, transpiler: Arc<dyn Transpiler>) -> Self {
        self.transpiler = Some(transpiler);
        self
    }

    /// Uses `module` instead of the process-wide shared module.
    pub fn with_module(mut self, module: Arc<ScriptModule>) -> Self {
        self.module = Some(module);
        self
    }

    /// Runs `f` against a freshly initialized sandbox and disposes it on
    /// every exit path.
    pub fn scoped<T, F>(
        backend: Arc<dyn CapabilityBackend>,
        config: &SandboxConfig,
        f: F,
    ) -> Result<T, SandboxError>
    where
        F: FnOnce(&mut Sandbox) -> Result<T, SandboxError>,
    {
        let mut sandbox = Self::new(backend, config)?;
        sandbox.init()?;
        let result = f(&mut sandbox);
        sandbox.dispose();
        result
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn limits(&self) -> &ResourceLimits {
        self.limiter.limits()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.state, SessionState::Disposed)
    }

    /// The fault that poisoned the session, if any.
    pub fn poisoned_by(&self) -> Option<FaultKind> {
        match self.state {
            SessionState::Poisoned(_, kind) => Some(kind),
            _ => None,
        }
    }

    /// Namespaces installed on the script root, in registry order. Empty
    /// until `init()` succeeds.
    pub fn installed_namespaces(&self) -> &[&'static str] {
        match &self.state {
            SessionState::Ready(vm) | SessionState::Poisoned(vm, _) => &vm.namespaces,
            _ => &[],
        }
    }

    /// Builds the VM: shared module, fresh runtime with limits applied,
    /// fresh context, console and permitted namespaces.
    ///
    /// A no-op on a ready sandbox. On a poisoned sandbox it replaces the
    /// VM. Fails on a disposed sandbox.
    pub fn init(&mut self) -> Result<(), SandboxError> {
        match self.state {
            SessionState::Ready(_) => return Ok(()),
            SessionState::Disposed => return Err(SandboxError::Disposed { session: self.id }),
            SessionState::Uninitialized | SessionState::Poisoned(..) => {}
        }

        let module = match &self.module {
            Some(module) => Arc::clone(module),
            None => ScriptModule::shared()?,
        };

        let runtime =
            Runtime::new().map_err(|e| SandboxError::InitializationFailed(e.to_string()))?;
        self.limiter.install(&runtime);
        let context = Context::full(&runtime)
            .map_err(|e| SandboxError::InitializationFailed(e.to_string()))?;

        let budget = self.limiter.dump_budget();
        let namespaces = context.with(|ctx| {
            console::install(&ctx, &self.logs, &budget)
                .and_then(|()| {
                    bridge::build(&ctx, &self.backend, &self.permissions, &module, &budget)
                })
                .map_err(|e| SandboxError::InitializationFailed(describe_engine_error(&ctx, e)))
        })?;

        info!(
            session = %self.id,
            namespaces = ?namespaces,
            memory_bytes = self.limits().memory_bytes,
            timeout_ms = self.limits().timeout_ms,
            "Sandbox initialized"
        );

        self.state = SessionState::Ready(VmSession {
            context,
            runtime,
            namespaces,
        });
        Ok(())
    }

    /// Evaluates `code` with default options.
    pub fn eval(&mut self, code: &str) -> Result<ScriptResult, SandboxError> {
        self.eval_with(code, &EvalOptions::default())
    }

    /// Evaluates `code` and returns the completion value of its last
    /// statement together with the console output it produced.
    ///
    /// Script faults come back as [`SandboxError::Script`]; calling this
    /// before `init()`, after `dispose()` or on a poisoned session is a
    /// lifecycle error.
    pub fn eval_with(
        &mut self,
        code: &str,
        options: &EvalOptions,
    ) -> Result<ScriptResult, SandboxError> {
        let vm = match &self.state {
            SessionState::Ready(vm) => vm,
            SessionState::Uninitialized => {
                return Err(SandboxError::NotInitialized { session: self.id });
            }
            SessionState::Poisoned(_, kind) => {
                return Err(SandboxError::Poisoned {
                    session: self.id,
                    kind: *kind,
                });
            }
            SessionState::Disposed => return Err(SandboxError::Disposed { session: self.id }),
        };

        self.logs.clear();
        let filename = options.filename.as_deref().unwrap_or(DEFAULT_FILENAME);
        let started = Instant::now();

        let source = match self.prepare_source(code, filename, options) {
            Ok(source) => source,
            Err(err) => {
                return Err(err
                    .with_context(filename, self.logs.take(), started.elapsed())
                    .into());
            }
        };

        let budget = self.limiter.dump_budget();
        self.limiter.arm();
        let outcome = vm.context.with(|ctx| run(&ctx, &source, &budget));
        let timed_out = self.limiter.disarm();
        let elapsed = started.elapsed();
        let logs = self.logs.take();

        // Host-side work can trip the deadline without the VM raising, e.g.
        // when the script catches the conversion error and finishes.
        let outcome = match outcome {
            Ok(_) if timed_out => Err(ScriptError::new(
                FaultKind::Timeout,
                "script exceeded its time limit",
            )),
            other => other,
        };

        match outcome {
            Ok(value) => {
                debug!(
                    session = %self.id,
                    filename,
                    elapsed_ms = envelope::duration_ms(elapsed),
                    logs = logs.len(),
                    "Script completed"
                );
                Ok(ScriptResult {
                    value,
                    logs,
                    duration_ms: envelope::duration_ms(elapsed),
                })
            }
            Err(mut err) => {
                if timed_out {
                    err.kind = FaultKind::Timeout;
                }
                if err.kind.is_ceiling_breach() {
                    warn!(
                        session = %self.id,
                        filename,
                        kind = %err.kind,
                        elapsed_ms = envelope::duration_ms(elapsed),
                        "Script hit a resource ceiling"
                    );
                } else {
                    debug!(session = %self.id, filename, kind = %err.kind, "Script faulted");
                }
                if err.kind.poisons_session() {
                    self.poison(err.kind);
                }
                Err(err.with_context(filename, logs, elapsed).into())
            }
        }
    }

    fn prepare_source<'a>(
        &self,
        code: &'a str,
        filename: &str,
        options: &EvalOptions,
    ) -> Result<Cow<'a, str>, ScriptError> {
        let wanted = options
            .use_alt_dialect
            .unwrap_or_else(|| transpile::looks_like_typed_dialect(code));
        if !wanted {
            return Ok(Cow::Borrowed(code));
        }
        match (&self.transpiler, options.use_alt_dialect) {
            (Some(transpiler), _) => transpiler
                .transpile(code, filename)
                .map(Cow::Owned)
                .map_err(|message| ScriptError::new(FaultKind::Transpile, message)),
            (None, Some(true)) => Err(ScriptError::new(
                FaultKind::Transpile,
                "typed dialect requested but no transpiler is installed",
            )),
            (None, _) => {
                warn!(
                    session = %self.id,
                    filename,
                    "Source looks typed but no transpiler is installed; running as-is"
                );
                Ok(Cow::Borrowed(code))
            }
        }
    }

    fn poison(&mut self, kind: FaultKind) {
        if let SessionState::Ready(vm) = std::mem::replace(&mut self.state, SessionState::Disposed)
        {
            warn!(session = %self.id, %kind, "Sandbox poisoned; init() required");
            self.state = SessionState::Poisoned(vm, kind);
        }
    }

    /// Forces a GC and reports VM heap usage. `None` before `init()` and
    /// after `dispose()`.
    pub fn resource_metrics(&self) -> Option<SandboxResourceMetrics> {
        let vm = match &self.state {
            SessionState::Ready(vm) | SessionState::Poisoned(vm, _) => vm,
            _ => return None,
        };
        vm.runtime.run_gc();
        let usage = vm.runtime.memory_usage();
        Some(SandboxResourceMetrics {
            malloc_size: usage.malloc_size,
            memory_used_size: usage.memory_used_size,
            obj_count: usage.obj_count,
            memory_limit_bytes: self.limits().memory_bytes,
        })
    }

    /// Releases the context and then the runtime. Idempotent, and safe on a
    /// sandbox whose `init()` never completed.
    pub fn dispose(&mut self) {
        match std::mem::replace(&mut self.state, SessionState::Disposed) {
            SessionState::Ready(vm) | SessionState::Poisoned(vm, _) => {
                drop(vm);
                info!(session = %self.id, "Sandbox disposed");
            }
            SessionState::Uninitialized => {
                debug!(session = %self.id, "Disposed sandbox that was never initialized");
            }
            SessionState::Disposed => {}
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("permissions", &self.permissions)
            .field("limits", self.limiter.limits())
            .field("ready", &self.is_ready())
            .field("poisoned_by", &self.poisoned_by())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Executes the source and dumps its completion value. A dump stopped by
/// the deadline is reported as a timeout by the caller.
fn run(
    ctx: &Ctx<'_>,
    source: &str,
    budget: &DumpBudget,
) -> Result<serde_json::Value, ScriptError> {
    match ctx.eval::<Value, _>(source) {
        Ok(value) => codec::dump_with(&value, budget)
            .map_err(|e| ScriptError::new(FaultKind::Marshal, e.to_string())),
        Err(err) => Err(script_error(ctx, err, budget)),
    }
}

/// Turns an engine error into a script fault, classifying ceiling breaches
/// by the errors QuickJS raises for them. Timeouts are detected by the
/// caller from the deadline, not from the message.
fn script_error(ctx: &Ctx<'_>, err: rquickjs::Error, budget: &DumpBudget) -> ScriptError {
    match err {
        rquickjs::Error::Exception => {
            let thrown = ctx.catch();
            let mut script_err = ScriptError::new(FaultKind::Thrown, String::new());
            if let Some(exception) = thrown.as_exception() {
                script_err.message = exception.message().unwrap_or_default();
                script_err.stack = exception.stack();
                script_err.name = exception.get::<_, Option<String>>("name").ok().flatten();
                script_err.kind = classify(script_err.name.as_deref(), &script_err.message);
            } else {
                let budget = budget.capped(MAX_THROWN_BYTES);
                script_err.message = match codec::dump_with(&thrown, &budget) {
                    Ok(serde_json::Value::String(s)) => s,
                    Ok(other) => other.to_string(),
                    Err(e) => e.to_string(),
                };
            }
            script_err
        }
        rquickjs::Error::Allocation => ScriptError::new(FaultKind::OutOfMemory, "out of memory"),
        other => ScriptError::new(FaultKind::Thrown, other.to_string()),
    }
}

fn classify(name: Option<&str>, message: &str) -> FaultKind {
    let engine_raised = matches!(name, Some("InternalError") | Some("RangeError") | None);
    if !engine_raised {
        return FaultKind::Thrown;
    }
    if message == "out of memory" {
        FaultKind::OutOfMemory
    } else if message.contains("stack overflow")
        || message.contains("Maximum call stack size exceeded")
    {
        FaultKind::StackOverflow
    } else {
        FaultKind::Thrown
    }
}

fn describe_engine_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    match err {
        rquickjs::Error::Exception => script_error(ctx, err, &DumpBudget::default()).message,
        other => other.to_string(),
    }
}
