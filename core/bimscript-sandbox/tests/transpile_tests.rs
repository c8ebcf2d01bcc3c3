//! Integration tests for the typed-dialect seam: detection, forced and
//! disabled transpilation, and transpiler failures.

use bimscript_sandbox::fakes::RecordingBackend;
use bimscript_sandbox::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Strips `: number` annotations and counts invocations.
#[derive(Default)]
struct StripNumberAnnotations {
    calls: AtomicUsize,
}

impl Transpiler for StripNumberAnnotations {
    fn transpile(&self, code: &str, _filename: &str) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(code.replace(": number", ""))
    }
}

struct Rejecting;

impl Transpiler for Rejecting {
    fn transpile(&self, _code: &str, filename: &str) -> Result<String, String> {
        Err(format!("{filename}: unexpected token"))
    }
}

fn sandbox(transpiler: Option<Arc<dyn Transpiler>>) -> Sandbox {
    let mut sandbox = Sandbox::with_defaults(Arc::new(RecordingBackend::new()));
    if let Some(t) = transpiler {
        sandbox = sandbox.with_transpiler(t);
    }
    sandbox.init().unwrap();
    sandbox
}

#[test]
fn typed_source_is_transpiled() {
    let transpiler = Arc::new(StripNumberAnnotations::default());
    let mut sb = sandbox(Some(transpiler.clone() as Arc<dyn Transpiler>));
    let result = sb.eval("const n: number = 20; n + 1").unwrap();
    assert_eq!(result.value, json!(21));
    assert_eq!(transpiler.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn plain_source_skips_the_transpiler() {
    let transpiler = Arc::new(StripNumberAnnotations::default());
    let mut sb = sandbox(Some(transpiler.clone() as Arc<dyn Transpiler>));
    sb.eval("const n = 20; n + 1").unwrap();
    assert_eq!(transpiler.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn forced_and_disabled_dialect() {
    let transpiler = Arc::new(StripNumberAnnotations::default());
    let mut sb = sandbox(Some(transpiler.clone() as Arc<dyn Transpiler>));

    sb.eval_with("1", &EvalOptions::new().with_alt_dialect(true)).unwrap();
    assert_eq!(transpiler.calls.load(Ordering::SeqCst), 1);

    let err = sb
        .eval_with("let x: number = 1; x", &EvalOptions::new().with_alt_dialect(false))
        .unwrap_err()
        .into_script_error()
        .unwrap();
    assert_eq!(err.name.as_deref(), Some("SyntaxError"));
    assert_eq!(transpiler.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn transpiler_failure_is_a_transpile_fault() {
    let mut sb = sandbox(Some(Arc::new(Rejecting) as Arc<dyn Transpiler>));
    let err = sb
        .eval_with(
            "interface Wall { id: number }",
            &EvalOptions::new().with_filename("walls.ts"),
        )
        .unwrap_err()
        .into_script_error()
        .unwrap();
    assert_eq!(err.kind, FaultKind::Transpile);
    assert_eq!(err.message, "walls.ts: unexpected token");
    assert_eq!(err.filename.as_deref(), Some("walls.ts"));
    assert!(sb.is_ready());
}

#[test]
fn forced_dialect_without_transpiler_fails() {
    let mut sb = sandbox(None);
    let err = sb
        .eval_with("1", &EvalOptions::new().with_alt_dialect(true))
        .unwrap_err()
        .into_script_error()
        .unwrap();
    assert_eq!(err.kind, FaultKind::Transpile);
}

#[test]
fn detected_dialect_without_transpiler_runs_as_is() {
    let mut sb = sandbox(None);
    // Runs unchanged, so the engine rejects the cast syntax itself.
    let err = sb.eval("const n = 5; const m = n as number; m").unwrap_err();
    assert_eq!(err.script_error().and_then(|e| e.name.as_deref()), Some("SyntaxError"));
    assert_eq!(sb.eval("const ok = 1; ok").unwrap().value, json!(1));
}
