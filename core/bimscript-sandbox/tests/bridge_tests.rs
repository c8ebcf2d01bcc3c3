//! Integration tests for the generic bridge: permission gating by absence,
//! argument unmarshaling per tag and result marshaling per return tag.

use bimscript_sandbox::fakes::RecordingBackend;
use bimscript_sandbox::registry::NAMESPACES;
use bimscript_sandbox::*;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

fn run(backend: &Arc<RecordingBackend>, config: &SandboxConfig, code: &str) -> Value {
    let mut sandbox = Sandbox::new(Arc::clone(backend) as Arc<dyn CapabilityBackend>, config)
        .unwrap();
    sandbox.init().unwrap();
    sandbox.eval(code).unwrap().value
}

fn all_granted() -> SandboxConfig {
    Permission::ALL
        .into_iter()
        .fold(SandboxConfig::new(), |c, p| c.with_permission(p, true))
}

// ================================================================
// Permission gating
// ================================================================

#[test]
fn namespace_present_iff_granted_for_every_subset() {
    let backend = Arc::new(RecordingBackend::new());
    for mask in 0u32..(1 << Permission::ALL.len()) {
        let config = Permission::ALL
            .into_iter()
            .enumerate()
            .fold(SandboxConfig::new(), |c, (i, p)| {
                c.with_permission(p, mask & (1 << i) != 0)
            });
        let present = run(
            &backend,
            &config,
            "['model','query','viewer','mutate','lens','export'].map(n => n in bim && typeof bim[n] === 'object')",
        );
        let expected: Vec<bool> = (0..Permission::ALL.len()).map(|i| mask & (1 << i) != 0).collect();
        assert_eq!(present, json!(expected), "mask {mask:#08b}");
    }
    assert!(backend.calls().is_empty());
}

#[test]
fn granted_namespace_exposes_every_registry_method() {
    let backend = Arc::new(RecordingBackend::new());
    for namespace in NAMESPACES {
        let code = format!(
            "Object.keys(bim.{}).filter(k => typeof bim.{}[k] === 'function').sort()",
            namespace.name, namespace.name
        );
        let mut expected: Vec<&str> = namespace.method_names().collect();
        expected.sort_unstable();
        assert_eq!(run(&backend, &all_granted(), &code), json!(expected));
    }
}

#[test]
fn denied_namespace_cannot_be_reached_by_any_path() {
    let backend = Arc::new(RecordingBackend::new());
    let config = SandboxConfig::new();
    let checks = run(
        &backend,
        &config,
        "[typeof bim.mutate, 'mutate' in bim, Object.getOwnPropertyNames(bim).includes('mutate'), JSON.stringify(bim).includes('mutate')]",
    );
    assert_eq!(checks, json!(["undefined", false, false, false]));
}

// ================================================================
// Argument unmarshaling
// ================================================================

#[test]
fn colorize_dispatches_refs_and_color() {
    let backend = Arc::new(RecordingBackend::new());
    run(
        &backend,
        &SandboxConfig::default(),
        "bim.viewer.colorize([{modelId: 'arch', expressId: 12}, {modelId: 'arch', expressId: 13}], '#ff0000')",
    );
    let calls = backend.calls_to("viewer", "colorize");
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].args,
        vec![
            json!([
                {"modelId": "arch", "expressId": 12},
                {"modelId": "arch", "expressId": 13}
            ]),
            json!("#ff0000"),
        ]
    );
}

#[test]
fn entity_ref_list_accepts_wrapped_and_bare_items() {
    let backend = Arc::new(RecordingBackend::new());
    run(
        &backend,
        &SandboxConfig::default(),
        r#"
        const wrapped = {ref: {modelId: 'a', expressId: 1}, name: 'Wall', type: 'IfcWall'};
        const bare = {modelId: 'b', expressId: 2};
        bim.viewer.hide([wrapped, bare, {name: 'no ref'}, 42, null]);
        bim.viewer.select(bare);
        "#,
    );
    assert_eq!(
        backend.calls_to("viewer", "hide")[0].args,
        vec![json!([
            {"modelId": "a", "expressId": 1},
            {"modelId": "b", "expressId": 2}
        ])]
    );
    assert_eq!(
        backend.calls_to("viewer", "select")[0].args,
        vec![json!([{"modelId": "b", "expressId": 2}])]
    );
}

#[test]
fn rest_strings_consume_remaining_arguments() {
    let backend = Arc::new(RecordingBackend::new());
    run(
        &backend,
        &SandboxConfig::default(),
        "bim.query.byType('IfcWall', 'IfcDoor', 3); bim.query.byType(); bim.export.json([], 'Name', 'GlobalId')",
    );
    let by_type = backend.calls_to("query", "byType");
    assert_eq!(by_type[0].args, vec![json!("IfcWall"), json!("IfcDoor"), json!("3")]);
    assert!(by_type[1].args.is_empty());
    assert_eq!(
        backend.calls_to("export", "json")[0].args,
        vec![json!([]), json!(["Name", "GlobalId"])]
    );
}

#[test]
fn generic_values_are_dumped_recursively() {
    let backend = Arc::new(RecordingBackend::new());
    run(
        &backend,
        &all_granted(),
        "bim.mutate.setProperty({modelId: 'm', expressId: 5}, 'Pset_WallCommon', 'FireRating', {value: 'EI60', unit: null, f: () => 1})",
    );
    assert_eq!(
        backend.calls_to("mutate", "setProperty")[0].args,
        vec![
            json!({"modelId": "m", "expressId": 5}),
            json!("Pset_WallCommon"),
            json!("FireRating"),
            json!({"value": "EI60", "unit": null}),
        ]
    );
}

#[test]
fn missing_required_string_throws_catchable_error() {
    let backend = Arc::new(RecordingBackend::new());
    let message = run(
        &backend,
        &SandboxConfig::default(),
        "try { bim.viewer.colorize([]); 'ok' } catch (e) { e.message }",
    );
    assert_eq!(message, json!("bim.viewer.colorize: invalid argument: color is required"));
    assert!(backend.calls_to("viewer", "colorize").is_empty());
}

#[test]
fn throwing_to_string_propagates_script_error() {
    let backend = Arc::new(RecordingBackend::new());
    let message = run(
        &backend,
        &SandboxConfig::default(),
        "try { bim.lens.activate({toString() { throw new Error('nope') }}); 'ok' } catch (e) { e.message }",
    );
    assert_eq!(message, json!("nope"));
}

// ================================================================
// Result marshaling
// ================================================================

#[test]
fn generic_results_round_trip_into_script() {
    let backend = Arc::new(
        RecordingBackend::new().with_response(
            "query",
            "byType",
            json!([{"ref": {"modelId": "m", "expressId": 7}, "name": "W-01", "props": {"h": 2.75}}]),
        ),
    );
    let value = run(
        &backend,
        &SandboxConfig::default(),
        "const walls = bim.query.byType('IfcWall'); bim.viewer.isolate(walls); [walls.length, walls[0].name, walls[0].props.h]",
    );
    assert_eq!(value, json!([1, "W-01", 2.75]));
    assert_eq!(
        backend.calls_to("viewer", "isolate")[0].args,
        vec![json!([{"modelId": "m", "expressId": 7}])]
    );
}

#[test]
fn void_and_string_returns() {
    let backend = Arc::new(RecordingBackend::new().with_response("export", "csv", json!("a,b\n1,2")));
    let value = run(
        &backend,
        &SandboxConfig::default(),
        "[typeof bim.viewer.resetColors(), bim.export.csv([], {delimiter: ','}), bim.model.activeId()]",
    );
    assert_eq!(value, json!(["undefined", "a,b\n1,2", null]));
}

#[test]
fn backend_failures_surface_as_catchable_errors() {
    let backend = Arc::new(RecordingBackend::new().with_failure(
        "mutate",
        "undo",
        CapabilityError::Backend("nothing to undo".into()),
    ));
    let value = run(
        &backend,
        &all_granted(),
        "try { bim.mutate.undo('arch'); 'ok' } catch (e) { [e instanceof Error, e.message] }",
    );
    assert_eq!(value, json!([true, "bim.mutate.undo: nothing to undo"]));
}

#[test]
fn uncaught_backend_failure_fails_eval() {
    let backend = Arc::new(RecordingBackend::new().with_failure(
        "model",
        "list",
        CapabilityError::Unsupported("no models loaded".into()),
    ));
    let mut sandbox = Sandbox::with_defaults(backend);
    sandbox.init().unwrap();
    let err = sandbox.eval("bim.model.list()").unwrap_err().into_script_error().unwrap();
    assert_eq!(err.kind, FaultKind::Thrown);
    assert!(err.message.contains("not supported: no models loaded"));
}
