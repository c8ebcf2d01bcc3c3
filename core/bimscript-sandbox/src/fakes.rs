//! In-memory capability backend that records every call.
//!
//! `RecordingBackend` implements every capability trait, stores each call
//! with its arguments as JSON, and answers from canned responses keyed by
//! `"namespace.method"`. Used by the test suites and by the CLI's dry runs.

use crate::backend::*;
use crate::error::{CapabilityError, SandboxError};
use bimscript_types::EntityRef;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One capability call as the backend received it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedCall {
    pub namespace: String,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<RecordedCall>>,
    responses: HashMap<String, Value>,
    failures: HashMap<String, CapabilityError>,
}

fn key(namespace: &str, method: &str) -> String {
    format!("{namespace}.{method}")
}

fn refs_value(refs: &[EntityRef]) -> Value {
    Value::Array(refs.iter().map(EntityRef::to_value).collect())
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `namespace.method` with `response` instead of the default.
    pub fn with_response(mut self, namespace: &str, method: &str, response: Value) -> Self {
        self.responses.insert(key(namespace, method), response);
        self
    }

    /// Makes `namespace.method` fail with `error`.
    pub fn with_failure(mut self, namespace: &str, method: &str, error: CapabilityError) -> Self {
        self.failures.insert(key(namespace, method), error);
        self
    }

    /// Seeds responses from a JSON object such as
    /// `{"query.all": [...], "model.activeId": "arch"}`.
    pub fn from_fixtures(fixtures: &Value) -> Result<Self, SandboxError> {
        let map = fixtures.as_object().ok_or_else(|| {
            SandboxError::Config("fixtures must be an object keyed by \"namespace.method\"".into())
        })?;
        let mut backend = Self::new();
        for (name, response) in map {
            if !name.contains('.') {
                return Err(SandboxError::Config(format!(
                    "fixture key '{name}' is not of the form namespace.method"
                )));
            }
            backend.responses.insert(name.clone(), response.clone());
        }
        Ok(backend)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().clone()
    }

    pub fn calls_to(&self, namespace: &str, method: &str) -> Vec<RecordedCall> {
        self.lock()
            .iter()
            .filter(|c| c.namespace == namespace && c.method == method)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().clear();
    }

    fn respond(
        &self,
        namespace: &str,
        method: &str,
        args: Vec<Value>,
        default: Value,
    ) -> CapabilityResult<Value> {
        self.lock().push(RecordedCall {
            namespace: namespace.to_string(),
            method: method.to_string(),
            args,
        });
        let name = key(namespace, method);
        if let Some(err) = self.failures.get(&name) {
            return Err(err.clone());
        }
        Ok(self.responses.get(&name).cloned().unwrap_or(default))
    }

    fn ack(&self, namespace: &str, method: &str, args: Vec<Value>) -> CapabilityResult<()> {
        self.respond(namespace, method, args, Value::Null).map(|_| ())
    }
}

impl ModelCapability for RecordingBackend {
    fn list(&self) -> CapabilityResult<Value> {
        self.respond("model", "list", vec![], json!([]))
    }

    fn active(&self) -> CapabilityResult<Value> {
        self.respond("model", "active", vec![], Value::Null)
    }

    fn active_id(&self) -> CapabilityResult<Option<String>> {
        let value = self.respond("model", "activeId", vec![], Value::Null)?;
        Ok(value.as_str().map(str::to_string))
    }
}

impl QueryCapability for RecordingBackend {
    fn all(&self) -> CapabilityResult<Value> {
        self.respond("query", "all", vec![], json!([]))
    }

    fn by_type(&self, types: &[String]) -> CapabilityResult<Value> {
        let args = types.iter().cloned().map(Value::String).collect();
        self.respond("query", "byType", args, json!([]))
    }

    fn entity(&self, model_id: &str, express_id: u32) -> CapabilityResult<Value> {
        self.respond("query", "entity", vec![json!(model_id), json!(express_id)], Value::Null)
    }

    fn attributes(&self, entity: &Value) -> CapabilityResult<Value> {
        self.respond("query", "attributes", vec![entity.clone()], json!({}))
    }

    fn properties(&self, entity: &Value) -> CapabilityResult<Value> {
        self.respond("query", "properties", vec![entity.clone()], json!([]))
    }

    fn quantities(&self, entity: &Value) -> CapabilityResult<Value> {
        self.respond("query", "quantities", vec![entity.clone()], json!([]))
    }

    fn related(
        &self,
        entity: &Value,
        relationship: &str,
        direction: &str,
    ) -> CapabilityResult<Value> {
        let args = vec![entity.clone(), json!(relationship), json!(direction)];
        self.respond("query", "related", args, json!([]))
    }
}

impl ViewerCapability for RecordingBackend {
    fn colorize(&self, refs: &[EntityRef], color: &str) -> CapabilityResult<()> {
        self.ack("viewer", "colorize", vec![refs_value(refs), json!(color)])
    }

    fn colorize_all(&self, batches: &Value) -> CapabilityResult<()> {
        self.ack("viewer", "colorizeAll", vec![batches.clone()])
    }

    fn hide(&self, refs: &[EntityRef]) -> CapabilityResult<()> {
        self.ack("viewer", "hide", vec![refs_value(refs)])
    }

    fn show(&self, refs: &[EntityRef]) -> CapabilityResult<()> {
        self.ack("viewer", "show", vec![refs_value(refs)])
    }

    fn isolate(&self, refs: &[EntityRef]) -> CapabilityResult<()> {
        self.ack("viewer", "isolate", vec![refs_value(refs)])
    }

    fn select(&self, refs: &[EntityRef]) -> CapabilityResult<()> {
        self.ack("viewer", "select", vec![refs_value(refs)])
    }

    fn fly_to(&self, refs: &[EntityRef]) -> CapabilityResult<()> {
        self.ack("viewer", "flyTo", vec![refs_value(refs)])
    }

    fn reset_colors(&self) -> CapabilityResult<()> {
        self.ack("viewer", "resetColors", vec![])
    }

    fn reset_visibility(&self) -> CapabilityResult<()> {
        self.ack("viewer", "resetVisibility", vec![])
    }
}

impl MutateCapability for RecordingBackend {
    fn set_property(
        &self,
        entity: &Value,
        pset: &str,
        property: &str,
        value: &Value,
    ) -> CapabilityResult<()> {
        let args = vec![entity.clone(), json!(pset), json!(property), value.clone()];
        self.ack("mutate", "setProperty", args)
    }

    fn delete_property(
        &self,
        entity: &Value,
        pset: &str,
        property: &str,
    ) -> CapabilityResult<()> {
        let args = vec![entity.clone(), json!(pset), json!(property)];
        self.ack("mutate", "deleteProperty", args)
    }

    fn undo(&self, model_id: &str) -> CapabilityResult<Value> {
        self.respond("mutate", "undo", vec![json!(model_id)], json!(false))
    }

    fn redo(&self, model_id: &str) -> CapabilityResult<Value> {
        self.respond("mutate", "redo", vec![json!(model_id)], json!(false))
    }
}

impl LensCapability for RecordingBackend {
    fn presets(&self) -> CapabilityResult<Value> {
        self.respond("lens", "presets", vec![], json!([]))
    }

    fn create(&self, config: &Value) -> CapabilityResult<Value> {
        self.respond("lens", "create", vec![config.clone()], config.clone())
    }

    fn activate(&self, id: &str) -> CapabilityResult<()> {
        self.ack("lens", "activate", vec![json!(id)])
    }

    fn clear(&self) -> CapabilityResult<()> {
        self.ack("lens", "clear", vec![])
    }
}

impl ExportCapability for RecordingBackend {
    fn csv(&self, refs: &[EntityRef], options: &Value) -> CapabilityResult<String> {
        let value = self.respond("export", "csv", vec![refs_value(refs), options.clone()], json!(""))?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    fn json(&self, refs: &[EntityRef], columns: &[String]) -> CapabilityResult<Value> {
        let columns = Value::Array(columns.iter().cloned().map(Value::String).collect());
        self.respond("export", "json", vec![refs_value(refs), columns], json!([]))
    }

    fn download(&self, content: &str, filename: &str, mime_type: &str) -> CapabilityResult<()> {
        let args = vec![json!(content), json!(filename), json!(mime_type)];
        self.ack("export", "download", args)
    }
}

impl CapabilityBackend for RecordingBackend {
    fn model(&self) -> &dyn ModelCapability {
        self
    }

    fn query(&self) -> &dyn QueryCapability {
        self
    }

    fn viewer(&self) -> &dyn ViewerCapability {
        self
    }

    fn mutate(&self) -> &dyn MutateCapability {
        self
    }

    fn lens(&self) -> &dyn LensCapability {
        self
    }

    fn export(&self) -> &dyn ExportCapability {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn records_calls_in_order() {
        let backend = RecordingBackend::new();
        backend.viewer().hide(&[EntityRef::new("m", 1)]).unwrap();
        backend.query().by_type(&["IfcWall".into()]).unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, "hide");
        assert_eq!(calls[1].args, vec![json!("IfcWall")]);

        backend.clear_calls();
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn defaults_for_list_like_methods() {
        let backend = RecordingBackend::new();
        assert_eq!(backend.model().list().unwrap(), json!([]));
        assert_eq!(backend.query().all().unwrap(), json!([]));
        assert_eq!(backend.model().active_id().unwrap(), None);
        assert_eq!(backend.export().csv(&[], &Value::Null).unwrap(), "");
    }

    #[test]
    fn canned_responses_and_failures() {
        let backend = RecordingBackend::new()
            .with_response("model", "activeId", json!("arch"))
            .with_failure("lens", "activate", CapabilityError::NotFound("lens x".into()));
        assert_eq!(backend.model().active_id().unwrap().as_deref(), Some("arch"));
        assert_eq!(
            backend.lens().activate("x"),
            Err(CapabilityError::NotFound("lens x".into()))
        );
        assert_eq!(backend.calls_to("lens", "activate").len(), 1);
    }

    #[test]
    fn fixtures_seed_responses() {
        let backend =
            RecordingBackend::from_fixtures(&json!({"query.all": [{"expressId": 1}]})).unwrap();
        assert_eq!(backend.query().all().unwrap(), json!([{"expressId": 1}]));

        assert!(RecordingBackend::from_fixtures(&json!([1])).is_err());
        assert!(RecordingBackend::from_fixtures(&json!({"all": 1})).is_err());
    }
}
