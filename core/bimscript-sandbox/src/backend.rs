//! Capability backend contract.
//!
//! The host implements these traits; the sandbox only marshals arguments
//! and results and never interprets domain semantics. One sub-trait per
//! script namespace. All methods are synchronous: any asynchronous host
//! work must be completed before returning.
//!
//! Callback-valued arguments are not part of the contract. Nothing here
//! accepts a script function.

use crate::error::CapabilityError;
use bimscript_types::EntityRef;
use serde_json::Value;

pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Loaded models and the active selection.
pub trait ModelCapability {
    fn list(&self) -> CapabilityResult<Value>;
    fn active(&self) -> CapabilityResult<Value>;
    fn active_id(&self) -> CapabilityResult<Option<String>>;
}

/// Read-only entity queries.
pub trait QueryCapability {
    fn all(&self) -> CapabilityResult<Value>;
    fn by_type(&self, types: &[String]) -> CapabilityResult<Value>;
    fn entity(&self, model_id: &str, express_id: u32) -> CapabilityResult<Value>;
    fn attributes(&self, entity: &Value) -> CapabilityResult<Value>;
    fn properties(&self, entity: &Value) -> CapabilityResult<Value>;
    fn quantities(&self, entity: &Value) -> CapabilityResult<Value>;
    fn related(&self, entity: &Value, relationship: &str, direction: &str)
    -> CapabilityResult<Value>;
}

/// 3D viewer presentation state.
pub trait ViewerCapability {
    fn colorize(&self, refs: &[EntityRef], color: &str) -> CapabilityResult<()>;
    fn colorize_all(&self, batches: &Value) -> CapabilityResult<()>;
    fn hide(&self, refs: &[EntityRef]) -> CapabilityResult<()>;
    fn show(&self, refs: &[EntityRef]) -> CapabilityResult<()>;
    fn isolate(&self, refs: &[EntityRef]) -> CapabilityResult<()>;
    fn select(&self, refs: &[EntityRef]) -> CapabilityResult<()>;
    fn fly_to(&self, refs: &[EntityRef]) -> CapabilityResult<()>;
    fn reset_colors(&self) -> CapabilityResult<()>;
    fn reset_visibility(&self) -> CapabilityResult<()>;
}

/// Property edits with undo/redo.
pub trait MutateCapability {
    fn set_property(
        &self,
        entity: &Value,
        pset: &str,
        property: &str,
        value: &Value,
    ) -> CapabilityResult<()>;
    fn delete_property(&self, entity: &Value, pset: &str, property: &str)
    -> CapabilityResult<()>;
    fn undo(&self, model_id: &str) -> CapabilityResult<Value>;
    fn redo(&self, model_id: &str) -> CapabilityResult<Value>;
}

/// Rule-based color/visibility lenses.
pub trait LensCapability {
    fn presets(&self) -> CapabilityResult<Value>;
    fn create(&self, config: &Value) -> CapabilityResult<Value>;
    fn activate(&self, id: &str) -> CapabilityResult<()>;
    fn clear(&self) -> CapabilityResult<()>;
}

/// Tabular and raw data export.
pub trait ExportCapability {
    fn csv(&self, refs: &[EntityRef], options: &Value) -> CapabilityResult<String>;
    fn json(&self, refs: &[EntityRef], columns: &[String]) -> CapabilityResult<Value>;
    fn download(&self, content: &str, filename: &str, mime_type: &str) -> CapabilityResult<()>;
}

/// The host object a sandbox session calls into. Owned by the caller; a
/// sandbox only holds a shared reference for its lifetime.
pub trait CapabilityBackend: Send + Sync {
    fn model(&self) -> &dyn ModelCapability;
    fn query(&self) -> &dyn QueryCapability;
    fn viewer(&self) -> &dyn ViewerCapability;
    fn mutate(&self) -> &dyn MutateCapability;
    fn lens(&self) -> &dyn LensCapability;
    fn export(&self) -> &dyn ExportCapability;
}
