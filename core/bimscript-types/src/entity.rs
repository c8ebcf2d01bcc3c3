//! Entity references addressed across the sandbox boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Minimal identifier for a domain entity: the model it lives in and its
/// STEP express id within that model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub model_id: String,
    pub express_id: u32,
}

impl EntityRef {
    pub fn new(model_id: impl Into<String>, express_id: u32) -> Self {
        Self {
            model_id: model_id.into(),
            express_id,
        }
    }

    /// Extracts a reference from a loosely shaped value.
    ///
    /// Accepts both the wrapped shape (`{ref: {modelId, expressId}, ...}`)
    /// and the bare shape (`{modelId, expressId}`). Returns `None` when
    /// neither carries both fields.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if let Some(inner) = obj.get("ref") {
            if let Some(r) = Self::from_bare(inner) {
                return Some(r);
            }
        }
        Self::from_bare(value)
    }

    fn from_bare(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let model_id = obj.get("modelId")?.as_str()?;
        let express_id = express_id_of(obj.get("expressId")?)?;
        Some(Self::new(model_id, express_id))
    }

    /// Converts to the plain JSON shape handed to capability backends.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "modelId": self.model_id,
            "expressId": self.express_id,
        })
    }
}

/// Script numbers arrive as either integers or integral floats.
fn express_id_of(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= 0.0 && f <= f64::from(u32::MAX) {
        Some(f as u32)
    } else {
        None
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model_id, self.express_id)
    }
}
