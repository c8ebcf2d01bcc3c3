//! Caller-facing result envelope for one `eval()`.
//!
//! Success and failure carry the same captured logs and elapsed duration,
//! so a caller can always show what the script printed before it stopped.

use bimscript_types::LogEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Successful evaluation: the script's completion value plus its console output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResult {
    pub value: Value,
    pub logs: Vec<LogEntry>,
    pub duration_ms: f64,
}

/// What stopped a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    /// The script threw (or a capability call threw on its behalf).
    Thrown,
    /// The wall-clock deadline expired and the interrupt handler fired.
    Timeout,
    /// The heap ceiling was reached.
    OutOfMemory,
    /// The stack ceiling was reached.
    StackOverflow,
    /// The source could not be transpiled into the execution dialect.
    Transpile,
    /// The completion value could not be converted back to a host value.
    Marshal,
}

impl FaultKind {
    /// Memory, stack and timeout faults come from the resource limiter.
    pub fn is_ceiling_breach(&self) -> bool {
        matches!(self, Self::Timeout | Self::OutOfMemory | Self::StackOverflow)
    }

    /// Faults after which the VM state is no longer trusted.
    pub fn poisons_session(&self) -> bool {
        matches!(self, Self::OutOfMemory)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thrown => "thrown",
            Self::Timeout => "timeout",
            Self::OutOfMemory => "out-of-memory",
            Self::StackOverflow => "stack-overflow",
            Self::Transpile => "transpile",
            Self::Marshal => "marshal",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed evaluation. Same shape as [`ScriptResult`] plus the fault details.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("script {kind}: {message}")]
pub struct ScriptError {
    pub kind: FaultKind,
    pub message: String,
    /// Error constructor name (`TypeError`, `InternalError`, ...) when the
    /// thrown value was an error object.
    pub name: Option<String>,
    pub stack: Option<String>,
    pub filename: Option<String>,
    pub logs: Vec<LogEntry>,
    pub duration_ms: f64,
}

impl ScriptError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            name: None,
            stack: None,
            filename: None,
            logs: Vec::new(),
            duration_ms: 0.0,
        }
    }

    pub(crate) fn with_context(
        mut self,
        filename: &str,
        logs: Vec<LogEntry>,
        elapsed: Duration,
    ) -> Self {
        self.filename = Some(filename.to_string());
        self.logs = logs;
        self.duration_ms = duration_ms(elapsed);
        self
    }
}

pub(crate) fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
