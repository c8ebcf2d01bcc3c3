//! Error types for the script sandbox.

use crate::envelope::{FaultKind, ScriptError};
use bimscript_types::SessionId;
use thiserror::Error;

/// Errors surfaced to the caller of a [`Sandbox`](crate::Sandbox) operation.
///
/// Script faults travel in [`SandboxError::Script`]; every other variant is
/// an initialization, configuration or misuse fault.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox initialization failed: {0}")]
    InitializationFailed(String),

    #[error("script module unavailable: {0}")]
    ModuleUnavailable(#[from] SchemaError),

    #[error("sandbox {session} used before init()")]
    NotInitialized { session: SessionId },

    #[error("sandbox {session} used after dispose()")]
    Disposed { session: SessionId },

    #[error("sandbox {session} is unusable after a {kind} fault; call init() to rebuild it")]
    Poisoned { session: SessionId, kind: FaultKind },

    #[error("invalid sandbox configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Script(Box<ScriptError>),
}

impl SandboxError {
    /// True when the error came from the executed script (thrown error or
    /// ceiling breach) rather than from misuse of the sandbox.
    pub fn is_script_fault(&self) -> bool {
        matches!(self, Self::Script(_))
    }

    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            Self::Script(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_script_error(self) -> Option<ScriptError> {
        match self {
            Self::Script(err) => Some(*err),
            _ => None,
        }
    }

    /// True for calls made in the wrong lifecycle state.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized { .. } | Self::Disposed { .. } | Self::Poisoned { .. }
        )
    }
}

impl From<ScriptError> for SandboxError {
    fn from(err: ScriptError) -> Self {
        Self::Script(Box::new(err))
    }
}

/// Failure reported by a capability backend. Surfaces inside the script as
/// a catchable exception.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Backend(String),
}

/// A registry row that breaks the schema rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{namespace}.{method}: rest argument must be the last argument")]
    RestNotLast {
        namespace: &'static str,
        method: &'static str,
    },

    #[error("{namespace}.{method}: declares {declared} argument group(s) but invoke takes {arity}")]
    ArityMismatch {
        namespace: &'static str,
        method: &'static str,
        declared: usize,
        arity: usize,
    },

    #[error("{namespace}: duplicate method '{method}'")]
    DuplicateMethod {
        namespace: &'static str,
        method: &'static str,
    },

    #[error("duplicate namespace '{0}'")]
    DuplicateNamespace(&'static str),

    #[error("namespace '{namespace}' must be gated by the '{namespace}' permission, not '{permission}'")]
    PermissionMismatch {
        namespace: &'static str,
        permission: &'static str,
    },

    #[error("namespace '{0}' declares no methods")]
    EmptyNamespace(&'static str),
}

/// Failure converting a value across the VM boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("value nested deeper than {0} levels (cyclic value?)")]
    TooDeep(usize),

    #[error("value exceeds the {0}-byte conversion budget")]
    TooLarge(usize),

    #[error("deadline expired while converting a value")]
    DeadlineExpired,

    #[error("script engine error: {0}")]
    Engine(#[from] rquickjs::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ScriptError;

    #[test]
    fn script_errors_are_not_misuse() {
        let err: SandboxError = ScriptError::new(FaultKind::Thrown, "boom").into();
        assert!(err.is_script_fault());
        assert!(!err.is_misuse());
        assert_eq!(err.script_error().map(|e| e.message.as_str()), Some("boom"));
    }

    #[test]
    fn lifecycle_errors_are_misuse() {
        let session = SessionId::new();
        assert!(SandboxError::NotInitialized { session }.is_misuse());
        assert!(SandboxError::Disposed { session }.is_misuse());
        assert!(
            SandboxError::Poisoned {
                session,
                kind: FaultKind::OutOfMemory
            }
            .is_misuse()
        );
        assert!(!SandboxError::Config("x".into()).is_misuse());
    }

    #[test]
    fn schema_error_messages_name_the_row() {
        let err = SchemaError::ArityMismatch {
            namespace: "viewer",
            method: "colorize",
            declared: 2,
            arity: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("viewer.colorize"));
        assert!(msg.contains("2 argument group(s)"));
    }

    #[test]
    fn capability_error_display() {
        assert_eq!(
            CapabilityError::InvalidArgument("color is required".into()).to_string(),
            "invalid argument: color is required"
        );
        assert_eq!(CapabilityError::Backend("disk full".into()).to_string(), "disk full");
    }
}
