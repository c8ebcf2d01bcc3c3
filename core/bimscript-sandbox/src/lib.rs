//! QuickJS-based script sandbox for BIM automation scripts.
//!
//! Runs short, user-authored scripts against a permissioned capability
//! surface exposed as `bim.<namespace>.<method>`, with heap, stack and
//! wall-clock ceilings per session.
//!
//! Each `Sandbox` owns one QuickJS runtime and one context. The capability
//! table is a static registry; a single generic bridge turns each row into
//! a script-callable function, so there is no per-method binding code.

pub mod backend;
mod bridge;
pub mod codec;
mod config;
mod console;
mod envelope;
mod error;
pub mod fakes;
mod limits;
mod module;
mod permissions;
pub mod registry;
mod sandbox;
pub mod schema;
mod transpile;

pub use backend::{
    CapabilityBackend, CapabilityResult, ExportCapability, LensCapability, ModelCapability,
    MutateCapability, QueryCapability, ViewerCapability,
};
pub use bridge::ROOT_NAME;
pub use config::SandboxConfig;
pub use console::{MAX_LOG_BYTES, MAX_LOG_ENTRIES};
pub use envelope::{FaultKind, ScriptError, ScriptResult};
pub use error::{CapabilityError, CodecError, SandboxError, SchemaError};
pub use limits::{LimitOverrides, ResourceLimiter, ResourceLimits};
pub use module::ScriptModule;
pub use permissions::{Permission, Permissions};
pub use sandbox::{DEFAULT_FILENAME, EvalOptions, Sandbox, SandboxResourceMetrics};
pub use transpile::{Transpiler, looks_like_typed_dialect};

pub use bimscript_types::{EntityRef, LogEntry, LogLevel, SessionId};
