//! Shared value types for the BIM script sandbox.
//!
//! This crate holds the plain data that crosses the sandbox boundary and
//! has no dependency on the script engine:
//! - Session identifiers (UUID v7)
//! - Entity references (`{modelId, expressId}`)
//! - Captured console log entries
//!
//! Engine-facing types (handles, schemas, the bridge) live in
//! `bimscript-sandbox`.

mod entity;
mod ids;
mod log;

pub use entity::EntityRef;
pub use ids::SessionId;
pub use log::{LogEntry, LogLevel};

