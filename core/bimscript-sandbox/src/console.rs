//! Script-visible `console` that captures output into the per-eval buffer.
//!
//! The buffer lives on the host, outside the VM heap ceiling, so it is
//! capped by entry count and by bytes. Once either cap is reached a single
//! truncation marker is appended and later output is discarded.

use crate::codec::{self, DumpBudget, NODE_COST};
use bimscript_types::{LogEntry, LogLevel};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use serde_json::Value as Json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

/// Most console entries kept per `eval()`.
pub const MAX_LOG_ENTRIES: usize = 1_000;

/// Most console bytes kept per `eval()`, measured as dumped.
pub const MAX_LOG_BYTES: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct Captured {
    entries: Vec<LogEntry>,
    bytes: usize,
    truncated: bool,
}

/// Log entries captured during the current `eval()`. Cleared at the start
/// of each evaluation and drained into the result envelope at the end.
#[derive(Debug, Clone)]
pub(crate) struct LogBuffer {
    captured: Arc<Mutex<Captured>>,
    max_entries: usize,
    max_bytes: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_caps(MAX_LOG_ENTRIES, MAX_LOG_BYTES)
    }
}

impl LogBuffer {
    pub(crate) fn with_caps(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            captured: Arc::default(),
            max_entries,
            max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.captured.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes still available to the current evaluation, or `None` once the
    /// buffer has been truncated.
    fn remaining_bytes(&self) -> Option<usize> {
        let captured = self.lock();
        (!captured.truncated).then(|| self.max_bytes.saturating_sub(captured.bytes))
    }

    pub(crate) fn push(&self, entry: LogEntry) {
        let size = entry_size(&entry);
        let mut captured = self.lock();
        if captured.truncated {
            return;
        }
        if captured.entries.len() >= self.max_entries || captured.bytes + size > self.max_bytes {
            captured.truncated = true;
            let kept = captured.entries.len();
            warn!(kept, "Script console output truncated");
            captured.entries.push(LogEntry::new(
                LogLevel::Warn,
                vec![Json::String(format!(
                    "console output truncated after {kept} entries"
                ))],
            ));
            return;
        }
        captured.bytes += size;
        captured.entries.push(entry);
    }

    pub(crate) fn clear(&self) {
        *self.lock() = Captured::default();
    }

    pub(crate) fn take(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.lock()).entries
    }
}

/// Size charged against the byte cap, on the same scale as [`DumpBudget`].
fn entry_size(entry: &LogEntry) -> usize {
    entry.args.iter().map(json_size).sum()
}

fn json_size(value: &Json) -> usize {
    NODE_COST
        + match value {
            Json::String(s) => s.len(),
            Json::Array(items) => items.iter().map(json_size).sum(),
            Json::Object(map) => map.iter().map(|(k, v)| k.len() + json_size(v)).sum(),
            _ => 0,
        }
}

/// Installs `console.{log,info,warn,error,debug}` on the context's globals.
/// Arguments are dumped under `budget`, further capped by what the buffer
/// can still hold.
pub(crate) fn install<'js>(
    ctx: &Ctx<'js>,
    buffer: &LogBuffer,
    budget: &DumpBudget,
) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    for level in LogLevel::ALL {
        let buffer = buffer.clone();
        let budget = budget.clone();
        let method = Function::new(ctx.clone(), move |args: Rest<Value<'js>>| {
            let Some(remaining) = buffer.remaining_bytes() else {
                return;
            };
            let budget = budget.capped(remaining);
            let args: Vec<Json> = args
                .0
                .iter()
                .map(|v| {
                    codec::dump_with(v, &budget).unwrap_or_else(|e| Json::String(format!("<{e}>")))
                })
                .collect();
            let entry = LogEntry::new(level, args);
            trace!(level = %entry.level, message = %entry.message(), "script console");
            buffer.push(entry);
        })?
        .with_name(level.method_name())?;
        console.set(level.method_name(), method)?;
    }
    ctx.globals().set("console", console)?;
    Ok(())
}
