//! Resource ceilings for one sandbox session.
//!
//! Heap and stack ceilings are enforced by QuickJS itself (its allocator and
//! stack check). The wall-clock ceiling is cooperative: the VM polls an
//! interrupt handler between bytecode steps and the handler compares the
//! clock against the deadline armed at the start of each `eval()`. The
//! timeout is therefore a soft ceiling; overrun is bounded by the VM's
//! polling interval, not cycle-exact.

use crate::codec::DumpBudget;
use rquickjs::Runtime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

pub const DEFAULT_MEMORY_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_MAX_STACK_BYTES: usize = 512 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Smallest heap QuickJS can build a full context in.
pub const MIN_MEMORY_BYTES: usize = 1024 * 1024;
pub const MIN_STACK_BYTES: usize = 64 * 1024;

/// Resource limits for a sandbox session. Applied once, when the VM
/// runtime is created, and immutable for the session's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceLimits {
    /// Heap ceiling in bytes.
    pub memory_bytes: usize,
    /// Native stack ceiling in bytes.
    pub max_stack_bytes: usize,
    /// Wall-clock budget per `eval()` in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_BYTES,
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ResourceLimits {
    /// Tighter ceilings for untrusted, ad-hoc scripts.
    pub fn strict() -> Self {
        Self {
            memory_bytes: 16 * 1024 * 1024,
            max_stack_bytes: 256 * 1024,
            timeout_ms: 1_000,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.memory_bytes < MIN_MEMORY_BYTES {
            return Err(format!(
                "memory-bytes must be at least {MIN_MEMORY_BYTES} (got {})",
                self.memory_bytes
            ));
        }
        if self.max_stack_bytes < MIN_STACK_BYTES {
            return Err(format!(
                "max-stack-bytes must be at least {MIN_STACK_BYTES} (got {})",
                self.max_stack_bytes
            ));
        }
        if self.timeout_ms == 0 {
            return Err("timeout-ms must be greater than zero".into());
        }
        Ok(())
    }
}

/// Partial limits as they appear in configuration; unset fields keep
/// their defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LimitOverrides {
    pub memory_bytes: Option<usize>,
    pub max_stack_bytes: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl LimitOverrides {
    pub fn apply_to(&self, base: ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            memory_bytes: self.memory_bytes.unwrap_or(base.memory_bytes),
            max_stack_bytes: self.max_stack_bytes.unwrap_or(base.max_stack_bytes),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
        }
    }
}

/// Wall-clock deadline shared between the sandbox and the VM's interrupt
/// handler. Lock-free: the handler runs inside the interpreter loop.
#[derive(Debug)]
pub struct Deadline {
    origin: Instant,
    /// Nanoseconds after `origin`; zero means disarmed.
    expires_at: AtomicU64,
    tripped: AtomicBool,
}

impl Deadline {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            expires_at: AtomicU64::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    fn arm(&self, budget: Duration) {
        let at = self.origin.elapsed().saturating_add(budget).as_nanos();
        let at = u64::try_from(at).unwrap_or(u64::MAX).max(1);
        self.tripped.store(false, Ordering::SeqCst);
        self.expires_at.store(at, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.expires_at.store(0, Ordering::SeqCst);
    }

    /// Called by the VM between steps. Returns `true` to interrupt.
    fn poll(&self) -> bool {
        let at = self.expires_at.load(Ordering::Relaxed);
        if at == 0 {
            return false;
        }
        let now = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        if now >= at {
            self.tripped.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Host-side check for work the interrupt handler cannot see, such as
    /// value conversion. Trips the deadline like the VM poll does.
    pub(crate) fn expired(&self) -> bool {
        self.poll()
    }
}

/// Applies [`ResourceLimits`] to a VM runtime and owns the per-eval deadline.
#[derive(Debug)]
pub struct ResourceLimiter {
    limits: ResourceLimits,
    deadline: Arc<Deadline>,
}

impl ResourceLimiter {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            deadline: Arc::new(Deadline::new()),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Configures a freshly created runtime. Called exactly once per runtime.
    pub fn install(&self, runtime: &Runtime) {
        runtime.set_memory_limit(self.limits.memory_bytes);
        runtime.set_max_stack_size(self.limits.max_stack_bytes);
        let deadline = Arc::clone(&self.deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || deadline.poll())));
    }

    /// Conversion budget for host-side work done on behalf of the script:
    /// no more output than the VM heap could hold, and stopped by the same
    /// deadline as the VM.
    pub fn dump_budget(&self) -> DumpBudget {
        DumpBudget::new(self.limits.memory_bytes).with_deadline(Arc::clone(&self.deadline))
    }

    /// Starts the wall clock for one evaluation.
    pub fn arm(&self) {
        self.deadline.arm(self.limits.timeout());
    }

    /// Stops the wall clock. Returns whether the deadline fired during the
    /// evaluation that just finished.
    pub fn disarm(&self) -> bool {
        self.deadline.disarm();
        let tripped = self.deadline.tripped();
        if tripped {
            warn!(timeout_ms = self.limits.timeout_ms, "script deadline expired");
        }
        tripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_values() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.memory_bytes, 64 * 1024 * 1024);
        assert_eq!(limits.max_stack_bytes, 512 * 1024);
        assert_eq!(limits.timeout_ms, 5_000);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn strict_limits_tighter_than_default() {
        let strict = ResourceLimits::strict();
        let default = ResourceLimits::default();
        assert!(strict.memory_bytes < default.memory_bytes);
        assert!(strict.max_stack_bytes < default.max_stack_bytes);
        assert!(strict.timeout_ms < default.timeout_ms);
        assert!(strict.validate().is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_limits() {
        let base = ResourceLimits::default();
        assert!(ResourceLimits { memory_bytes: 1024, ..base }.validate().is_err());
        assert!(ResourceLimits { max_stack_bytes: 10, ..base }.validate().is_err());
        assert!(ResourceLimits { timeout_ms: 0, ..base }.validate().is_err());
    }

    #[test]
    fn overrides_replace_only_set_fields() {
        let overrides = LimitOverrides {
            timeout_ms: Some(250),
            ..Default::default()
        };
        let limits = overrides.apply_to(ResourceLimits::default());
        assert_eq!(limits.timeout_ms, 250);
        assert_eq!(limits.memory_bytes, DEFAULT_MEMORY_BYTES);
        assert_eq!(limits.max_stack_bytes, DEFAULT_MAX_STACK_BYTES);
    }

    #[test]
    fn disarmed_deadline_never_fires() {
        let deadline = Deadline::new();
        assert!(!deadline.poll());
        assert!(!deadline.tripped());
    }

    #[test]
    fn expired_deadline_fires_and_trips() {
        let deadline = Deadline::new();
        deadline.arm(Duration::ZERO);
        assert!(deadline.poll());
        assert!(deadline.tripped());
    }

    #[test]
    fn rearming_clears_trip() {
        let deadline = Deadline::new();
        deadline.arm(Duration::ZERO);
        assert!(deadline.poll());
        deadline.arm(Duration::from_secs(60));
        assert!(!deadline.tripped());
        assert!(!deadline.poll());
    }

    #[test]
    fn dump_budget_follows_heap_and_deadline() {
        let limiter = ResourceLimiter::new(ResourceLimits {
            memory_bytes: 2 * 1024 * 1024,
            timeout_ms: 1,
            ..ResourceLimits::default()
        });
        let budget = limiter.dump_budget();
        assert_eq!(budget.max_bytes(), 2 * 1024 * 1024);
        assert!(!budget.deadline_expired());

        limiter.arm();
        std::thread::sleep(Duration::from_millis(5));
        assert!(budget.deadline_expired());
        // A host-side expiry counts as a timeout for the eval.
        assert!(limiter.disarm());
    }

    #[test]
    fn limiter_disarm_reports_trip() {
        let limiter = ResourceLimiter::new(ResourceLimits {
            timeout_ms: 1,
            ..ResourceLimits::default()
        });
        limiter.arm();
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.deadline.poll());
        assert!(limiter.disarm());

        limiter.arm();
        assert!(!limiter.disarm());
    }
}
