//! Sandbox configuration: partial permissions and limits merged over the
//! documented defaults.
//!
//! Can be built in code or read from TOML:
//!
//! ```toml
//! [permissions]
//! viewer = false
//! mutate = true
//!
//! [limits]
//! memory-bytes = 33554432
//! timeout-ms = 2000
//! ```

use crate::error::SandboxError;
use crate::limits::{LimitOverrides, ResourceLimits};
use crate::permissions::{Permission, Permissions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Caller-supplied configuration. Every field is optional; anything left
/// unset falls back to [`Permissions::defaults`] and
/// [`ResourceLimits::default`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    pub permissions: HashMap<Permission, bool>,
    pub limits: LimitOverrides,
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, SandboxError> {
        toml::from_str(contents).map_err(|e| SandboxError::Config(e.to_string()))
    }

    /// Loads configuration from a TOML file. Unlike an absent config, an
    /// unreadable or malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self, SandboxError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| SandboxError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded sandbox config");
        Ok(config)
    }

    pub fn with_permission(mut self, permission: Permission, granted: bool) -> Self {
        self.permissions.insert(permission, granted);
        self
    }

    pub fn with_limits(mut self, limits: LimitOverrides) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.limits.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_memory_bytes(mut self, memory_bytes: usize) -> Self {
        self.limits.memory_bytes = Some(memory_bytes);
        self
    }

    pub fn with_max_stack_bytes(mut self, max_stack_bytes: usize) -> Self {
        self.limits.max_stack_bytes = Some(max_stack_bytes);
        self
    }

    /// Layers `other` on top of `self`: keys set in `other` win.
    pub fn merged(mut self, other: &SandboxConfig) -> Self {
        self.permissions
            .extend(other.permissions.iter().map(|(&p, &g)| (p, g)));
        self.limits = LimitOverrides {
            memory_bytes: other.limits.memory_bytes.or(self.limits.memory_bytes),
            max_stack_bytes: other.limits.max_stack_bytes.or(self.limits.max_stack_bytes),
            timeout_ms: other.limits.timeout_ms.or(self.limits.timeout_ms),
        };
        self
    }

    /// Resolves the partial configuration against the defaults.
    pub fn resolve(&self) -> Result<(Permissions, ResourceLimits), SandboxError> {
        let permissions = Permissions::defaults().with_overrides(&self.permissions);
        let limits = self.limits.apply_to(ResourceLimits::default());
        limits.validate().map_err(SandboxError::Config)?;
        debug!(
            permissions = ?permissions.granted_permissions().collect::<Vec<_>>(),
            memory_bytes = limits.memory_bytes,
            max_stack_bytes = limits.max_stack_bytes,
            timeout_ms = limits.timeout_ms,
            "Resolved sandbox config"
        );
        Ok((permissions, limits))
    }
}
