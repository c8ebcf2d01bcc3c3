//! The process-wide script module.
//!
//! Holds what every sandbox needs and nothing a sandbox may change: the
//! validated capability registry and the root-hardening prelude. Built once
//! on first use and shared by reference; sandboxes never own or tear it
//! down.

use crate::bridge;
use crate::error::{SandboxError, SchemaError};
use crate::registry;
use crate::schema::{NamespaceSchema, validate_registry};
use std::sync::{Arc, OnceLock};
use tracing::info;

static SHARED: OnceLock<Result<Arc<ScriptModule>, SchemaError>> = OnceLock::new();

#[derive(Debug)]
pub struct ScriptModule {
    namespaces: &'static [NamespaceSchema],
    prelude: &'static str,
}

impl ScriptModule {
    /// The shared module built from the built-in registry. Validation runs
    /// once per process; a failure is cached and reported on every call.
    pub fn shared() -> Result<Arc<ScriptModule>, SandboxError> {
        SHARED
            .get_or_init(|| {
                let module = Self::load(registry::NAMESPACES)?;
                info!(
                    namespaces = module.namespaces.len(),
                    methods = module.method_count(),
                    "Loaded script module"
                );
                Ok(Arc::new(module))
            })
            .clone()
            .map_err(SandboxError::from)
    }

    /// Builds a module over an arbitrary registry, validating every row.
    pub fn load(namespaces: &'static [NamespaceSchema]) -> Result<Self, SchemaError> {
        validate_registry(namespaces)?;
        Ok(Self {
            namespaces,
            prelude: bridge::HARDEN_ROOT,
        })
    }

    pub fn namespaces(&self) -> &'static [NamespaceSchema] {
        self.namespaces
    }

    pub fn namespace(&self, name: &str) -> Option<&'static NamespaceSchema> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    pub fn method_count(&self) -> usize {
        self.namespaces.iter().map(|ns| ns.methods.len()).sum()
    }

    pub(crate) fn prelude(&self) -> &'static str {
        self.prelude
    }
}
