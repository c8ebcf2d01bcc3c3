//! Namespace-level permission model for script sandboxes.
//!
//! One permission per capability namespace. A namespace is installed on the
//! script root iff its permission is granted; denied namespaces are absent,
//! not stubbed.
//!
//! Defaults grant every namespace that only reads or presents data
//! (model, query, viewer, lens, export). `mutate` must be granted explicitly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Individual permission a script session may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Model,
    Query,
    Viewer,
    Mutate,
    Lens,
    Export,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::Model,
        Permission::Query,
        Permission::Viewer,
        Permission::Mutate,
        Permission::Lens,
        Permission::Export,
    ];

    /// Returns the namespace name this permission gates.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Query => "query",
            Self::Viewer => "viewer",
            Self::Mutate => "mutate",
            Self::Lens => "lens",
            Self::Export => "export",
        }
    }

    /// Whether the permission is part of the default baseline.
    pub fn granted_by_default(&self) -> bool {
        !matches!(self, Self::Mutate)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.key() == s)
            .ok_or_else(|| format!("unknown permission '{s}'"))
    }
}

/// Resolved set of permissions for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    granted: BTreeSet<Permission>,
}

impl Permissions {
    /// The default baseline: everything except `mutate`.
    pub fn defaults() -> Self {
        Self {
            granted: Permission::ALL
                .into_iter()
                .filter(Permission::granted_by_default)
                .collect(),
        }
    }

    /// Creates a set with all permissions granted.
    pub fn all_granted() -> Self {
        Self {
            granted: Permission::ALL.into_iter().collect(),
        }
    }

    /// Creates a set with nothing granted: the script root is empty.
    pub fn none() -> Self {
        Self {
            granted: BTreeSet::new(),
        }
    }

    pub fn is_granted(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }

    pub fn grant(&mut self, permission: Permission) {
        self.granted.insert(permission);
    }

    pub fn deny(&mut self, permission: Permission) {
        self.granted.remove(&permission);
    }

    /// Applies explicit per-key decisions on top of this set.
    pub fn with_overrides(mut self, overrides: &HashMap<Permission, bool>) -> Self {
        for (&permission, &granted) in overrides {
            if granted {
                self.grant(permission);
            } else {
                self.deny(permission);
            }
        }
        self
    }

    /// Returns all granted permissions in a stable order.
    pub fn granted_permissions(&self) -> impl Iterator<Item = Permission> + '_ {
        self.granted.iter().copied()
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::defaults()
    }
}
