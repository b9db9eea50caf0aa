//! Capability catalogue — optional instruction bundles the router may
//! attach to a conversation for a bounded number of steps.
//!
//! A capability has no filesystem identity: the catalogue is registered at
//! startup (and extended at runtime through the admin API) as plain data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tool::ToolDefinition;

/// One registered capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDef {
    /// Stable name, unique within the catalogue.
    pub name: String,
    /// One-line description shown to the routing model.
    pub description: String,
    /// Instruction block appended to the system prompt while active.
    pub instructions: String,
    /// Additional tool schemas exposed while active.
    #[serde(default)]
    pub extra_tools: Vec<ToolDefinition>,
    /// Cue words that force a routing call when they appear in a new user
    /// message while the capability is inactive.
    #[serde(default)]
    pub triggers: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Active set with TTLs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The per-conversation set of active capabilities with remaining TTLs.
///
/// Invariants: TTLs are ≥ 1 (an entry reaching 0 is removed), and the
/// decrement happens exactly once per agent step that did not renew the
/// entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveCapabilities {
    /// name → remaining steps. BTreeMap keeps serialization stable.
    entries: BTreeMap<String, u32>,
}

impl ActiveCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn ttl(&self, name: &str) -> Option<u32> {
        self.entries.get(name).copied()
    }

    /// Decrement every TTL by one, dropping entries that reach zero.
    pub fn decay(&mut self) {
        self.entries.retain(|_, ttl| {
            *ttl = ttl.saturating_sub(1);
            *ttl > 0
        });
    }

    /// Activate (or renew) a capability at the given TTL.
    pub fn activate(&mut self, name: impl Into<String>, ttl: u32) {
        if ttl > 0 {
            self.entries.insert(name.into(), ttl);
        }
    }

    pub fn deactivate(&mut self, name: &str) {
        self.entries.remove(name);
    }

    /// Apply a routing decision: renewed and added names get `ttl`,
    /// dropped names are removed. Unknown names are ignored by the caller
    /// before this point.
    pub fn apply(&mut self, keep: &[String], add: &[String], drop: &[String], ttl: u32) {
        for name in drop {
            self.deactivate(name);
        }
        for name in keep.iter().chain(add) {
            self.activate(name.clone(), ttl);
        }
    }
}
