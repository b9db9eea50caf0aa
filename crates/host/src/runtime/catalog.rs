//! Capability catalogue — registered bundles of instructions (and
//! optionally extra tool handlers) the router can attach to a
//! conversation. Plain data, registered at startup and extensible at
//! runtime through the admin API; no filesystem semantics.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use minder_domain::capability::CapabilityDef;
use minder_tools::ToolHandler;

#[derive(Clone)]
pub struct CatalogEntry {
    pub def: CapabilityDef,
    /// Handlers backing `def.extra_tools`. API-registered capabilities
    /// carry none; programmatically registered ones may.
    pub handlers: Vec<Arc<dyn ToolHandler>>,
}

#[derive(Default)]
pub struct CapabilityCatalog {
    entries: RwLock<BTreeMap<String, CatalogEntry>>,
}

impl CapabilityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a capability.
    pub fn register(&self, def: CapabilityDef, handlers: Vec<Arc<dyn ToolHandler>>) {
        let mut def = def;
        // Keep the advertised schemas in sync with the actual handlers.
        for handler in &handlers {
            let hd = handler.definition();
            if !def.extra_tools.iter().any(|t| t.name == hd.name) {
                def.extra_tools.push(hd);
            }
        }
        self.entries
            .write()
            .insert(def.name.clone(), CatalogEntry { def, handlers });
    }

    pub fn get(&self, name: &str) -> Option<CatalogEntry> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn defs(&self) -> Vec<CapabilityDef> {
        self.entries.read().values().map(|e| e.def.clone()).collect()
    }

    /// One line per capability, for the routing prompt.
    pub fn render_index(&self) -> String {
        self.entries
            .read()
            .values()
            .map(|e| format!("- {}: {}", e.def.name, e.def.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Trigger words of inactive capabilities found in the given text
    /// (the "unrecognised surface cue" check).
    pub fn surface_cues(&self, text: &str, active: &[&str]) -> Vec<String> {
        let lower = text.to_lowercase();
        self.entries
            .read()
            .values()
            .filter(|e| !active.contains(&e.def.name.as_str()))
            .filter(|e| {
                e.def
                    .triggers
                    .iter()
                    .any(|t| !t.is_empty() && lower.contains(&t.to_lowercase()))
            })
            .map(|e| e.def.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, triggers: &[&str]) -> CapabilityDef {
        CapabilityDef {
            name: name.into(),
            description: format!("{name} capability"),
            instructions: format!("use {name} wisely"),
            extra_tools: vec![],
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn register_and_index() {
        let catalog = CapabilityCatalog::new();
        assert!(catalog.is_empty());
        catalog.register(def("calendar", &[]), vec![]);
        catalog.register(def("email", &[]), vec![]);

        assert!(catalog.contains("calendar"));
        let index = catalog.render_index();
        assert!(index.contains("- calendar: calendar capability"));
        assert!(index.contains("- email:"));
    }

    #[test]
    fn surface_cues_ignore_active_capabilities() {
        let catalog = CapabilityCatalog::new();
        catalog.register(def("calendar", &["meeting", "appointment"]), vec![]);
        catalog.register(def("email", &["inbox"]), vec![]);

        let cues = catalog.surface_cues("schedule a Meeting tomorrow", &[]);
        assert_eq!(cues, vec!["calendar".to_string()]);

        let cues = catalog.surface_cues("schedule a meeting", &["calendar"]);
        assert!(cues.is_empty());
    }

    #[test]
    fn reregistering_replaces() {
        let catalog = CapabilityCatalog::new();
        catalog.register(def("calendar", &[]), vec![]);
        let mut updated = def("calendar", &[]);
        updated.description = "v2".into();
        catalog.register(updated, vec![]);

        assert_eq!(catalog.get("calendar").unwrap().def.description, "v2");
        assert_eq!(catalog.defs().len(), 1);
    }
}
