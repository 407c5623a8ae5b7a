// Capability registry
//
// Closed catalogue of the wrapper and callback names the training job
// understands. Configurations may only enable names registered here, and
// capabilities flagged `required` are always enabled.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{DashboardError, Result};

/// Which hook point of the training job a capability plugs into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// Environment wrapper
    Wrapper,
    /// Training-loop callback
    Callback,
}

impl CapabilityKind {
    /// Name of the configuration field listing this kind
    pub fn field(&self) -> &'static str {
        match self {
            CapabilityKind::Wrapper => "wrappers",
            CapabilityKind::Callback => "callbacks",
        }
    }
}

/// A named, registered capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Identifier stored in configurations (e.g. "AutoSave")
    pub name: String,
    /// Label shown in the config editor
    pub display_name: String,
    pub kind: CapabilityKind,
    /// Always enabled regardless of stored configuration
    pub required: bool,
    pub description: String,
}

impl Capability {
    pub fn new(
        name: &str,
        display_name: &str,
        kind: CapabilityKind,
        required: bool,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind,
            required,
            description: description.to_string(),
        }
    }
}

/// Registry of known capabilities, keyed by kind then name
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<(CapabilityKind, String), Capability>,
}

impl CapabilityRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self {
            capabilities: BTreeMap::new(),
        }
    }

    /// The catalogue shipped with the training job
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Capability::new(
            "EnhancedStatsWrapper",
            "Enhanced Stats",
            CapabilityKind::Wrapper,
            true,
            "Enhances the observation space with additional game statistics, such as coins, score, and player state.",
        ));
        registry.register(Capability::new(
            "RewardManager",
            "Reward Manager",
            CapabilityKind::Wrapper,
            false,
            "Adjusts rewards dynamically based on game statistics, such as coins collected.",
        ));
        registry.register(Capability::new(
            "LoggingStatsWrapper",
            "Logging Stats",
            CapabilityKind::Wrapper,
            true,
            "Logs enhanced environment statistics for later analysis.",
        ));
        registry.register(Capability::new(
            "AutoSave",
            "AutoSave",
            CapabilityKind::Callback,
            true,
            "Automatically saves the model at regular intervals and supports graceful training termination.",
        ));
        registry.register(Capability::new(
            "RenderCallback",
            "Model Sync",
            CapabilityKind::Callback,
            true,
            "Signals the job to refresh the policy used for rendering during rollouts.",
        ));
        registry
    }

    /// Register a capability (replaces an existing one with the same kind and name)
    pub fn register(&mut self, capability: Capability) {
        let key = (capability.kind, capability.name.clone());
        self.capabilities.insert(key, capability);
    }

    /// Get capability by kind and name
    pub fn get(&self, kind: CapabilityKind, name: &str) -> Option<&Capability> {
        self.capabilities.get(&(kind, name.to_string()))
    }

    /// Check if capability exists
    pub fn contains(&self, kind: CapabilityKind, name: &str) -> bool {
        self.get(kind, name).is_some()
    }

    /// All capabilities of one kind, ordered by name
    pub fn of_kind(&self, kind: CapabilityKind) -> Vec<&Capability> {
        self.capabilities
            .values()
            .filter(|c| c.kind == kind)
            .collect()
    }

    /// Names that are always enabled for this kind
    pub fn required_names(&self, kind: CapabilityKind) -> BTreeSet<String> {
        self.of_kind(kind)
            .into_iter()
            .filter(|c| c.required)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Reject unknown names, then add the required ones.
    ///
    /// The error names the offending field and every unknown entry.
    pub fn resolve<'a, I>(&self, kind: CapabilityKind, names: I) -> Result<BTreeSet<String>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut resolved = BTreeSet::new();
        let mut unknown = Vec::new();

        for name in names {
            if self.contains(kind, name) {
                resolved.insert(name.clone());
            } else {
                unknown.push(name.as_str());
            }
        }

        if !unknown.is_empty() {
            return Err(DashboardError::validation(
                kind.field(),
                format!("unknown capability name(s): {}", unknown.join(", ")),
            ));
        }

        resolved.extend(self.required_names(kind));
        Ok(resolved)
    }

    /// Every capability, wrappers first
    pub fn all(&self) -> Vec<&Capability> {
        self.capabilities.values().collect()
    }

    /// Number of registered capabilities
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogue() {
        let registry = CapabilityRegistry::builtin();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.of_kind(CapabilityKind::Wrapper).len(), 3);
        assert_eq!(registry.of_kind(CapabilityKind::Callback).len(), 2);

        let sync = registry
            .get(CapabilityKind::Callback, "RenderCallback")
            .unwrap();
        assert_eq!(sync.display_name, "Model Sync");
        assert!(sync.required);
    }

    #[test]
    fn test_required_names() {
        let registry = CapabilityRegistry::builtin();
        let wrappers = registry.required_names(CapabilityKind::Wrapper);
        assert!(wrappers.contains("EnhancedStatsWrapper"));
        assert!(wrappers.contains("LoggingStatsWrapper"));
        assert!(!wrappers.contains("RewardManager"));
    }

    #[test]
    fn test_resolve_adds_required() {
        let registry = CapabilityRegistry::builtin();
        let resolved = registry
            .resolve(CapabilityKind::Wrapper, &["RewardManager".to_string()])
            .unwrap();
        assert_eq!(resolved.len(), 3);
        assert!(resolved.contains("RewardManager"));
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        let registry = CapabilityRegistry::builtin();
        let names = vec!["AutoSave".to_string(), "Teleport".to_string()];
        let err = registry
            .resolve(CapabilityKind::Callback, &names)
            .unwrap_err();
        match err {
            DashboardError::Validation { field, message } => {
                assert_eq!(field, "callbacks");
                assert!(message.contains("Teleport"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_kinds_are_separate_namespaces() {
        let registry = CapabilityRegistry::builtin();
        // A callback name is not a valid wrapper name
        assert!(!registry.contains(CapabilityKind::Wrapper, "AutoSave"));
        assert!(registry
            .resolve(CapabilityKind::Wrapper, &["AutoSave".to_string()])
            .is_err());
    }
}
