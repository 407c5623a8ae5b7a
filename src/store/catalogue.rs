// Configuration store
//
// Durable catalogue of named configurations plus the built-in default, and
// the single "current" configuration the editor is working on together with
// its dirty state.

use anyhow::Context;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use super::backend::BlobStore;
use super::types::{
    canonical_name, is_default_name, ConfigPatch, ConfigPayload, Configuration, DirtyState,
    DEFAULT_CONFIG_NAME,
};
use crate::errors::{DashboardError, Result};
use crate::registry::CapabilityRegistry;

/// Snapshot of the current configuration and its dirty state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentConfig {
    pub config: Configuration,
    pub dirty: DirtyState,
    /// Selector label ("fast" or "fast (unsaved)")
    pub label: String,
}

/// Outcome of an edit to the current configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditOutcome {
    pub config: Configuration,
    /// True only for the edit that crossed from clean to dirty
    pub became_dirty: bool,
}

struct ActiveState {
    config: Configuration,
    dirty: DirtyState,
    /// Number of clean→dirty crossings observed so far
    dirty_transitions: u64,
}

impl ActiveState {
    fn reset(&mut self, config: Configuration, base: &str) {
        self.config = config;
        self.dirty = DirtyState::clean(base);
    }

    fn mark_dirty(&mut self) -> bool {
        if self.dirty.is_dirty {
            return false;
        }
        self.dirty.is_dirty = true;
        self.dirty_transitions += 1;
        true
    }
}

/// Catalogue of named configurations with dirty-state tracking
pub struct ConfigStore {
    backend: Arc<dyn BlobStore>,
    registry: Arc<CapabilityRegistry>,
    default_config: Configuration,
    active: RwLock<ActiveState>,
}

impl ConfigStore {
    /// Create a store; the current configuration starts as the default
    pub fn new(backend: Arc<dyn BlobStore>, registry: Arc<CapabilityRegistry>) -> Self {
        let default_config = Configuration::builtin_default(&registry);
        let active = ActiveState {
            config: default_config.clone(),
            dirty: DirtyState::clean(DEFAULT_CONFIG_NAME),
            dirty_transitions: 0,
        };

        Self {
            backend,
            registry,
            default_config,
            active: RwLock::new(active),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    fn write_active(&self) -> RwLockWriteGuard<'_, ActiveState> {
        self.active.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Saved configuration names, sorted, never including "default"
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .backend
            .list()
            .map_err(DashboardError::Storage)?
            .into_iter()
            .filter(|name| !is_default_name(name))
            .collect();
        names.sort();
        Ok(names)
    }

    /// The built-in default; also makes it current and clean
    pub fn load_default(&self) -> Configuration {
        let mut active = self.write_active();
        active.reset(self.default_config.clone(), DEFAULT_CONFIG_NAME);
        info!("Default configuration loaded");
        self.default_config.clone()
    }

    /// Reset the current configuration to the default, clearing dirty state
    pub fn reset_to_default(&self) {
        self.load_default();
    }

    /// Load a named configuration and make it current and clean
    pub fn load(&self, name: &str) -> Result<Configuration> {
        if is_default_name(name) {
            return Ok(self.load_default());
        }

        let config = self.read_named(name)?;
        let mut active = self.write_active();
        active.reset(config.clone(), &config.name);
        info!(config = %config.name, "Configuration loaded");
        Ok(config)
    }

    fn read_named(&self, name: &str) -> Result<Configuration> {
        let name = canonical_name(name)?;
        let blob = self
            .backend
            .get(&name)
            .map_err(DashboardError::Storage)?
            .ok_or_else(|| DashboardError::NotFound(format!("configuration '{}'", name)))?;

        let payload: ConfigPayload = serde_json::from_slice(&blob)
            .with_context(|| format!("Configuration '{}' is corrupted", name))
            .map_err(DashboardError::Storage)?;

        Configuration::from_payload(&name, payload, &self.registry)
    }

    /// Persist `config` under `name`; returns the canonical stored name.
    ///
    /// The saved configuration becomes current and clean.
    pub fn save(&self, name: &str, config: &Configuration, overwrite: bool) -> Result<String> {
        if is_default_name(name) {
            return Err(DashboardError::Forbidden(
                "the default configuration cannot be overwritten".to_string(),
            ));
        }
        let name = canonical_name(name)?;

        let stored = Configuration::from_payload(&name, config.to_payload(), &self.registry)?;

        let bytes = serde_json::to_vec_pretty(&stored.to_payload())
            .context("Failed to serialize configuration")
            .map_err(DashboardError::Storage)?;

        // Hold the state lock across the write so an edit cannot slip in
        // between persisting and clearing the dirty flag
        let mut active = self.write_active();
        let exists = self.backend.exists(&name).map_err(DashboardError::Storage)?;
        if exists && !overwrite {
            return Err(DashboardError::AlreadyExists(format!(
                "configuration '{}' already exists; pass overwrite=true to replace it",
                name
            )));
        }
        self.backend
            .put(&name, &bytes)
            .map_err(DashboardError::Storage)?;

        active.reset(stored, &name);
        info!(config = %name, overwrite = exists, "Configuration saved");
        Ok(name)
    }

    /// Remove a saved configuration
    pub fn delete(&self, name: &str) -> Result<()> {
        if is_default_name(name) {
            return Err(DashboardError::Forbidden(
                "the default configuration cannot be deleted".to_string(),
            ));
        }
        let name = canonical_name(name)?;
        let removed = self.backend.remove(&name).map_err(DashboardError::Storage)?;
        if !removed {
            return Err(DashboardError::NotFound(format!("configuration '{}'", name)));
        }
        info!(config = %name, "Configuration deleted");
        Ok(())
    }

    /// Current configuration and dirty state
    pub fn current(&self) -> CurrentConfig {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        CurrentConfig {
            config: active.config.clone(),
            dirty: active.dirty.clone(),
            label: active.dirty.label(),
        }
    }

    /// Record an edit; true only for the clean→dirty crossing
    pub fn mark_dirty(&self) -> bool {
        let mut active = self.write_active();
        let crossed = active.mark_dirty();
        if crossed {
            debug!(base = %active.dirty.base_config_name, "Current configuration has unsaved edits");
        }
        crossed
    }

    /// How many clean→dirty crossings have happened since startup
    pub fn dirty_transitions(&self) -> u64 {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .dirty_transitions
    }

    /// Apply an edit to the current configuration and mark it dirty
    pub fn update_current(&self, patch: &ConfigPatch) -> Result<EditOutcome> {
        let mut active = self.write_active();
        let mut edited = active.config.clone();
        edited.apply_patch(patch, &self.registry)?;
        edited.is_default = false;

        active.config = edited.clone();
        let became_dirty = active.mark_dirty();
        Ok(EditOutcome {
            config: edited,
            became_dirty,
        })
    }

    /// Configuration to launch with: the current one with `patch` merged
    /// into a copy. Nothing is committed; see `commit_launch`.
    pub fn prepare_launch(&self, patch: Option<&ConfigPatch>) -> Result<Configuration> {
        let mut config = self.current().config;
        if let Some(patch) = patch.filter(|p| !p.is_empty()) {
            config.apply_patch(patch, &self.registry)?;
            config.is_default = false;
        }
        config.validate_for_launch(&self.registry)?;
        Ok(config)
    }

    /// Record a launch's patch as an ordinary edit of the current configuration
    pub fn commit_launch(&self, patch: Option<&ConfigPatch>) -> Result<()> {
        if let Some(patch) = patch.filter(|p| !p.is_empty()) {
            self.update_current(patch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryBlobStore;
    use serde_json::json;

    fn store() -> ConfigStore {
        ConfigStore::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(CapabilityRegistry::builtin()),
        )
    }

    fn custom(store: &ConfigStore, name: &str) -> Configuration {
        let mut config = store.load_default();
        config.name = name.to_string();
        config.is_default = false;
        config
            .hyperparameters
            .insert("gamma".to_string(), json!(0.9));
        config.enabled_wrappers.insert("RewardManager".to_string());
        config
    }

    #[test]
    fn test_starts_on_clean_default() {
        let store = store();
        let current = store.current();
        assert!(current.config.is_default);
        assert_eq!(current.dirty, DirtyState::clean("default"));
        assert_eq!(current.label, "default");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let store = store();
        let config = custom(&store, "foo");
        let name = store.save("foo", &config, true).unwrap();
        assert_eq!(name, "foo");

        store.load_default();
        let loaded = store.load("foo").unwrap();
        assert_eq!(loaded, config);
        assert_eq!(store.current().dirty, DirtyState::clean("foo"));
    }

    #[test]
    fn test_save_existing_without_overwrite() {
        let store = store();
        let config = custom(&store, "foo");
        store.save("foo", &config, false).unwrap();
        let err = store.save("foo", &config, false).unwrap_err();
        assert!(matches!(err, DashboardError::AlreadyExists(_)));
        assert!(store.save("foo", &config, true).is_ok());
    }

    #[test]
    fn test_default_is_read_only() {
        let store = store();
        let config = store.load_default();
        for overwrite in [false, true] {
            assert!(matches!(
                store.save("default", &config, overwrite),
                Err(DashboardError::Forbidden(_))
            ));
            assert!(matches!(
                store.save("Default", &config, overwrite),
                Err(DashboardError::Forbidden(_))
            ));
        }
        assert!(matches!(
            store.delete("default"),
            Err(DashboardError::Forbidden(_))
        ));
    }

    #[test]
    fn test_load_and_delete_unknown() {
        let store = store();
        assert!(matches!(
            store.load("ghost"),
            Err(DashboardError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("ghost"),
            Err(DashboardError::NotFound(_))
        ));
    }

    #[test]
    fn test_names_outside_catalogue_are_rejected() {
        let store = store();
        for name in ["../victim", "nested/name", ".hidden", "..\\victim"] {
            assert!(matches!(
                store.load(name),
                Err(DashboardError::Validation { .. })
            ));
            assert!(matches!(
                store.delete(name),
                Err(DashboardError::Validation { .. })
            ));
        }
        assert_eq!(store.current().label, "default");
    }

    #[test]
    fn test_list_is_sorted() {
        let store = store();
        for name in ["zeta", "alpha", "mid"] {
            let config = custom(&store, name);
            store.save(name, &config, false).unwrap();
        }
        assert_eq!(store.list().unwrap(), vec!["alpha", "mid", "zeta"]);
        store.delete("mid").unwrap();
        assert_eq!(store.list().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_dirty_transitions_once_per_crossing() {
        let store = store();
        assert!(store.mark_dirty());
        assert!(!store.mark_dirty());
        assert!(!store.mark_dirty());
        assert_eq!(store.dirty_transitions(), 1);
        assert_eq!(store.current().label, "default (unsaved)");

        let config = store.current().config;
        store.save("edited", &config, false).unwrap();
        assert!(!store.current().dirty.is_dirty);

        assert!(store.mark_dirty());
        store.load("edited").unwrap();
        assert!(!store.current().dirty.is_dirty);
        assert_eq!(store.dirty_transitions(), 2);
    }

    #[test]
    fn test_update_current_reports_crossing() {
        let store = store();
        let patch = ConfigPatch {
            hyperparameters: Some([("gamma".to_string(), json!(0.8))].into_iter().collect()),
            ..Default::default()
        };
        let first = store.update_current(&patch).unwrap();
        assert!(first.became_dirty);
        assert_eq!(first.config.hyperparameters["gamma"], json!(0.8));

        let second = store.update_current(&patch).unwrap();
        assert!(!second.became_dirty);
        assert!(!store.current().config.is_default);
    }

    #[test]
    fn test_invalid_edit_does_not_dirty() {
        let store = store();
        let patch = ConfigPatch {
            wrappers: Some(vec!["Bogus".to_string()]),
            ..Default::default()
        };
        assert!(matches!(
            store.update_current(&patch),
            Err(DashboardError::Validation { .. })
        ));
        assert!(!store.current().dirty.is_dirty);
    }

    #[test]
    fn test_corrupted_blob_is_storage_error() {
        let backend = Arc::new(MemoryBlobStore::new());
        backend.put("broken", b"not json").unwrap();
        let store = ConfigStore::new(backend, Arc::new(CapabilityRegistry::builtin()));
        assert!(matches!(
            store.load("broken"),
            Err(DashboardError::Storage(_))
        ));
    }

    #[test]
    fn test_prepare_launch_leaves_current_untouched() {
        let store = store();
        let patch = ConfigPatch {
            training_config: Some([("num_envs".to_string(), json!(4))].into_iter().collect()),
            ..Default::default()
        };
        let config = store.prepare_launch(Some(&patch)).unwrap();
        assert_eq!(config.training_config["num_envs"], json!(4));
        assert!(!config.is_default);
        assert!(!store.current().dirty.is_dirty);
        assert_eq!(store.current().config.training_config["num_envs"], json!(1));

        store.commit_launch(Some(&patch)).unwrap();
        assert!(store.current().dirty.is_dirty);
        assert_eq!(store.current().config.training_config["num_envs"], json!(4));

        let clean = ConfigStore::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(CapabilityRegistry::builtin()),
        );
        let config = clean.prepare_launch(None).unwrap();
        assert!(config.is_default);
        clean.commit_launch(None).unwrap();
        assert!(!clean.current().dirty.is_dirty);
    }
}
