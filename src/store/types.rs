// Configuration data types and wire shapes

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::batch;
use crate::errors::{DashboardError, Result};
use crate::registry::{CapabilityKind, CapabilityRegistry};

/// Name of the built-in, read-only configuration
pub const DEFAULT_CONFIG_NAME: &str = "default";

/// Free-form parameter table (hyperparameters or training settings)
pub type ParamMap = BTreeMap<String, Value>;

static CONFIG_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9 _.-]{0,63}$").expect("valid regex"));

/// Whether `name` refers to the built-in default (case-insensitive)
pub fn is_default_name(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(DEFAULT_CONFIG_NAME)
}

/// Trim and validate a user-supplied configuration name
pub fn canonical_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if !CONFIG_NAME_RE.is_match(trimmed) {
        return Err(DashboardError::validation(
            "name",
            format!(
                "'{}' is not a valid configuration name (1-64 characters of letters, digits, space, '_', '-', '.')",
                name
            ),
        ));
    }
    Ok(trimmed.to_string())
}

/// A named bundle of training parameters and enabled capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    pub hyperparameters: ParamMap,
    pub training_config: ParamMap,
    pub enabled_wrappers: BTreeSet<String>,
    pub enabled_callbacks: BTreeSet<String>,
    pub is_default: bool,
}

impl Configuration {
    /// The built-in default configuration for the given registry
    pub fn builtin_default(registry: &CapabilityRegistry) -> Self {
        Self {
            name: DEFAULT_CONFIG_NAME.to_string(),
            hyperparameters: default_hyperparameters(),
            training_config: default_training_config(),
            enabled_wrappers: registry.required_names(CapabilityKind::Wrapper),
            enabled_callbacks: registry.required_names(CapabilityKind::Callback),
            is_default: true,
        }
    }

    /// Build from a wire payload, validating capability names
    pub fn from_payload(
        name: &str,
        payload: ConfigPayload,
        registry: &CapabilityRegistry,
    ) -> Result<Self> {
        let enabled_wrappers = registry.resolve(CapabilityKind::Wrapper, &payload.wrappers)?;
        let enabled_callbacks = registry.resolve(CapabilityKind::Callback, &payload.callbacks)?;

        Ok(Self {
            name: name.to_string(),
            hyperparameters: payload.hyperparameters,
            training_config: payload.training_config,
            enabled_wrappers,
            enabled_callbacks,
            is_default: is_default_name(name),
        })
    }

    /// Wire shape (also the on-disk format)
    pub fn to_payload(&self) -> ConfigPayload {
        ConfigPayload {
            training_config: self.training_config.clone(),
            hyperparameters: self.hyperparameters.clone(),
            wrappers: self.enabled_wrappers.iter().cloned().collect(),
            callbacks: self.enabled_callbacks.iter().cloned().collect(),
        }
    }

    /// Apply a partial edit: map keys overwrite, capability lists replace
    pub fn apply_patch(&mut self, patch: &ConfigPatch, registry: &CapabilityRegistry) -> Result<()> {
        // Resolve first so a rejected patch leaves the configuration untouched
        let wrappers = patch
            .wrappers
            .as_ref()
            .map(|w| registry.resolve(CapabilityKind::Wrapper, w))
            .transpose()?;
        let callbacks = patch
            .callbacks
            .as_ref()
            .map(|c| registry.resolve(CapabilityKind::Callback, c))
            .transpose()?;

        if let Some(training) = &patch.training_config {
            self.training_config
                .extend(training.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(hyper) = &patch.hyperparameters {
            self.hyperparameters
                .extend(hyper.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(wrappers) = wrappers {
            self.enabled_wrappers = wrappers;
        }
        if let Some(callbacks) = callbacks {
            self.enabled_callbacks = callbacks;
        }
        Ok(())
    }

    /// Checks run right before a job is launched with this configuration.
    ///
    /// Capability names must be registered, and when the rollout shape is
    /// present the batch size must divide `n_steps * num_envs`.
    pub fn validate_for_launch(&self, registry: &CapabilityRegistry) -> Result<()> {
        registry.resolve(CapabilityKind::Wrapper, &self.enabled_wrappers)?;
        registry.resolve(CapabilityKind::Callback, &self.enabled_callbacks)?;

        let n_steps = self
            .hyperparameters
            .get("n_steps")
            .map(|v| as_field("hyperparameters.n_steps", v))
            .transpose()?;
        let num_envs = self
            .training_config
            .get("num_envs")
            .map(|v| as_field("training_config.num_envs", v))
            .transpose()?;

        let batch_size = self
            .hyperparameters
            .get("batch_size")
            .map(|v| as_field("hyperparameters.batch_size", v))
            .transpose()?;

        if let (Some(n_steps), Some(batch_size)) = (n_steps, batch_size) {
            let num_envs = num_envs.unwrap_or(1);
            let sizes = batch::resolve(n_steps, num_envs).map_err(|e| {
                DashboardError::validation("hyperparameters.n_steps", e.to_string())
            })?;
            if !sizes.contains(&batch_size) {
                return Err(DashboardError::validation(
                    "hyperparameters.batch_size",
                    format!(
                        "{} does not divide n_steps * num_envs = {}",
                        batch_size,
                        n_steps * num_envs
                    ),
                ));
            }
        }

        Ok(())
    }
}

fn as_field(field: &str, value: &Value) -> Result<u64> {
    batch::positive_integer(field, value).map_err(|_| {
        DashboardError::validation(field, format!("must be a positive integer (got {})", value))
    })
}

/// Configuration as it travels over the wire and sits on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPayload {
    #[serde(default)]
    pub training_config: ParamMap,
    #[serde(default)]
    pub hyperparameters: ParamMap,
    #[serde(default, alias = "enabled_wrappers")]
    pub wrappers: Vec<String>,
    #[serde(default, alias = "enabled_callbacks")]
    pub callbacks: Vec<String>,
}

/// Partial edit of the current configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_config: Option<ParamMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<ParamMap>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "enabled_wrappers")]
    pub wrappers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "enabled_callbacks")]
    pub callbacks: Option<Vec<String>>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.training_config.is_none()
            && self.hyperparameters.is_none()
            && self.wrappers.is_none()
            && self.callbacks.is_none()
    }
}

/// Whether the in-memory edit diverges from the last loaded/saved configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyState {
    pub base_config_name: String,
    pub is_dirty: bool,
}

impl DirtyState {
    pub fn clean(base: &str) -> Self {
        Self {
            base_config_name: base.to_string(),
            is_dirty: false,
        }
    }

    /// Selector label; the unsaved form can never collide with a saved name
    pub fn label(&self) -> String {
        if self.is_dirty {
            format!("{} (unsaved)", self.base_config_name)
        } else {
            self.base_config_name.clone()
        }
    }
}

fn default_hyperparameters() -> ParamMap {
    let defaults = json!({
        "n_steps": 2048,
        "batch_size": 64,
        "gamma": 0.99,
        "gae_lambda": 0.95,
        "clip_range_start": 0.2,
        "clip_range_end": 0.05,
        "clip_range_vf_start": null,
        "clip_range_vf_end": null,
        "learning_rate_start": 0.0003,
        "learning_rate_end": 0.00005,
        "n_epochs": 10,
        "vf_coef": 0.9,
        "ent_coef": 0.01,
        "max_grad_norm": 0.5,
        "normalize_advantage": true,
        "target_kl": null,
        "seed": 42,
        "pi_net": "128,128",
        "vf_net": "64,64",
        "device": "auto",
    });
    into_param_map(defaults)
}

fn default_training_config() -> ParamMap {
    let defaults = json!({
        "num_envs": 1,
        "stages": [],
        "random_stages": true,
        "total_timesteps": 2_000_000,
        "autosave_freq": 100_000,
    });
    into_param_map(defaults)
}

fn into_param_map(value: Value) -> ParamMap {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => ParamMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::builtin()
    }

    #[test]
    fn test_builtin_default_enables_required_only() {
        let config = Configuration::builtin_default(&registry());
        assert!(config.is_default);
        assert_eq!(config.hyperparameters["n_steps"], json!(2048));
        assert_eq!(config.training_config["num_envs"], json!(1));
        assert!(!config.enabled_wrappers.contains("RewardManager"));
        assert_eq!(config.enabled_callbacks.len(), 2);
        config.validate_for_launch(&registry()).unwrap();
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("  fast run ").unwrap(), "fast run");
        assert_eq!(canonical_name("v1.2_b-3").unwrap(), "v1.2_b-3");
        assert!(canonical_name("").is_err());
        assert!(canonical_name("../etc/passwd").is_err());
        assert!(canonical_name(".hidden").is_err());
        assert!(canonical_name("a/b").is_err());
        assert!(canonical_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_default_name_is_case_insensitive() {
        assert!(is_default_name("default"));
        assert!(is_default_name("Default "));
        assert!(!is_default_name("defaults"));
    }

    #[test]
    fn test_payload_accepts_legacy_field_names() {
        let json = r#"{
            "training_config": {"num_envs": 4},
            "hyperparameters": {"gamma": 0.9},
            "enabled_wrappers": ["RewardManager"],
            "enabled_callbacks": []
        }"#;
        let payload: ConfigPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.wrappers, vec!["RewardManager".to_string()]);

        let config = Configuration::from_payload("legacy", payload, &registry()).unwrap();
        assert!(config.enabled_wrappers.contains("RewardManager"));
        assert!(config.enabled_wrappers.contains("EnhancedStatsWrapper"));
        assert!(!config.is_default);
    }

    #[test]
    fn test_patch_merges_maps_and_replaces_lists() {
        let reg = registry();
        let mut config = Configuration::builtin_default(&reg);
        let patch = ConfigPatch {
            hyperparameters: Some(into_param_map(json!({"gamma": 0.95, "ent_coef": 0.02}))),
            wrappers: Some(vec!["RewardManager".to_string()]),
            ..Default::default()
        };
        config.apply_patch(&patch, &reg).unwrap();

        assert_eq!(config.hyperparameters["gamma"], json!(0.95));
        assert_eq!(config.hyperparameters["n_steps"], json!(2048));
        assert!(config.enabled_wrappers.contains("RewardManager"));
        assert!(config.enabled_wrappers.contains("LoggingStatsWrapper"));
    }

    #[test]
    fn test_rejected_patch_leaves_config_untouched() {
        let reg = registry();
        let mut config = Configuration::builtin_default(&reg);
        let before = config.clone();
        let patch = ConfigPatch {
            hyperparameters: Some(into_param_map(json!({"gamma": 0.5}))),
            callbacks: Some(vec!["Nope".to_string()]),
            ..Default::default()
        };
        assert!(config.apply_patch(&patch, &reg).is_err());
        assert_eq!(config, before);
    }

    #[test]
    fn test_launch_validation_checks_batch_divisor() {
        let reg = registry();
        let mut config = Configuration::builtin_default(&reg);
        config
            .hyperparameters
            .insert("batch_size".to_string(), json!(100));
        let err = config.validate_for_launch(&reg).unwrap_err();
        match err {
            DashboardError::Validation { field, .. } => {
                assert_eq!(field, "hyperparameters.batch_size")
            }
            other => panic!("unexpected error {:?}", other),
        }

        config
            .hyperparameters
            .insert("batch_size".to_string(), json!("512"));
        config
            .training_config
            .insert("num_envs".to_string(), json!("8"));
        config.validate_for_launch(&reg).unwrap();
    }

    #[test]
    fn test_launch_validation_rejects_non_numeric() {
        let reg = registry();
        let mut config = Configuration::builtin_default(&reg);
        config
            .hyperparameters
            .insert("n_steps".to_string(), json!("lots"));
        let err = config.validate_for_launch(&reg).unwrap_err();
        assert!(err.to_string().contains("hyperparameters.n_steps"));
    }

    #[test]
    fn test_dirty_label() {
        let mut state = DirtyState::clean("fast");
        assert_eq!(state.label(), "fast");
        state.is_dirty = true;
        assert_eq!(state.label(), "fast (unsaved)");
        assert!(canonical_name(&state.label()).is_err());
    }
}
