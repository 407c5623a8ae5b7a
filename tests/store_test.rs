// Integration tests for the file-backed configuration catalogue

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use trainboard::registry::CapabilityRegistry;
use trainboard::store::{ConfigPatch, ConfigStore, FileBlobStore};
use trainboard::DashboardError;

fn open_store(dir: &TempDir) -> Result<ConfigStore> {
    let backend = FileBlobStore::open(dir.path().join("configs"))?;
    Ok(ConfigStore::new(
        Arc::new(backend),
        Arc::new(CapabilityRegistry::builtin()),
    ))
}

#[test]
fn test_saved_configs_survive_restart() -> Result<()> {
    let temp_dir = TempDir::new()?;

    {
        let store = open_store(&temp_dir)?;
        let patch = ConfigPatch {
            hyperparameters: Some([("gamma".to_string(), json!(0.9))].into_iter().collect()),
            wrappers: Some(vec!["RewardManager".to_string()]),
            ..Default::default()
        };
        store.update_current(&patch)?;
        let config = store.current().config;
        store.save("Gamma Sweep", &config, false)?;
        store.save("baseline", &store.load_default(), false)?;
    }

    let store = open_store(&temp_dir)?;
    assert_eq!(store.list()?, vec!["Gamma Sweep", "baseline"]);

    let loaded = store.load("Gamma Sweep")?;
    assert_eq!(loaded.hyperparameters["gamma"], json!(0.9));
    assert!(loaded.enabled_wrappers.contains("RewardManager"));
    assert!(!loaded.is_default);
    assert_eq!(store.current().label, "Gamma Sweep");

    assert!(temp_dir.path().join("configs/Gamma Sweep.json").exists());
    Ok(())
}

#[test]
fn test_on_disk_format_is_readable_json() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = open_store(&temp_dir)?;
    store.save("plain", &store.load_default(), false)?;

    let raw = std::fs::read_to_string(temp_dir.path().join("configs/plain.json"))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(value["hyperparameters"]["n_steps"], json!(2048));
    assert!(value["wrappers"]
        .as_array()
        .unwrap()
        .contains(&json!("EnhancedStatsWrapper")));
    assert!(value.get("is_default").is_none());
    Ok(())
}

#[test]
fn test_hand_written_file_with_unknown_capability_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = open_store(&temp_dir)?;

    std::fs::write(
        temp_dir.path().join("configs/edited.json"),
        r#"{"training_config": {}, "hyperparameters": {}, "wrappers": ["Teleporter"], "callbacks": []}"#,
    )?;

    assert_eq!(store.list()?, vec!["edited"]);
    let err = store.load("edited").unwrap_err();
    assert!(matches!(err, DashboardError::Validation { .. }));
    assert_eq!(store.current().label, "default");
    Ok(())
}

#[test]
fn test_default_cannot_be_written_or_removed() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = open_store(&temp_dir)?;
    let config = store.load_default();

    assert!(matches!(
        store.save("DEFAULT", &config, true),
        Err(DashboardError::Forbidden(_))
    ));
    assert!(matches!(
        store.delete("default"),
        Err(DashboardError::Forbidden(_))
    ));
    assert!(!temp_dir.path().join("configs/default.json").exists());
    Ok(())
}

#[test]
fn test_overwrite_and_delete() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = open_store(&temp_dir)?;
    let mut config = store.load_default();

    store.save("run", &config, false)?;
    config
        .hyperparameters
        .insert("n_epochs".to_string(), json!(3));
    assert!(matches!(
        store.save("run", &config, false),
        Err(DashboardError::AlreadyExists(_))
    ));
    store.save("run", &config, true)?;
    assert_eq!(store.load("run")?.hyperparameters["n_epochs"], json!(3));

    store.delete("run")?;
    assert!(store.list()?.is_empty());
    assert!(matches!(store.load("run"), Err(DashboardError::NotFound(_))));
    Ok(())
}

#[test]
fn test_dirty_state_follows_edits_and_saves() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = open_store(&temp_dir)?;

    let patch = ConfigPatch {
        training_config: Some([("num_envs".to_string(), json!(8))].into_iter().collect()),
        ..Default::default()
    };
    assert!(store.update_current(&patch)?.became_dirty);
    assert!(!store.update_current(&patch)?.became_dirty);
    assert_eq!(store.current().label, "default (unsaved)");

    let config = store.current().config;
    store.save("eight envs", &config, false)?;
    assert_eq!(store.current().label, "eight envs");

    assert!(store.update_current(&patch)?.became_dirty);
    assert_eq!(store.dirty_transitions(), 2);
    Ok(())
}

#[test]
fn test_names_cannot_escape_configs_dir() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = open_store(&temp_dir)?;
    let victim = temp_dir.path().join("victim.json");
    std::fs::write(&victim, r#"{"secret": 1}"#)?;

    assert!(matches!(
        store.load("../victim"),
        Err(DashboardError::Validation { .. })
    ));
    assert!(matches!(
        store.delete("../victim"),
        Err(DashboardError::Validation { .. })
    ));
    assert!(victim.exists());
    Ok(())
}
