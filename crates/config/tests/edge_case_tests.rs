//! Edge case and error scenario tests

use offsync_config::{Config, ConfigError, ConfigManager};
use std::fs;
use tempfile::TempDir;

fn setup_test_manager() -> Result<(TempDir, ConfigManager), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let manager = ConfigManager::with_directory(temp_dir.path().to_path_buf())?;
    Ok((temp_dir, manager))
}

#[test]
fn test_corrupted_config_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    fs::write(manager.config_path(), "this is not valid TOML {{{")?;

    assert!(manager.load().is_err());
    assert_eq!(manager.load_or_default(), Config::default());
    Ok(())
}

#[test]
fn test_empty_config_file_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    fs::write(manager.config_path(), "")?;

    assert!(matches!(manager.load(), Err(ConfigError::Read { .. })));
    assert_eq!(manager.load_or_default(), Config::default());
    Ok(())
}

#[test]
fn test_save_creates_parent_directories() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let nested_path = temp_dir.path().join("a").join("b").join("c");
    let manager = ConfigManager::with_directory(nested_path)?;

    manager.save(&Config::default())?;
    assert!(manager.config_path().exists());
    Ok(())
}

#[test]
fn test_unknown_storage_strategy_fails_to_parse() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    fs::write(manager.config_path(), "[storage]\nstrategy = \"dom\"\n")?;

    assert!(matches!(manager.load(), Err(ConfigError::Parse { .. })));
    Ok(())
}

#[test]
fn test_newer_version_still_loads() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    fs::write(manager.config_path(), "version = 99\n")?;

    let config = manager.load()?;
    assert_eq!(config.version, 99);
    assert_eq!(config.sync, Config::default().sync);
    Ok(())
}

#[test]
fn test_boundary_values_validation() {
    let mut config = Config::default();

    config.sync.crashed_count_wait = 1;
    config.sync.sync_frequency_secs = 0.001;
    assert!(config.validate().is_ok());

    config.sync.crashed_count_wait = 1000;
    assert!(config.validate().is_ok());

    config.sync.crashed_count_wait = 1001;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_file_deleted_during_operation() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    manager.initialize()?;

    fs::remove_file(manager.config_path())?;
    assert_eq!(manager.load()?, Config::default());
    Ok(())
}

#[test]
fn test_rapid_saves() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    let mut config = Config::default();

    for i in 1..=50 {
        config.sync.crashed_count_wait = i;
        manager.save(&config)?;
    }

    assert_eq!(manager.load()?.sync.crashed_count_wait, 50);
    Ok(())
}

#[test]
fn test_oversized_frequency_loads_with_default_interval() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, manager) = setup_test_manager()?;
    fs::write(manager.config_path(), "[sync]\nsync_frequency_secs = 1e300\n")?;

    let config = manager.load()?;
    assert!(config.validate().is_err());
    assert_eq!(config.sync.sync_frequency(), std::time::Duration::from_secs(10));
    assert!(manager.save(&config).is_err());
    Ok(())
}
