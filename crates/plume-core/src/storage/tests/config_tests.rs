use std::fs;
use std::path::PathBuf;

use tempfile::tempdir;

use crate::kernel::error::Result;
use crate::storage::config::{ConfigFormat, HostConfig};
use crate::storage::error::StorageSystemError;

#[test]
fn test_format_from_path() {
    assert_eq!(ConfigFormat::from_path("host.json".as_ref()), Some(ConfigFormat::Json));
    assert_eq!(ConfigFormat::from_path("HOST.JSON".as_ref()), Some(ConfigFormat::Json));
    assert_eq!(ConfigFormat::from_path("host.ini".as_ref()), None);
    assert_eq!(ConfigFormat::from_path("host".as_ref()), None);
    #[cfg(feature = "yaml-config")]
    assert_eq!(ConfigFormat::from_path("host.yml".as_ref()), Some(ConfigFormat::Yaml));
    #[cfg(feature = "toml-config")]
    assert_eq!(ConfigFormat::from_path("host.toml".as_ref()), Some(ConfigFormat::Toml));
}

#[test]
fn test_defaults() {
    let config = HostConfig::default();
    assert_eq!(config.plugin_dirs, vec![PathBuf::from("plugins")]);
    assert_eq!(config.state_dir, PathBuf::from(".plume"));
    assert!(config.activate_new);
    assert_eq!(config.default_loader, None);
}

#[test]
fn test_load_resolves_relative_paths() -> Result<()> {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let path = temp_dir.path().join("host.json");
    fs::write(
        &path,
        r#"{ "plugin_dirs": ["plugins", "/opt/plume/plugins"], "default_loader": "native" }"#,
    )
    .unwrap();

    let config = HostConfig::load(&path)?;
    assert_eq!(
        config.plugin_dirs,
        vec![temp_dir.path().join("plugins"), PathBuf::from("/opt/plume/plugins")]
    );
    assert_eq!(config.state_dir, temp_dir.path().join(".plume"));
    assert_eq!(config.default_loader.as_deref(), Some("native"));
    assert!(config.activate_new, "Missing keys take their default");
    Ok(())
}

#[test]
fn test_save_and_load() -> Result<()> {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let path = temp_dir.path().join("nested").join("host.json");
    let config = HostConfig {
        plugin_dirs: vec![temp_dir.path().join("a")],
        state_dir: temp_dir.path().join("state"),
        default_loader: Some("static".to_string()),
        activate_new: false,
        locale: Some("de_DE".to_string()),
    };

    config.save(&path)?;
    assert_eq!(HostConfig::load(&path)?, config);
    Ok(())
}

#[cfg(feature = "toml-config")]
#[test]
fn test_load_toml() -> Result<()> {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let path = temp_dir.path().join("host.toml");
    fs::write(&path, "plugin_dirs = [\"/srv/plugins\"]\nactivate_new = false\n").unwrap();

    let config = HostConfig::load(&path)?;
    assert_eq!(config.plugin_dirs, vec![PathBuf::from("/srv/plugins")]);
    assert!(!config.activate_new);
    Ok(())
}

#[test]
fn test_load_errors() {
    let temp_dir = tempdir().expect("Failed to create temp directory");

    let unsupported = temp_dir.path().join("host.ini");
    fs::write(&unsupported, "x=1").unwrap();
    assert!(matches!(
        HostConfig::load(&unsupported),
        Err(StorageSystemError::UnsupportedConfigFormat(_))
    ));

    let broken = temp_dir.path().join("host.json");
    fs::write(&broken, "{ \"activate_new\": \"maybe\" }").unwrap();
    assert!(matches!(
        HostConfig::load(&broken),
        Err(StorageSystemError::DeserializationError { format, .. }) if format == "json"
    ));

    assert!(matches!(
        HostConfig::load(&temp_dir.path().join("absent.json")),
        Err(StorageSystemError::Io { .. })
    ));
}
