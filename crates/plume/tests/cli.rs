use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

/// A plugin directory and a state directory for one test
struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    fn plugins(&self) -> std::path::PathBuf {
        self.root.path().join("plugins")
    }

    fn add_plugin(&self, dir: &str, descriptor: Value) {
        let plugin_dir = self.plugins().join(dir);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("plugin.json"), descriptor.to_string()).unwrap();
    }

    fn plume(&self) -> Command {
        let mut cmd = Command::cargo_bin("plume").unwrap();
        cmd.arg("--plugin-dir")
            .arg(self.plugins())
            .arg("--state-dir")
            .arg(self.root.path().join("state"));
        cmd
    }

    fn state_file(&self, name: &str) -> String {
        fs::read_to_string(self.root.path().join("state").join(name)).unwrap_or_default()
    }
}

fn plugin(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("The {} plugin", id),
        "version": "0.3.0",
        "loader": { "type": "native" }
    })
}

fn sample() -> Workspace {
    let ws = Workspace::new();
    ws.add_plugin("core", plugin("core"));
    let mut ext = plugin("ext");
    ext["dependencies"] = json!([{ "id": "core" }]);
    ws.add_plugin("ext", ext);
    let mut extra = plugin("extra");
    extra["requires_explicit_enabling"] = json!(true);
    ws.add_plugin("extra", extra);
    ws
}

#[test]
fn test_help_lists_commands() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("plume")?;
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("activate"))
        .stdout(predicate::str::contains("deactivate"))
        .stdout(predicate::str::contains("list"));
    Ok(())
}

#[test]
fn test_scan_empty_directory() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    fs::create_dir_all(ws.plugins())?;
    ws.plume()
        .arg("scan")
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 0 plugin(s), 0 active"));
    Ok(())
}

#[test]
fn test_list_activates_new_plugins() -> Result<(), Box<dyn std::error::Error>> {
    let ws = sample();
    ws.plume()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("core 0.3.0 [active]"))
        .stdout(predicate::str::contains("ext 0.3.0 [active]"))
        .stdout(predicate::str::contains("extra 0.3.0 [available]"));

    assert_eq!(ws.state_file("active-plugins"), "core\next\n");
    assert_eq!(ws.state_file("plugin-cache").lines().count(), 3);
    Ok(())
}

#[test]
fn test_activation_persists_between_runs() -> Result<(), Box<dyn std::error::Error>> {
    let ws = sample();
    ws.plume().arg("--no-activate-new").arg("scan").assert().success();
    assert_eq!(ws.state_file("active-plugins"), "");

    ws.plume()
        .args(["activate", "extra"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Activated: extra"));

    ws.plume()
        .args(["list", "--active"])
        .assert()
        .success()
        .stdout(predicate::str::contains("extra"))
        .stdout(predicate::str::contains("core").not());

    ws.plume().args(["deactivate", "extra"]).assert().success();
    ws.plume()
        .args(["list", "--active"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins found."));
    Ok(())
}

#[test]
fn test_deactivating_a_dependency_fails() -> Result<(), Box<dyn std::error::Error>> {
    let ws = sample();
    ws.plume()
        .args(["deactivate", "core"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("still in use"));
    Ok(())
}

#[test]
fn test_info_shows_descriptor() -> Result<(), Box<dyn std::error::Error>> {
    let ws = sample();
    ws.plume()
        .args(["info", "ext"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Name: The ext plugin"))
        .stdout(predicate::str::contains("Requires plugin: core (any version)"))
        .stdout(predicate::str::contains("Loader: native"));

    ws.plume()
        .args(["info", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown plugin 'missing'"));
    Ok(())
}

#[test]
fn test_broken_plugin_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let ws = sample();
    let broken = ws.plugins().join("broken");
    fs::create_dir_all(&broken)?;
    fs::write(broken.join("plugin.json"), "{ \"id\": \"broken\"")?;

    ws.plume()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Some plugins could not be loaded"))
        .stdout(predicate::str::contains("core 0.3.0"));
    Ok(())
}

#[test]
fn test_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let ws = sample();
    let config = ws.root.path().join("host.json");
    fs::write(
        &config,
        json!({ "plugin_dirs": ["plugins"], "state_dir": "state", "activate_new": false }).to_string(),
    )?;

    let mut cmd = Command::cargo_bin("plume")?;
    cmd.arg("--config").arg(&config).args(["list", "--active"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No plugins found."));
    assert!(ws.root.path().join("state").join("plugin-cache").is_file());
    Ok(())
}
