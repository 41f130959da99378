use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use super::fixtures::{PluginTree, descriptor, descriptor_with_deps, empty_modules, registry_with};
use crate::kernel::error::Error;
use crate::plugin_system::manager::{DefaultPluginManager, PluginManager};
use crate::plugin_system::plugin::PluginState;
use crate::storage::config::HostConfig;

const IDS: [&str; 3] = ["core", "ext", "extra"];

fn sample_tree() -> PluginTree {
    let tree = PluginTree::new();
    tree.add("core", descriptor("core"));
    tree.add("ext", descriptor_with_deps("ext", &["core"]));
    let mut extra = descriptor("extra");
    extra["requires_explicit_enabling"] = serde_json::json!(true);
    tree.add("extra", extra);
    tree
}

fn config_for(tree: &PluginTree, state: &TempDir) -> HostConfig {
    HostConfig {
        plugin_dirs: vec![tree.path().to_path_buf()],
        state_dir: state.path().join("state"),
        ..Default::default()
    }
}

fn manager_for(config: &HostConfig) -> DefaultPluginManager {
    DefaultPluginManager::with_registry(registry_with(empty_modules(&IDS)), config)
}

#[tokio::test]
async fn test_rescan_activates_new_plugins() {
    let tree = sample_tree();
    let state = tempfile::tempdir().unwrap();
    let manager = manager_for(&config_for(&tree, &state));

    assert_eq!(manager.rescan().await.unwrap(), 3);
    assert!(manager.is_plugin_active("core").await.unwrap());
    assert!(manager.is_plugin_active("ext").await.unwrap());
    assert!(!manager.is_plugin_active("extra").await.unwrap());
    assert!(!manager.is_plugin_active("missing").await.unwrap());

    let active: Vec<String> = manager
        .list_active()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id.to_string())
        .collect();
    assert_eq!(active, vec!["core", "ext"]);
}

#[tokio::test]
async fn test_shutdown_persists_state_for_next_run() {
    let tree = sample_tree();
    let state = tempfile::tempdir().unwrap();
    let config = config_for(&tree, &state);

    let manager = manager_for(&config);
    manager.rescan().await.unwrap();
    manager.activate(&["extra".to_string()]).await.unwrap();
    manager.deactivate(&["ext".to_string()]).await.unwrap();
    manager.shutdown().await.unwrap();
    assert!(manager.list_active().await.unwrap().is_empty());

    let active_file = fs::read_to_string(manager.store().active_plugins_path()).unwrap();
    assert_eq!(active_file, "core\nextra\n");
    let cache_file = fs::read_to_string(manager.store().cache_path()).unwrap();
    assert_eq!(cache_file.lines().count(), 3);

    let restarted = manager_for(&config);
    assert_eq!(restarted.rescan().await.unwrap(), 3);
    assert!(restarted.is_plugin_active("core").await.unwrap());
    assert!(restarted.is_plugin_active("extra").await.unwrap());
    assert!(!restarted.is_plugin_active("ext").await.unwrap(), "ext is not new any more");

    let ext = restarted.get_plugin("ext").await.unwrap().unwrap();
    assert_eq!(ext.fidelity, "stub");
    let described = restarted.describe_plugin("ext").await.unwrap();
    assert_eq!(described.name.as_deref(), Some("Plugin ext"));
    assert_eq!(described.dependencies.len(), 1);
}

#[tokio::test]
async fn test_rescan_reports_broken_plugins() {
    let tree = sample_tree();
    tree.add_file("broken", "plugin.json", "{");
    let state = tempfile::tempdir().unwrap();
    let manager = manager_for(&config_for(&tree, &state));

    let err = manager.rescan().await.unwrap_err();
    match err {
        Error::Plugins(errors) => assert_eq!(errors.len(), 1),
        other => panic!("Expected plugin errors, got {:?}", other),
    }
    // The healthy plugins are still registered and active
    assert_eq!(manager.list_plugins().await.unwrap().len(), 3);
    assert!(manager.is_plugin_active("ext").await.unwrap());
}

#[tokio::test]
async fn test_activation_errors_are_returned() {
    let tree = sample_tree();
    let state = tempfile::tempdir().unwrap();
    let manager = manager_for(&config_for(&tree, &state));
    manager.rescan().await.unwrap();

    let err = manager.deactivate(&["core".to_string()]).await.unwrap_err();
    assert!(err.to_string().contains("still in use"), "{}", err);
    assert!(manager.activate(&["nope".to_string()]).await.is_err());
    assert!(manager.describe_plugin("nope").await.is_err());
}

#[tokio::test]
async fn test_manager_behind_trait_object() {
    let tree = sample_tree();
    let state = tempfile::tempdir().unwrap();
    let manager: Arc<dyn PluginManager> = Arc::new(manager_for(&config_for(&tree, &state)));

    manager.rescan().await.unwrap();
    let handles: Vec<_> = ["core", "ext", "extra"]
        .into_iter()
        .map(|id| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.is_plugin_active(id).await.unwrap() })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    assert_eq!(results, vec![true, true, false]);
}

#[test]
fn test_manager_without_runtime() {
    let tree = sample_tree();
    let state = tempfile::tempdir().unwrap();
    let config = HostConfig {
        activate_new: false,
        ..config_for(&tree, &state)
    };
    let manager = manager_for(&config);

    futures::executor::block_on(async {
        manager.rescan().await.unwrap();
        assert!(manager.list_active().await.unwrap().is_empty());
        let core = manager.get_plugin("core").await.unwrap().unwrap();
        assert_eq!(core.state, PluginState::Available);
        manager.save_state().await.unwrap();
    });
    assert!(manager.store().cache_path().is_file());
}
