use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use serde_json::json;

use super::fixtures::{
    PluginTree, descriptor, descriptor_with_deps, empty_modules, entries, has_error, record, registry_with, scan,
    trace,
};
use crate::event::{EventResult, PluginEvent};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::plugin::PluginState;
use crate::plugin_system::static_loader::{StaticLoaderFactory, StaticModule};

fn state_of(registry: &crate::plugin_system::registry::PluginRegistry, id: &str) -> PluginState {
    registry.plugin(id).expect("plugin should be known").state()
}

#[test]
fn test_activate_is_idempotent() {
    let tree = PluginTree::new();
    tree.add("alpha", descriptor("alpha"));
    let mut registry = registry_with(empty_modules(&["alpha"]));
    assert!(scan(&mut registry, &tree, false).is_empty());

    let events: Arc<Mutex<Vec<PluginState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    registry.events_mut().register_handler("plugin.state_changed", move |event| {
        if let PluginEvent::StateChanged { state, .. } = event {
            sink.lock().unwrap().push(*state);
        }
        EventResult::Continue
    });

    assert!(registry.activate(["alpha"]).is_empty());
    assert_eq!(state_of(&registry, "alpha"), PluginState::Active);
    assert_eq!(
        *events.lock().unwrap(),
        vec![PluginState::Activating, PluginState::Active]
    );

    assert!(registry.activate(["alpha"]).is_empty());
    assert_eq!(events.lock().unwrap().len(), 2, "Second activation must not notify");
}

#[test]
fn test_dependency_cycle_is_reported_with_its_chain() {
    let tree = PluginTree::new();
    tree.add("a", descriptor_with_deps("a", &["b"]));
    tree.add("b", descriptor_with_deps("b", &["c"]));
    tree.add("c", descriptor_with_deps("c", &["a"]));
    let mut registry = registry_with(empty_modules(&["a", "b", "c"]));
    assert!(scan(&mut registry, &tree, false).is_empty());

    let errors = registry.activate(["a"]);
    assert!(has_error(&errors, |e| matches!(
        e,
        PluginSystemError::CyclicDependency { chain } if chain == &["a", "b", "c", "a"]
    )));
    for id in ["a", "b", "c"] {
        assert_eq!(state_of(&registry, id), PluginState::Available, "{} should be available", id);
    }
}

#[test]
fn test_use_count_blocks_deactivation() {
    let tree = PluginTree::new();
    tree.add("core", descriptor("core"));
    tree.add("ext", descriptor_with_deps("ext", &["core"]));
    let mut registry = registry_with(empty_modules(&["core", "ext"]));
    assert!(scan(&mut registry, &tree, false).is_empty());

    assert!(registry.activate(["ext"]).is_empty());
    assert_eq!(state_of(&registry, "core"), PluginState::Active);
    assert_eq!(registry.plugin("core").unwrap().use_count(), 1);

    let errors = registry.deactivate(["core"]);
    assert!(has_error(&errors, |e| matches!(
        e,
        PluginSystemError::StillInUse { plugin_id, use_count: 1 } if plugin_id == "core"
    )));
    assert_eq!(state_of(&registry, "core"), PluginState::Active);

    assert!(registry.deactivate(["ext"]).is_empty());
    assert_eq!(registry.plugin("core").unwrap().use_count(), 0);
    assert!(registry.deactivate(["core"]).is_empty());
    assert_eq!(state_of(&registry, "core"), PluginState::Available);
}

#[test]
fn test_deactivate_all_succeeds_in_any_order() {
    let tree = PluginTree::new();
    tree.add("base", descriptor("base"));
    tree.add("left", descriptor_with_deps("left", &["base"]));
    tree.add("right", descriptor_with_deps("right", &["base"]));
    tree.add("top", descriptor_with_deps("top", &["left", "right"]));
    tree.add("leaf", descriptor_with_deps("leaf", &["top"]));
    let ids = ["base", "left", "right", "top", "leaf"];
    let mut registry = registry_with(empty_modules(&ids));
    assert!(scan(&mut registry, &tree, false).is_empty());

    let mut rng = rand::thread_rng();
    for _ in 0..10 {
        assert!(registry.activate(["leaf"]).is_empty());
        assert_eq!(registry.plugin("base").unwrap().use_count(), 2);

        let mut shuffled = ids.to_vec();
        shuffled.shuffle(&mut rng);
        let errors = registry.deactivate(&shuffled);
        assert!(errors.is_empty(), "Order {:?} failed: {}", shuffled, errors);
        for id in ids {
            assert_eq!(state_of(&registry, id), PluginState::Available);
            assert_eq!(registry.plugin(id).unwrap().use_count(), 0);
        }
    }
}

#[test]
fn test_deactivate_all_reports_only_stuck_plugins() {
    let tree = PluginTree::new();
    tree.add("core", descriptor("core"));
    tree.add("ext", descriptor_with_deps("ext", &["core"]));
    let mut registry = registry_with(empty_modules(&["core", "ext"]));
    assert!(scan(&mut registry, &tree, false).is_empty());
    assert!(registry.activate(["ext"]).is_empty());

    // ext stays active, so core can never be deactivated
    let errors = registry.deactivate(["core"]);
    assert_eq!(errors.len(), 1);
    assert!(has_error(&errors, |e| matches!(e, PluginSystemError::StillInUse { .. })));
}

#[test]
fn test_failed_activation_rolls_back_new_dependencies() {
    let tree = PluginTree::new();
    tree.add("shared", descriptor("shared"));
    tree.add("b", descriptor("b"));
    tree.add("a", descriptor_with_deps("a", &["shared", "b", "ghost"]));
    let mut registry = registry_with(empty_modules(&["shared", "a", "b"]));
    assert!(scan(&mut registry, &tree, false).is_empty());
    assert!(registry.activate(["shared"]).is_empty());

    let errors = registry.activate(["a"]);
    assert!(has_error(&errors, |e| matches!(
        e,
        PluginSystemError::UnknownPlugin { plugin_id, referenced_by: Some(owner) }
            if plugin_id == "ghost" && owner == "a"
    )));
    assert_eq!(state_of(&registry, "a"), PluginState::Available);
    assert_eq!(state_of(&registry, "b"), PluginState::Available, "b was activated for a and must be rolled back");
    assert_eq!(state_of(&registry, "shared"), PluginState::Active, "shared was active before");
    assert_eq!(registry.plugin("shared").unwrap().use_count(), 0);
    assert_eq!(registry.plugin("b").unwrap().use_count(), 0);
}

#[test]
fn test_dependency_version_must_match() {
    let tree = PluginTree::new();
    tree.add("lib", descriptor("lib"));
    let mut app = descriptor("app");
    app["dependencies"] = json!([{ "id": "lib", "version": "2.0.0" }]);
    tree.add("app", app);
    let mut registry = registry_with(empty_modules(&["lib", "app"]));
    assert!(scan(&mut registry, &tree, false).is_empty());

    let errors = registry.activate(["app"]);
    assert!(has_error(&errors, |e| matches!(
        e,
        PluginSystemError::DependencyVersionMismatch { dependency, required, found: Some(found), .. }
            if dependency == "lib" && required == "2.0.0" && found == "1.0.0"
    )));
    assert_eq!(state_of(&registry, "app"), PluginState::Available);
    assert_eq!(state_of(&registry, "lib"), PluginState::Available);
}

#[test]
fn test_deactivating_an_inactive_plugin_does_nothing() {
    let tree = PluginTree::new();
    tree.add("idle", descriptor("idle"));
    let mut registry = registry_with(empty_modules(&["idle"]));
    assert!(scan(&mut registry, &tree, false).is_empty());

    assert!(registry.deactivate(["idle"]).is_empty());
    assert_eq!(state_of(&registry, "idle"), PluginState::Available);
}

#[test]
fn test_unknown_plugin() {
    let mut registry = registry_with(StaticLoaderFactory::new());
    let errors = registry.activate(["nobody"]);
    assert!(has_error(&errors, |e| matches!(
        e,
        PluginSystemError::UnknownPlugin { plugin_id, referenced_by: None } if plugin_id == "nobody"
    )));
    let errors = registry.deactivate(["nobody"]);
    assert!(has_error(&errors, |e| matches!(e, PluginSystemError::UnknownPlugin { .. })));
}

#[test]
fn test_general_service_hooks_run_in_order() {
    let tree = PluginTree::new();
    let mut value = descriptor("svc");
    value["services"] = json!([{ "type": "general", "id": "main" }]);
    tree.add("svc", value);

    let calls = trace();
    let module = StaticModule::new()
        .on_load(record(&calls, "load"))
        .on_unload(record(&calls, "unload"))
        .general_with("main", record(&calls, "init"), record(&calls, "cleanup"));
    let mut registry = registry_with(StaticLoaderFactory::new().with_module("svc", module));
    assert!(scan(&mut registry, &tree, false).is_empty());

    assert!(registry.activate(["svc"]).is_empty());
    assert!(registry.plugin("svc").unwrap().is_loaded());
    assert!(registry.service("svc", "main").unwrap().is_active());
    assert_eq!(entries(&calls), vec!["load", "init"]);

    assert!(registry.deactivate(["svc"]).is_empty());
    assert!(!registry.plugin("svc").unwrap().is_loaded());
    assert!(!registry.service("svc", "main").unwrap().is_loaded());
    assert_eq!(entries(&calls), vec!["load", "init", "cleanup", "unload"]);
}

#[test]
fn test_failing_service_keeps_plugin_available() {
    let tree = PluginTree::new();
    let mut value = descriptor("fragile");
    value["services"] = json!([{ "type": "general", "id": "main" }]);
    tree.add("fragile", value);

    let module = StaticModule::new().general_with("main", || Err("boom".to_string()), || Ok(()));
    let mut registry = registry_with(StaticLoaderFactory::new().with_module("fragile", module));
    assert!(scan(&mut registry, &tree, false).is_empty());

    let errors = registry.activate(["fragile"]);
    assert!(has_error(&errors, |e| matches!(
        e,
        PluginSystemError::ServiceActivationFailed { service_id, reason, .. }
            if service_id == "main" && reason == "boom"
    )));
    assert_eq!(state_of(&registry, "fragile"), PluginState::Available);
    assert!(registry.list_active().is_empty());
}

#[test]
fn test_failing_cleanup_keeps_plugin_active() {
    let tree = PluginTree::new();
    let mut value = descriptor("sticky");
    value["services"] = json!([{ "type": "general", "id": "main" }]);
    tree.add("sticky", value);

    let module = StaticModule::new().general_with("main", || Ok(()), || Err("still busy".to_string()));
    let mut registry = registry_with(StaticLoaderFactory::new().with_module("sticky", module));
    assert!(scan(&mut registry, &tree, false).is_empty());
    assert!(registry.activate(["sticky"]).is_empty());

    let errors = registry.deactivate(["sticky"]);
    assert!(has_error(&errors, |e| matches!(
        e,
        PluginSystemError::ServiceDeactivationFailed { reason, .. } if reason == "still busy"
    )));
    assert_eq!(state_of(&registry, "sticky"), PluginState::Active);
}

#[test]
fn test_failed_activation_releases_loaded_code() {
    let tree = PluginTree::new();
    let mut value = descriptor("broken");
    value["services"] = json!([
        { "type": "general", "id": "first" },
        { "type": "general", "id": "second" }
    ]);
    tree.add("broken", value);

    let calls = trace();
    let module = StaticModule::new()
        .on_load(record(&calls, "load"))
        .on_unload(record(&calls, "unload"))
        .general_with("first", record(&calls, "first"), || Ok(()))
        .general_with("second", || Err("no luck".to_string()), || Ok(()));
    let mut registry = registry_with(StaticLoaderFactory::new().with_module("broken", module));
    assert!(scan(&mut registry, &tree, false).is_empty());

    let errors = registry.activate(["broken"]);
    assert!(has_error(&errors, |e| matches!(
        e,
        PluginSystemError::ServiceActivationFailed { service_id, .. } if service_id == "second"
    )));
    let plugin = registry.plugin("broken").unwrap();
    assert_eq!(plugin.state(), PluginState::Available);
    assert!(!plugin.is_loaded());
    assert!(!registry.service("broken", "first").unwrap().is_loaded());
    assert!(!registry.service("broken", "second").unwrap().is_loaded());
    // The sibling that succeeded stays active
    assert!(registry.service("broken", "first").unwrap().is_active());
    assert_eq!(entries(&calls), vec!["load", "first", "unload"]);
}
