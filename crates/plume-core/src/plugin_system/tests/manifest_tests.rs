use serde_json::json;

use super::fixtures::{PluginTree, descriptor};
use crate::plugin_system::error::{DescriptorProblem, PluginSystemError};
use crate::plugin_system::loader::LoaderRef;
use crate::plugin_system::manifest::{DescriptorParser, LocalizedText, PluginId};

fn problems_of(err: PluginSystemError) -> Vec<DescriptorProblem> {
    match err {
        PluginSystemError::Parse { problems, .. } => problems,
        other => panic!("Expected a parse error, got {:?}", other),
    }
}

#[test]
fn test_plugin_id_validation() {
    assert!(PluginId::new("core_io-2").is_ok());
    assert_eq!(PluginId::new(""), Err(DescriptorProblem::MissingId));
    assert!(matches!(PluginId::new("has space"), Err(DescriptorProblem::InvalidId(_))));
    assert!(matches!(PluginId::new("a|b"), Err(DescriptorProblem::InvalidId(_))));
    assert!(matches!(PluginId::new("a:b"), Err(DescriptorProblem::InvalidId(_))));
}

#[test]
fn test_parse_full_descriptor() {
    let tree = PluginTree::new();
    let dir = tree.add(
        "spreadsheet",
        json!({
            "id": "spreadsheet",
            "name": "Spreadsheet formats",
            "description": "Reads and writes sheets",
            "version": "2.1.0",
            "autoload": true,
            "requires_explicit_enabling": true,
            "dependencies": [
                { "id": "core" },
                { "id": "io", "force_load": true, "version": "1.0.0" }
            ],
            "loader": { "type": "static", "attributes": { "module": "sheets" } },
            "services": [
                { "type": "general", "id": "main" },
                { "type": "file_opener", "id": "csv", "priority": 70, "suffixes": ["csv", ".TSV"] },
                { "type": "resource", "id": "icon", "name": "sheet-icon", "value": "<svg/>" }
            ]
        }),
    );

    let parser = DescriptorParser::default();
    let full = parser.parse_dir(&dir).expect("descriptor should parse");
    assert_eq!(full.id, "spreadsheet");
    assert_eq!(full.name, "Spreadsheet formats");
    assert_eq!(full.description, "Reads and writes sheets");
    assert_eq!(full.version, Some(semver::Version::new(2, 1, 0)));
    assert!(full.autoload);
    assert!(full.requires_explicit_enabling);
    assert_eq!(full.loader_id.as_deref(), Some("static"));
    assert_eq!(full.loader_attributes.get("module").map(String::as_str), Some("sheets"));

    assert_eq!(full.dependencies.len(), 2);
    assert_eq!(full.dependencies[0].plugin_id, "core");
    assert!(!full.dependencies[0].force_load);
    assert!(full.dependencies[1].force_load);
    assert_eq!(full.dependencies[1].version, Some(semver::Version::new(1, 0, 0)));

    let ids: Vec<&str> = full.services.iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec!["main", "csv", "icon"]);
    assert_eq!(full.service("csv").map(|s| s.kind()), Some("file_opener"));
    assert!(full.services.iter().all(|s| !s.is_active() && !s.is_loaded()));
}

#[cfg(feature = "toml-config")]
#[test]
fn test_parse_toml_descriptor() {
    let tree = PluginTree::new();
    let dir = tree.add_file(
        "tomlplug",
        "plugin.toml",
        r#"
id = "tomlplug"
name = "TOML plugin"

[loader]
type = "static"

[[services]]
type = "file_saver"
id = "out"
extension = "txt"
default_priority = 5
"#,
    );
    let full = DescriptorParser::default().parse_dir(&dir).unwrap();
    assert_eq!(full.id, "tomlplug");
    assert_eq!(full.version, None);
    assert_eq!(full.services.len(), 1);
    assert_eq!(full.services[0].kind(), "file_saver");
}

#[cfg(feature = "yaml-config")]
#[test]
fn test_parse_yaml_descriptor() {
    let tree = PluginTree::new();
    let dir = tree.add_file(
        "yamlplug",
        "plugin.yaml",
        "id: yamlplug\nname: YAML plugin\nloader:\n  type: native\ndependencies:\n  - id: core\n",
    );
    let full = DescriptorParser::default().parse_dir(&dir).unwrap();
    assert_eq!(full.id, "yamlplug");
    assert_eq!(full.loader_id.as_deref(), Some("native"));
    assert_eq!(full.dependencies[0].plugin_id, "core");
}

#[test]
fn test_localized_name_resolution() {
    let tree = PluginTree::new();
    let dir = tree.add(
        "greeter",
        json!({
            "id": "greeter",
            "name": { "C": "Greeter", "de": "Begruesser", "fr_CA": "Salutations" },
            "loader": { "type": "static" }
        }),
    );

    let mut parser = DescriptorParser::default();
    assert_eq!(parser.parse_dir(&dir).unwrap().name, "Greeter");

    parser.set_locale(Some("de_AT".to_string()));
    assert_eq!(parser.parse_dir(&dir).unwrap().name, "Begruesser");

    parser.set_locale(Some("fr_CA".to_string()));
    assert_eq!(parser.parse_dir(&dir).unwrap().name, "Salutations");

    let plain = LocalizedText::Plain("Same".to_string());
    assert_eq!(plain.resolve(Some("ja")), Some("Same"));
}

#[test]
fn test_all_problems_are_collected() {
    let tree = PluginTree::new();
    let dir = tree.add(
        "broken",
        json!({
            "id": "bad id",
            "version": "one.two",
            "dependencies": [{ "id": "no/slash" }],
            "loader": { "type": "a:b:c" },
        }),
    );

    let err = DescriptorParser::default().parse_dir(&dir).unwrap_err();
    let problems = problems_of(err);
    assert!(problems.iter().any(|p| matches!(p, DescriptorProblem::InvalidId(_))));
    assert!(problems.contains(&DescriptorProblem::MissingName));
    assert!(problems.iter().any(|p| matches!(p, DescriptorProblem::InvalidVersion(_))));
    assert!(problems.iter().any(|p| matches!(p, DescriptorProblem::InvalidDependency(_))));
    assert!(problems.iter().any(|p| matches!(p, DescriptorProblem::InvalidLoader(_))));
}

#[test]
fn test_malformed_file_is_a_parse_error() {
    let tree = PluginTree::new();
    let dir = tree.add_file("garbage", "plugin.json", "{ not json");
    let problems = problems_of(DescriptorParser::default().parse_dir(&dir).unwrap_err());
    assert!(matches!(problems.as_slice(), [DescriptorProblem::Malformed(_)]));
}

#[test]
fn test_missing_loader_depends_on_default() {
    let tree = PluginTree::new();
    let dir = tree.add("noloader", json!({ "id": "noloader", "name": "No loader" }));

    let mut parser = DescriptorParser::default();
    let problems = problems_of(parser.parse_dir(&dir).unwrap_err());
    assert_eq!(problems, vec![DescriptorProblem::MissingLoader]);

    parser.set_default_loader(Some("static".to_string()));
    let full = parser.parse_dir(&dir).unwrap();
    assert_eq!(full.loader_id, None);
}

#[test]
fn test_service_problems() {
    let tree = PluginTree::new();
    let mut value = descriptor("svc");
    value["services"] = json!([
        { "type": "teleporter", "id": "beam" },
        { "type": "general", "id": "dup" },
        { "type": "general", "id": "dup" },
        { "type": "general" },
        { "type": "resource", "id": "empty" }
    ]);
    let dir = tree.add("svc", value);

    let problems = problems_of(DescriptorParser::default().parse_dir(&dir).unwrap_err());
    assert!(problems.contains(&DescriptorProblem::UnknownServiceKind {
        service_id: "beam".to_string(),
        kind: "teleporter".to_string(),
    }));
    assert!(problems.contains(&DescriptorProblem::DuplicateService("dup".to_string())));
    assert!(problems.iter().any(|p| matches!(
        p,
        DescriptorProblem::InvalidService { service_id, .. } if service_id == "#3"
    )));
    assert!(problems.iter().any(|p| matches!(
        p,
        DescriptorProblem::InvalidService { service_id, .. } if service_id == "empty"
    )));
}

#[test]
fn test_provided_loader_adds_implicit_dependency() {
    let tree = PluginTree::new();
    let dir = tree.add(
        "script",
        json!({
            "id": "script",
            "name": "Script plugin",
            "loader": { "type": "lua:loader" }
        }),
    );
    let full = DescriptorParser::default().parse_dir(&dir).unwrap();
    assert_eq!(full.dependencies.len(), 1);
    assert_eq!(full.dependencies[0].plugin_id, "lua");
    assert!(full.dependencies[0].force_load);
}

#[test]
fn test_loader_ref_parse() {
    assert_eq!(LoaderRef::parse("native"), Some(LoaderRef::Bootstrap("native")));
    assert_eq!(
        LoaderRef::parse("python:loader"),
        Some(LoaderRef::Provided {
            plugin_id: "python",
            service_id: "loader"
        })
    );
    assert_eq!(LoaderRef::parse(""), None);
    assert_eq!(LoaderRef::parse("python:"), None);
    assert_eq!(LoaderRef::parse("a b"), None);
    assert_eq!(LoaderRef::parse("python:loader").map(|r| r.to_string()).as_deref(), Some("python:loader"));
}
