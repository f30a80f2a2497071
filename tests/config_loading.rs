//! Integration tests for config loading across all file formats.

use edgeward::backend::Registry;
use edgeward::config::model::{BackendRole, Config, Scheme};
use edgeward::config::sources::parse_config_str;
use edgeward::config::validation::validate;

fn load_demo(name: &str) -> String {
    let path = format!("demos/{name}");
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {path}: {e}"))
}

#[test]
fn yaml_demo_loads_and_validates() {
    let content = load_demo("edgeward.yaml");
    let config = parse_config_str("yaml", &content, "edgeward.yaml").unwrap();
    validate(&config).unwrap();
    assert_eq!(config.backends_with_role(BackendRole::Fallback), 2);
    assert_eq!(config.backends[3].scheme, Scheme::Https);
    assert_eq!(config.backends[0].probe.initial_successes(), 2);
}

#[test]
fn demo_chain_walks_primary_sentinel_then_mirrors() {
    let content = load_demo("edgeward.yaml");
    let config = parse_config_str("yaml", &content, "edgeward.yaml").unwrap();
    let registry = Registry::from_config(&config).unwrap();

    let names: Vec<&str> = (0..=3)
        .map(|restarts| registry.get(registry.select(restarts)).name.as_str())
        .collect();
    assert_eq!(names, ["origin", "sentinel", "mirror-eu", "mirror-us"]);
    assert!(registry.get(registry.sentinel()).probe.is_none());
}

#[cfg(feature = "json")]
#[test]
fn json_demo_loads_and_validates() {
    let content = load_demo("edgeward.json");
    let config = parse_config_str("json", &content, "edgeward.json").unwrap();
    validate(&config).unwrap();
    assert_eq!(config.backends.len(), 4);
}

#[cfg(feature = "toml")]
#[test]
fn toml_demo_loads_and_validates() {
    let content = load_demo("edgeward.toml");
    let config = parse_config_str("toml", &content, "edgeward.toml").unwrap();
    validate(&config).unwrap();
    assert_eq!(config.backends.len(), 4);
}

#[cfg(all(feature = "json", feature = "toml"))]
#[test]
fn all_formats_produce_equivalent_configs() {
    let yaml = parse_config_str("yaml", &load_demo("edgeward.yaml"), "yaml").unwrap();
    let json = parse_config_str("json", &load_demo("edgeward.json"), "json").unwrap();
    let toml = parse_config_str("toml", &load_demo("edgeward.toml"), "toml").unwrap();

    for other in [&json, &toml] {
        assert_eq!(yaml.node.identity, other.node.identity);
        assert_eq!(yaml.backends.len(), other.backends.len());
        for (a, b) in yaml.backends.iter().zip(&other.backends) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.role, b.role);
            assert_eq!(a.port, b.port);
            assert_eq!(a.probe.request, b.probe.request);
        }
        assert_eq!(yaml.security.purge_allow, other.security.purge_allow);
        assert_eq!(yaml.forwarding.headers.add, other.forwarding.headers.add);
    }
}

#[test]
fn unsupported_format_returns_error() {
    let result = parse_config_str("xml", "{}", "test.xml");
    assert!(result.is_err());
}

#[test]
fn chain_without_sentinel_fails_validation() {
    let json = r#"{
        "node": {"identity": "cache-test"},
        "backends": [
            {"id": "origin", "host": "127.0.0.1", "port": 8080, "role": "primary"},
            {"id": "mirror", "host": "127.0.0.1", "port": 8081, "role": "fallback"}
        ]
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();
    let errors = validate(&config).unwrap_err();
    assert!(errors.iter().any(|e| e.message.contains("sentinel")));
}

#[test]
fn unknown_fields_are_rejected() {
    let json = r#"{"node": {"identity": "x", "colour": "red"}, "backends": []}"#;
    assert!(serde_json::from_str::<Config>(json).is_err());
}
