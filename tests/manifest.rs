//! Feature wiring of the package manifest.

use toml::Value;

fn manifest() -> Value {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
    let contents = std::fs::read_to_string(path).unwrap();
    toml::from_str(&contents).unwrap()
}

fn feature(manifest: &Value, name: &str) -> Vec<String> {
    manifest["features"][name]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

#[test]
fn libc_only_comes_with_microphone_support() {
    let manifest = manifest();
    assert_eq!(manifest["dependencies"]["libc"]["optional"].as_bool(), Some(true));
    assert!(feature(&manifest, "cpal-audio").contains(&"dep:libc".to_string()));
    assert!(!feature(&manifest, "cli").contains(&"dep:libc".to_string()));
}

#[test]
fn cli_build_pulls_no_device_crates() {
    let manifest = manifest();
    let cli = feature(&manifest, "cli");
    assert!(!cli.iter().any(|f| f == "dep:cpal" || f == "dep:libc"));
}
