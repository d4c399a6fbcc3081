use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_trawl"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "trawl init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join(".trawl.toml");
    assert!(config_path.exists(), ".trawl.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[index]"));
    assert!(content.contains("[embedding]"));

    // The commented-out template must still parse to the defaults
    let config = trawl_core::TrawlConfig::from_toml(&content).unwrap();
    assert_eq!(config.index.m, 16);
    let _raw: toml::Value = toml::from_str(&content).unwrap();
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".trawl.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_trawl"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
}
