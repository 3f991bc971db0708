//! CLI regression tests for the `portcullis` binary.
//!
//! These tests invoke the binary as a subprocess to catch regressions in flag
//! names, exit codes, and output formats that the library tests can't catch.
//!
//! Run with: `cargo test -p portcullis-test`
//! Requires the `portcullis` binary to be built first (`cargo build -p portcullis`).

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::TempDir;

use portcullis_compiler::{load_bundle, load_manifest, EntityType};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns an assert_cmd Command wrapping the `portcullis` binary.
fn portcullis() -> Command {
    // cargo_bin is deprecated for custom build-dir setups; fine for standard workspace use.
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("portcullis")
        .expect("portcullis binary not found, run `cargo build -p portcullis` first");
    cmd.env_remove("RUST_LOG")
        .env_remove("PORTCULLIS_LOG_LEVEL")
        .env_remove("PORTCULLIS_LOG_FORMAT")
        .env_remove("PORTCULLIS_LOG_SOURCE_LOCATION");
    cmd
}

/// Absolute path to the shared test fixtures directory.
fn fixtures() -> PathBuf {
    // CARGO_MANIFEST_DIR = .../crates/portcullis-test
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("crates/")
        .parent()
        .expect("workspace root")
        .join("tests/fixtures")
}

/// Compile the `basic` fixture into `dir` and return the artifact path.
fn compile_basic(dir: &Path) -> PathBuf {
    let output = dir.join("basic.gwa");
    portcullis()
        .args(["compile", "--source"])
        .arg(fixtures().join("basic"))
        .arg("--output")
        .arg(&output)
        .assert()
        .success();
    output
}

// ---------------------------------------------------------------------------
// portcullis compile
// ---------------------------------------------------------------------------

#[test]
fn compile_valid_source_exits_zero() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.gwa");

    portcullis()
        .args(["compile", "--source"])
        .arg(fixtures().join("basic"))
        .arg("--output")
        .arg(&output)
        .args(["--name", "orders"])
        .assert()
        .success()
        .stderr(contains("compiled").and(contains("13 entities")));

    let manifest = load_manifest(&output).unwrap();
    assert_eq!(manifest.name.as_deref(), Some("orders"));
    assert_eq!(manifest.entity_counts[&EntityType::Folder], 4);
    assert_eq!(manifest.entity_counts[&EntityType::Service], 2);
}

#[test]
fn compile_orders_policies_before_their_users() {
    let temp = TempDir::new().unwrap();
    let output = compile_basic(temp.path());

    let bundle = load_bundle(&output).unwrap();
    let policies: Vec<_> = bundle
        .entries(EntityType::Policy)
        .map(|(key, _)| key.to_string())
        .collect();
    assert_eq!(policies, vec!["lib/auth.xml", "lib/audit.xml"]);

    let orders = bundle
        .get(EntityType::Service, "api/orders.xml")
        .and_then(|s| s.policy_body())
        .unwrap();
    assert!(orders.contains("L7p:EncapsulatedAssertionConfigGuid"));
    assert!(orders.contains("L7p:Base64ResponseBody"));
    assert!(!orders.contains("policyPath"));
}

#[test]
fn compile_missing_output_flag_exits_two() {
    portcullis()
        .args(["compile", "--source"])
        .arg(fixtures().join("basic"))
        .assert()
        .failure()
        .code(2);
}

#[test]
fn compile_nonexistent_source_exits_one() {
    let temp = TempDir::new().unwrap();
    portcullis()
        .args(["compile", "--source", "this-directory-does-not-exist"])
        .arg("--output")
        .arg(temp.path().join("out.gwa"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("source directory not found"));
}

#[test]
fn compile_include_cycle_exits_one() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.gwa");
    portcullis()
        .args(["compile", "--source"])
        .arg(fixtures().join("cycle"))
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .code(1)
        .stderr(contains("E2003").and(contains("a.xml,b.xml")));
    assert!(!output.exists());
}

#[test]
fn compile_unresolved_reference_exits_one() {
    let temp = TempDir::new().unwrap();
    portcullis()
        .args(["compile", "--source"])
        .arg(fixtures().join("unresolved"))
        .arg("--output")
        .arg(temp.path().join("out.gwa"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("E2001").and(contains("Missing")));
}

#[test]
fn compile_with_dependency_artifact() {
    let temp = TempDir::new().unwrap();
    let shared = compile_basic(temp.path());

    let app = temp.path().join("app");
    std::fs::create_dir_all(app.join("policy")).unwrap();
    std::fs::write(
        app.join("policy/main.xml"),
        r#"<wsp:Policy xmlns:L7p="http://www.layer7tech.com/ws/policy" xmlns:wsp="http://schemas.xmlsoap.org/ws/2002/12/policy"><L7p:Encapsulated encassName="Audit"/></wsp:Policy>"#,
    )
    .unwrap();

    let output = temp.path().join("app.gwa");
    portcullis()
        .args(["compile", "--source"])
        .arg(&app)
        .arg("--output")
        .arg(&output)
        .arg("--dependency")
        .arg(&shared)
        .assert()
        .success();

    let manifest = load_manifest(&output).unwrap();
    assert_eq!(manifest.dependencies.len(), 1);
    let bundle = load_bundle(&output).unwrap();
    assert!(bundle.get(EntityType::EncapsulatedService, "Audit").is_none());
}

#[test]
fn compile_reads_project_manifest_from_source() {
    let temp = TempDir::new().unwrap();
    let shared = compile_basic(temp.path());

    let app = temp.path().join("app");
    std::fs::create_dir_all(app.join("policy")).unwrap();
    std::fs::write(
        app.join("policy/main.xml"),
        r#"<wsp:Policy xmlns:L7p="http://www.layer7tech.com/ws/policy" xmlns:wsp="http://schemas.xmlsoap.org/ws/2002/12/policy"><L7p:Include><L7p:PolicyGuid policyPath="lib/auth.xml"/></L7p:Include></wsp:Policy>"#,
    )
    .unwrap();
    std::fs::write(
        app.join("portcullis.yaml"),
        format!("name: app\ndependencies:\n  - path: {}\n", shared.display()),
    )
    .unwrap();

    let output = temp.path().join("app.gwa");
    portcullis()
        .args(["compile", "--source"])
        .arg(&app)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let manifest = load_manifest(&output).unwrap();
    assert_eq!(manifest.name.as_deref(), Some("app"));
    assert_eq!(manifest.dependencies.len(), 1);
}

#[test]
fn compile_manifest_with_invalid_dependency_exits_one() {
    let temp = TempDir::new().unwrap();
    let manifest = temp.path().join("portcullis.yaml");
    std::fs::write(&manifest, "dependencies:\n  - path: missing.gwa\n").unwrap();

    portcullis()
        .args(["compile", "--source"])
        .arg(fixtures().join("basic"))
        .arg("--output")
        .arg(temp.path().join("out.gwa"))
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .code(1)
        .stderr(contains("missing.gwa"));
}

// ---------------------------------------------------------------------------
// portcullis extract
// ---------------------------------------------------------------------------

#[test]
fn extract_scope_keeps_used_entities() {
    let temp = TempDir::new().unwrap();
    let artifact = compile_basic(temp.path());
    let output = temp.path().join("api.gwa");

    portcullis()
        .args(["extract", "--artifact"])
        .arg(&artifact)
        .args(["--scope", "/api", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stderr(contains("5 entities"));

    let manifest = load_manifest(&output).unwrap();
    assert_eq!(manifest.scope.as_deref(), Some("/api"));

    let bundle = load_bundle(&output).unwrap();
    let names = |t| bundle.all(t).map(|e| e.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(EntityType::Service), vec!["orders"]);
    assert_eq!(names(EntityType::JdbcConnection), vec!["ordersdb"]);
    assert_eq!(names(EntityType::ListenPort), vec!["orders"]);
    assert!(names(EntityType::ClusterProperty).is_empty());
}

#[test]
fn extract_relative_scope_exits_one() {
    let temp = TempDir::new().unwrap();
    let artifact = compile_basic(temp.path());

    portcullis()
        .args(["extract", "--artifact"])
        .arg(&artifact)
        .args(["--scope", "api", "--output"])
        .arg(temp.path().join("api.gwa"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("E2008"));
}

#[test]
fn extract_missing_artifact_exits_one() {
    let temp = TempDir::new().unwrap();
    portcullis()
        .args(["extract", "--artifact", "missing.gwa", "--scope", "/", "--output"])
        .arg(temp.path().join("out.gwa"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("artifact not found"));
}

// ---------------------------------------------------------------------------
// portcullis inspect
// ---------------------------------------------------------------------------

#[test]
fn inspect_text_lists_entities() {
    let temp = TempDir::new().unwrap();
    let artifact = compile_basic(temp.path());

    portcullis()
        .args(["inspect", "--artifact"])
        .arg(&artifact)
        .assert()
        .success()
        .stdout(contains("format version:   1").and(contains("lib/audit.xml")).and(contains("ordersdb")));
}

#[test]
fn inspect_json_outputs_valid_json() {
    let temp = TempDir::new().unwrap();
    let artifact = compile_basic(temp.path());

    let output = portcullis()
        .args(["inspect", "--format", "json", "--artifact"])
        .arg(&artifact)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["portcullis_artifact_version"], 1);
    assert_eq!(json["entity_counts"]["POLICY"], 2);
    assert!(json["checksums"]["bundle.json"]
        .as_str()
        .unwrap()
        .starts_with("sha256:"));
}

#[test]
fn inspect_unknown_format_exits_one() {
    let temp = TempDir::new().unwrap();
    let artifact = compile_basic(temp.path());

    portcullis()
        .args(["inspect", "--format", "yaml", "--artifact"])
        .arg(&artifact)
        .assert()
        .failure()
        .code(1);
}

// ---------------------------------------------------------------------------
// global flags
// ---------------------------------------------------------------------------

#[test]
fn json_log_format_emits_json_events() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.gwa");

    portcullis()
        .args(["--log-level", "info", "--log-format", "json", "compile", "--source"])
        .arg(fixtures().join("basic"))
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stderr(contains(r#""event":"artifact_written""#));
}

#[test]
fn log_source_location_adds_file_and_line() {
    let temp = TempDir::new().unwrap();

    portcullis()
        .args(["--log-level", "info", "compile", "--source"])
        .arg(fixtures().join("basic"))
        .arg("--output")
        .arg(temp.path().join("plain.gwa"))
        .assert()
        .success()
        .stderr(contains("main.rs").not());

    portcullis()
        .args(["--log-level", "info", "--log-source-location", "--log-format", "json", "compile", "--source"])
        .arg(fixtures().join("basic"))
        .arg("--output")
        .arg(temp.path().join("located.gwa"))
        .assert()
        .success()
        .stderr(contains(r#""filename":"#).and(contains("main.rs")));
}

#[test]
fn unknown_log_format_exits_two() {
    portcullis()
        .args(["--log-format", "xml", "inspect", "--artifact", "missing.gwa"])
        .assert()
        .failure()
        .code(2);
}
