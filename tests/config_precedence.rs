use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn dash_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_compliance-dash"));
    cmd.env("HOME", home);
    for (key, _) in std::env::vars() {
        if key.starts_with("COMPLIANCE_DASH_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);

    let temp = std::env::temp_dir();
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let uniq = format!("compliance-dash-config-test-{}-{seq}", std::process::id());
    let home = temp.join(uniq);
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

fn show(out: Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "exit {:?}: {}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("parse json")
}

const FILE_CONFIG: &[u8] = br#"
[api]
base_url = "http://file.example:5000"

[refresh]
auto = true
interval_secs = 600
default_app = "billing"

[ui]
max_table_rows = 7
"#;

#[test]
fn defaults_without_any_config() {
    let home = make_temp_home();
    let v = show(
        dash_cmd(&home)
            .args(["config", "--show", "--json"])
            .output()
            .expect("run"),
    );
    assert_eq!(v["api"]["base_url"], "http://localhost:5000");
    assert_eq!(v["refresh"]["auto"], false);
    assert_eq!(v["refresh"]["interval_secs"], 300);
    assert_eq!(v["ui"]["max_table_rows"], 50);
    assert_eq!(v["logs"]["enabled"], true);
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn file_then_env_then_flag() {
    let home = make_temp_home();
    write_file(
        &home.join(".config/compliance-dash/config.toml"),
        FILE_CONFIG,
    );

    let v = show(
        dash_cmd(&home)
            .args(["config", "--show", "--json"])
            .output()
            .expect("run"),
    );
    assert_eq!(v["api"]["base_url"], "http://file.example:5000");
    assert_eq!(v["refresh"]["auto"], true);
    assert_eq!(v["refresh"]["interval_secs"], 600);
    assert_eq!(v["refresh"]["default_app"], "billing");
    assert_eq!(v["ui"]["max_table_rows"], 7);

    let v = show(
        dash_cmd(&home)
            .env("COMPLIANCE_DASH_API_BASE_URL", "https://env.example")
            .env("COMPLIANCE_DASH_REFRESH_AUTO", "off")
            .env("COMPLIANCE_DASH_REFRESH_INTERVAL_SECS", "1800")
            .args(["config", "--show", "--json"])
            .output()
            .expect("run"),
    );
    assert_eq!(v["api"]["base_url"], "https://env.example");
    assert_eq!(v["refresh"]["auto"], false);
    assert_eq!(v["refresh"]["interval_secs"], 1800);
    assert_eq!(v["refresh"]["default_app"], "billing");

    let v = show(
        dash_cmd(&home)
            .env("COMPLIANCE_DASH_API_BASE_URL", "https://env.example")
            .args(["config", "--show", "--json", "--base-url", "http://flag.example"])
            .output()
            .expect("run"),
    );
    assert_eq!(v["api"]["base_url"], "http://flag.example");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn config_path_from_env_and_flag() {
    let home = make_temp_home();
    let elsewhere = home.join("elsewhere.toml");
    write_file(&elsewhere, FILE_CONFIG);

    let v = show(
        dash_cmd(&home)
            .env("COMPLIANCE_DASH_CONFIG", &elsewhere)
            .args(["config", "--show", "--json"])
            .output()
            .expect("run"),
    );
    assert_eq!(v["api"]["base_url"], "http://file.example:5000");
    assert_eq!(v["config_path"], elsewhere.display().to_string());

    let out = dash_cmd(&home)
        .args(["config", "--show", "--config", "/nonexistent/config.toml"])
        .output()
        .expect("run");
    assert_eq!(out.status.code(), Some(2));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_values_exit_2() {
    let home = make_temp_home();
    write_file(
        &home.join(".config/compliance-dash/config.toml"),
        b"[refresh]\ninterval_secs = 42\n",
    );
    let out = dash_cmd(&home)
        .args(["config", "--show"])
        .output()
        .expect("run");
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("60|300|600|1800"));

    let home2 = make_temp_home();
    let out = dash_cmd(&home2)
        .env("COMPLIANCE_DASH_UI_COLOR", "sometimes")
        .args(["config", "--show"])
        .output()
        .expect("run");
    assert_eq!(out.status.code(), Some(2));

    let out = dash_cmd(&home2)
        .args(["config", "--show", "--base-url", "localhost:5000"])
        .output()
        .expect("run");
    assert_eq!(out.status.code(), Some(2));

    write_file(
        &home2.join(".config/compliance-dash/config.toml"),
        b"[scan]\nexclude = []\n",
    );
    let out = dash_cmd(&home2)
        .args(["config", "--show"])
        .output()
        .expect("run");
    assert_eq!(out.status.code(), Some(2));

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&home2);
}
