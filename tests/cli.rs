use assert_cmd::prelude::*;
use std::{fs, process::Command};
use tempfile::TempDir;

fn write_env(dir: &TempDir) -> String {
    let env_path = dir.path().join("env");
    let content = format!(
        "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:0\n",
        dir.path().display()
    );
    fs::write(&env_path, content).unwrap();
    env_path.to_str().unwrap().to_string()
}

#[test]
fn init_cli_creates_store_tree() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);

    Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "init"])
        .assert()
        .success();

    for sub in [
        "profiles",
        "index/by-handle",
        "index/by-owner",
        "elements",
        "views",
        "likes",
        "badges",
        "sessions",
    ] {
        assert!(dir.path().join(sub).exists(), "missing {sub}");
    }
}

#[test]
fn grant_cli_prints_resolvable_token() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);

    Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "init"])
        .assert()
        .success();

    let output = Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "grant", "--identity", "u1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let token = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert!(!token.is_empty());

    let identity = fs::read_to_string(dir.path().join("sessions").join(&token)).unwrap();
    assert_eq!(identity, "u1");
}

#[test]
fn award_and_stats_cli_report_badges() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);

    Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "init"])
        .assert()
        .success();

    // seed a profile directly through the store files the way the server
    // would: handle index plus profile record
    let profile_id = "00000000-0000-0000-0000-000000000001";
    fs::write(dir.path().join("index/by-handle/alice"), profile_id).unwrap();
    fs::write(dir.path().join("index/by-owner/u1"), profile_id).unwrap();
    let profile = serde_json::json!({
        "id": profile_id,
        "user_id": "u1",
        "handle": "alice",
        "display_name": null,
        "bio": null,
        "avatar_url": null,
        "background_url": null,
        "theme_color": "#6366f1",
        "is_public": true,
        "show_badges": true,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    });
    fs::write(
        dir.path().join(format!("profiles/{profile_id}.json")),
        profile.to_string(),
    )
    .unwrap();

    Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "award", "alice"])
        .assert()
        .success()
        .stdout(predicates::str::contains("awarded signed_up"));

    // a second run finds nothing new
    Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "award", "alice"])
        .assert()
        .success()
        .stdout(predicates::str::contains("no new badges"));

    Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "stats", "alice"])
        .assert()
        .success()
        .stdout(predicates::str::contains("signed_up"));
}

#[test]
fn award_unknown_handle_fails() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);

    Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "init"])
        .assert()
        .success();

    Command::cargo_bin("ridged")
        .unwrap()
        .args(["--env", &env_path, "award", "nobody"])
        .assert()
        .failure();
}
