use std::process::Command;

use eyre::Context as _;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() -> eyre::Result<()> {
    let mut cmd = assert_cmd::Command::cargo_bin("keyward").context("locate keyward binary")?;
    cmd.arg("--help").assert().success().stdout(
        predicate::str::contains("serve")
            .and(predicate::str::contains("doctor"))
            .and(predicate::str::contains("paths")),
    );
    Ok(())
}

#[test]
fn doctor_json_runs_and_returns_valid_json() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("keyward");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = Command::new(exe)
        .env("KEYWARD_CONFIG_DIR", cfg_dir.path())
        .env("KEYWARD_DATA_DIR", data_dir.path())
        .args(["doctor", "--json"])
        .output()
        .context("run keyward doctor --json")?;

    assert!(
        out.status.success(),
        "doctor exited non-zero: status={:?}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse doctor json")?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true));
    assert!(v.get("version").and_then(|x| x.as_str()).is_some());
    assert!(v.get("config").and_then(|x| x.as_object()).is_some());
    Ok(())
}

#[test]
fn paths_prints_resolved_locations() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("keyward");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = Command::new(exe)
        .env("KEYWARD_CONFIG_DIR", cfg_dir.path())
        .env("KEYWARD_DATA_DIR", data_dir.path())
        .arg("paths")
        .output()
        .context("run keyward paths")?;

    assert!(
        out.status.success(),
        "paths exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    assert_eq!(
        v.get("data_dir").and_then(|x| x.as_str()),
        data_dir.path().to_str(),
        "data dir honors env override"
    );
    assert!(v.get("audit_file").and_then(|x| x.as_str()).is_some());
    Ok(())
}
