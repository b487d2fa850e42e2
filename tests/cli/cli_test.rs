//! CLI contract tests.

use assert_cmd::Command;

fn tetatet() -> Command {
    let mut cmd = Command::cargo_bin("tetatet").expect("binary should build");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let output = tetatet().arg("--help").output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["start", "reset", "stats"] {
        assert!(stdout.contains(sub), "{sub} missing from help");
    }
}

#[test]
fn stats_prints_json_for_fresh_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("tetatet.db");

    let output = tetatet()
        .args(["stats", "--database"])
        .arg(&db)
        .output()
        .expect("run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stats: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(stats["total_users"], 0);
    assert_eq!(stats["active_bans"], 0);
    assert!(db.exists());
}

#[test]
fn reset_requires_confirmation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("tetatet.db");

    let output = tetatet()
        .args(["reset", "--database"])
        .arg(&db)
        .output()
        .expect("run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--yes"));
    assert!(!db.exists(), "nothing should be opened without --yes");
}

#[test]
fn confirmed_reset_reports_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("tetatet.db");

    let output = tetatet()
        .args(["reset", "--yes", "--database"])
        .arg(&db)
        .output()
        .expect("run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Removed 0 ban(s) and 0 report(s)"));
}

#[test]
fn start_without_config_fails_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = tetatet()
        .args(["start", "--config"])
        .arg(dir.path().join("missing.toml"))
        .output()
        .expect("run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.toml"));
}
