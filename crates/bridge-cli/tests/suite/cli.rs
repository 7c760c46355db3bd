use assert_cmd::Command;
use predicates::prelude::*;

fn dlv_bridge() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("dlv-bridge"));
    cmd.env_remove("DLV_BRIDGE_CONFIG");
    cmd
}

#[test]
fn help_mentions_the_overrides() {
    dlv_bridge().arg("--help").assert().success().stdout(
        predicate::str::contains("--config")
            .and(predicate::str::contains("--backend"))
            .and(predicate::str::contains("--dlv")),
    );
}

#[test]
fn answers_one_reply_per_line_and_exits_on_eof() {
    let input = concat!(
        r#"{"id": 1, "tool": "list_debug_sessions"}"#,
        "\n\n",
        r#"{"id": "b", "tool": "bogus"}"#,
        "\n",
        "not json\n",
    );

    let output = dlv_bridge().write_stdin(input).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let replies: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(replies.len(), 3);

    // Requests run concurrently; match replies by id.
    let reply = |id: serde_json::Value| {
        replies
            .iter()
            .find(|reply| reply["id"] == id)
            .cloned()
            .unwrap()
    };
    assert_eq!(
        reply(serde_json::json!(1)),
        serde_json::json!({"id": 1, "ok": true, "result": "No active debug sessions"})
    );
    assert_eq!(
        reply(serde_json::json!("b")),
        serde_json::json!({"id": "b", "ok": false, "error": "unknown tool `bogus`"})
    );
    assert_eq!(reply(serde_json::Value::Null)["ok"], false);
}

#[test]
fn unreadable_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");

    dlv_bridge()
        .arg("--config")
        .arg(&missing)
        .write_stdin("")
        .assert()
        .success()
        .stderr(predicate::str::contains("continuing with defaults"));
}

#[test]
fn unknown_backend_is_rejected_by_argument_parsing() {
    dlv_bridge()
        .args(["--backend", "gdb"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown backend kind"));
}
