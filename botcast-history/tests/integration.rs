use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Helper to create a history file holding one current and one legacy entry
fn create_test_history() -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("testbot-history.json");

    let history = r#"[
        {
            "id": 900,
            "text": "legacy post",
            "timestamp": "2018-01-01T00:00:00.000000",
            "extra_keys": {"line": 3}
        },
        {
            "_type": "IterationRecord",
            "_version": "0.3.0",
            "timestamp": "2023-03-01T10:00:00.000000",
            "extra_keys": {},
            "output_records": {
                "mastodon": [
                    {"_type": "TootRecord", "id": "1001", "toot_id": "1001", "text": "fresh post"}
                ],
                "birdsite": [
                    {"_type": "TweetRecord", "id": null, "text": "fresh post",
                     "error": "{\"code\":187}", "error_code": 187,
                     "error_message": "Status is a duplicate."}
                ]
            }
        }
    ]"#;
    fs::write(&path, history)?;

    Ok((temp_dir, path))
}

fn botcast_history(path: &PathBuf) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_botcast-history"));
    cmd.arg("--file").arg(path).env_remove("BOTCAST_CONFIG");
    cmd
}

#[test]
fn test_text_output_newest_first() -> Result<()> {
    let (_temp, path) = create_test_history()?;

    let output = botcast_history(&path).output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let fresh = stdout.find("fresh post").expect("fresh post shown");
    let legacy = stdout.find("legacy post").expect("legacy post shown");
    assert!(fresh < legacy);
    assert!(stdout.contains("✗ birdsite: Status is a duplicate."));
    assert!(stdout.contains("line=3"));
    Ok(())
}

#[test]
fn test_json_output_with_destination_filter() -> Result<()> {
    let (_temp, path) = create_test_history()?;

    let output = botcast_history(&path)
        .args(["--format", "json", "--destination", "mastodon"])
        .output()?;
    assert!(output.status.success());

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let entries = entries.as_array().expect("array output");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["destinations"][0]["post_id"], "1001");
    assert_eq!(entries[0]["destinations"][0]["success"], true);
    Ok(())
}

#[test]
fn test_jsonl_limit() -> Result<()> {
    let (_temp, path) = create_test_history()?;

    let output = botcast_history(&path)
        .args(["--format", "jsonl", "--limit", "1"])
        .output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout.lines().count(), 1);
    Ok(())
}

#[test]
fn test_rewrite_upgrades_legacy_entries() -> Result<()> {
    let (_temp, path) = create_test_history()?;

    let output = botcast_history(&path).arg("--rewrite").output()?;
    assert!(output.status.success());

    let rewritten: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    assert_eq!(rewritten[0]["_type"], "IterationRecord");
    assert_eq!(rewritten[0]["extra_keys"]["line"], 3);
    assert_eq!(rewritten[0]["output_records"]["birdsite"]["_type"], "TweetRecord");
    assert_eq!(rewritten[0]["timestamp"], "2018-01-01T00:00:00.000000");
    Ok(())
}

#[test]
fn test_corrupt_history_is_backed_up() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("testbot-history.json");
    fs::write(&path, "not json")?;

    let output = botcast_history(&path).output()?;
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert!(temp.path().join("testbot-history.json.bak").exists());
    Ok(())
}

#[test]
fn test_missing_config_is_config_error() -> Result<()> {
    let temp = TempDir::new()?;

    let output = Command::new(env!("CARGO_BIN_EXE_botcast-history"))
        .arg("--config")
        .arg(temp.path().join("missing.toml"))
        .output()?;

    assert_eq!(output.status.code(), Some(2));
    Ok(())
}
