//! Integration tests for the shellbridge binary.

use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::Value;

fn shellbridge() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shellbridge"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

/// Run the binary with `input` on stdin and parse each stdout line.
fn run(args: &[&str], input: &str) -> Vec<Value> {
    let mut child = shellbridge()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "shellbridge failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_help() {
    let output = shellbridge().arg("--help").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--workdir"));
}

#[test]
fn test_unknown_flag_fails() {
    let output = shellbridge().arg("--bogus").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--bogus"));
}

#[test]
fn test_schema() {
    let output = shellbridge().arg("--schema").output().unwrap();
    assert!(output.status.success());
    let schema: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema.is_object());
}

#[cfg(unix)]
#[test]
fn test_commands_and_directives() {
    if !has_bash() {
        return;
    }
    let dir = std::env::temp_dir();
    let replies = run(
        &["--workdir", dir.to_str().unwrap(), "--backend", "pty"],
        "echo hi\n\nfalse\n!screen\n!clear\n!interrupt\n",
    );
    assert_eq!(replies.len(), 5);

    assert_eq!(replies[0]["type"], "record");
    assert_eq!(replies[0]["status"], "completed");
    assert_eq!(replies[0]["output"], "hi");
    assert_eq!(replies[0]["exit_code"], 0);

    assert_eq!(replies[1]["exit_code"], 1);

    assert_eq!(replies[2]["type"], "screen");
    assert!(replies[2]["screen"].as_str().unwrap().contains("hi"));

    assert_eq!(replies[3]["type"], "cleared");

    assert_eq!(replies[4]["type"], "error");
}

#[cfg(unix)]
#[test]
fn test_command_timeout() {
    if !has_bash() {
        return;
    }
    let dir = std::env::temp_dir();
    let replies = run(
        &[
            "--workdir",
            dir.to_str().unwrap(),
            "--backend",
            "pty",
            "--timeout",
            "1",
        ],
        "sleep 5\necho blocked\n!interrupt\necho free\n",
    );
    assert_eq!(replies.len(), 4);
    assert_eq!(replies[0]["status"], "timed_out");
    assert_eq!(replies[1]["type"], "error");
    assert_eq!(replies[2]["type"], "interrupt");
    assert_eq!(replies[2]["delivered"], true);
    assert_eq!(replies[3]["output"], "free");
}

#[cfg(unix)]
#[test]
fn test_huge_timeout_accepted() {
    if !has_bash() {
        return;
    }
    let dir = std::env::temp_dir();
    let replies = run(
        &[
            "--workdir",
            dir.to_str().unwrap(),
            "--backend",
            "pty",
            "--timeout",
            "1e18",
        ],
        "echo unbounded\n",
    );
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["status"], "completed");
    assert_eq!(replies[0]["output"], "unbounded");
}

#[test]
fn test_invalid_timeout_rejected() {
    let output = shellbridge().args(["--timeout", "0"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[cfg(unix)]
fn has_bash() -> bool {
    std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).any(|dir| dir.join("bash").is_file()))
        .unwrap_or(false)
}
