//! CLI integration tests for the evidence binary.
//!
//! These tests verify the CLI behavior by running the actual binary
//! and checking outputs, exit codes, and file artifacts.

use assert_cmd::Command;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use predicates::prelude::*;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

/// Get a Command for the evidence binary bound to a data directory.
fn evidence(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("evidence").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--no-worker");
    cmd
}

fn write_png(path: &Path) {
    let img = ImageBuffer::from_pixel(320, 120, Rgb([30, 90, 150]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    fs::write(path, buffer.into_inner()).unwrap();
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays_usage() {
    Command::cargo_bin("evidence")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Timestamped test evidence"))
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("export"));
}

#[test]
fn test_help_shows_exit_codes() {
    Command::cargo_bin("evidence")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("64"))
        .stdout(predicate::str::contains("66"));
}

#[test]
fn test_invalid_format_rejected() {
    let temp = TempDir::new().unwrap();
    evidence(temp.path())
        .args(["--format", "yaml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

// ============================================================================
// Error Exit Codes
// ============================================================================

#[test]
fn test_missing_file_returns_input_error() {
    let temp = TempDir::new().unwrap();
    evidence(temp.path())
        .args(["add", "does-not-exist.png"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Failed to read file"));
}

#[test]
fn test_non_image_returns_data_error() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("notes.txt");
    fs::write(&file, b"plain text, not pixels").unwrap();

    evidence(temp.path())
        .arg("add")
        .arg(&file)
        .assert()
        .code(65);
}

#[test]
fn test_unknown_evidence_returns_usage_error() {
    let temp = TempDir::new().unwrap();
    evidence(temp.path())
        .args(["show", "evidence-unknown"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("evidence-unknown"));
}

#[test]
fn test_clear_requires_confirmation() {
    let temp = TempDir::new().unwrap();
    evidence(temp.path())
        .arg("clear")
        .assert()
        .code(64)
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn test_invalid_date_returns_usage_error() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("shot.png");
    write_png(&file);

    evidence(temp.path())
        .args(["add", "--date", "yesterday"])
        .arg(&file)
        .assert()
        .code(64)
        .stderr(predicate::str::contains("Invalid date"));
}

// ============================================================================
// Output Modes
// ============================================================================

#[test]
fn test_quiet_add_prints_only_id() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("shot.png");
    write_png(&file);

    let output = evidence(temp.path())
        .arg("-q")
        .arg("add")
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("evidence-"));
}

#[test]
fn test_json_add_output() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("shot.png");
    write_png(&file);

    let output = evidence(temp.path())
        .args(["--format", "json", "add", "--comment", "login page"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());

    let added: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let first = &added[0];
    assert_eq!(first["original_filename"], "shot.png");
    assert_eq!(first["mime_type"], "image/png");
    assert_eq!(first["comment"], "login page");
    assert!(first.get("handles").is_none());
}
