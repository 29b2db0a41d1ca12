//! End-to-end tests of the tracebuf binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests
//!
//! Each test replays a memory image through `--image`, so no privileges or
//! /dev/mem access are needed.

mod utils;

use predicates::prelude::*;
use tracebuf::record::{TraceEntry, RECORD_SIZE};
use utils::{image_with, sample_entries};

fn tracebuf(image: &tempfile::NamedTempFile) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tracebuf");
    cmd.arg("--image")
        .arg(image.path())
        .args(["--phys", "0", "--size", "72"]);
    cmd
}

#[test]
fn test_cli_help() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tracebuf");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("dump"));
}

#[test]
fn test_cli_requires_region() {
    let image = image_with(&sample_entries(), 3);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tracebuf");
    cmd.arg("--image")
        .arg(image.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to attach trace buffer"));
}

#[test]
fn test_dump_text_prints_finalized_records() {
    let entries = sample_entries();
    let image = image_with(&entries, 3);
    let expected: String = entries[..2].iter().map(TraceEntry::to_line).collect();

    tracebuf(&image)
        .args(["--entries", "2", "dump"])
        .assert()
        .success()
        .stdout(expected);
}

#[test]
fn test_dump_defaults_to_whole_region() {
    let image = image_with(&sample_entries(), 3);
    let output = tracebuf(&image).arg("dump").output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 3);
}

#[test]
fn test_dump_raw_matches_image_bytes() {
    let image = image_with(&sample_entries(), 3);
    let bytes = std::fs::read(image.path()).unwrap();

    let output = tracebuf(&image)
        .args(["--entries", "2", "dump", "--format", "raw"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout, &bytes[..2 * RECORD_SIZE]);
}

#[test]
fn test_dump_hex_one_record_per_line() {
    let entries = sample_entries();
    let image = image_with(&entries, 3);

    let output = tracebuf(&image)
        .args(["dump", "--format", "hex"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], hex::encode(entries[1].to_bytes()));
}

#[test]
fn test_dump_json_to_file() {
    let image = image_with(&sample_entries(), 3);
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("trace.json");

    tracebuf(&image)
        .args(["--entries", "1", "dump", "--format", "json", "-o"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["entries"].as_array().unwrap().len(), 1);
    assert_eq!(value["entries"][0]["kind"], "Syscall");
    assert_eq!(value["region"]["capacity"], 3);
    assert_eq!(value["region"]["strategy"], "page-list");
}

#[test]
fn test_start_reports_enabled() {
    let image = image_with(&sample_entries(), 3);
    tracebuf(&image).arg("start").assert().success().stdout("1\n");
}

#[test]
fn test_stop_reports_count() {
    let image = image_with(&sample_entries(), 3);
    tracebuf(&image)
        .args(["--entries", "2", "stop"])
        .assert()
        .success()
        .stdout("2\n");
}

#[test]
fn test_status_shows_region_and_switch() {
    let image = image_with(&sample_entries(), 3);
    tracebuf(&image)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("region:   0x48@0x0"))
        .stdout(predicate::str::contains("capacity: 3"))
        .stdout(predicate::str::contains("trace_on: 0"));
}

#[test]
fn test_endpoints_lists_three_files() {
    let image = image_with(&sample_entries(), 3);
    tracebuf(&image)
        .arg("endpoints")
        .assert()
        .success()
        .stdout(predicate::str::contains("444 sel4_tracebuffer/trace\n"))
        .stdout(predicate::str::contains("444 sel4_tracebuffer/tracedata\n"))
        .stdout(predicate::str::contains("644 sel4_tracebuffer/trace_on\n"));
}

#[test]
fn test_config_file_supplies_region() {
    let image = image_with(&sample_entries(), 3);
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("tracebuf.toml");
    std::fs::write(
        &config,
        format!(
            "[region]\nstart = 0\nsize = 48\n\n[memory]\nkind = \"image\"\npath = {:?}\n",
            image.path()
        ),
    )
    .unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tracebuf");
    let output = cmd.arg("--config").arg(&config).arg("dump").output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 2);
}

#[test]
fn test_finalize_command_producer() {
    let image = image_with(&sample_entries(), 3);
    tracebuf(&image)
        .args(["--reset-cmd", "true", "--finalize-cmd", "echo 0x1", "stop"])
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
fn test_region_larger_than_image_is_an_error() {
    let image = image_with(&sample_entries(), 3);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tracebuf");
    cmd.arg("--image")
        .arg(image.path())
        .args(["--phys", "0", "--size", "0x3000", "dump"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to attach trace buffer"));
}
