use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn fixture(contents: &str) -> (TempDir, PathBuf, PathBuf) {
    let temp = tempfile::Builder::new()
        .prefix("cqdb-cli")
        .tempdir()
        .expect("tempdir");
    let input = temp.path().join("input.tsv");
    fs::write(&input, contents).expect("write input");
    let output = temp.path().join("out.cqdb");
    (temp, input, output)
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout")
}

fn json_of(assert: &assert_cmd::assert::Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("json stdout")
}

fn build(input: &Path, output: &Path, extra: &[&str]) {
    cargo_bin_cmd!("cqdb")
        .env_remove("CQDB_ONE_WAY")
        .arg("build")
        .arg(input)
        .arg(output)
        .args(extra)
        .assert()
        .success();
}

#[test]
fn build_then_lookup_and_reverse() {
    let (_temp, input, output) = fixture("alpha\t10\nbeta\t20\ngamma\t5\n");
    build(&input, &output, &[]);

    let assert = cargo_bin_cmd!("cqdb")
        .arg("lookup")
        .arg(&output)
        .args(["alpha", "beta"])
        .assert()
        .success();
    assert_eq!(stdout_of(&assert), "alpha\t10\nbeta\t20\n");

    let assert = cargo_bin_cmd!("cqdb")
        .arg("reverse")
        .arg(&output)
        .args(["5", "20"])
        .assert()
        .success();
    assert_eq!(stdout_of(&assert), "5\tgamma\n20\tbeta\n");
}

#[test]
fn misses_exit_with_user_error() {
    let (_temp, input, output) = fixture("alpha\t10\n");
    build(&input, &output, &[]);

    let assert = cargo_bin_cmd!("cqdb")
        .arg("--json")
        .arg("lookup")
        .arg(&output)
        .args(["alpha", "missing"])
        .assert()
        .code(1);
    let payload = json_of(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["ids"]["alpha"], 10);
    assert!(payload["details"]["ids"]["missing"].is_null());
    assert_eq!(payload["details"]["missing"], 1);

    cargo_bin_cmd!("cqdb")
        .arg("reverse")
        .arg(&output)
        .arg("999")
        .assert()
        .code(1);
}

#[test]
fn one_way_chunks_refuse_reverse_lookups() {
    let (_temp, input, output) = fixture("alpha\t10\nbeta\t20\n");
    build(&input, &output, &["--one-way"]);

    let assert = cargo_bin_cmd!("cqdb")
        .arg("--json")
        .arg("reverse")
        .arg(&output)
        .arg("10")
        .assert()
        .code(1);
    let payload = json_of(&assert);
    assert!(payload["message"]
        .as_str()
        .is_some_and(|m| m.contains("no reverse index")));

    cargo_bin_cmd!("cqdb")
        .arg("lookup")
        .arg(&output)
        .arg("beta")
        .assert()
        .success();
}

#[test]
fn env_selects_one_way_builds() {
    let (_temp, input, output) = fixture("alpha\t1\n");
    cargo_bin_cmd!("cqdb")
        .env("CQDB_ONE_WAY", "1")
        .arg("build")
        .arg(&input)
        .arg(&output)
        .assert()
        .success();

    let assert = cargo_bin_cmd!("cqdb")
        .arg("--json")
        .arg("stat")
        .arg(&output)
        .assert()
        .success();
    let payload = json_of(&assert);
    assert_eq!(payload["details"]["one_way"], true);
    assert_eq!(payload["details"]["backlinks"], 0);
}

#[test]
fn intern_mode_numbers_distinct_lines_and_dump_lists_them() {
    let (_temp, input, output) = fixture("the\ncat\nthe\nsat\n");
    build(&input, &output, &["--intern"]);

    let assert = cargo_bin_cmd!("cqdb")
        .arg("dump")
        .arg(&output)
        .assert()
        .success();
    assert_eq!(stdout_of(&assert), "0\tthe\n1\tcat\n2\tsat\n");

    let assert = cargo_bin_cmd!("cqdb")
        .arg("--json")
        .arg("stat")
        .arg(&output)
        .assert()
        .success();
    let payload = json_of(&assert);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["records"], 3);
    assert_eq!(payload["details"]["backlinks"], 3);
    assert_eq!(
        payload["details"]["size"],
        fs::metadata(&output).expect("metadata").len()
    );
}

#[test]
fn duplicate_ids_are_rejected_before_writing() {
    let (_temp, input, output) = fixture("alpha\t1\nbeta\t1\n");
    let assert = cargo_bin_cmd!("cqdb")
        .arg("--json")
        .arg("build")
        .arg(&input)
        .arg(&output)
        .assert()
        .code(1);
    let payload = json_of(&assert);
    assert_eq!(payload["details"]["line"], 2);
    assert!(!output.exists());
}

#[test]
fn corrupt_files_are_reported_not_crashed_on() {
    let (_temp, input, output) = fixture("alpha\t1\n");
    build(&input, &output, &[]);
    let mut bytes = fs::read(&output).expect("read");
    bytes[0] = b'Z';
    fs::write(&output, &bytes).expect("rewrite");

    let assert = cargo_bin_cmd!("cqdb")
        .arg("--json")
        .arg("lookup")
        .arg(&output)
        .arg("alpha")
        .assert()
        .code(1);
    let payload = json_of(&assert);
    assert_eq!(payload["details"]["code"], "CQ200");
}

#[test]
fn missing_database_is_a_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    cargo_bin_cmd!("cqdb")
        .arg("stat")
        .arg(temp.path().join("nope.cqdb"))
        .assert()
        .code(2);
}

#[test]
fn build_help_lists_examples() {
    let assert = cargo_bin_cmd!("cqdb")
        .args(["build", "--help"])
        .assert()
        .success();
    let output = stdout_of(&assert);
    assert!(
        output.contains("cqdb build labels.tsv labels.cqdb"),
        "build example missing: {output}"
    );
}
