//! Integration tests for the `loxrt` binary: exit codes for file mode and
//! global persistence across REPL lines.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn script_path(dir: &TempDir, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, source).unwrap();
    path
}

#[test]
fn running_a_valid_script_exits_zero() {
    let dir = TempDir::new().unwrap();
    let path = script_path(&dir, "ok.lox", "print 1 + 2;");

    Command::cargo_bin("loxrt")
        .unwrap()
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));
}

#[test]
fn a_compile_error_exits_65() {
    let dir = TempDir::new().unwrap();
    let path = script_path(&dir, "compile_error.lox", "print;");

    Command::cargo_bin("loxrt")
        .unwrap()
        .arg(&path)
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn a_runtime_error_exits_70() {
    let dir = TempDir::new().unwrap();
    let path = script_path(&dir, "runtime_error.lox", "print nil + 1;");

    Command::cargo_bin("loxrt")
        .unwrap()
        .arg(&path)
        .assert()
        .code(70)
        .stderr(predicate::str::contains("[line 1]"));
}

#[test]
fn a_runtime_error_trace_names_the_enclosing_function() {
    let dir = TempDir::new().unwrap();
    let path = script_path(
        &dir,
        "trace.lox",
        "fun bad() {\n  return nil + 1;\n}\nbad();\n",
    );

    Command::cargo_bin("loxrt")
        .unwrap()
        .arg(&path)
        .assert()
        .code(70)
        .stderr(predicate::str::contains("in bad()"));
}

#[test]
fn a_missing_script_file_exits_70() {
    Command::cargo_bin("loxrt")
        .unwrap()
        .arg("/no/such/file.lox")
        .assert()
        .code(70);
}

#[test]
fn stress_gc_flag_does_not_change_observable_output() {
    let dir = TempDir::new().unwrap();
    let path = script_path(
        &dir,
        "stress.lox",
        "var a = \"hello\" + \" \" + \"world\";\nprint a;\n",
    );

    Command::cargo_bin("loxrt")
        .unwrap()
        .arg("--stress-gc")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[test]
fn repl_persists_globals_across_lines() {
    Command::cargo_bin("loxrt")
        .unwrap()
        .write_stdin("var x = 1;\nprint x + 1;\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("2"));
}

#[test]
fn repl_recovers_after_a_runtime_error_on_a_previous_line() {
    Command::cargo_bin("loxrt")
        .unwrap()
        .write_stdin("var x = 1;\nprint nil + 1;\nprint x;\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("1"));
}
