use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;

fn stdout(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

fn source_file(name: &str, source: &str) -> PathBuf {
    let path = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);
    fs::write(&path, source).unwrap();
    path
}

#[test]
fn lists_tasks() {
    let mut cmd = Command::cargo_bin("acc16").unwrap();
    let out = stdout(cmd.arg("tasks"));

    assert!(out.contains("maximum of an array"));
    assert!(out.contains("convolution of two arrays"));
}

#[test]
fn runs_max_task() {
    let mut cmd = Command::cargo_bin("acc16").unwrap();
    let out = stdout(cmd.arg("task").arg("1"));

    assert!(out.contains("ACC = 30"));
    assert!(out.contains("passed"));
}

#[test]
fn runs_convolution_task() {
    let mut cmd = Command::cargo_bin("acc16").unwrap();
    let out = stdout(cmd.arg("task").arg("2"));

    assert!(out.contains("R0 = 50"));
    assert!(out.contains("passed"));
}

#[test]
fn rejects_unknown_task() {
    let mut cmd = Command::cargo_bin("acc16").unwrap();
    cmd.arg("task").arg("9").assert().failure();
}

#[test]
fn runs_program() {
    let path = source_file("store.asm", "LDI 5\nSTA 0x0200\nLDA 0x0200\nHALT\n");

    let mut cmd = Command::cargo_bin("acc16").unwrap();
    let out = stdout(
        cmd.arg("run")
            .arg(&path)
            .arg("--dump")
            .arg("0x0200")
            .arg("--count")
            .arg("1"),
    );

    assert!(out.contains("halted after 12 steps"));
    assert!(out.contains("ACC=0005"));
    assert!(out.contains("0x0200: 0005"));
}

#[test]
fn runs_demo_program_with_trace() {
    let mut cmd = Command::cargo_bin("acc16").unwrap();
    let out = stdout(
        cmd.arg("run")
            .arg("demos/programs/countdown.asm")
            .arg("--trace"),
    );

    assert!(out.contains("execute"));
    assert!(out.contains("| HALT"));
    assert!(out.contains("ACC=0005"));
}

#[test]
fn stops_runaway_program() {
    let path = source_file("spin.asm", "LOOP: JMP LOOP\n");

    let mut cmd = Command::cargo_bin("acc16").unwrap();
    cmd.arg("run")
        .arg(&path)
        .arg("--max-steps")
        .arg("100")
        .assert()
        .failure();
}

#[test]
fn assembles_listing() {
    let path = source_file("listing.asm", "START: LDI 5\nJMP START\n");

    let mut cmd = Command::cargo_bin("acc16").unwrap();
    let out = stdout(cmd.arg("assemble").arg(&path));

    assert!(out.contains("START:"));
    assert!(out.contains("0x0001  4080 0000  JMP 0x0000"));
    assert!(out.contains("2 instruction(s), 3 word(s), 1 label(s)"));
}

#[test]
fn reports_assembly_errors() {
    let path = source_file("broken.asm", "NOP\nJMP NOWHERE\n");

    let mut cmd = Command::cargo_bin("acc16").unwrap();
    let output = cmd.arg("assemble").arg(&path).assert().failure().get_output().stderr.clone();
    let err = String::from_utf8(output).unwrap();

    assert!(err.contains("undefined label"));
}
