mod common;

use common::treeproof_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn project() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("file.txt"), "hello").unwrap();
    temp
}

fn prove(cwd: &Path, proof: &Path) {
    treeproof_cmd(cwd)
        .arg("prove")
        .arg("-o")
        .arg(proof)
        .assert()
        .success();
}

#[test]
fn detection_summary_follows_rust_log() {
    let temp = project();

    treeproof_cmd(temp.path())
        .env("RUST_LOG", "info")
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "INFO: Detector default: 1 files, 1 changes",
        ));

    treeproof_cmd(temp.path())
        .env("RUST_LOG", "error")
        .arg("status")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("A  file.txt"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn detector_id_is_named_in_messages() {
    let temp = project();

    treeproof_cmd(temp.path())
        .arg("--detector")
        .arg("nightly")
        .arg("-v")
        .arg("update")
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "No usable state for detector nightly",
        ))
        .stderr(predicate::str::contains(
            "Recorded 1 files (1 changes) for detector nightly",
        ));

    treeproof_cmd(temp.path())
        .arg("--detector")
        .arg("nightly")
        .arg("-v")
        .arg("status")
        .assert()
        .success()
        .stderr(predicate::str::contains("No changes for detector nightly"));
}

#[test]
fn debug_level_shows_digests_and_state_lock() {
    let temp = project();

    treeproof_cmd(temp.path())
        .env("RUST_LOG", "error")
        .arg("--log-level")
        .arg("debug")
        .arg("update")
        .assert()
        .success()
        .stderr(predicate::str::contains("DEBUG: sha256 of "))
        .stderr(predicate::str::contains("Acquired state lock"))
        .stderr(predicate::str::contains("default.state.toml.lock"));
}

#[test]
fn successful_verify_is_quiet_unless_verbose() {
    let temp = project();
    let proof_dir = TempDir::new().unwrap();
    let proof = proof_dir.path().join("file.proof.toml");
    prove(temp.path(), &proof);

    treeproof_cmd(temp.path())
        .arg("verify")
        .arg(&proof)
        .assert()
        .success()
        .stderr(predicate::str::is_empty());

    treeproof_cmd(temp.path())
        .arg("-v")
        .arg("verify")
        .arg(&proof)
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "INFO: Verification successful: 1 files match",
        ));
}

#[test]
fn failed_verify_logs_an_error_at_default_level() {
    let temp = project();
    let proof_dir = TempDir::new().unwrap();
    let proof = proof_dir.path().join("file.proof.toml");
    prove(temp.path(), &proof);

    fs::write(temp.path().join("file.txt"), "tampered").unwrap();

    treeproof_cmd(temp.path())
        .arg("verify")
        .arg(&proof)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("modified  file.txt"))
        .stdout(predicate::str::contains("ERROR").not())
        .stderr(predicate::str::contains(
            "ERROR: Verification failed: 1 discrepancies",
        ));
}

#[test]
fn proof_on_stdout_is_not_mixed_with_logs() {
    let temp = project();

    let output = treeproof_cmd(temp.path())
        .arg("-v")
        .arg("prove")
        .arg("--label")
        .arg("logs")
        .output()
        .unwrap();

    let stdout = String::from_utf8(output.stdout).unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();

    assert!(output.status.success());
    assert!(stdout.contains("project_root_label = \"logs\""));
    assert!(!stdout.contains("INFO:"));
    assert!(stderr.contains("INFO: Generated proof over 1 files for detector default"));
}

#[test]
fn corrupt_state_warning_is_plain_ascii_when_not_a_tty() {
    let temp = project();
    fs::create_dir(temp.path().join(".treeproof")).unwrap();
    fs::write(
        temp.path().join(".treeproof/default.state.toml"),
        "[metadata]\nversion = \"one\"\n",
    )
    .unwrap();

    // output() captures stderr, so it is not a terminal
    let output = treeproof_cmd(temp.path()).arg("status").output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr.chars().all(|ch| ch.is_ascii()),
        "stderr should be plain ASCII: {stderr:?}"
    );
    assert!(stderr.contains("WARN: Ignoring corrupt state at "));
    assert!(stderr.contains("treating as empty"));
}

#[cfg(unix)]
#[test]
fn unhashable_files_are_counted_in_a_prove_warning() {
    use std::os::unix::fs::PermissionsExt;

    if common::running_as_root() {
        return;
    }

    let temp = project();
    let secret = temp.path().join("secret.txt");
    fs::write(&secret, "secret").unwrap();
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

    let output = treeproof_cmd(temp.path()).arg("prove").output().unwrap();

    fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success());
    assert!(stdout.contains("file_count = 1"));
    assert!(stderr.contains("WARN: 1 files could not be hashed and are missing from the proof"));
}

#[test]
fn verbosity_flags_are_mutually_exclusive_on_any_command() {
    treeproof_cmd(Path::new("."))
        .arg("verify")
        .arg("proof.toml")
        .arg("--log-level")
        .arg("trace")
        .arg("-vv")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn help_documents_rust_log_precedence() {
    treeproof_cmd(Path::new("."))
        .arg("verify")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-level <LEVEL>"))
        .stdout(predicate::str::contains("Takes precedence over RUST_LOG"));
}
