use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::path::Path;
use std::process::Output;

pub fn treeproof_cmd(cwd: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("treeproof");
    cmd.arg("-C").arg(cwd);
    cmd
}

// Each integration test file is compiled as its own crate, so helpers unused by
// one of them would otherwise warn there.
#[allow(dead_code)]
pub fn status_output(cwd: &Path, args: &[&str]) -> Output {
    let mut cmd = treeproof_cmd(cwd);
    cmd.arg("status").args(args);
    cmd.output().expect("failed to run `treeproof status`")
}

#[allow(dead_code)]
pub fn update(cwd: &Path) {
    treeproof_cmd(cwd).arg("update").assert().success();
}

#[allow(dead_code)]
pub fn extract_fingerprint(stdout: &[u8]) -> String {
    let output = std::str::from_utf8(stdout).expect("status stdout should be UTF-8");
    output
        .lines()
        .find_map(|line| line.strip_prefix("Fingerprint: "))
        .expect("fingerprint not found in output")
        .to_string()
}

#[allow(dead_code)]
pub fn status_fingerprint(cwd: &Path) -> String {
    let output = status_output(cwd, &[]);
    assert_eq!(output.status.code(), Some(1), "status should report changes");
    extract_fingerprint(&output.stdout)
}

#[allow(dead_code)]
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}
