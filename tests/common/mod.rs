use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::fs;
use std::path::Path;

pub fn mirror_cmd(tool: &str, db: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("mirror");
    // Pin the log and locale environment so assertions on stderr and on
    // recorded names hold regardless of the host configuration.
    cmd.env_remove("RUST_LOG")
        .env("LC_ALL", "C")
        .arg(format!("--tool={}", tool))
        .arg(format!("--db={}", db.display()));
    cmd
}

// Each integration test file is compiled as its own crate, so some helpers
// are unused in some of them.
#[allow(dead_code)]
pub fn create_db(db: &Path, source: &Path) {
    mirror_cmd("create-db", db)
        .arg(source)
        .assert()
        .success();
}

/// The reference tree used by the end-to-end scenarios: `a.txt` with three
/// bytes at mtime 1700000000, and `sub/b.txt` empty at mtime 1700000100.
#[allow(dead_code)]
pub fn build_reference_tree(root: &Path) {
    use filetime::FileTime;

    fs::create_dir(root).unwrap();
    fs::write(root.join("a.txt"), "foo").unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/b.txt"), "").unwrap();
    filetime::set_file_mtime(root.join("a.txt"), FileTime::from_unix_time(1700000000, 0)).unwrap();
    filetime::set_file_mtime(root.join("sub/b.txt"), FileTime::from_unix_time(1700000100, 0))
        .unwrap();
}
