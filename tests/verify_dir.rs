mod common;

use common::{build_reference_tree, create_db, mirror_cmd};
use filetime::FileTime;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn truncated_file_reports_size_mtime_and_digest_differences() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    build_reference_tree(&root);

    let db = temp.path().join("manifest.db");
    create_db(&db, &root);

    fs::write(root.join("a.txt"), "").unwrap();
    filetime::set_file_mtime(root.join("a.txt"), FileTime::from_unix_time(1700000500, 0)).unwrap();

    mirror_cmd("verify-dir", &db)
        .arg(&root)
        .assert()
        .success()
        .stderr(predicate::str::contains("mismatch: \"a.txt\""))
        .stderr(predicate::str::contains("size: 3 bytes -> 0 bytes"))
        .stderr(predicate::str::contains("mtime:"))
        .stderr(predicate::str::contains("digest:"))
        .stderr(predicate::str::contains("b.txt").not());
}

#[test]
fn deleted_file_is_reported_missing() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    build_reference_tree(&root);

    let db = temp.path().join("manifest.db");
    create_db(&db, &root);

    fs::remove_file(root.join("sub/b.txt")).unwrap();

    mirror_cmd("verify-dir", &db)
        .arg(&root)
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "file missing from filesystem: \"sub/b.txt\"",
        ))
        .stderr(predicate::str::contains("a.txt").not());
}

#[test]
fn added_file_is_reported_as_new() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    build_reference_tree(&root);

    let db = temp.path().join("manifest.db");
    create_db(&db, &root);

    fs::write(root.join("new.dat"), "fresh").unwrap();

    mirror_cmd("verify-dir", &db)
        .arg(&root)
        .assert()
        .success()
        .stderr(predicate::str::contains("file not in manifest: \"new.dat\""));
}

#[test]
fn removed_subtree_is_diagnosed() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    build_reference_tree(&root);

    let db = temp.path().join("manifest.db");
    create_db(&db, &root);

    fs::remove_dir_all(root.join("sub")).unwrap();

    mirror_cmd("verify-dir", &db)
        .arg(&root)
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "directory missing from filesystem: \"sub\"",
        ));
}

#[test]
#[cfg(unix)]
fn symlink_to_root_does_not_escape_or_fail() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    build_reference_tree(&root);

    let db = temp.path().join("manifest.db");
    create_db(&db, &root);

    std::os::unix::fs::symlink("/", root.join("escape")).unwrap();

    // The link is skipped entirely: not followed, not reported.
    mirror_cmd("verify-dir", &db)
        .arg(&root)
        .assert()
        .success()
        .stderr(predicate::str::contains("escape").not());
}

#[test]
fn verify_against_missing_manifest_fails() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    build_reference_tree(&root);

    let output = mirror_cmd("verify-dir", &temp.path().join("absent.db"))
        .arg(&root)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to open manifest"), "{}", stderr);
}

#[test]
#[cfg(unix)]
fn unreadable_subdirectory_is_skipped_with_a_warning_by_default() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    build_reference_tree(&root);

    let db = temp.path().join("manifest.db");
    create_db(&db, &root);

    let mut perms = fs::metadata(root.join("sub")).unwrap().permissions();
    perms.set_mode(0o000);
    fs::set_permissions(root.join("sub"), perms.clone()).unwrap();

    let assert = mirror_cmd("verify-dir", &db).arg(&root).assert();

    perms.set_mode(0o755);
    fs::set_permissions(root.join("sub"), perms).unwrap();

    assert
        .success()
        .stderr(predicate::str::contains("permission denied, skipping"));
}

#[test]
#[cfg(unix)]
fn unreadable_subdirectory_aborts_under_strict_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    build_reference_tree(&root);

    let db = temp.path().join("manifest.db");
    create_db(&db, &root);

    let mut perms = fs::metadata(root.join("sub")).unwrap().permissions();
    perms.set_mode(0o000);
    fs::set_permissions(root.join("sub"), perms.clone()).unwrap();

    let output = mirror_cmd("verify-dir", &db)
        .arg(&root)
        .arg("--strict-permissions")
        .output()
        .unwrap();

    perms.set_mode(0o755);
    fs::set_permissions(root.join("sub"), perms).unwrap();

    assert_eq!(output.status.code(), Some(1));
}
