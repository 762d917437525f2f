mod common;

use common::{create_db, mirror_cmd};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `src/` with `x` (10 bytes) and `d/y` (20 bytes).
fn build_merge_source(temp: &TempDir) -> (PathBuf, PathBuf) {
    let src = temp.path().join("src");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("x"), "0123456789").unwrap();
    fs::create_dir(src.join("d")).unwrap();
    fs::write(src.join("d/y"), "01234567890123456789").unwrap();

    let db = temp.path().join("manifest.db");
    create_db(&db, &src);
    (src, db)
}

fn merge(db: &Path, src: &Path, dest: &Path) -> assert_cmd::assert::Assert {
    mirror_cmd("merge-dir", db).arg(src).arg(dest).assert()
}

#[test]
fn merge_fills_an_empty_destination() {
    let temp = TempDir::new().unwrap();
    let (src, db) = build_merge_source(&temp);
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();

    merge(&db, &src, &dest).success();

    assert_eq!(fs::read(dest.join("x")).unwrap(), b"0123456789");
    assert_eq!(fs::read(dest.join("d/y")).unwrap(), b"01234567890123456789");
}

#[test]
fn merged_destination_passes_verification() {
    let temp = TempDir::new().unwrap();
    let (src, db) = build_merge_source(&temp);
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();

    merge(&db, &src, &dest).success();

    mirror_cmd("verify-dir", &db)
        .arg(&dest)
        .assert()
        .success()
        .stderr(predicate::str::contains("WARN").not());
}

#[test]
fn merge_leaves_unexpected_destination_entries_in_place() {
    let temp = TempDir::new().unwrap();
    let (src, db) = build_merge_source(&temp);
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("local-only.txt"), "do not touch").unwrap();

    merge(&db, &src, &dest)
        .success()
        .stderr(predicate::str::contains(
            "file not in manifest: \"local-only.txt\"",
        ));

    assert_eq!(fs::read(dest.join("local-only.txt")).unwrap(), b"do not touch");
}

#[test]
fn merge_does_not_overwrite_differing_destination_files() {
    let temp = TempDir::new().unwrap();
    let (src, db) = build_merge_source(&temp);
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("x"), "local changes").unwrap();

    merge(&db, &src, &dest)
        .success()
        .stderr(predicate::str::contains("mismatch: \"x\""));

    assert_eq!(fs::read(dest.join("x")).unwrap(), b"local changes");
}

#[test]
fn merge_requires_a_dest_argument() {
    let temp = TempDir::new().unwrap();
    let (src, db) = build_merge_source(&temp);

    mirror_cmd("merge-dir", &db)
        .arg(&src)
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires SOURCE and DEST"));
}

#[test]
fn merge_survives_a_missing_source_entry() {
    let temp = TempDir::new().unwrap();
    let (src, db) = build_merge_source(&temp);
    fs::remove_file(src.join("x")).unwrap();

    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();

    merge(&db, &src, &dest)
        .success()
        .stderr(predicate::str::contains("failed to copy \"x\""));

    assert!(!dest.join("x").exists());
    assert!(dest.join("d/y").exists());
}
