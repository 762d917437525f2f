//! The `merge-dir` tool: converge a destination tree toward the manifest by
//! copying missing entries from a source tree.
//!
//! The comparison is the verify visitor, unchanged; only the reporter
//! differs. A `file_not_found` event means the manifest (and therefore the
//! source tree) has something the destination lacks, so the reporter invokes
//! the copy engine. Entries present in the destination but unknown to the
//! manifest are reported and left alone; nothing is ever deleted or
//! overwritten.

use crate::copy::CopyEngine;
use crate::dir_io::FsError;
use crate::encoding::PathEncoder;
use crate::manifest::{FileRecord, Manifest, ManifestError, RecordKind};
use crate::report::{LogReporter, MismatchReporter};
use crate::verify::{VerifyError, VerifyVisitor};
use crate::walker::{AccessDeniedPolicy, Walker};
use std::path::Path;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

/// Verify-style reporter that repairs missing entries through the copy
/// engine.
pub struct MergeReporter<'a> {
    log: LogReporter,
    engine: &'a CopyEngine<'a>,
    pub files_copied: usize,
    pub subtrees_copied: usize,
    pub copy_failures: usize,
    /// Relative paths of subtrees that copied successfully, used to silence
    /// unvisited-directory diagnostics for directories the copy created.
    copied_subtrees: Vec<String>,
}

impl<'a> MergeReporter<'a> {
    pub fn new(engine: &'a CopyEngine<'a>) -> Self {
        MergeReporter {
            log: LogReporter::new(),
            engine,
            files_copied: 0,
            subtrees_copied: 0,
            copy_failures: 0,
            copied_subtrees: Vec::new(),
        }
    }

}

impl MismatchReporter for MergeReporter<'_> {
    fn file_not_found(&mut self, kind: RecordKind, rel_path: &str) {
        match kind {
            RecordKind::File => {
                if self.engine.copy_file(rel_path) {
                    self.files_copied += 1;
                    info!("merged missing file \"{}\"", rel_path);
                } else {
                    self.copy_failures += 1;
                }
            }
            RecordKind::Dir => {
                if self.engine.copy_subtree(rel_path) {
                    self.subtrees_copied += 1;
                    self.copied_subtrees.push(rel_path.to_string());
                    info!("merged missing directory \"{}\"", rel_path);
                } else {
                    self.copy_failures += 1;
                }
            }
        }
    }

    fn new_file(&mut self, kind: RecordKind, rel_path: &str) {
        // Reported but never deleted.
        self.log.new_file(kind, rel_path);
    }

    fn check_mismatch(
        &mut self,
        rel_path: &str,
        expected: &FileRecord,
        actual: &FileRecord,
    ) -> bool {
        self.log.check_mismatch(rel_path, expected, actual)
    }

    fn unvisited_dir(&mut self, dir: &str) {
        let covered = self.copied_subtrees.iter().any(|subtree| {
            dir == subtree || (dir.starts_with(subtree) && dir.as_bytes()[subtree.len()] == b'/')
        });
        if !covered {
            self.log.unvisited_dir(dir);
        }
    }
}

/// Summary of one merge run.
#[derive(Debug)]
pub struct MergeSummary {
    pub files_copied: usize,
    pub subtrees_copied: usize,
    pub copy_failures: usize,
    pub mismatched: usize,
    pub new: usize,
}

/// Compares `dest` against the manifest at `db` and copies entries missing
/// from `dest` out of `source`. Copy failures are diagnostics; the run fails
/// only on I/O, manifest, or encoding problems.
pub fn merge_tree(
    db: &Path,
    source: &Path,
    dest: &Path,
    access_denied: AccessDeniedPolicy,
) -> Result<MergeSummary, MergeError> {
    let manifest = Manifest::open(db, false)?;
    let encoder = PathEncoder::global();

    let engine = CopyEngine::open(source, dest, encoder)?;
    let reporter = MergeReporter::new(&engine);

    let mut visitor = VerifyVisitor::new(&manifest, encoder, reporter)?;
    Walker::new(access_denied).walk(dest, &mut visitor)?;
    let reporter = visitor.finish()?;

    manifest.close()?;

    let summary = MergeSummary {
        files_copied: reporter.files_copied,
        subtrees_copied: reporter.subtrees_copied,
        copy_failures: reporter.copy_failures,
        mismatched: reporter.log.mismatched,
        new: reporter.log.new,
    };

    info!(
        "Merge copied {} files and {} directories ({} failures); {} mismatched, {} unexpected entries",
        summary.files_copied,
        summary.subtrees_copied,
        summary.copy_failures,
        summary.mismatched,
        summary.new
    );

    Ok(summary)
}
