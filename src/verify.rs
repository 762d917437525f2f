//! The `verify-dir` tool: compares a directory tree against the manifest.
//!
//! The comparison is event-driven: for each directory the visitor pulls the
//! expected children out of the manifest, crosses off what the walk actually
//! finds, and reports the differences through a [`MismatchReporter`]. The
//! merge tool reuses this visitor unchanged with a repairing reporter.

use crate::dir_io::{FdReader, FsError};
use crate::encoding::{EncodingError, PathEncoder};
use crate::fingerprint::digest_reader;
use crate::manifest::{FileRecord, Manifest, ManifestError, RecordKind};
use crate::report::{LogReporter, MismatchReporter};
use crate::walker::{AccessDeniedPolicy, TreeVisitor, WalkEntry, WalkPath, Walker};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("Failed to fingerprint {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Walk left {0} unbalanced directory frames")]
    UnbalancedWalk(usize),
}

/// Joins a manifest directory and an entry name into the relative path used
/// in diagnostics and by the copy engine.
pub fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

struct DirFrame {
    /// UTF-8 relative directory, manifest form.
    dir: String,
    /// Children the manifest still expects in this directory.
    expected: BTreeMap<String, FileRecord>,
}

/// Compares walked entries against manifest records.
pub struct VerifyVisitor<'a, R: MismatchReporter> {
    manifest: &'a Manifest,
    encoder: &'a PathEncoder,
    reporter: R,
    frames: Vec<DirFrame>,
    /// Manifest directories not yet reached by the walk.
    remaining_dirs: BTreeSet<String>,
}

impl<'a, R: MismatchReporter> VerifyVisitor<'a, R> {
    pub fn new(
        manifest: &'a Manifest,
        encoder: &'a PathEncoder,
        reporter: R,
    ) -> Result<Self, VerifyError> {
        let remaining_dirs = manifest.dirs()?;
        Ok(VerifyVisitor {
            manifest,
            encoder,
            reporter,
            frames: Vec::new(),
            remaining_dirs,
        })
    }

    /// Consumes the visitor after the walk: reports manifest directories the
    /// walk never reached and hands back the reporter.
    pub fn finish(mut self) -> Result<R, VerifyError> {
        if !self.frames.is_empty() {
            return Err(VerifyError::UnbalancedWalk(self.frames.len()));
        }
        for dir in &self.remaining_dirs {
            self.reporter.unvisited_dir(dir);
        }
        Ok(self.reporter)
    }
}

impl<R: MismatchReporter> TreeVisitor for VerifyVisitor<'_, R> {
    type Error = VerifyError;

    fn enter_dir(&mut self, path: &WalkPath) -> Result<(), VerifyError> {
        let dir = self.encoder.to_utf8(path.relative())?.into_owned();
        self.remaining_dirs.remove(&dir);
        let expected = self.manifest.list(&dir)?;
        self.frames.push(DirFrame { dir, expected });
        Ok(())
    }

    fn entry(&mut self, entry: &WalkEntry<'_>, path: &WalkPath) -> Result<bool, VerifyError> {
        let name = self.encoder.to_utf8(path.split_entry().1)?.into_owned();

        // enter_dir always precedes entry for the same directory, so an
        // empty stack here means the walker broke its contract.
        let (rel, removed) = {
            let frame = self
                .frames
                .last_mut()
                .ok_or(VerifyError::UnbalancedWalk(0))?;
            (join_rel(&frame.dir, &name), frame.expected.remove(&name))
        };

        match removed {
            // Unknown to the manifest; do not descend into unknown
            // directories.
            None => {
                self.reporter.new_file(entry.kind, &rel);
                Ok(false)
            }
            Some(expected) => {
                let actual = match entry.kind {
                    RecordKind::File => {
                        let digest = digest_reader(FdReader::new(entry.fd)).map_err(|source| {
                            VerifyError::Fingerprint {
                                path: path.full().to_path_buf(),
                                source,
                            }
                        })?;
                        FileRecord::File {
                            size: entry.size,
                            mtime_ms: entry.mtime_ms,
                            digest,
                        }
                    }
                    RecordKind::Dir => FileRecord::Dir,
                };

                let equal = self.reporter.check_mismatch(&rel, &expected, &actual);
                Ok(equal)
            }
        }
    }

    fn leave_dir(&mut self, _path: &WalkPath) -> Result<(), VerifyError> {
        let frame = self.frames.pop().ok_or(VerifyError::UnbalancedWalk(0))?;
        for (name, record) in frame.expected {
            let rel = join_rel(&frame.dir, &name);
            self.reporter.file_not_found(record.kind(), &rel);
        }
        Ok(())
    }
}

/// Summary of one verify run.
#[derive(Debug)]
pub struct VerifySummary {
    pub mismatched: usize,
    pub new: usize,
    pub missing: usize,
}

impl VerifySummary {
    pub fn clean(&self) -> bool {
        self.mismatched == 0 && self.new == 0 && self.missing == 0
    }
}

/// Compares the tree rooted at `source` against the manifest at `db`.
///
/// Mismatch events are diagnostics, not errors: the run fails only on I/O,
/// manifest, or encoding problems.
pub fn verify_tree(
    db: &Path,
    source: &Path,
    access_denied: AccessDeniedPolicy,
) -> Result<VerifySummary, VerifyError> {
    let manifest = Manifest::open(db, false)?;

    let mut visitor = VerifyVisitor::new(&manifest, PathEncoder::global(), LogReporter::new())?;
    Walker::new(access_denied).walk(source, &mut visitor)?;
    let reporter = visitor.finish()?;

    manifest.close()?;

    let summary = VerifySummary {
        mismatched: reporter.mismatched,
        new: reporter.new,
        missing: reporter.missing,
    };

    if summary.clean() {
        info!("Verification found no differences");
    } else {
        info!(
            "Verification found {} mismatched, {} new, {} missing entries",
            summary.mismatched, summary.new, summary.missing
        );
    }

    Ok(summary)
}
