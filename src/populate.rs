//! The `create-db` tool: fills the manifest from a directory tree.

use crate::dir_io::{FdReader, FsError};
use crate::encoding::{EncodingError, PathEncoder};
use crate::fingerprint::digest_reader;
use crate::manifest::{FileRecord, Manifest, ManifestError, RecordKind};
use crate::walker::{AccessDeniedPolicy, TreeVisitor, WalkEntry, WalkPath, Walker};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PopulateError {
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
}

#[derive(Debug)]
pub struct PopulateOutcome {
    pub files_recorded: usize,
    pub dirs_recorded: usize,
}

/// Writes one manifest row per walked entry.
///
/// Rows land inside the transaction opened by [`populate_manifest`]; nothing
/// becomes visible unless the whole walk succeeds.
pub struct PopulateVisitor<'a> {
    manifest: &'a Manifest,
    encoder: &'a PathEncoder,
    files_recorded: usize,
    dirs_recorded: usize,
}

impl<'a> PopulateVisitor<'a> {
    pub fn new(manifest: &'a Manifest, encoder: &'a PathEncoder) -> Self {
        PopulateVisitor {
            manifest,
            encoder,
            files_recorded: 0,
            dirs_recorded: 0,
        }
    }
}

impl TreeVisitor for PopulateVisitor<'_> {
    type Error = PopulateError;

    fn enter_dir(&mut self, _path: &WalkPath) -> Result<(), PopulateError> {
        Ok(())
    }

    fn entry(&mut self, entry: &WalkEntry<'_>, path: &WalkPath) -> Result<bool, PopulateError> {
        let (dir, name) = path.split_entry();
        let dir = self.encoder.to_utf8(dir)?;
        let name = self.encoder.to_utf8(name)?;

        let record = match entry.kind {
            RecordKind::File => {
                let digest =
                    digest_reader(FdReader::new(entry.fd)).map_err(|source| {
                        PopulateError::Fingerprint {
                            path: path.full().to_path_buf(),
                            source,
                        }
                    })?;
                self.files_recorded += 1;
                FileRecord::File {
                    size: entry.size,
                    mtime_ms: entry.mtime_ms,
                    digest,
                }
            }
            RecordKind::Dir => {
                self.dirs_recorded += 1;
                FileRecord::Dir
            }
        };

        self.manifest.put(&dir, &name, &record)?;
        Ok(true)
    }

    fn leave_dir(&mut self, _path: &WalkPath) -> Result<(), PopulateError> {
        Ok(())
    }
}

/// Populates the manifest at `db` from the tree rooted at `source`.
///
/// The backing file is created on first use. All rows are written inside a
/// single transaction; if the walk fails for any reason the transaction is
/// rolled back and the manifest keeps its prior contents.
pub fn populate_manifest(
    db: &Path,
    source: &Path,
    access_denied: AccessDeniedPolicy,
) -> Result<PopulateOutcome, PopulateError> {
    let mut manifest = Manifest::open(db, true)?;
    manifest.begin()?;

    let mut visitor = PopulateVisitor::new(&manifest, PathEncoder::global());
    let walk_result = Walker::new(access_denied).walk(source, &mut visitor);

    let outcome = PopulateOutcome {
        files_recorded: visitor.files_recorded,
        dirs_recorded: visitor.dirs_recorded,
    };
    drop(visitor);

    match walk_result {
        Ok(()) => {
            manifest.commit()?;
            manifest.close()?;
            info!(
                "Recorded {} files and {} directories",
                outcome.files_recorded, outcome.dirs_recorded
            );
            Ok(outcome)
        }
        Err(err) => {
            if let Err(rollback_err) = manifest.rollback() {
                warn!("rollback after failed walk also failed: {}", rollback_err);
            }
            let _ = manifest.close();
            Err(err)
        }
    }
}
