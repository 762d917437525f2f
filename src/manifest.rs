//! The manifest: a SQLite-backed map from `(dir, file)` to the recorded
//! state of a filesystem entry.
//!
//! Names are stored as UTF-8 text (see `encoding`); `dir` is the
//! forward-slash-joined path from the manifest root without leading or
//! trailing slash, and the root itself is the empty string. Directory rows
//! carry NULL in all three value columns. Mutations happen inside an
//! explicit transaction so an aborted walk leaves no partial writes.

use crate::fingerprint::Digest;
use rusqlite::{Connection, OpenFlags, params};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to open manifest {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Manifest read error: {0}")]
    Read(rusqlite::Error),
    #[error("Manifest write error: {0}")]
    Write(rusqlite::Error),
    #[error("Corrupt manifest row for \"{dir}\"/\"{file}\": {reason}")]
    Corrupt {
        dir: String,
        file: String,
        reason: String,
    },
}

/// Entry kind, used both in records and in mismatch events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    File,
    Dir,
}

impl RecordKind {
    pub fn describe(self) -> &'static str {
        match self {
            RecordKind::File => "file",
            RecordKind::Dir => "directory",
        }
    }
}

/// The recorded state of one filesystem entry.
///
/// File mtimes are held as milliseconds since the epoch but persisted with
/// second precision, so the bottom three decimal digits are always zero
/// after a round trip through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRecord {
    File {
        size: u64,
        mtime_ms: i64,
        digest: Digest,
    },
    Dir,
}

impl FileRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            FileRecord::File { .. } => RecordKind::File,
            FileRecord::Dir => RecordKind::Dir,
        }
    }
}

const TYPE_FILE: i64 = 0;
const TYPE_DIR: i64 = 1;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS files (
    file TEXT NOT NULL,
    dir TEXT NOT NULL,
    type INTEGER NOT NULL,
    size INTEGER,
    last_modified INTEGER,
    digest BLOB,
    PRIMARY KEY (file, dir)
);
CREATE INDEX IF NOT EXISTS dir_idx ON files(dir);
";

/// Transactional store of `(dir, file) → FileRecord`.
///
/// The manifest exclusively owns its connection and prepared statements. It
/// is not safe to share across threads and offers no sharing contract.
pub struct Manifest {
    conn: Connection,
    in_transaction: bool,
}

impl Manifest {
    /// Opens a manifest, creating the backing file and schema when `create`
    /// is set. Without `create`, a missing file or a file lacking the
    /// expected schema is an open error.
    pub fn open(path: &Path, create: bool) -> Result<Self, ManifestError> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let open_err = |source| ManifestError::Open {
            path: path.to_path_buf(),
            source,
        };

        let conn = Connection::open_with_flags(path, flags).map_err(open_err)?;

        if create {
            conn.execute_batch(SCHEMA).map_err(open_err)?;
        } else {
            // Schema validation: preparing against the expected columns fails
            // cleanly on a file that is not a manifest.
            conn.prepare("SELECT file, dir, type, size, last_modified, digest FROM files LIMIT 0")
                .map_err(open_err)?;
        }

        Ok(Manifest {
            conn,
            in_transaction: false,
        })
    }

    /// Starts the surrounding transaction. Nesting is not supported.
    pub fn begin(&mut self) -> Result<(), ManifestError> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(ManifestError::Write)?;
        self.in_transaction = true;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), ManifestError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(ManifestError::Write)?;
        self.in_transaction = false;
        Ok(())
    }

    /// Reverts every mutation since `begin`.
    pub fn rollback(&mut self) -> Result<(), ManifestError> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(ManifestError::Write)?;
        self.in_transaction = false;
        Ok(())
    }

    /// Insert-or-replace the record for `(dir, file)`.
    pub fn put(&self, dir: &str, file: &str, record: &FileRecord) -> Result<(), ManifestError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT OR REPLACE INTO files (file, dir, type, size, last_modified, digest) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(ManifestError::Write)?;

        match record {
            FileRecord::File {
                size,
                mtime_ms,
                digest,
            } => stmt.execute(params![
                file,
                dir,
                TYPE_FILE,
                *size as i64,
                mtime_ms / 1000,
                &digest[..],
            ]),
            FileRecord::Dir => stmt.execute(params![
                file,
                dir,
                TYPE_DIR,
                rusqlite::types::Null,
                rusqlite::types::Null,
                rusqlite::types::Null,
            ]),
        }
        .map_err(ManifestError::Write)?;

        Ok(())
    }

    /// The immediate children of `dir`, keyed by name. Subdirectories appear
    /// as `Dir` records. An empty map is a valid result.
    pub fn list(&self, dir: &str) -> Result<BTreeMap<String, FileRecord>, ManifestError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT file, type, size, last_modified, digest FROM files WHERE dir = ?1")
            .map_err(ManifestError::Read)?;

        let mut rows = stmt.query(params![dir]).map_err(ManifestError::Read)?;
        let mut entries = BTreeMap::new();

        while let Some(row) = rows.next().map_err(ManifestError::Read)? {
            let file: String = row.get(0).map_err(ManifestError::Read)?;
            let kind: i64 = row.get(1).map_err(ManifestError::Read)?;
            let size: Option<i64> = row.get(2).map_err(ManifestError::Read)?;
            let last_modified: Option<i64> = row.get(3).map_err(ManifestError::Read)?;
            let digest: Option<Vec<u8>> = row.get(4).map_err(ManifestError::Read)?;

            let corrupt = |reason: &str| ManifestError::Corrupt {
                dir: dir.to_string(),
                file: file.clone(),
                reason: reason.to_string(),
            };

            let record = match kind {
                TYPE_FILE => {
                    let size = size.ok_or_else(|| corrupt("file row with NULL size"))?;
                    let size =
                        u64::try_from(size).map_err(|_| corrupt("file row with negative size"))?;
                    let seconds =
                        last_modified.ok_or_else(|| corrupt("file row with NULL mtime"))?;
                    let digest = digest.ok_or_else(|| corrupt("file row with NULL digest"))?;
                    let digest: Digest = digest
                        .try_into()
                        .map_err(|_| corrupt("digest is not 8 octets"))?;
                    FileRecord::File {
                        size,
                        mtime_ms: seconds * 1000,
                        digest,
                    }
                }
                TYPE_DIR => FileRecord::Dir,
                other => return Err(corrupt(&format!("unknown entry type {}", other))),
            };

            entries.insert(file, record);
        }

        Ok(entries)
    }

    /// The distinct directory values across all rows.
    pub fn dirs(&self) -> Result<BTreeSet<String>, ManifestError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT dir FROM files")
            .map_err(ManifestError::Read)?;

        let mut rows = stmt.query([]).map_err(ManifestError::Read)?;
        let mut dirs = BTreeSet::new();
        while let Some(row) = rows.next().map_err(ManifestError::Read)? {
            dirs.insert(row.get(0).map_err(ManifestError::Read)?);
        }
        Ok(dirs)
    }

    /// Finalizes all prepared statements and releases the connection. An
    /// open transaction is rolled back by SQLite. Consuming `self` makes a
    /// second close unrepresentable.
    pub fn close(mut self) -> Result<(), ManifestError> {
        if self.in_transaction {
            self.rollback()?;
        }
        self.conn.close().map_err(|(_, e)| ManifestError::Write(e))
    }
}
