//! Mismatch event reporting.
//!
//! Comparison visitors do not decide what a difference means; they hand
//! typed events to a [`MismatchReporter`]. The verify tool logs them; the
//! merge tool additionally repairs missing entries (see `merge`).

use crate::fingerprint::digest_hex;
use crate::manifest::{FileRecord, RecordKind};
use tracing::warn;

/// Strategy consumed by the comparison visitors.
pub trait MismatchReporter {
    /// The manifest expects an entry the filesystem lacks.
    fn file_not_found(&mut self, kind: RecordKind, rel_path: &str);

    /// The filesystem has an entry the manifest lacks.
    fn new_file(&mut self, kind: RecordKind, rel_path: &str);

    /// Compares a record pair; returns `true` when they are equal. For file
    /// records every field counts (type, size, mtime, digest); for directory
    /// records only the type. Callers use the verdict to decide descent.
    fn check_mismatch(&mut self, rel_path: &str, expected: &FileRecord, actual: &FileRecord)
    -> bool;

    /// Post-walk diagnostic: a manifest directory the walk never reached.
    /// These overlap with `file_not_found` events for the subtree root and
    /// may be a no-op.
    fn unvisited_dir(&mut self, _dir: &str) {}
}

/// Logs every event to the error stream and counts them for the end-of-run
/// summary.
#[derive(Debug, Default)]
pub struct LogReporter {
    pub missing: usize,
    pub new: usize,
    pub mismatched: usize,
}

impl LogReporter {
    pub fn new() -> Self {
        LogReporter::default()
    }

    /// True when no difference of any kind was reported.
    pub fn clean(&self) -> bool {
        self.missing == 0 && self.new == 0 && self.mismatched == 0
    }
}

impl MismatchReporter for LogReporter {
    fn file_not_found(&mut self, kind: RecordKind, rel_path: &str) {
        self.missing += 1;
        warn!("{} missing from filesystem: \"{}\"", kind.describe(), rel_path);
    }

    fn new_file(&mut self, kind: RecordKind, rel_path: &str) {
        self.new += 1;
        warn!("{} not in manifest: \"{}\"", kind.describe(), rel_path);
    }

    fn check_mismatch(
        &mut self,
        rel_path: &str,
        expected: &FileRecord,
        actual: &FileRecord,
    ) -> bool {
        if expected == actual {
            return true;
        }
        self.mismatched += 1;
        warn!("mismatch: \"{}\"", rel_path);
        for line in record_diff_lines(expected, actual) {
            warn!("{}", line);
        }
        false
    }

    fn unvisited_dir(&mut self, dir: &str) {
        warn!("directory in manifest was never reached: \"{}\"", dir);
    }
}

/// Field-by-field rendering of a record difference, one line per differing
/// field. Empty for equal records.
pub fn record_diff_lines(expected: &FileRecord, actual: &FileRecord) -> Vec<String> {
    let mut lines = Vec::new();

    match (expected, actual) {
        (
            FileRecord::File {
                size: expected_size,
                mtime_ms: expected_mtime,
                digest: expected_digest,
            },
            FileRecord::File {
                size: actual_size,
                mtime_ms: actual_mtime,
                digest: actual_digest,
            },
        ) => {
            if expected_size != actual_size {
                lines.push(format!(
                    "   size: {} -> {}",
                    format_size(*expected_size),
                    format_size(*actual_size)
                ));
            }
            if expected_mtime != actual_mtime {
                lines.push(format!(
                    "   mtime: {} -> {}",
                    format_mtime(*expected_mtime),
                    format_mtime(*actual_mtime)
                ));
            }
            if expected_digest != actual_digest {
                lines.push(format!(
                    "   digest: {} -> {}",
                    digest_hex(expected_digest),
                    digest_hex(actual_digest)
                ));
            }
        }
        (FileRecord::Dir, FileRecord::Dir) => {}
        _ => {
            lines.push(format!("   was: {}", describe_record(expected)));
            lines.push(format!("   now: {}", describe_record(actual)));
        }
    }

    lines
}

fn describe_record(record: &FileRecord) -> String {
    match record {
        FileRecord::File { size, digest, .. } => {
            format!("file ({}, digest: {})", format_size(*size), digest_hex(digest))
        }
        FileRecord::Dir => "directory".to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_mtime(mtime_ms: i64) -> String {
    use std::time::{Duration, UNIX_EPOCH};

    let Ok(offset) = u64::try_from(mtime_ms) else {
        return format!("{} ms", mtime_ms);
    };
    let system_time = UNIX_EPOCH + Duration::from_millis(offset);
    let datetime: chrono::DateTime<chrono::Local> = system_time.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}
