//! Depth-first directory traversal over a visitor protocol.
//!
//! The walker emits `enter_dir`, `entry`, `leave_dir` events in depth-first
//! pre-order: a directory's `enter_dir` precedes every event concerning its
//! descendants, and a subdirectory's `leave_dir` precedes its parent's.
//! Recursion is an explicit frame stack, bounded only by memory, so an
//! adversarial-depth tree cannot overflow the call stack. Every frame owns
//! its directory stream; unwinding on error releases all pending
//! descriptors.

use crate::dir_io::{DirStream, EntryKind, FsError, fstat_fd, open_entry_at};
use crate::manifest::RecordKind;
use std::ffi::OsStr;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, warn};

/// What to do when a directory entry cannot be opened for lack of
/// permission. Failure to open the walk root is always fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDeniedPolicy {
    /// Log a warning and prune the entry (and, for directories, its whole
    /// subtree) from the walk.
    Skip,
    /// Abort the walk.
    Fail,
}

/// The growing path buffer owned by the walker.
///
/// Holds the full OS path of the current entry with `/` separators, plus the
/// offset at which the root-relative portion starts, so `relative()` is the
/// manifest-visible key. Visitors may read it during a callback but must not
/// retain references past it.
pub struct WalkPath {
    buf: Vec<u8>,
    rel_offset: usize,
}

impl WalkPath {
    pub fn new(root: &Path) -> Self {
        let mut buf = root.as_os_str().as_bytes().to_vec();
        // Strip the trailing separator (but keep a bare "/" root intact).
        while buf.len() > 1 && buf.last() == Some(&b'/') {
            buf.pop();
        }
        let rel_offset = if buf.last() == Some(&b'/') {
            buf.len()
        } else {
            buf.len() + 1
        };
        WalkPath { buf, rel_offset }
    }

    /// The full path, root prefix included.
    pub fn full(&self) -> &Path {
        Path::new(OsStr::from_bytes(&self.buf))
    }

    /// The root-relative portion as raw OS bytes: no leading or trailing
    /// separator, empty for the root itself.
    pub fn relative(&self) -> &[u8] {
        if self.buf.len() < self.rel_offset {
            &[]
        } else {
            &self.buf[self.rel_offset..]
        }
    }

    /// The final component of the relative portion.
    pub fn entry_name(&self) -> &OsStr {
        let rel = self.relative();
        let start = rel.iter().rposition(|&b| b == b'/').map_or(0, |i| i + 1);
        OsStr::from_bytes(&rel[start..])
    }

    /// Splits the relative portion into `(directory, name)` at the final
    /// separator. The directory is empty for entries directly under the
    /// root.
    pub fn split_entry(&self) -> (&[u8], &[u8]) {
        let rel = self.relative();
        match rel.iter().rposition(|&b| b == b'/') {
            Some(i) => (&rel[..i], &rel[i + 1..]),
            None => (&[], rel),
        }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn push(&mut self, name: &OsStr) {
        if self.buf.last() != Some(&b'/') {
            self.buf.push(b'/');
        }
        self.buf.extend_from_slice(name.as_bytes());
    }

    fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }
}

/// One filesystem entry as seen by a visitor.
///
/// `fd` is open `O_RDONLY` at offset zero and stays owned by the walker; a
/// visitor may read from it (fingerprinting) but must not close it.
pub struct WalkEntry<'a> {
    pub kind: RecordKind,
    pub size: u64,
    pub mtime_ms: i64,
    pub fd: BorrowedFd<'a>,
}

/// The walker's event consumer.
///
/// Implementations report their own failures through the associated error
/// type; walker-level filesystem errors convert into it via `From`.
pub trait TreeVisitor {
    type Error: From<FsError>;

    /// Called for every directory, the root included, before any of its
    /// entries.
    fn enter_dir(&mut self, path: &WalkPath) -> Result<(), Self::Error>;

    /// Called once per regular file or subdirectory. The return value
    /// decides descent and is only meaningful for directories.
    fn entry(&mut self, entry: &WalkEntry<'_>, path: &WalkPath) -> Result<bool, Self::Error>;

    /// Called after the last entry of a directory.
    fn leave_dir(&mut self, path: &WalkPath) -> Result<(), Self::Error>;
}

pub struct Walker {
    access_denied: AccessDeniedPolicy,
}

impl Walker {
    pub fn new(access_denied: AccessDeniedPolicy) -> Self {
        Walker { access_denied }
    }

    /// Walks the tree rooted at `root`. Opening the root itself follows
    /// symlinks and is fatal on any error; everything below is opened
    /// relative to its parent with `O_NOFOLLOW`.
    pub fn walk<V: TreeVisitor>(&self, root: &Path, visitor: &mut V) -> Result<(), V::Error> {
        let stream = DirStream::open(root)?;
        self.walk_stream(stream, WalkPath::new(root), visitor)
    }

    /// Walks the tree below an already-open directory stream. Used for
    /// subtree copies, where the root was itself opened `O_NOFOLLOW`
    /// relative to an ancestor.
    pub fn walk_stream<V: TreeVisitor>(
        &self,
        stream: DirStream,
        mut path: WalkPath,
        visitor: &mut V,
    ) -> Result<(), V::Error> {
        struct Frame {
            stream: DirStream,
            path_len: usize,
        }

        let mut current = stream;
        let mut stack: Vec<Frame> = Vec::new();

        visitor.enter_dir(&path)?;

        loop {
            match current.next_entry()? {
                Some(name) => {
                    let mark = path.len();
                    path.push(&name);

                    match open_entry_at(current.dir_fd(), &name, path.full()) {
                        Ok(fd) => {
                            let meta = fstat_fd(fd.as_fd(), path.full())?;
                            match meta.kind {
                                EntryKind::File | EntryKind::Dir => {
                                    let kind = if meta.kind == EntryKind::Dir {
                                        RecordKind::Dir
                                    } else {
                                        RecordKind::File
                                    };
                                    let entry = WalkEntry {
                                        kind,
                                        size: meta.size,
                                        mtime_ms: meta.mtime_ms,
                                        fd: fd.as_fd(),
                                    };
                                    let descend = visitor.entry(&entry, &path)?;

                                    if kind == RecordKind::Dir && descend {
                                        let child =
                                            DirStream::from_fd(fd, path.full().to_path_buf())?;
                                        let parent = std::mem::replace(&mut current, child);
                                        stack.push(Frame {
                                            stream: parent,
                                            path_len: mark,
                                        });
                                        visitor.enter_dir(&path)?;
                                        continue;
                                    }
                                }
                                EntryKind::Other => {
                                    debug!("skipping special file {}", path.full().display());
                                }
                            }
                        }
                        Err(FsError::Symlink(p)) => {
                            debug!("skipping symbolic link {}", p.display());
                        }
                        Err(FsError::Special(p)) => {
                            debug!("skipping special file {}", p.display());
                        }
                        Err(FsError::AccessDenied(p))
                            if self.access_denied == AccessDeniedPolicy::Skip =>
                        {
                            warn!("permission denied, skipping \"{}\"", p.display());
                        }
                        Err(err) => return Err(err.into()),
                    }

                    path.truncate(mark);
                }
                None => {
                    visitor.leave_dir(&path)?;
                    match stack.pop() {
                        Some(frame) => {
                            current = frame.stream;
                            path.truncate(frame.path_len);
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}
