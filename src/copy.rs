//! File and subtree copying for the merge tool.
//!
//! Copies are driven by manifest-relative paths but execute entirely through
//! descriptor-relative opens: every component on both the source and the
//! destination side is resolved with `O_NOFOLLOW`, so a symlink swapped into
//! either tree cannot redirect the copy. Destinations are created
//! `O_CREAT | O_EXCL`; an entry that already exists in any form is a
//! failure, never an overwrite.
//!
//! Mode and ownership are not carried over. The source mtime is, with
//! second precision, so a merged file compares clean against its manifest
//! record afterwards.

use crate::dir_io::{
    DirStream, EntryKind, FsError, create_file_at, fstat_fd, mkdir_at, open_dir, open_dir_at,
    open_entry_at, set_mtime_fd,
};
use crate::encoding::{EncodingError, PathEncoder};
use crate::manifest::RecordKind;
use crate::walker::{AccessDeniedPolicy, TreeVisitor, WalkEntry, WalkPath, Walker};
use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const COPY_CHUNK_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("Source is not a regular file: {0}")]
    NotAFile(PathBuf),
}

/// Either the engine's root descriptor or an owned descriptor acquired while
/// stepping through path components.
enum DirFd<'a> {
    Root(BorrowedFd<'a>),
    Opened(OwnedFd),
}

impl DirFd<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            DirFd::Root(fd) => *fd,
            DirFd::Opened(fd) => fd.as_fd(),
        }
    }
}

/// Copies entries from a source tree into a destination tree.
pub struct CopyEngine<'a> {
    src_root: OwnedFd,
    src_root_path: PathBuf,
    dest_root: OwnedFd,
    dest_root_path: PathBuf,
    encoder: &'a PathEncoder,
}

impl<'a> CopyEngine<'a> {
    /// Opens both roots. Root opens follow symlinks, matching the walker's
    /// treatment of walk roots; everything below is `O_NOFOLLOW`.
    pub fn open(
        src_root: &Path,
        dest_root: &Path,
        encoder: &'a PathEncoder,
    ) -> Result<Self, FsError> {
        Ok(CopyEngine {
            src_root: open_dir(src_root)?,
            src_root_path: src_root.to_path_buf(),
            dest_root: open_dir(dest_root)?,
            dest_root_path: dest_root.to_path_buf(),
            encoder,
        })
    }

    /// Copies one regular file at `rel_path` (manifest form) from the source
    /// tree to the same relative location in the destination tree. Logs and
    /// returns `false` on any error; all descriptors are released either
    /// way.
    pub fn copy_file(&self, rel_path: &str) -> bool {
        match self.copy_file_inner(rel_path) {
            Ok(()) => {
                debug!("copied \"{}\"", rel_path);
                true
            }
            Err(err) => {
                warn!("failed to copy \"{}\": {}", rel_path, err);
                false
            }
        }
    }

    /// Copies the whole subtree at `rel_path`: creates the destination
    /// directory and mirrors regular files and directories below it.
    /// Symlinks and special files in the source are skipped like in any
    /// other walk. Logs and returns `false` on any error.
    pub fn copy_subtree(&self, rel_path: &str) -> bool {
        match self.copy_subtree_inner(rel_path) {
            Ok(files) => {
                debug!("copied subtree \"{}\" ({} files)", rel_path, files);
                true
            }
            Err(err) => {
                warn!("failed to copy subtree \"{}\": {}", rel_path, err);
                false
            }
        }
    }

    /// Converts a manifest-relative path into locale-encoded components.
    fn os_components(&self, rel_path: &str) -> Result<Vec<OsString>, EncodingError> {
        rel_path
            .split('/')
            .map(|component| {
                self.encoder
                    .from_utf8(component)
                    .map(|bytes| OsString::from_vec(bytes.into_owned()))
            })
            .collect()
    }

    fn copy_file_inner(&self, rel_path: &str) -> Result<(), CopyError> {
        let components = self.os_components(rel_path)?;
        let Some((name, dirs)) = components.split_last() else {
            return Err(CopyError::NotAFile(PathBuf::new()));
        };

        let (src_parent, src_parent_path) =
            descend(self.src_root.as_fd(), &self.src_root_path, dirs)?;
        let src_path = src_parent_path.join(name);
        let src_fd = open_entry_at(src_parent.as_fd(), name, &src_path)?;

        let meta = fstat_fd(src_fd.as_fd(), &src_path)?;
        if meta.kind != EntryKind::File {
            return Err(CopyError::NotAFile(src_path));
        }

        let (dest_parent, dest_parent_path) =
            descend(self.dest_root.as_fd(), &self.dest_root_path, dirs)?;
        let dest_path = dest_parent_path.join(name);
        let dest_fd = create_file_at(dest_parent.as_fd(), name, &dest_path)?;

        let src = File::from(src_fd);
        let dest = File::from(dest_fd);
        copy_bytes(&src, &dest, &src_path, &dest_path)?;
        set_mtime_fd(dest.as_fd(), meta.mtime_ms, &dest_path)?;

        Ok(())
    }

    fn copy_subtree_inner(&self, rel_path: &str) -> Result<usize, CopyError> {
        let components = self.os_components(rel_path)?;
        let Some((name, dirs)) = components.split_last() else {
            return Err(CopyError::NotAFile(PathBuf::new()));
        };

        let (src_parent, src_parent_path) =
            descend(self.src_root.as_fd(), &self.src_root_path, dirs)?;
        let src_path = src_parent_path.join(name);
        let src_fd = open_dir_at(src_parent.as_fd(), name, &src_path)?;

        let (dest_parent, dest_parent_path) =
            descend(self.dest_root.as_fd(), &self.dest_root_path, dirs)?;
        let dest_path = dest_parent_path.join(name);
        mkdir_at(dest_parent.as_fd(), name, &dest_path)?;
        let dest_fd = open_dir_at(dest_parent.as_fd(), name, &dest_path)?;

        let stream = DirStream::from_fd(src_fd, src_path.clone())?;
        let mut visitor = CopyVisitor::new(dest_fd, dest_path);
        Walker::new(AccessDeniedPolicy::Fail).walk_stream(
            stream,
            WalkPath::new(&src_path),
            &mut visitor,
        )?;

        Ok(visitor.files_copied)
    }
}

/// Steps through `dirs` one `openat(O_NOFOLLOW | O_DIRECTORY)` at a time.
/// Intermediate descriptors close as soon as the next level opens.
fn descend<'a>(
    root: BorrowedFd<'a>,
    root_path: &Path,
    dirs: &[OsString],
) -> Result<(DirFd<'a>, PathBuf), FsError> {
    let mut current = DirFd::Root(root);
    let mut path = root_path.to_path_buf();

    for component in dirs {
        path.push(component);
        let next = open_dir_at(current.as_fd(), component, &path)?;
        current = DirFd::Opened(next);
    }

    Ok((current, path))
}

/// 4 KiB copy loop. Read errors carry the source path, write errors the
/// destination path.
fn copy_bytes(
    mut src: &File,
    mut dest: &File,
    src_path: &Path,
    dest_path: &Path,
) -> Result<(), FsError> {
    let mut buffer = [0u8; COPY_CHUNK_SIZE];
    loop {
        let bytes_read = src.read(&mut buffer).map_err(|source| FsError::Io {
            path: src_path.to_path_buf(),
            source,
        })?;
        if bytes_read == 0 {
            return Ok(());
        }
        dest.write_all(&buffer[..bytes_read])
            .map_err(|source| FsError::Io {
                path: dest_path.to_path_buf(),
                source,
            })?;
    }
}

/// Mirrors a source subtree into the destination: directories are created as
/// they are entered, files are copied as they are visited.
struct CopyVisitor {
    /// Destination directory per walk depth; the top is the current one.
    dest_stack: Vec<OwnedFd>,
    dest_root_path: PathBuf,
    /// Directory created in `entry`, adopted by the following `enter_dir`.
    pending: Option<OwnedFd>,
    files_copied: usize,
}

impl CopyVisitor {
    fn new(dest_root: OwnedFd, dest_root_path: PathBuf) -> Self {
        CopyVisitor {
            dest_stack: vec![dest_root],
            dest_root_path,
            pending: None,
            files_copied: 0,
        }
    }

    fn dest_path(&self, path: &WalkPath) -> PathBuf {
        let rel = path.relative();
        if rel.is_empty() {
            self.dest_root_path.clone()
        } else {
            self.dest_root_path
                .join(Path::new(std::ffi::OsStr::from_bytes(rel)))
        }
    }
}

impl TreeVisitor for CopyVisitor {
    type Error = FsError;

    fn enter_dir(&mut self, _path: &WalkPath) -> Result<(), FsError> {
        // The subtree root is seeded at construction; every other directory
        // was opened by the preceding entry callback.
        if let Some(fd) = self.pending.take() {
            self.dest_stack.push(fd);
        }
        Ok(())
    }

    fn entry(&mut self, entry: &WalkEntry<'_>, path: &WalkPath) -> Result<bool, FsError> {
        let name = path.entry_name().to_os_string();
        let dest_path = self.dest_path(path);
        let parent = self
            .dest_stack
            .last()
            .ok_or_else(|| FsError::NotFound(dest_path.clone()))?
            .as_fd();

        match entry.kind {
            RecordKind::File => {
                let dest_fd = create_file_at(parent, &name, &dest_path)?;
                let dest = File::from(dest_fd);

                let mut buffer = [0u8; COPY_CHUNK_SIZE];
                let mut src = crate::dir_io::FdReader::new(entry.fd);
                loop {
                    let bytes_read = src.read(&mut buffer).map_err(|source| FsError::Io {
                        path: path.full().to_path_buf(),
                        source,
                    })?;
                    if bytes_read == 0 {
                        break;
                    }
                    (&dest)
                        .write_all(&buffer[..bytes_read])
                        .map_err(|source| FsError::Io {
                            path: dest_path.clone(),
                            source,
                        })?;
                }
                set_mtime_fd(dest.as_fd(), entry.mtime_ms, &dest_path)?;

                self.files_copied += 1;
                Ok(true)
            }
            RecordKind::Dir => {
                mkdir_at(parent, &name, &dest_path)?;
                let fd = open_dir_at(parent, &name, &dest_path)?;
                self.pending = Some(fd);
                Ok(true)
            }
        }
    }

    fn leave_dir(&mut self, _path: &WalkPath) -> Result<(), FsError> {
        self.dest_stack.pop();
        Ok(())
    }
}
