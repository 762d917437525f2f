//! Descriptor-level filesystem primitives for the walker and copy engine.
//!
//! Everything below a walk or copy root is opened relative to its parent
//! directory descriptor with `O_NOFOLLOW`, so a symbolic link planted in the
//! tree can never redirect traversal outside the root. Each acquired
//! descriptor is owned by an RAII value and released on every exit path.

use std::ffi::{CStr, CString, OsStr, OsString};
use std::io::Read;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

#[cfg(all(target_os = "linux", target_env = "gnu"))]
use libc::readdir64 as readdir_impl;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
use libc::readdir as readdir_impl;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("Permission denied: {0}")]
    AccessDenied(PathBuf),
    #[error("No such file or directory: {0}")]
    NotFound(PathBuf),
    #[error("Refusing to follow symbolic link: {0}")]
    Symlink(PathBuf),
    #[error("Not a readable file: {0}")]
    Special(PathBuf),
    #[error("Name too long: {0}")]
    NameTooLong(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FsError {
    pub fn from_os(err: std::io::Error, path: &Path) -> FsError {
        match err.raw_os_error() {
            Some(libc::EACCES) => FsError::AccessDenied(path.to_path_buf()),
            Some(libc::ENOENT) => FsError::NotFound(path.to_path_buf()),
            Some(libc::ELOOP) => FsError::Symlink(path.to_path_buf()),
            Some(libc::ENXIO) => FsError::Special(path.to_path_buf()),
            Some(libc::ENAMETOOLONG) => FsError::NameTooLong(path.to_path_buf()),
            _ => FsError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    fn last_os(path: &Path) -> FsError {
        Self::from_os(std::io::Error::last_os_error(), path)
    }
}

/// Entry kind as reported by `fstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Anything else (device, FIFO, socket). The walk skips these.
    Other,
}

/// The stat fields the engine cares about. `mtime_ms` is truncated to whole
/// seconds to match what the manifest persists.
#[derive(Debug, Clone, Copy)]
pub struct EntryMeta {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_ms: i64,
}

fn to_cstring(name: &OsStr, path: &Path) -> Result<CString, FsError> {
    CString::new(name.as_bytes()).map_err(|_| FsError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "embedded NUL in name"),
    })
}

/// Opens a directory by path. Used only for walk and copy roots; the root
/// itself may be a symlink, everything below is opened `O_NOFOLLOW`.
pub fn open_dir(path: &Path) -> Result<OwnedFd, FsError> {
    let c_path = to_cstring(path.as_os_str(), path)?;
    let fd = unsafe {
        libc::open(
            c_path.as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(FsError::last_os(path));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Opens a subdirectory relative to its parent descriptor.
pub fn open_dir_at(parent: BorrowedFd<'_>, name: &OsStr, path: &Path) -> Result<OwnedFd, FsError> {
    let c_name = to_cstring(name, path)?;
    let fd = unsafe {
        libc::openat(
            parent.as_raw_fd(),
            c_name.as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(FsError::last_os(path));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Opens a directory entry relative to its parent descriptor, refusing
/// symlinks. `O_NONBLOCK` keeps a FIFO from stalling the open; it has no
/// effect on regular files or directories.
pub fn open_entry_at(parent: BorrowedFd<'_>, name: &OsStr, path: &Path) -> Result<OwnedFd, FsError> {
    let c_name = to_cstring(name, path)?;
    let fd = unsafe {
        libc::openat(
            parent.as_raw_fd(),
            c_name.as_ptr(),
            libc::O_RDONLY | libc::O_NOFOLLOW | libc::O_NONBLOCK | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(FsError::last_os(path));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Creates a regular file relative to `parent`. Fails if the name already
/// exists in any form, including as a symlink.
pub fn create_file_at(
    parent: BorrowedFd<'_>,
    name: &OsStr,
    path: &Path,
) -> Result<OwnedFd, FsError> {
    let c_name = to_cstring(name, path)?;
    let fd = unsafe {
        libc::openat(
            parent.as_raw_fd(),
            c_name.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY | libc::O_CLOEXEC,
            0o644 as libc::c_uint,
        )
    };
    if fd < 0 {
        return Err(FsError::last_os(path));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub fn mkdir_at(parent: BorrowedFd<'_>, name: &OsStr, path: &Path) -> Result<(), FsError> {
    let c_name = to_cstring(name, path)?;
    let rc = unsafe { libc::mkdirat(parent.as_raw_fd(), c_name.as_ptr(), 0o755) };
    if rc != 0 {
        return Err(FsError::last_os(path));
    }
    Ok(())
}

pub fn fstat_fd(fd: BorrowedFd<'_>, path: &Path) -> Result<EntryMeta, FsError> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), st.as_mut_ptr()) };
    if rc != 0 {
        return Err(FsError::last_os(path));
    }
    let st = unsafe { st.assume_init() };

    let kind = match st.st_mode & libc::S_IFMT {
        libc::S_IFREG => EntryKind::File,
        libc::S_IFDIR => EntryKind::Dir,
        _ => EntryKind::Other,
    };

    Ok(EntryMeta {
        kind,
        size: st.st_size as u64,
        mtime_ms: (st.st_mtime as i64) * 1000,
    })
}

/// Sets the file's mtime with second precision, leaving atime untouched.
pub fn set_mtime_fd(fd: BorrowedFd<'_>, mtime_ms: i64, path: &Path) -> Result<(), FsError> {
    let times = [
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        libc::timespec {
            tv_sec: (mtime_ms / 1000) as libc::time_t,
            tv_nsec: 0,
        },
    ];
    let rc = unsafe { libc::futimens(fd.as_raw_fd(), times.as_ptr()) };
    if rc != 0 {
        return Err(FsError::last_os(path));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn clear_errno() {
    unsafe { *libc::__errno_location() = 0 };
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn clear_errno() {
    unsafe { *libc::__error() = 0 };
}

/// An open directory stream. Owns the underlying descriptor (via the `DIR`
/// stream) and exposes it for `openat`-style calls against children.
pub struct DirStream {
    dirp: *mut libc::DIR,
    path: PathBuf,
}

impl DirStream {
    /// Takes ownership of `fd` and turns it into a directory stream. The
    /// descriptor is closed by `closedir` when the stream drops.
    pub fn from_fd(fd: OwnedFd, path: PathBuf) -> Result<Self, FsError> {
        let raw = fd.into_raw_fd();
        let dirp = unsafe { libc::fdopendir(raw) };
        if dirp.is_null() {
            let err = FsError::last_os(&path);
            unsafe { libc::close(raw) };
            return Err(err);
        }
        Ok(DirStream { dirp, path })
    }

    /// Opens the directory at `path` and wraps it in a stream.
    pub fn open(path: &Path) -> Result<Self, FsError> {
        let fd = open_dir(path)?;
        Self::from_fd(fd, path.to_path_buf())
    }

    /// The directory's descriptor, valid for the stream's lifetime.
    pub fn dir_fd(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(libc::dirfd(self.dirp)) }
    }

    /// The next entry name, skipping `.` and `..`. `None` at end of stream.
    /// The order is whatever the underlying directory stream yields.
    pub fn next_entry(&mut self) -> Result<Option<OsString>, FsError> {
        loop {
            clear_errno();
            let entry = unsafe { readdir_impl(self.dirp) };
            if entry.is_null() {
                let err = std::io::Error::last_os_error();
                return match err.raw_os_error() {
                    None | Some(0) => Ok(None),
                    Some(_) => Err(FsError::from_os(err, &self.path)),
                };
            }

            let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
            let bytes = name.to_bytes();
            if bytes == b"." || bytes == b".." {
                continue;
            }
            return Ok(Some(OsString::from_vec(bytes.to_vec())));
        }
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe { libc::closedir(self.dirp) };
    }
}

/// `Read` over a borrowed descriptor, so a visitor can fingerprint an entry
/// without taking ownership of the walker's fd.
pub struct FdReader<'a> {
    fd: BorrowedFd<'a>,
}

impl<'a> FdReader<'a> {
    pub fn new(fd: BorrowedFd<'a>) -> Self {
        FdReader { fd }
    }
}

impl Read for FdReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::fd::AsFd;
    use tempfile::TempDir;

    #[test]
    fn test_stream_lists_entries_and_skips_dot() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();

        let mut stream = DirStream::open(temp.path()).unwrap();
        let mut names = Vec::new();
        while let Some(name) = stream.next_entry().unwrap() {
            names.push(name.to_string_lossy().into_owned());
        }
        names.sort();

        assert_eq!(names, vec!["a.txt", "sub"]);
    }

    #[test]
    fn test_open_dir_not_found() {
        let result = open_dir(Path::new("/no/such/dir/anywhere"));
        assert!(matches!(result, Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_open_entry_refuses_symlink() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("target.txt"), "content").unwrap();
        std::os::unix::fs::symlink("target.txt", temp.path().join("link")).unwrap();

        let stream = DirStream::open(temp.path()).unwrap();
        let result = open_entry_at(
            stream.dir_fd(),
            OsStr::new("link"),
            &temp.path().join("link"),
        );

        assert!(matches!(result, Err(FsError::Symlink(_))));
    }

    #[test]
    fn test_fstat_distinguishes_kinds() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f"), "1234").unwrap();
        fs::create_dir(temp.path().join("d")).unwrap();

        let stream = DirStream::open(temp.path()).unwrap();

        let f = open_entry_at(stream.dir_fd(), OsStr::new("f"), &temp.path().join("f")).unwrap();
        let meta = fstat_fd(f.as_fd(), &temp.path().join("f")).unwrap();
        assert_eq!(meta.kind, EntryKind::File);
        assert_eq!(meta.size, 4);

        let d = open_entry_at(stream.dir_fd(), OsStr::new("d"), &temp.path().join("d")).unwrap();
        let meta = fstat_fd(d.as_fd(), &temp.path().join("d")).unwrap();
        assert_eq!(meta.kind, EntryKind::Dir);
    }

    #[test]
    #[cfg(unix)]
    fn test_fifo_is_reported_as_other_without_blocking() {
        use nix::sys::stat;
        use nix::unistd;

        let temp = TempDir::new().unwrap();
        let fifo = temp.path().join("fifo");
        unistd::mkfifo(&fifo, stat::Mode::S_IRWXU).unwrap();

        let stream = DirStream::open(temp.path()).unwrap();
        let fd = open_entry_at(stream.dir_fd(), OsStr::new("fifo"), &fifo).unwrap();
        let meta = fstat_fd(fd.as_fd(), &fifo).unwrap();

        assert_eq!(meta.kind, EntryKind::Other);
    }

    #[test]
    fn test_create_file_at_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let stream = DirStream::open(temp.path()).unwrap();
        let path = temp.path().join("new.dat");

        let fd = create_file_at(stream.dir_fd(), OsStr::new("new.dat"), &path).unwrap();
        drop(fd);

        let second = create_file_at(stream.dir_fd(), OsStr::new("new.dat"), &path);
        assert!(matches!(second, Err(FsError::Io { .. })));
    }

    #[test]
    fn test_mkdir_at_creates_directory() {
        let temp = TempDir::new().unwrap();
        let stream = DirStream::open(temp.path()).unwrap();

        mkdir_at(stream.dir_fd(), OsStr::new("child"), &temp.path().join("child")).unwrap();
        assert!(temp.path().join("child").is_dir());
    }

    #[test]
    fn test_fd_reader_reads_contents() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f"), "hello reader").unwrap();

        let stream = DirStream::open(temp.path()).unwrap();
        let fd = open_entry_at(stream.dir_fd(), OsStr::new("f"), &temp.path().join("f")).unwrap();

        let mut contents = String::new();
        FdReader::new(fd.as_fd())
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello reader");
    }

    #[test]
    fn test_set_mtime_fd_round_trips_seconds() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        fs::write(&path, "x").unwrap();

        let stream = DirStream::open(temp.path()).unwrap();
        let fd = open_entry_at(stream.dir_fd(), OsStr::new("f"), &path).unwrap();

        set_mtime_fd(fd.as_fd(), 1_700_000_123_000, &path).unwrap();

        let meta = fstat_fd(fd.as_fd(), &path).unwrap();
        assert_eq!(meta.mtime_ms, 1_700_000_123_000);
    }
}
