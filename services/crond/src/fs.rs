//! Filesystem interface and host implementation.
//!
//! Every metadata lookup, open and directory listing the daemon performs
//! goes through [`Filesystem`], so tests can count calls or swap a file out
//! from under the gate between lstat and open.

use std::ffi::OsString;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::Path;

use cronspool_jobdb::Timestamp;
use tracing::debug;

/// The subset of `struct stat` the daemon relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    /// Full `st_mode`, including the file type bits.
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub mtime: Timestamp,
    pub is_regular: bool,
}

impl FileStat {
    /// Permission bits only (`mode & 07777`).
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// `(st_dev, st_ino)`, the identity of the inode.
    pub fn identity(&self) -> (u64, u64) {
        (self.dev, self.ino)
    }
}

impl From<&Metadata> for FileStat {
    fn from(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            mtime: Timestamp::from_stat(meta.mtime(), meta.mtime_nsec()),
            is_regular: meta.file_type().is_file(),
        }
    }
}

/// Filesystem primitives used by the gate and the spool enumerator.
pub trait Filesystem: Send + Sync {
    /// `stat(2)`, following symlinks.
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// `lstat(2)`, never following symlinks.
    fn lstat(&self, path: &Path) -> io::Result<FileStat>;

    /// Open read-only, non-blocking, refusing to follow a final symlink.
    fn open_nofollow(&self, path: &Path) -> io::Result<File>;

    /// `fstat(2)` on an open descriptor.
    fn fstat(&self, file: &File) -> io::Result<FileStat>;

    /// Names of the immediate children of a directory, in directory order.
    /// Only failing to open the directory is an error; entries that cannot
    /// be read are left out.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl Filesystem for HostFs {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        fs::metadata(path).map(|m| FileStat::from(&m))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        fs::symlink_metadata(path).map(|m| FileStat::from(&m))
    }

    fn open_nofollow(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(path)
    }

    fn fstat(&self, file: &File) -> io::Result<FileStat> {
        file.metadata().map(|m| FileStat::from(&m))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let entries = fs::read_dir(path)?.map(|entry| entry.map(|e| e.file_name()));
        Ok(readable_names(path, entries))
    }
}

/// Collect directory entry names, logging and dropping the ones that failed.
fn readable_names(
    path: &Path,
    entries: impl IntoIterator<Item = io::Result<OsString>>,
) -> Vec<OsString> {
    entries
        .into_iter()
        .filter_map(|entry| {
            entry
                .inspect_err(|e| {
                    debug!(path = %path.display(), error = %e, "skipping unreadable entry")
                })
                .ok()
        })
        .collect()
}
