//! Directory entry representation shared by both backends.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::nfc_string;

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFIFO: u32 = 0o010_000;

/// The type of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// A named pipe (FIFO).
    Pipe,
    /// Sockets, block and character devices.
    Special,
}

impl EntryKind {
    /// Decodes the `S_IFMT` bits of a raw `st_mode`.
    pub fn from_mode(raw_mode: u32) -> Self {
        match raw_mode & S_IFMT {
            S_IFDIR => EntryKind::Dir,
            S_IFREG => EntryKind::File,
            S_IFLNK => EntryKind::Symlink,
            S_IFIFO => EntryKind::Pipe,
            _ => EntryKind::Special,
        }
    }

    fn type_char(self) -> char {
        match self {
            EntryKind::File => '-',
            EntryKind::Dir => 'd',
            EntryKind::Symlink => 'l',
            EntryKind::Pipe => 'p',
            EntryKind::Special => 's',
        }
    }
}

/// An immutable snapshot of one filesystem object at list time.
///
/// Entries go stale as soon as the underlying filesystem changes; re-listing
/// is the only refresh mechanism. Directory sizes are reported as `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    path: PathBuf,
    name: String,
    kind: EntryKind,
    size: u64,
    modified: Option<SystemTime>,
    mode: u32,
}

impl DirEntry {
    /// Creates an entry from local metadata obtained without following symlinks.
    pub fn from_metadata(path: PathBuf, metadata: &std::fs::Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| nfc_string(&n.to_string_lossy()))
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let kind = local_kind(metadata);

        Self {
            path,
            name,
            kind,
            size: if kind == EntryKind::Dir { 0 } else { metadata.len() },
            modified: metadata.modified().ok(),
            mode: local_mode(metadata),
        }
    }

    /// Creates an entry from already-decoded remote attributes.
    pub fn from_remote(
        path: PathBuf,
        name: String,
        kind: EntryKind,
        size: u64,
        modified: Option<SystemTime>,
        mode: u32,
    ) -> Self {
        Self {
            path,
            name,
            kind,
            size: if kind == EntryKind::Dir { 0 } else { size },
            modified,
            mode: mode & 0o7777,
        }
    }

    /// Creates an entry from a raw `st_mode` and a modification time in
    /// seconds since the epoch, as printed by `stat -c`.
    pub fn from_raw_mode(path: PathBuf, raw_mode: u32, size: u64, mtime_secs: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| nfc_string(&n.to_string_lossy()))
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::from_remote(
            path,
            name,
            EntryKind::from_mode(raw_mode),
            size,
            Some(UNIX_EPOCH + Duration::from_secs(mtime_secs)),
            raw_mode,
        )
    }

    /// Returns the full path of this entry.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the last path component.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Returns the size in bytes. Always `0` for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Returns the permission bits (`0o7777` mask).
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Returns `true` if the name starts with `.`.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// Returns the extension of the name, without the dot.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }

    /// Renders the type and permission bits like `ls -l` (`drwxr-xr-x`).
    pub fn permissions_string(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(self.kind.type_char());
        for shift in [6u32, 3, 0] {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }
}

#[cfg(unix)]
fn local_kind(metadata: &std::fs::Metadata) -> EntryKind {
    use std::os::unix::fs::FileTypeExt;

    let ft = metadata.file_type();
    if ft.is_symlink() {
        EntryKind::Symlink
    } else if ft.is_dir() {
        EntryKind::Dir
    } else if ft.is_file() {
        EntryKind::File
    } else if ft.is_fifo() {
        EntryKind::Pipe
    } else {
        EntryKind::Special
    }
}

#[cfg(not(unix))]
fn local_kind(metadata: &std::fs::Metadata) -> EntryKind {
    let ft = metadata.file_type();
    if ft.is_symlink() {
        EntryKind::Symlink
    } else if ft.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

#[cfg(unix)]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
