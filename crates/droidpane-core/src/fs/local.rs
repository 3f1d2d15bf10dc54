//! [`Backend`] implementation for the machine the program runs on.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::fs::backend::{Backend, BackendKind, ByteReader, ByteWriter, DirEntries};
use crate::fs::entry::DirEntry;

/// Local filesystem adapter built on `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Returns `true` when `err` is a rename that failed because source and
/// destination live on different filesystems.
#[cfg(unix)]
pub fn is_cross_device(err: &CoreError) -> bool {
    matches!(err, CoreError::Io(io) if io.raw_os_error() == Some(libc::EXDEV))
}

#[cfg(not(unix))]
pub fn is_cross_device(_err: &CoreError) -> bool {
    false
}

fn shell_program() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "sh".to_string())
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn ensure_available(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn stat(&self, path: &Path) -> CoreResult<DirEntry> {
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| CoreError::from_io(e, path))?;
        Ok(DirEntry::from_metadata(path.to_path_buf(), &meta))
    }

    async fn list_dir(&self, path: &Path) -> CoreResult<DirEntries> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| CoreError::from_io(e, path))?;
        if !meta.is_dir() {
            return Err(CoreError::NotADirectory(path.to_path_buf()));
        }

        let mut read_dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| CoreError::from_io(e, path))?;
        let (tx, listing) = DirEntries::channel();
        let dir = path.to_path_buf();

        tokio::spawn(async move {
            loop {
                let item = match read_dir.next_entry().await {
                    Ok(Some(de)) => {
                        let entry_path = de.path();
                        match tokio::fs::symlink_metadata(&entry_path).await {
                            Ok(meta) => Ok(DirEntry::from_metadata(entry_path, &meta)),
                            // Removed between readdir and lstat.
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(e) => Err(CoreError::from_io(e, &entry_path)),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => Err(CoreError::from_io(e, &dir)),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(listing)
    }

    async fn is_symlink_to_dir(
        &self,
        dir: &Path,
        name: &str,
        _cancel: &CancellationToken,
    ) -> bool {
        let Ok(target) = tokio::fs::canonicalize(dir.join(name)).await else {
            return false;
        };
        tokio::fs::symlink_metadata(&target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn resolve_link(&self, path: &Path, _cancel: &CancellationToken) -> CoreResult<PathBuf> {
        tokio::fs::canonicalize(path)
            .await
            .map_err(|e| CoreError::from_io(e, path))
    }

    async fn open_read(&self, path: &Path) -> CoreResult<ByteReader> {
        tracing::debug!(path = %path.display(), "local open");
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| CoreError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    async fn create_file(&self, path: &Path, mode: u32) -> CoreResult<ByteWriter> {
        tracing::debug!(path = %path.display(), mode = format!("{mode:o}"), "local create");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(mode & 0o7777);
        let file = options
            .open(path)
            .await
            .map_err(|e| CoreError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    async fn run_shell(&self, cmd: &str, cancel: &CancellationToken) -> CoreResult<String> {
        tracing::debug!(cmd, "local shell");
        let child = tokio::process::Command::new(shell_program())
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("`{cmd}` exited with {}", output.status)
            } else {
                stderr
            };
            return Err(CoreError::Shell(message));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ensure_dir(
        &self,
        path: &Path,
        mode: u32,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        tracing::debug!(path = %path.display(), "local mkdir -p");
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| CoreError::from_io(e, path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(mode & 0o7777);
            if let Err(e) = tokio::fs::set_permissions(path, perms).await {
                tracing::debug!(path = %path.display(), "chmod skipped: {e}");
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(())
    }

    async fn mkdir(&self, path: &Path, cancel: &CancellationToken) -> CoreResult<()> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        tracing::debug!(path = %path.display(), "local mkdir");
        tokio::fs::create_dir(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                CoreError::DestinationExists(path.to_path_buf())
            } else {
                CoreError::from_io(e, path)
            }
        })
    }

    async fn rename(&self, src: &Path, dst: &Path, cancel: &CancellationToken) -> CoreResult<()> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        tracing::debug!(src = %src.display(), dst = %dst.display(), "local rename");
        tokio::fs::symlink_metadata(src)
            .await
            .map_err(|e| CoreError::from_io(e, src))?;
        tokio::fs::rename(src, dst).await?;
        Ok(())
    }

    async fn remove_all(&self, path: &Path, cancel: &CancellationToken) -> CoreResult<()> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        tracing::debug!(path = %path.display(), "local remove");
        // symlink_metadata so a link to a directory removes the link only.
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| CoreError::from_io(e, path))?;
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        result.map_err(|e| CoreError::from_io(e, path))
    }

    #[cfg(unix)]
    async fn make_fifo(&self, path: &Path, mode: u32) -> CoreResult<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        tracing::debug!(path = %path.display(), "local mkfifo");
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| CoreError::InvalidName(path.display().to_string()))?;
        let owned = path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
            let rc = unsafe { libc::mkfifo(c_path.as_ptr(), (mode & 0o7777) as libc::mode_t) };
            if rc == 0 {
                Ok(())
            } else {
                Err(CoreError::from_io(std::io::Error::last_os_error(), &owned))
            }
        })
        .await
        .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}
