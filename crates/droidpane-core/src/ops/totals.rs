//! File and byte totals computed before a copy starts.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};
use crate::fs::backend::{Backend, BackendKind};
use crate::ops::walker::OnError;
use crate::remote::shell::{parse_count, parse_du_output, quote_path};

/// Regular-file count and byte size of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub files: u64,
    pub bytes: u64,
}

/// Computes the totals of the tree rooted at `path` on `backend`.
///
/// Symlinks are followed, matching what the walker copies. Remote trees are
/// measured with two shell pipelines instead of a stat per entry. Under
/// [`OnError::Skip`], local entries below the root that cannot be read are
/// left out of the count, as the walker will skip them too.
pub async fn compute_totals(
    backend: &dyn Backend,
    path: &Path,
    on_error: OnError,
    cancel: &CancellationToken,
) -> CoreResult<Totals> {
    match backend.kind() {
        BackendKind::Local => local_totals(path.to_path_buf(), on_error, cancel.clone()).await,
        BackendKind::Remote => remote_totals(backend, path, cancel).await,
    }
}

async fn local_totals(
    root: PathBuf,
    on_error: OnError,
    cancel: CancellationToken,
) -> CoreResult<Totals> {
    tokio::task::spawn_blocking(move || {
        let mut totals = Totals::default();
        for entry in WalkDir::new(&root).follow_links(true) {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if on_error == OnError::Skip && e.depth() > 0 => {
                    tracing::debug!(error = %e, "not counting unreadable entry");
                    continue;
                }
                Err(e) => return Err(walk_error(e, &root)),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) if on_error == OnError::Skip && entry.depth() > 0 => {
                    tracing::debug!(error = %e, "not counting unreadable entry");
                    continue;
                }
                Err(e) => return Err(walk_error(e, entry.path())),
            };
            totals.files += 1;
            totals.bytes += meta.len();
        }
        Ok(totals)
    })
    .await
    .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

fn walk_error(err: walkdir::Error, fallback: &Path) -> CoreError {
    let path = err.path().unwrap_or(fallback).to_path_buf();
    match err.into_io_error() {
        Some(io) => CoreError::from_io(io, &path),
        None => CoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("filesystem loop at {}", path.display()),
        )),
    }
}

async fn remote_totals(
    backend: &dyn Backend,
    path: &Path,
    cancel: &CancellationToken,
) -> CoreResult<Totals> {
    let quoted = quote_path(path);
    let count = backend
        .run_shell(&format!("find -L {quoted} -type f | wc -l"), cancel)
        .await?;
    let files = parse_count(&count)?;

    let du = backend
        .run_shell(&format!("du -d0 -sh {quoted}"), cancel)
        .await?;
    let bytes = parse_du_output(&du)?;

    tracing::debug!(path = %path.display(), files, bytes, "remote totals");
    Ok(Totals { files, bytes })
}
