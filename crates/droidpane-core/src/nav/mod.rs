//! Navigation logic for droidpane.
//!
//! This module contains the [`pane::Pane`] with its immutable
//! [`pane::PaneState`], navigation [`history::History`], the
//! [`listing::DirectoryEnumerator`] shared with the transfer walker, and
//! entry [`filter`]ing/sorting.

pub mod filter;
pub mod history;
pub mod listing;
pub mod pane;

use std::path::{Component, Path, PathBuf};

/// Remote directory that relative start paths are joined onto.
pub const REMOTE_BASE: &str = "/sdcard";

/// Resolves `input` against `base` lexically.
///
/// Absolute input replaces `base`. `.` components are dropped and `..`
/// removes the previous component but never climbs above the root. Symlinks
/// are not consulted; the remote side cannot resolve them cheaply.
pub fn resolve_path(base: &Path, input: &str) -> PathBuf {
    let input = Path::new(input);
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        base.join(input)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if out.parent().is_some() {
                    out.pop();
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(Component::RootDir.as_os_str());
    }
    out
}

/// Resolves a remote start path: anything not beginning with `/` is taken
/// relative to [`REMOTE_BASE`].
pub fn remote_start_path(input: &str) -> PathBuf {
    resolve_path(Path::new(REMOTE_BASE), input)
}
