//! An in-memory remote device.
//!
//! [`MemoryBridge`] keeps a whole device tree in a map and interprets the
//! handful of shell commands the remote adapter issues (`mkdir`, `chmod`,
//! `mv`, `cp`, `rm`, `ls -pd`, `readlink -f`, `find | wc -l`, `du -sh`).
//! It backs the test suites and the `--demo` mode of the command-line
//! frontend. Connection state, transfer latency and a disconnect after a
//! number of transfers can be scripted.

use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::fs::backend::{ByteReader, ByteWriter, DirEntries, ProgressFn};
use crate::fs::entry::{DirEntry, EntryKind};
use crate::remote::shell::human_size;
use crate::remote::{Bridge, ConnectionState};

const DIR_MODE: u32 = 0o775;
const FILE_MODE: u32 = 0o644;
const LINK_MODE: u32 = 0o777;
const START_CLOCK: u64 = 1_700_000_000;
const MAX_LINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
    Pipe,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    mode: u32,
    mtime: u64,
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }

    fn to_entry(&self, path: PathBuf) -> DirEntry {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        let (kind, size) = match &self.kind {
            NodeKind::File(data) => (EntryKind::File, data.len() as u64),
            NodeKind::Dir => (EntryKind::Dir, 0),
            NodeKind::Symlink(target) => (EntryKind::Symlink, target.as_os_str().len() as u64),
            NodeKind::Pipe => (EntryKind::Pipe, 0),
        };
        let modified = UNIX_EPOCH + Duration::from_secs(self.mtime);
        DirEntry::from_remote(path, name, kind, size, Some(modified), self.mode)
    }
}

/// Lexically normalises `path` into an absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            _ => {}
        }
    }
    out
}

fn base_name(path: &Path) -> OsString {
    path.file_name().map(OsString::from).unwrap_or_default()
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<PathBuf, Node>,
    clock: u64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            PathBuf::from("/"),
            Node {
                kind: NodeKind::Dir,
                mode: DIR_MODE,
                mtime: START_CLOCK,
            },
        );
        Self {
            nodes,
            clock: START_CLOCK,
        }
    }

    fn insert(&mut self, path: PathBuf, kind: NodeKind, mode: u32) {
        self.clock += 1;
        let mtime = self.clock;
        self.nodes.insert(path, Node { kind, mode, mtime });
    }

    /// Follows symlinks in every component of `path`.
    fn resolve(&self, path: &Path) -> Option<PathBuf> {
        let mut pending: VecDeque<OsString> = normalize(path)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_os_string()),
                _ => None,
            })
            .collect();
        let mut resolved = PathBuf::from("/");
        let mut hops = 0;

        while let Some(part) = pending.pop_front() {
            let candidate = resolved.join(&part);
            match self.nodes.get(&candidate).map(|n| &n.kind) {
                Some(NodeKind::Symlink(target)) => {
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        return None;
                    }
                    let target = normalize(&resolved.join(target));
                    let mut rest: VecDeque<OsString> = target
                        .components()
                        .filter_map(|c| match c {
                            Component::Normal(part) => Some(part.to_os_string()),
                            _ => None,
                        })
                        .collect();
                    rest.extend(pending.drain(..));
                    pending = rest;
                    resolved = PathBuf::from("/");
                }
                Some(_) => resolved = candidate,
                None => return None,
            }
        }
        Some(resolved)
    }

    /// Looks up `path` without following its final component.
    fn lstat(&self, path: &Path) -> Option<(PathBuf, &Node)> {
        let path = normalize(path);
        let real = match path.parent() {
            None => path,
            Some(parent) => self.resolve(parent)?.join(base_name(&path)),
        };
        self.nodes.get(&real).map(|node| (real.clone(), node))
    }

    fn resolved_node(&self, path: &Path) -> Option<(PathBuf, &Node)> {
        let real = self.resolve(path)?;
        self.nodes.get(&real).map(|node| (real, node))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.resolved_node(path).is_some_and(|(_, n)| n.is_dir())
    }

    fn children(&self, dir: &Path) -> Vec<(PathBuf, Node)> {
        self.nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(dir))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect()
    }

    fn subtree(&self, root: &Path) -> Vec<(PathBuf, Node)> {
        self.nodes
            .range(root.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(root))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect()
    }

    fn remove_subtree(&mut self, root: &Path) {
        self.nodes.retain(|p, _| !p.starts_with(root));
    }

    fn mkdir_all(&mut self, path: &Path) -> Result<PathBuf, String> {
        let mut current = PathBuf::from("/");
        for component in normalize(path).components() {
            let Component::Normal(part) = component else {
                continue;
            };
            let candidate = current.join(part);
            let existing = self
                .resolved_node(&candidate)
                .map(|(real, node)| (real, node.is_dir()));
            match existing {
                Some((real, true)) => current = real,
                Some(_) => {
                    return Err(format!("mkdir: '{}': Not a directory", candidate.display()))
                }
                None => {
                    if self.nodes.contains_key(&candidate) {
                        return Err(format!("mkdir: '{}': File exists", candidate.display()));
                    }
                    self.insert(candidate.clone(), NodeKind::Dir, DIR_MODE);
                    current = candidate;
                }
            }
        }
        Ok(current)
    }

    /// Where `src` lands when copied or moved to `dst`: inside `dst` when it
    /// is a directory, at `dst` otherwise.
    fn landing(&self, src: &Path, dst: &Path, tool: &str) -> Result<PathBuf, String> {
        let dst = normalize(dst);
        if let Some((real, node)) = self.resolved_node(&dst) {
            if node.is_dir() {
                return Ok(real.join(base_name(src)));
            }
        }
        let parent = dst.parent().unwrap_or(Path::new("/"));
        match self.resolved_node(parent) {
            Some((real, node)) if node.is_dir() => Ok(real.join(base_name(&dst))),
            _ => Err(format!(
                "{tool}: '{}': No such file or directory",
                dst.display()
            )),
        }
    }

    fn graft(&mut self, entries: Vec<(PathBuf, Node)>, from: &Path, to: &Path) {
        for (path, node) in entries {
            let rel = path.strip_prefix(from).unwrap_or(Path::new(""));
            let target = if rel.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rel)
            };
            self.insert(target, node.kind, node.mode);
        }
    }

    fn walk(
        &self,
        shown: &Path,
        real: &Path,
        follow: bool,
        only: Option<char>,
        depth: usize,
        out: &mut Vec<(PathBuf, u64)>,
    ) {
        if depth > MAX_LINK_HOPS {
            return;
        }
        let Some(node) = self.nodes.get(real) else {
            return;
        };
        match &node.kind {
            NodeKind::Dir => {
                if only.is_none() || only == Some('d') {
                    out.push((shown.to_path_buf(), 0));
                }
                for (child, _) in self.children(real) {
                    let name = base_name(&child);
                    self.walk(&shown.join(&name), &child, follow, only, depth + 1, out);
                }
            }
            NodeKind::Symlink(_) if follow => {
                if let Some(target) = self.resolve(real) {
                    self.walk(shown, &target, follow, only, depth + 1, out);
                }
            }
            NodeKind::Symlink(_) => {
                if only.is_none() || only == Some('l') {
                    out.push((shown.to_path_buf(), 0));
                }
            }
            NodeKind::File(data) => {
                if only.is_none() || only == Some('f') {
                    out.push((shown.to_path_buf(), data.len() as u64));
                }
            }
            NodeKind::Pipe => {
                if only.is_none() || only == Some('p') {
                    out.push((shown.to_path_buf(), 0));
                }
            }
        }
    }

    fn run(&mut self, argv: &[String], stdin: &str) -> Result<(String, bool), String> {
        let Some((program, args)) = argv.split_first() else {
            return Ok((String::new(), false));
        };
        let flags: Vec<&str> = args
            .iter()
            .filter(|a| a.starts_with('-'))
            .map(String::as_str)
            .collect();
        let has = |c: char| flags.iter().any(|f| !f.starts_with("--") && f.contains(c));
        let operands: Vec<&str> = args
            .iter()
            .filter(|a| !a.starts_with('-'))
            .map(String::as_str)
            .collect();

        match program.as_str() {
            "echo" => Ok((format!("{}\n", args.join(" ")), false)),
            "wc" => Ok((format!("{}\n", stdin.lines().count()), false)),
            "mkdir" => {
                for operand in &operands {
                    let path = Path::new(operand);
                    if has('p') {
                        self.mkdir_all(path)?;
                        continue;
                    }
                    if self.lstat(path).is_some() {
                        return Err(format!("mkdir: '{operand}': File exists"));
                    }
                    let parent = normalize(path);
                    let parent = parent.parent().unwrap_or(Path::new("/"));
                    let Some(real_parent) = self.resolve(parent).filter(|p| self.is_dir(p))
                    else {
                        return Err(format!("mkdir: '{operand}': No such file or directory"));
                    };
                    self.insert(real_parent.join(base_name(path)), NodeKind::Dir, DIR_MODE);
                }
                Ok((String::new(), true))
            }
            "chmod" => {
                let [mode, path] = operands.as_slice() else {
                    return Err("chmod: needs MODE FILE".to_string());
                };
                let mode = u32::from_str_radix(mode, 8)
                    .map_err(|_| format!("chmod: bad mode '{mode}'"))?;
                let real = self
                    .resolve(Path::new(path))
                    .ok_or_else(|| format!("chmod: '{path}': No such file or directory"))?;
                if let Some(node) = self.nodes.get_mut(&real) {
                    node.mode = mode & 0o7777;
                }
                Ok((String::new(), true))
            }
            "mv" => {
                let [src, dst] = operands.as_slice() else {
                    return Err("mv: needs SOURCE DEST".to_string());
                };
                let (src_real, _) = self
                    .lstat(Path::new(src))
                    .ok_or_else(|| format!("mv: '{src}': No such file or directory"))?;
                let target = self.landing(&src_real, Path::new(dst), "mv")?;
                if target == src_real {
                    return Ok((String::new(), false));
                }
                if target.starts_with(&src_real) {
                    return Err(format!("mv: '{src}' to '{dst}': subdirectory of itself"));
                }
                let moved = self.subtree(&src_real);
                self.remove_subtree(&target);
                self.remove_subtree(&src_real);
                self.graft(moved, &src_real, &target);
                Ok((String::new(), true))
            }
            "cp" => {
                let [src, dst] = operands.as_slice() else {
                    return Err("cp: needs SOURCE DEST".to_string());
                };
                let (src_real, node) = self
                    .resolved_node(Path::new(src))
                    .ok_or_else(|| format!("cp: '{src}': No such file or directory"))?;
                if node.is_dir() && !(has('r') || has('R') || has('a')) {
                    return Err(format!("cp: Skipped dir '{src}'"));
                }
                let target = self.landing(&src_real, Path::new(dst), "cp")?;
                if target.starts_with(&src_real) {
                    return Err(format!("cp: '{src}' to '{dst}': subdirectory of itself"));
                }
                let copied = self.subtree(&src_real);
                self.remove_subtree(&target);
                self.graft(copied, &src_real, &target);
                Ok((String::new(), true))
            }
            "rm" => {
                for operand in &operands {
                    let Some((real, node)) = self.lstat(Path::new(operand)) else {
                        if has('f') {
                            continue;
                        }
                        return Err(format!("rm: '{operand}': No such file or directory"));
                    };
                    if real == Path::new("/") {
                        return Err("rm: refusing to remove '/'".to_string());
                    }
                    if node.is_dir() && !(has('r') || has('R')) {
                        return Err(format!("rm: '{operand}': Is a directory"));
                    }
                    self.remove_subtree(&real);
                }
                Ok((String::new(), true))
            }
            "ls" => {
                let Some(arg) = operands.last() else {
                    return Err("ls: needs FILE".to_string());
                };
                let path = Path::new(arg);
                if arg.ends_with('/') {
                    if !self.is_dir(path) {
                        let reason = if self.resolve(path).is_some() {
                            "Not a directory"
                        } else {
                            "No such file or directory"
                        };
                        return Err(format!("ls: {arg}: {reason}"));
                    }
                    return Ok((format!("{arg}/\n"), false));
                }
                let Some((_, node)) = self.lstat(path) else {
                    return Err(format!("ls: {arg}: No such file or directory"));
                };
                let suffix = if has('p') && node.is_dir() { "/" } else { "" };
                Ok((format!("{arg}{suffix}\n"), false))
            }
            "readlink" => {
                let Some(arg) = operands.last() else {
                    return Err("readlink: needs FILE".to_string());
                };
                match self.resolve(Path::new(arg)) {
                    Some(real) => Ok((format!("{}\n", real.display()), false)),
                    None => Err(String::new()),
                }
            }
            "find" => {
                let mut only = None;
                let mut root = None;
                let mut iter = args.iter();
                while let Some(arg) = iter.next() {
                    match arg.as_str() {
                        "-L" => {}
                        "-type" => only = iter.next().and_then(|t| t.chars().next()),
                        other if root.is_none() && !other.starts_with('-') => root = Some(other),
                        _ => {}
                    }
                }
                let root = root.unwrap_or(".");
                let follow = args.iter().any(|a| a == "-L");
                let (real, _) = self
                    .lstat(Path::new(root))
                    .ok_or_else(|| format!("find: '{root}': No such file or directory"))?;
                let mut found = Vec::new();
                self.walk(Path::new(root), &real, follow, only, 0, &mut found);
                let out: String = found
                    .iter()
                    .map(|(p, _)| format!("{}\n", p.display()))
                    .collect();
                Ok((out, false))
            }
            "du" => {
                let Some(arg) = operands.last() else {
                    return Err("du: needs FILE".to_string());
                };
                let (real, _) = self
                    .lstat(Path::new(arg))
                    .ok_or_else(|| format!("du: {arg}: No such file or directory"))?;
                let mut found = Vec::new();
                self.walk(Path::new(arg), &real, false, Some('f'), 0, &mut found);
                let total: u64 = found.iter().map(|(_, size)| size).sum();
                let shown = if has('h') {
                    human_size(total)
                } else {
                    total.div_ceil(1024).to_string()
                };
                Ok((format!("{shown}\t{arg}\n"), false))
            }
            other => Err(format!("sh: {other}: not found")),
        }
    }
}

#[derive(Debug)]
struct Inner {
    tree: Mutex<Tree>,
    state: Mutex<ConnectionState>,
    mutations: AtomicUsize,
    transfers: AtomicUsize,
    disconnect_after: Mutex<Option<usize>>,
    transfer_delay: Mutex<Duration>,
    commands: Mutex<Vec<String>>,
}

impl Inner {
    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn transferred(&self) {
        let done = self.transfers.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = *self.disconnect_after.lock() {
            if done >= limit {
                *self.state.lock() = ConnectionState::Absent;
            }
        }
    }
}

/// A scripted remote device held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryBridge {
    inner: Arc<Inner>,
}

impl Default for MemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBridge {
    /// Creates an online device containing only `/`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(Tree::new()),
                state: Mutex::new(ConnectionState::Online),
                mutations: AtomicUsize::new(0),
                transfers: AtomicUsize::new(0),
                disconnect_after: Mutex::new(None),
                transfer_delay: Mutex::new(Duration::ZERO),
                commands: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.inner.state.lock() = state;
    }

    /// Makes every push and pull take at least `delay`.
    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.inner.transfer_delay.lock() = delay;
    }

    /// Drops the connection once `count` transfers have completed.
    pub fn disconnect_after_transfers(&self, count: usize) {
        *self.inner.disconnect_after.lock() = Some(count);
    }

    /// Creates a directory and any missing parents.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let _ = self.inner.tree.lock().mkdir_all(path.as_ref());
    }

    /// Creates a regular file, replacing whatever was at `path`.
    pub fn add_file(&self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) {
        self.add_node(path.as_ref(), NodeKind::File(data.as_ref().to_vec()), FILE_MODE);
    }

    /// Creates a symlink; relative targets resolve against its directory.
    pub fn add_symlink(&self, path: impl AsRef<Path>, target: impl AsRef<Path>) {
        self.add_node(
            path.as_ref(),
            NodeKind::Symlink(target.as_ref().to_path_buf()),
            LINK_MODE,
        );
    }

    pub fn add_pipe(&self, path: impl AsRef<Path>) {
        self.add_node(path.as_ref(), NodeKind::Pipe, FILE_MODE);
    }

    fn add_node(&self, path: &Path, kind: NodeKind, mode: u32) {
        let path = normalize(path);
        let mut tree = self.inner.tree.lock();
        let parent = path.parent().unwrap_or(Path::new("/"));
        if let Ok(real_parent) = tree.mkdir_all(parent) {
            tree.insert(real_parent.join(base_name(&path)), kind, mode);
        }
    }

    /// Returns the contents of the regular file at `path`, following links.
    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let tree = self.inner.tree.lock();
        match tree.resolved_node(path.as_ref()) {
            Some((_, Node { kind: NodeKind::File(data), .. })) => Some(data.clone()),
            _ => None,
        }
    }

    /// Returns whether anything (including a dangling link) is at `path`.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.inner.tree.lock().lstat(path.as_ref()).is_some()
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        self.inner.tree.lock().is_dir(path.as_ref())
    }

    pub fn mode_of(&self, path: impl AsRef<Path>) -> Option<u32> {
        let tree = self.inner.tree.lock();
        tree.resolved_node(path.as_ref()).map(|(_, n)| n.mode)
    }

    /// Returns the modification time recorded for `path`.
    pub fn modified(&self, path: impl AsRef<Path>) -> Option<SystemTime> {
        let tree = self.inner.tree.lock();
        tree.lstat(path.as_ref())
            .map(|(_, n)| UNIX_EPOCH + Duration::from_secs(n.mtime))
    }

    /// Number of state-changing commands and writes performed so far.
    pub fn mutation_count(&self) -> usize {
        self.inner.mutations.load(Ordering::SeqCst)
    }

    /// Every shell command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.inner.commands.lock().clone()
    }

    async fn delay(&self, cancel: &CancellationToken) -> CoreResult<()> {
        let delay = *self.inner.transfer_delay.lock();
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[async_trait]
impl Bridge for MemoryBridge {
    async fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    async fn stat(&self, path: &Path) -> CoreResult<DirEntry> {
        let tree = self.inner.tree.lock();
        let (_, node) = tree
            .lstat(path)
            .ok_or_else(|| CoreError::NotFound(path.to_path_buf()))?;
        Ok(node.to_entry(normalize(path)))
    }

    async fn list(&self, path: &Path) -> CoreResult<DirEntries> {
        let tree = self.inner.tree.lock();
        let (real, node) = tree
            .resolved_node(path)
            .ok_or_else(|| CoreError::NotFound(path.to_path_buf()))?;
        if !node.is_dir() {
            return Err(CoreError::NotADirectory(path.to_path_buf()));
        }
        let shown = normalize(path);
        let entries = tree
            .children(&real)
            .into_iter()
            .map(|(child, node)| node.to_entry(shown.join(base_name(&child))))
            .collect();
        Ok(DirEntries::from_vec(entries))
    }

    async fn open_read(&self, path: &Path) -> CoreResult<ByteReader> {
        let tree = self.inner.tree.lock();
        match tree.resolved_node(path) {
            Some((_, Node { kind: NodeKind::File(data), .. })) => {
                Ok(Box::new(io::Cursor::new(data.clone())))
            }
            Some(_) => Err(CoreError::Shell(format!(
                "cat: {}: not a regular file",
                path.display()
            ))),
            None => Err(CoreError::NotFound(path.to_path_buf())),
        }
    }

    async fn open_write(&self, path: &Path, mode: u32) -> CoreResult<ByteWriter> {
        let target = {
            let tree = self.inner.tree.lock();
            let path = normalize(path);
            let parent = path.parent().unwrap_or(Path::new("/"));
            match tree.resolved_node(parent) {
                Some((real, node)) if node.is_dir() => real.join(base_name(&path)),
                _ => return Err(CoreError::NotFound(parent.to_path_buf())),
            }
        };
        if self.is_dir(&target) {
            return Err(CoreError::Shell(format!(
                "cat: {}: Is a directory",
                path.display()
            )));
        }
        Ok(Box::new(MemoryWriter {
            inner: self.inner.clone(),
            path: target,
            mode,
            buf: Vec::new(),
            committed: false,
        }))
    }

    async fn shell(&self, cmd: &str, cancel: &CancellationToken) -> CoreResult<String> {
        self.inner.commands.lock().push(cmd.to_string());
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let words = shlex::split(cmd)
            .ok_or_else(|| CoreError::Shell(format!("sh: syntax error: {cmd}")))?;

        let mut tree = self.inner.tree.lock();
        let mut output = String::new();
        for stage in words.split(|w| w == "|") {
            let (out, mutated) = tree.run(stage, &output).map_err(CoreError::Shell)?;
            if mutated {
                self.inner.mutated();
            }
            output = out;
        }
        Ok(output)
    }

    async fn push(
        &self,
        local: &Path,
        remote: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| CoreError::from_io(e, local))?;
        self.delay(cancel).await?;

        let len = data.len() as u64;
        progress(len / 2);
        {
            let mut tree = self.inner.tree.lock();
            let remote = normalize(remote);
            let parent = remote.parent().unwrap_or(Path::new("/"));
            let real_parent = tree.mkdir_all(parent).map_err(CoreError::Shell)?;
            let target = real_parent.join(base_name(&remote));
            if tree.is_dir(&target) {
                return Err(CoreError::Shell(format!(
                    "remote {}: Is a directory",
                    remote.display()
                )));
            }
            tree.insert(target, NodeKind::File(data), FILE_MODE);
        }
        progress(len);
        self.inner.mutated();
        self.inner.transferred();
        Ok(())
    }

    async fn pull(
        &self,
        remote: &Path,
        local: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let data = self
            .read_file(remote)
            .ok_or_else(|| CoreError::NotFound(remote.to_path_buf()))?;
        self.delay(cancel).await?;

        let len = data.len() as u64;
        progress(len / 2);
        tokio::fs::write(local, data)
            .await
            .map_err(|e| CoreError::from_io(e, local))?;
        progress(len);
        self.inner.transferred();
        Ok(())
    }
}

/// Buffers written bytes and commits them to the tree on shutdown.
struct MemoryWriter {
    inner: Arc<Inner>,
    path: PathBuf,
    mode: u32,
    buf: Vec<u8>,
    committed: bool,
}

impl MemoryWriter {
    fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        let data = std::mem::take(&mut self.buf);
        self.inner
            .tree
            .lock()
            .insert(self.path.clone(), NodeKind::File(data), self.mode & 0o7777);
        self.inner.mutated();
    }
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().commit();
        Poll::Ready(Ok(()))
    }
}
