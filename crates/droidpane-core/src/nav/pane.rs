//! Pane state and its single-slot lock.
//!
//! [`PaneState`] is an immutable value: every transition returns a new
//! state, following the same convention as [`History`]. [`Pane`] owns the
//! current state behind a lock that is only ever *tried*: a second
//! state-mutating action arriving while one is in flight fails immediately
//! with [`CoreError::Busy`] instead of queueing. Readers never take the
//! lock; they watch [`PaneView`] snapshots published after each change.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::fs::backend::{BackendKind, Backends, Location};
use crate::fs::entry::DirEntry;
use crate::nav::filter::{EntryFilter, SortKey, SortOrder};
use crate::nav::history::History;
use crate::nav::listing::DirectoryEnumerator;
use crate::nav::resolve_path;

/// Identifies one of the two panes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaneId {
    Left,
    Right,
}

impl PaneId {
    pub fn other(self) -> Self {
        match self {
            PaneId::Left => PaneId::Right,
            PaneId::Right => PaneId::Left,
        }
    }
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaneId::Left => write!(f, "left"),
            PaneId::Right => write!(f, "right"),
        }
    }
}

/// Start directory of each backend, used when a pane switches backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneHomes {
    pub local: PathBuf,
    pub remote: PathBuf,
}

impl PaneHomes {
    pub fn home(&self, kind: BackendKind) -> Location {
        match kind {
            BackendKind::Local => Location::new(kind, self.local.clone()),
            BackendKind::Remote => Location::new(kind, self.remote.clone()),
        }
    }
}

/// Read-only snapshot of a pane, published after every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct PaneView {
    pub id: PaneId,
    pub location: Location,
    /// The filtered view, in display order.
    pub entries: Vec<DirEntry>,
    pub cursor: usize,
    pub marked: Vec<Location>,
    pub sort: SortKey,
    pub order: SortOrder,
    pub show_hidden: bool,
    /// Display form of the active filter; empty when none.
    pub filter: String,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

impl PaneView {
    pub fn highlighted(&self) -> Option<&DirEntry> {
        self.entries.get(self.cursor)
    }

    pub fn is_marked(&self, location: &Location) -> bool {
        self.marked.contains(location)
    }
}

/// Navigation state of one pane.
///
/// Immutable: all transitions return a new `PaneState`. The cursor indexes
/// the filtered view and is always clamped to it.
#[derive(Debug, Clone)]
pub struct PaneState {
    location: Location,
    /// Sorted listing of the current directory, before predicates.
    raw: Vec<DirEntry>,
    view: Vec<DirEntry>,
    enumerator: DirectoryEnumerator,
    history: History,
    cursor: usize,
    marked: Vec<Location>,
}

impl PaneState {
    /// Creates a state at `location` with an empty listing.
    pub fn new(location: Location, enumerator: DirectoryEnumerator) -> Self {
        Self {
            location,
            raw: Vec::new(),
            view: Vec::new(),
            enumerator,
            history: History::new(),
            cursor: 0,
            marked: Vec::new(),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn backend(&self) -> BackendKind {
        self.location.backend
    }

    /// The filtered view.
    pub fn entries(&self) -> &[DirEntry] {
        &self.view
    }

    /// Every entry of the current directory, hidden ones included.
    pub fn all_entries(&self) -> &[DirEntry] {
        &self.raw
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn highlighted(&self) -> Option<&DirEntry> {
        self.view.get(self.cursor)
    }

    pub fn marked(&self) -> &[Location] {
        &self.marked
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn enumerator(&self) -> &DirectoryEnumerator {
        &self.enumerator
    }

    /// Replaces the listing and moves to `location`. The cursor resets to `0`.
    pub fn with_listing(self, location: Location, entries: Vec<DirEntry>) -> Self {
        let raw = self.enumerator.arrange(&entries);
        let view = self.enumerator.view(&raw);
        Self {
            location,
            raw,
            view,
            cursor: 0,
            ..self
        }
    }

    pub fn with_history(self, history: History) -> Self {
        Self { history, ..self }
    }

    /// Swaps the sort/filter configuration and re-derives the view,
    /// keeping the highlighted entry when it is still visible.
    pub fn with_enumerator(self, enumerator: DirectoryEnumerator) -> Self {
        let keep = self.highlighted().map(|e| e.name().to_string());
        let raw = enumerator.arrange(&self.raw);
        let view = enumerator.view(&raw);
        let state = Self {
            raw,
            view,
            enumerator,
            cursor: 0,
            ..self
        };
        match keep {
            Some(name) => state.focus_name(&name),
            None => state,
        }
    }

    /// Moves the cursor to `index`, clamped to the view.
    pub fn with_cursor(self, index: usize) -> Self {
        let cursor = index.min(self.view.len().saturating_sub(1));
        Self { cursor, ..self }
    }

    /// Moves the cursor by `delta`, stopping at either end.
    pub fn move_cursor(self, delta: isize) -> Self {
        let target = self.cursor.saturating_add_signed(delta);
        self.with_cursor(target)
    }

    pub fn go_to_first(self) -> Self {
        self.with_cursor(0)
    }

    pub fn go_to_last(self) -> Self {
        let last = self.view.len().saturating_sub(1);
        self.with_cursor(last)
    }

    /// Puts the cursor on the entry called `name`, if it is visible.
    pub fn focus_name(self, name: &str) -> Self {
        match self.view.iter().position(|e| e.name() == name) {
            Some(index) => self.with_cursor(index),
            None => self,
        }
    }

    /// Marks or unmarks the highlighted entry.
    pub fn toggle_mark(self) -> Self {
        let Some(entry) = self.highlighted() else {
            return self;
        };
        let location = Location::new(self.backend(), entry.path());
        let mut marked = self.marked.clone();
        match marked.iter().position(|m| *m == location) {
            Some(index) => {
                marked.remove(index);
            }
            None => marked.push(location),
        }
        Self { marked, ..self }
    }

    /// Marks every visible entry of the current directory.
    pub fn mark_all(self) -> Self {
        let mut marked = self.marked.clone();
        for entry in &self.view {
            let location = Location::new(self.backend(), entry.path());
            if !marked.contains(&location) {
                marked.push(location);
            }
        }
        Self { marked, ..self }
    }

    /// Flips the mark of every visible entry of the current directory.
    pub fn invert_marks(self) -> Self {
        let here: Vec<Location> = self
            .view
            .iter()
            .map(|e| Location::new(self.backend(), e.path()))
            .collect();
        let mut marked: Vec<Location> = self
            .marked
            .iter()
            .filter(|m| !here.contains(m))
            .cloned()
            .collect();
        marked.extend(here.into_iter().filter(|l| !self.marked.contains(l)));
        Self { marked, ..self }
    }

    pub fn clear_marks(self) -> Self {
        Self {
            marked: Vec::new(),
            ..self
        }
    }

    /// Builds the published snapshot.
    pub fn snapshot(&self, id: PaneId) -> PaneView {
        PaneView {
            id,
            location: self.location.clone(),
            entries: self.view.clone(),
            cursor: self.cursor,
            marked: self.marked.clone(),
            sort: self.enumerator.sort(),
            order: self.enumerator.order(),
            show_hidden: self.enumerator.show_hidden(),
            filter: self.enumerator.filter().to_string(),
            can_go_back: self.history.can_go_back(),
            can_go_forward: self.history.can_go_forward(),
        }
    }
}

/// One of the two browser panes.
pub struct Pane {
    id: PaneId,
    backends: Backends,
    homes: PaneHomes,
    state: Mutex<PaneState>,
    view_tx: watch::Sender<PaneView>,
}

impl fmt::Debug for Pane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pane")
            .field("id", &self.id)
            .field("location", &self.view_tx.borrow().location)
            .finish_non_exhaustive()
    }
}

impl Pane {
    /// Creates a pane positioned at `start` with an empty listing; call
    /// [`Pane::refresh`] to load it.
    pub fn new(
        id: PaneId,
        backends: Backends,
        homes: PaneHomes,
        start: Location,
        enumerator: DirectoryEnumerator,
    ) -> Self {
        let state = PaneState::new(start, enumerator);
        let (view_tx, _) = watch::channel(state.snapshot(id));
        Self {
            id,
            backends,
            homes,
            state: Mutex::new(state),
            view_tx,
        }
    }

    pub fn id(&self) -> PaneId {
        self.id
    }

    /// Returns the latest published snapshot.
    pub fn view(&self) -> PaneView {
        self.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaneView> {
        self.view_tx.subscribe()
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, PaneState>> {
        self.state.try_lock().map_err(|_| {
            tracing::debug!(pane = %self.id, "pane busy");
            CoreError::Busy
        })
    }

    fn commit(&self, guard: &mut MutexGuard<'_, PaneState>, next: PaneState) {
        **guard = next;
        self.view_tx.send_replace(guard.snapshot(self.id));
    }

    async fn list(&self, state: &PaneState, target: &Location) -> CoreResult<Vec<DirEntry>> {
        let backend = self.backends.get(target.backend);
        state
            .enumerator()
            .list_raw(backend.as_ref(), &target.path)
            .await
    }

    /// Lists `target` and moves there under the held lock, recording the
    /// location left in history and putting the cursor on `focus` if given.
    async fn go_to_locked(
        &self,
        state: &mut MutexGuard<'_, PaneState>,
        target: Location,
        focus: Option<&str>,
    ) -> CoreResult<()> {
        let entries = self.list(&**state, &target).await?;
        let mut next = (**state).clone();
        if target != *state.location() {
            next = next.with_history(state.history().push(state.location().clone()));
        }
        let mut next = next.with_listing(target, entries);
        if let Some(name) = focus {
            next = next.focus_name(name);
        }
        self.commit(state, next);
        Ok(())
    }

    async fn go_to(&self, target: Location) -> CoreResult<()> {
        let mut state = self.lock()?;
        self.go_to_locked(&mut state, target, None).await
    }

    /// Changes to `input`, absolute or relative to the current directory.
    pub async fn change_dir(&self, input: &str) -> CoreResult<()> {
        let mut state = self.lock()?;
        let current = state.location();
        let target = Location::new(current.backend, resolve_path(&current.path, input));
        tracing::debug!(pane = %self.id, %target, "change directory");
        self.go_to_locked(&mut state, target, None).await
    }

    /// Opens `location`, switching backend if needed.
    pub async fn open(&self, location: Location) -> CoreResult<()> {
        self.go_to(location).await
    }

    /// Enters the highlighted entry if it is a directory or a symlink to one.
    pub async fn enter(&self) -> CoreResult<()> {
        let view = self.view();
        let Some(entry) = view.highlighted() else {
            return Ok(());
        };
        let is_dir = if entry.is_symlink() {
            self.backends
                .get(view.location.backend)
                .is_symlink_to_dir(
                    &view.location.path,
                    entry.name(),
                    &CancellationToken::new(),
                )
                .await
        } else {
            entry.is_dir()
        };
        if !is_dir {
            return Err(CoreError::NotADirectory(entry.path().to_path_buf()));
        }
        self.open(Location::new(view.location.backend, entry.path()))
            .await
    }

    /// Moves to the parent directory with the cursor on the directory just left.
    pub async fn go_up(&self) -> CoreResult<()> {
        let mut state = self.lock()?;
        let current = state.location().clone();
        let Some(left) = current.path.file_name() else {
            return Ok(());
        };
        let left = left.to_string_lossy().into_owned();
        self.go_to_locked(&mut state, current.parent(), Some(&left))
            .await
    }

    /// Re-lists the current directory, keeping the cursor on the same name.
    pub async fn refresh(&self) -> CoreResult<()> {
        let mut state = self.lock()?;
        let location = state.location().clone();
        let entries = self.list(&state, &location).await?;
        let keep = state.highlighted().map(|e| e.name().to_string());
        let mut next = state.clone().with_listing(location, entries);
        if let Some(name) = keep {
            next = next.focus_name(&name);
        }
        self.commit(&mut state, next);
        Ok(())
    }

    pub async fn go_back(&self) -> CoreResult<()> {
        let mut state = self.lock()?;
        let Some((history, target)) = state.history().go_back(state.location().clone()) else {
            return Ok(());
        };
        let entries = self.list(&state, &target).await?;
        let next = state
            .clone()
            .with_history(history)
            .with_listing(target, entries);
        self.commit(&mut state, next);
        Ok(())
    }

    pub async fn go_forward(&self) -> CoreResult<()> {
        let mut state = self.lock()?;
        let Some((history, target)) = state.history().go_forward(state.location().clone()) else {
            return Ok(());
        };
        let entries = self.list(&state, &target).await?;
        let next = state
            .clone()
            .with_history(history)
            .with_listing(target, entries);
        self.commit(&mut state, next);
        Ok(())
    }

    /// Switches between Local and Remote, landing in the other backend's home.
    pub async fn switch_backend(&self) -> CoreResult<()> {
        let other = self.view().location.backend.other();
        self.open(self.homes.home(other)).await
    }

    fn update(&self, change: impl FnOnce(PaneState) -> PaneState) -> CoreResult<()> {
        let mut state = self.lock()?;
        let next = change(state.clone());
        self.commit(&mut state, next);
        Ok(())
    }

    pub fn toggle_hidden(&self) -> CoreResult<()> {
        self.update(|s| {
            let enumerator = s.enumerator().clone();
            let show = !enumerator.show_hidden();
            s.with_enumerator(enumerator.with_hidden(show))
        })
    }

    pub fn set_sort(&self, sort: SortKey, order: SortOrder) -> CoreResult<()> {
        self.update(|s| {
            let current = s.enumerator().clone();
            let enumerator = DirectoryEnumerator::new(sort, order)
                .with_hidden(current.show_hidden())
                .with_filter(current.filter().clone());
            s.with_enumerator(enumerator)
        })
    }

    pub fn set_filter(&self, filter: EntryFilter) -> CoreResult<()> {
        self.update(|s| {
            let enumerator = s.enumerator().clone().with_filter(filter);
            s.with_enumerator(enumerator)
        })
    }

    pub fn move_cursor(&self, delta: isize) -> CoreResult<()> {
        self.update(|s| s.move_cursor(delta))
    }

    pub fn set_cursor(&self, index: usize) -> CoreResult<()> {
        self.update(|s| s.with_cursor(index))
    }

    pub fn go_to_first(&self) -> CoreResult<()> {
        self.update(PaneState::go_to_first)
    }

    pub fn go_to_last(&self) -> CoreResult<()> {
        self.update(PaneState::go_to_last)
    }

    pub fn toggle_mark(&self) -> CoreResult<()> {
        self.update(PaneState::toggle_mark)
    }

    pub fn mark_all(&self) -> CoreResult<()> {
        self.update(PaneState::mark_all)
    }

    pub fn invert_marks(&self) -> CoreResult<()> {
        self.update(PaneState::invert_marks)
    }

    pub fn clear_marks(&self) -> CoreResult<()> {
        self.update(PaneState::clear_marks)
    }

    /// Marks an arbitrary location, listed or not.
    #[cfg(test)]
    pub(crate) fn mark_location(&self, location: Location) -> CoreResult<()> {
        self.update(|s| {
            let mut marked = s.marked.clone();
            marked.push(location);
            PaneState { marked, ..s }
        })
    }

    /// Re-lists the pane if it is showing `dir`.
    ///
    /// The listing runs without holding the lock; the result is installed
    /// only if the lock is free and the pane has not moved meanwhile.
    /// Returns `Ok(false)` when the pane shows something else and
    /// [`CoreError::Busy`] when it is locked.
    pub async fn refresh_if_showing(&self, dir: &Location) -> CoreResult<bool> {
        let (location, enumerator) = {
            let state = self.lock()?;
            (state.location().clone(), state.enumerator().clone())
        };
        if location != *dir {
            return Ok(false);
        }

        let backend = self.backends.get(location.backend);
        let entries = enumerator.list_raw(backend.as_ref(), &location.path).await?;

        let mut state = self.lock()?;
        if *state.location() != location {
            return Ok(false);
        }
        let keep = state.highlighted().map(|e| e.name().to_string());
        let mut next = state.clone().with_listing(location, entries);
        if let Some(name) = keep {
            next = next.focus_name(&name);
        }
        self.commit(&mut state, next);
        Ok(true)
    }
}
