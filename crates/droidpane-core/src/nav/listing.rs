//! Directory enumeration shared by panes and the transfer walker.

use std::path::Path;

use crate::error::CoreResult;
use crate::fs::backend::Backend;
use crate::fs::entry::DirEntry;
use crate::nav::filter::{filter_hidden, sort_entries, EntryFilter, SortKey, SortOrder};

/// Lists a directory on any backend and orders it for display or walking.
#[derive(Debug, Clone, Default)]
pub struct DirectoryEnumerator {
    sort: SortKey,
    order: SortOrder,
    show_hidden: bool,
    filter: EntryFilter,
}

impl DirectoryEnumerator {
    pub fn new(sort: SortKey, order: SortOrder) -> Self {
        Self {
            sort,
            order,
            ..Self::default()
        }
    }

    /// Enumerator used by the walker: every entry, no filter.
    pub fn for_walk(sort: SortKey, order: SortOrder) -> Self {
        Self::new(sort, order).with_hidden(true)
    }

    pub fn with_hidden(mut self, show_hidden: bool) -> Self {
        self.show_hidden = show_hidden;
        self
    }

    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(&self) -> SortKey {
        self.sort
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    pub fn filter(&self) -> &EntryFilter {
        &self.filter
    }

    /// Lists `path` sorted, without applying the hidden or name predicates.
    pub async fn list_raw(&self, backend: &dyn Backend, path: &Path) -> CoreResult<Vec<DirEntry>> {
        let entries = backend.list_dir(path).await?.collect().await?;
        Ok(self.arrange(&entries))
    }

    /// Lists `path` with sorting and both predicates applied.
    pub async fn list(&self, backend: &dyn Backend, path: &Path) -> CoreResult<Vec<DirEntry>> {
        let raw = self.list_raw(backend, path).await?;
        Ok(self.view(&raw))
    }

    /// Sorts `entries` with this enumerator's key and order.
    pub fn arrange(&self, entries: &[DirEntry]) -> Vec<DirEntry> {
        sort_entries(entries, self.sort, self.order)
    }

    /// Applies the hidden-file and name predicates to sorted entries.
    pub fn view(&self, sorted: &[DirEntry]) -> Vec<DirEntry> {
        self.filter.apply(&filter_hidden(sorted, self.show_hidden))
    }
}
