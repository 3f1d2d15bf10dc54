//! Sorting and filtering for directory entries.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::fs::entry::DirEntry;

/// The field by which entries are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Alphabetical, case-insensitive.
    #[default]
    Name,
    /// By extension when both sides are files, by name otherwise.
    FileType,
    /// By last-modified time.
    Date,
}

impl SortKey {
    /// Cycles name → filetype → date → name.
    pub fn next(self) -> Self {
        match self {
            SortKey::Name => SortKey::FileType,
            SortKey::FileType => SortKey::Date,
            SortKey::Date => SortKey::Name,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Name => write!(f, "name"),
            SortKey::FileType => write!(f, "filetype"),
            SortKey::Date => write!(f, "date"),
        }
    }
}

impl FromStr for SortKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(SortKey::Name),
            "filetype" | "type" => Ok(SortKey::FileType),
            "date" | "time" => Ok(SortKey::Date),
            other => Err(CoreError::Parse(format!("unknown sort key {other:?}"))),
        }
    }
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn reversed(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(CoreError::Parse(format!("unknown sort order {other:?}"))),
        }
    }
}

/// Sorts entries with directories first, then by `key` in `order`.
///
/// The order only flips the comparison between entries of the same class,
/// so directories stay on top either way. The sort is stable, and sorting
/// an already sorted list returns it unchanged. Returns a **new** `Vec`.
pub fn sort_entries(entries: &[DirEntry], key: SortKey, order: SortOrder) -> Vec<DirEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| {
        let dir_cmp = b.is_dir().cmp(&a.is_dir());
        if dir_cmp != Ordering::Equal {
            return dir_cmp;
        }
        match order {
            SortOrder::Asc => compare_by_key(a, b, key),
            SortOrder::Desc => compare_by_key(b, a, key),
        }
    });
    sorted
}

fn compare_by_key(a: &DirEntry, b: &DirEntry, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => compare_names(a, b),
        SortKey::FileType if !a.is_dir() && !b.is_dir() => extension_lower(a)
            .cmp(&extension_lower(b))
            .then_with(|| compare_names(a, b)),
        SortKey::FileType => compare_names(a, b),
        SortKey::Date => a
            .modified()
            .cmp(&b.modified())
            .then_with(|| compare_names(a, b)),
    }
}

fn compare_names(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.name()
        .to_lowercase()
        .cmp(&b.name().to_lowercase())
        .then_with(|| a.name().cmp(b.name()))
}

fn extension_lower(entry: &DirEntry) -> String {
    entry.extension().map(str::to_lowercase).unwrap_or_default()
}

/// Filters out hidden entries when `show_hidden` is `false`.
pub fn filter_hidden(entries: &[DirEntry], show_hidden: bool) -> Vec<DirEntry> {
    if show_hidden {
        return entries.to_vec();
    }
    entries.iter().filter(|e| !e.is_hidden()).cloned().collect()
}

/// The name predicate applied to a pane's listing.
#[derive(Debug, Clone, Default)]
pub enum EntryFilter {
    #[default]
    None,
    /// Case-insensitive substring; stored lowercased.
    Substring(String),
    Regex(Regex),
    Fuzzy(String),
}

impl EntryFilter {
    /// An empty query means no filter.
    pub fn substring(query: &str) -> Self {
        if query.is_empty() {
            EntryFilter::None
        } else {
            EntryFilter::Substring(query.to_lowercase())
        }
    }

    /// Compiles `pattern`; an invalid pattern is a [`CoreError::Parse`].
    pub fn regex(pattern: &str) -> Result<Self, CoreError> {
        if pattern.is_empty() {
            return Ok(EntryFilter::None);
        }
        Regex::new(pattern)
            .map(EntryFilter::Regex)
            .map_err(|e| CoreError::Parse(format!("invalid pattern {pattern:?}: {e}")))
    }

    pub fn fuzzy(query: &str) -> Self {
        if query.is_empty() {
            EntryFilter::None
        } else {
            EntryFilter::Fuzzy(query.to_string())
        }
    }

    /// Parses a query typed by the user: `/pattern/` is a regex, `~query`
    /// is fuzzy, anything else is a substring. The inverse of `Display`.
    pub fn parse(query: &str) -> Result<Self, CoreError> {
        if let Some(pattern) = query
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            return Self::regex(pattern);
        }
        if let Some(fuzzy) = query.strip_prefix('~') {
            return Ok(Self::fuzzy(fuzzy));
        }
        Ok(Self::substring(query))
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, EntryFilter::None)
    }

    /// Returns the entries whose names satisfy the predicate, in input order.
    pub fn apply(&self, entries: &[DirEntry]) -> Vec<DirEntry> {
        match self {
            EntryFilter::None => entries.to_vec(),
            EntryFilter::Substring(query) => entries
                .iter()
                .filter(|e| e.name().to_lowercase().contains(query.as_str()))
                .cloned()
                .collect(),
            EntryFilter::Regex(re) => entries
                .iter()
                .filter(|e| re.is_match(e.name()))
                .cloned()
                .collect(),
            EntryFilter::Fuzzy(query) => {
                let matcher = SkimMatcherV2::default();
                entries
                    .iter()
                    .filter(|e| matcher.fuzzy_match(e.name(), query).is_some())
                    .cloned()
                    .collect()
            }
        }
    }
}

impl fmt::Display for EntryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryFilter::None => Ok(()),
            EntryFilter::Substring(q) => write!(f, "{q}"),
            EntryFilter::Regex(re) => write!(f, "/{}/", re.as_str()),
            EntryFilter::Fuzzy(q) => write!(f, "~{q}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, UNIX_EPOCH};

    use crate::fs::entry::EntryKind;

    fn entry(name: &str, kind: EntryKind, mtime: u64) -> DirEntry {
        DirEntry::from_remote(
            PathBuf::from("/d").join(name),
            name.to_string(),
            kind,
            10,
            Some(UNIX_EPOCH + Duration::from_secs(mtime)),
            0o644,
        )
    }

    fn sample() -> Vec<DirEntry> {
        vec![
            entry("banana.txt", EntryKind::File, 3),
            entry("Apple.rs", EntryKind::File, 1),
            entry("src", EntryKind::Dir, 5),
            entry("cherry.md", EntryKind::File, 2),
            entry("docs", EntryKind::Dir, 4),
            entry(".hidden", EntryKind::File, 6),
        ]
    }

    fn names(entries: &[DirEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn sort_by_name_ascending_dirs_first() {
        let sorted = sort_entries(&sample(), SortKey::Name, SortOrder::Asc);
        assert_eq!(
            names(&sorted),
            vec!["docs", "src", ".hidden", "Apple.rs", "banana.txt", "cherry.md"]
        );
    }

    #[test]
    fn sort_by_name_descending_keeps_dirs_first() {
        let sorted = sort_entries(&sample(), SortKey::Name, SortOrder::Desc);
        assert_eq!(
            names(&sorted),
            vec!["src", "docs", "cherry.md", "banana.txt", "Apple.rs", ".hidden"]
        );
    }

    #[test]
    fn sort_by_filetype() {
        let sorted = sort_entries(&sample(), SortKey::FileType, SortOrder::Asc);
        // ".hidden" has no extension and sorts first among files.
        assert_eq!(
            names(&sorted),
            vec!["docs", "src", ".hidden", "cherry.md", "Apple.rs", "banana.txt"]
        );
    }

    #[test]
    fn sort_by_date() {
        let sorted = sort_entries(&sample(), SortKey::Date, SortOrder::Asc);
        assert_eq!(
            names(&sorted),
            vec!["docs", "src", "Apple.rs", "cherry.md", "banana.txt", ".hidden"]
        );
        let sorted = sort_entries(&sample(), SortKey::Date, SortOrder::Desc);
        assert_eq!(names(&sorted)[..2], ["src", "docs"]);
    }

    #[test]
    fn sort_is_idempotent() {
        for key in [SortKey::Name, SortKey::FileType, SortKey::Date] {
            for order in [SortOrder::Asc, SortOrder::Desc] {
                let once = sort_entries(&sample(), key, order);
                let twice = sort_entries(&once, key, order);
                assert_eq!(once, twice, "{key} {order}");
            }
        }
    }

    #[test]
    fn sort_does_not_mutate_input() {
        let entries = sample();
        let _ = sort_entries(&entries, SortKey::Name, SortOrder::Asc);
        assert_eq!(entries[0].name(), "banana.txt");
    }

    #[test]
    fn hidden_filter() {
        assert_eq!(filter_hidden(&sample(), true).len(), 6);
        let visible = filter_hidden(&sample(), false);
        assert_eq!(visible.len(), 5);
        assert!(visible.iter().all(|e| !e.is_hidden()));
    }

    #[test]
    fn substring_is_case_insensitive() {
        let filter = EntryFilter::substring("APP");
        assert_eq!(names(&filter.apply(&sample())), vec!["Apple.rs"]);
        assert!(!EntryFilter::substring("").is_active());
    }

    #[test]
    fn regex_filter() {
        let filter = EntryFilter::regex(r"\.(rs|md)$").unwrap();
        assert_eq!(names(&filter.apply(&sample())), vec!["Apple.rs", "cherry.md"]);
        assert!(matches!(EntryFilter::regex("("), Err(CoreError::Parse(_))));
    }

    #[test]
    fn fuzzy_filter_keeps_input_order() {
        let filter = EntryFilter::fuzzy("bnn");
        assert_eq!(names(&filter.apply(&sample())), vec!["banana.txt"]);
        let filter = EntryFilter::fuzzy("s");
        let kept = filter.apply(&sample());
        assert!(kept.iter().any(|e| e.name() == "src"));
        assert!(kept.iter().any(|e| e.name() == "docs"));
    }

    #[test]
    fn parse_filter_queries() {
        assert!(matches!(EntryFilter::parse("").unwrap(), EntryFilter::None));
        assert!(matches!(EntryFilter::parse("/^a/").unwrap(), EntryFilter::Regex(_)));
        assert!(matches!(EntryFilter::parse("~bnn").unwrap(), EntryFilter::Fuzzy(_)));
        assert!(matches!(
            EntryFilter::parse("/tmp").unwrap(),
            EntryFilter::Substring(_)
        ));
        assert_eq!(EntryFilter::parse("/^a/").unwrap().to_string(), "/^a/");
        assert!(EntryFilter::parse("/(/").is_err());
    }

    #[test]
    fn parse_keys_and_orders() {
        assert_eq!("filetype".parse::<SortKey>().unwrap(), SortKey::FileType);
        assert_eq!("DATE".parse::<SortKey>().unwrap(), SortKey::Date);
        assert!("size".parse::<SortKey>().is_err());
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert_eq!(SortKey::Date.next(), SortKey::Name);
        assert_eq!(SortOrder::Asc.reversed(), SortOrder::Desc);
    }
}
