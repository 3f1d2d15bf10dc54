//! Plain-text rendering of panes, jobs and the activity log.

use std::fmt::Write as _;
use std::time::SystemTime;

use droidpane_core::event::Event;
use droidpane_core::fs::backend::Location;
use droidpane_core::log::LogEntry;
use droidpane_core::nav::pane::PaneView;
use droidpane_core::ops::job::{JobSnapshot, JobStatus};

/// Rows shown around the cursor before the listing is elided.
const WINDOW: usize = 20;

pub fn render_pane(view: &PaneView, focused: bool) -> String {
    let mut out = String::new();
    let focus = if focused { "*" } else { " " };
    let _ = write!(
        out,
        "{focus}[{}] {}  ({}",
        view.id,
        view.location,
        format_sort(view)
    );
    if view.show_hidden {
        out.push_str(", hidden shown");
    }
    if !view.filter.is_empty() {
        let _ = write!(out, ", filter {}", view.filter);
    }
    if !view.marked.is_empty() {
        let _ = write!(out, ", {} marked", view.marked.len());
    }
    out.push_str(")\n");

    if view.entries.is_empty() {
        out.push_str("    (empty)\n");
        return out;
    }

    let start = view.cursor.saturating_sub(WINDOW / 2);
    let end = (start + WINDOW).min(view.entries.len());
    if start > 0 {
        let _ = writeln!(out, "    ... {start} more");
    }
    for (index, entry) in view.entries.iter().enumerate().take(end).skip(start) {
        let cursor = if index == view.cursor { '>' } else { ' ' };
        let location = Location::new(view.location.backend, entry.path());
        let mark = if view.is_marked(&location) { '+' } else { ' ' };
        let suffix = if entry.is_dir() { "/" } else { "" };
        let size = if entry.is_dir() {
            String::new()
        } else {
            format_size(entry.size())
        };
        let age = entry.modified().map(format_time_ago).unwrap_or_default();
        let _ = writeln!(
            out,
            "  {cursor}{mark} {} {:>9} {:>8}  {}{suffix}",
            entry.permissions_string(),
            size,
            age,
            entry.name()
        );
    }
    if end < view.entries.len() {
        let _ = writeln!(out, "    ... {} more", view.entries.len() - end);
    }
    out
}

fn format_sort(view: &PaneView) -> String {
    format!("{:?} {:?}", view.sort, view.order).to_lowercase()
}

pub fn render_job(job: &JobSnapshot) -> String {
    let mut out = format!(
        "{} {} {} {}",
        job.id, job.kind, job.direction, job.source.path.display()
    );
    if let Some(dst) = &job.destination {
        let _ = write!(out, " -> {}", dst.path.display());
    }
    let _ = write!(out, " [{}]", job.status);

    let progress = &job.progress;
    if progress.totals_known() {
        let _ = write!(
            out,
            " {}/{} files, {}/{}",
            progress.done_files,
            progress.total_files,
            format_size(progress.done_bytes),
            format_size(progress.total_bytes)
        );
        if let Some(percent) = progress.percent() {
            let _ = write!(out, " ({percent}%)");
        }
    } else if progress.done_bytes > 0 {
        let _ = write!(out, " {}", format_size(progress.done_bytes));
    }
    if !job.message.is_empty() && job.message != job.status.to_string() {
        let _ = write!(out, ": {}", job.message);
    }
    out
}

/// One line describing `event`, or `None` for events that need no output.
pub fn render_event(event: &Event) -> Option<String> {
    match event {
        Event::JobQueued(job) => Some(format!("queued {}", render_job(job))),
        Event::JobProgress(job) if job.status == JobStatus::Running => Some(render_job(job)),
        Event::JobProgress(_) => None,
        Event::JobFinished(job) => Some(format!("done {}", render_job(job))),
        Event::PaneRefreshed(_) => None,
        Event::RefreshSkipped { pane, dir } => Some(format!(
            "{pane} pane was busy and still shows the old {dir}; run refresh"
        )),
    }
}

pub fn render_log_entry(entry: &LogEntry) -> String {
    let flag = if entry.is_error { "!" } else { " " };
    format!(
        "{flag} {:>8}  {}\n           {}",
        format_time_ago(entry.timestamp),
        entry.command,
        entry.output.trim_end()
    )
}

fn format_time_ago(time: SystemTime) -> String {
    let elapsed = match SystemTime::now().duration_since(time) {
        Ok(d) => d,
        Err(_) => return "just now".to_owned(),
    };

    let secs = elapsed.as_secs();
    if secs < 60 {
        return format!("{secs}s ago");
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{mins}m ago");
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    let days = hours / 24;
    format!("{days}d ago")
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use droidpane_core::fs::entry::{DirEntry, EntryKind};
    use droidpane_core::fs::BackendKind;
    use droidpane_core::nav::filter::{SortKey, SortOrder};
    use droidpane_core::nav::pane::PaneId;

    fn view(entries: Vec<DirEntry>) -> PaneView {
        PaneView {
            id: PaneId::Right,
            location: Location::remote("/sdcard"),
            entries,
            cursor: 1,
            marked: vec![Location::remote("/sdcard/b.jpg")],
            sort: SortKey::FileType,
            order: SortOrder::Asc,
            show_hidden: false,
            filter: "~jp".to_string(),
            can_go_back: false,
            can_go_forward: false,
        }
    }

    fn file(name: &str, size: u64) -> DirEntry {
        DirEntry::from_remote(
            PathBuf::from(format!("/sdcard/{name}")),
            name.to_string(),
            EntryKind::File,
            size,
            None,
            0o644,
        )
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn format_time_ago_buckets() {
        let now = SystemTime::now();
        assert_eq!(format_time_ago(now + Duration::from_secs(60)), "just now");
        assert_eq!(format_time_ago(now - Duration::from_secs(120)), "2m ago");
        assert_eq!(format_time_ago(now - Duration::from_secs(3 * 3600)), "3h ago");
        assert_eq!(format_time_ago(now - Duration::from_secs(2 * 86400)), "2d ago");
    }

    #[test]
    fn pane_shows_cursor_marks_and_header() {
        let text = render_pane(&view(vec![file("a.jpg", 10), file("b.jpg", 2048)]), true);
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("*[right] Remote:/sdcard  (filetype asc"));
        assert!(lines[0].contains("filter ~jp"));
        assert!(lines[0].contains("1 marked"));
        assert!(lines[1].starts_with("     -rw-r--r--"));
        assert!(lines[2].starts_with("  >+ -rw-r--r--"));
        assert!(lines[2].ends_with("b.jpg"));
        assert!(lines[2].contains("2.0 KB"));
    }

    #[test]
    fn empty_pane_says_so() {
        let text = render_pane(&view(Vec::new()), false);
        assert!(text.starts_with(" [right]"));
        assert!(text.contains("(empty)"));
    }

    #[test]
    fn long_listing_is_windowed() {
        let entries = (0..50).map(|i| file(&format!("f{i:02}"), 1)).collect();
        let mut v = view(entries);
        v.cursor = 30;
        let text = render_pane(&v, false);

        assert!(text.contains("... 20 more"));
        assert!(text.contains("f30"));
        assert!(!text.contains("f05"));
        assert_eq!(
            text.lines().filter(|l| l.contains("f")).count(),
            WINDOW + 1,
            "{text}"
        );
    }

    #[test]
    fn refresh_skipped_tells_user_to_retry() {
        let event = Event::RefreshSkipped {
            pane: PaneId::Left,
            dir: Location::new(BackendKind::Local, "/tmp"),
        };
        let line = render_event(&event).unwrap();
        assert!(line.starts_with("left pane was busy"));
        assert!(render_event(&Event::PaneRefreshed(PaneId::Left)).is_none());
    }
}
