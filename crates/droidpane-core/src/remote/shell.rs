//! Building and parsing remote shell command lines.

use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::fs::entry::DirEntry;

/// `stat -c` format producing `rawmode|size|mtime|name`.
pub const STAT_FORMAT: &str = "%f|%s|%Y|%n";

const SIZE_SUFFIXES: &str = "KMGTPE";

/// Wraps `arg` in single quotes, escaping embedded quotes as `'\''`.
pub fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// [`quote`] for paths.
pub fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// Parses one line of `stat -c '%f|%s|%Y|%n'` output.
///
/// The name is the last field and may itself contain `|`.
pub fn parse_stat_line(line: &str) -> CoreResult<DirEntry> {
    let mut fields = line.trim_end_matches(['\r', '\n']).splitn(4, '|');
    let (Some(raw), Some(size), Some(mtime), Some(name)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(CoreError::Parse(format!("unexpected stat output: {line:?}")));
    };

    let raw_mode = u32::from_str_radix(raw.trim(), 16)
        .map_err(|_| CoreError::Parse(format!("bad mode field {raw:?}")))?;
    let size = size
        .trim()
        .parse::<u64>()
        .map_err(|_| CoreError::Parse(format!("bad size field {size:?}")))?;
    let mtime = mtime
        .trim()
        .parse::<u64>()
        .map_err(|_| CoreError::Parse(format!("bad mtime field {mtime:?}")))?;

    Ok(DirEntry::from_raw_mode(PathBuf::from(name), raw_mode, size, mtime))
}

/// Parses the output of `… | wc -l`.
pub fn parse_count(output: &str) -> CoreResult<u64> {
    output
        .trim()
        .parse::<u64>()
        .map_err(|_| CoreError::Parse(format!("expected a count, got {:?}", output.trim())))
}

/// Parses the first field of `du -sh` output into bytes.
pub fn parse_du_output(output: &str) -> CoreResult<u64> {
    let field = output
        .split_whitespace()
        .next()
        .ok_or_else(|| CoreError::Parse("empty du output".to_string()))?;
    parse_size_suffix(field)
}

/// Converts a human-readable size such as `4.0K`, `12M` or `30` into bytes.
///
/// A trailing `K`, `M`, `G`, `T`, `P` or `E` (any case) multiplies by the
/// matching power of 1024; a bare number is already in bytes.
pub fn parse_size_suffix(text: &str) -> CoreResult<u64> {
    let text = text.trim();
    let bad = || CoreError::Parse(format!("bad size {text:?}"));

    let last = text.chars().last().ok_or_else(bad)?;
    let (number, exponent) = if last.is_ascii_alphabetic() {
        let index = SIZE_SUFFIXES
            .find(last.to_ascii_uppercase())
            .ok_or_else(bad)?;
        (&text[..text.len() - 1], index as i32 + 1)
    } else {
        (text, 0)
    };

    let value: f64 = number.parse().map_err(|_| bad())?;
    if !value.is_finite() || value < 0.0 {
        return Err(bad());
    }
    Ok((value * 1024f64.powi(exponent)).round() as u64)
}

/// Formats `bytes` the way `du -h` does: plain bytes below 1 KiB, one
/// decimal below 10 units, whole units above.
pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        return bytes.to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 'B';
    for suffix in SIZE_SUFFIXES.chars() {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = suffix;
    }
    if value < 10.0 {
        format!("{value:.1}{unit}")
    } else {
        format!("{value:.0}{unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::entry::EntryKind;

    #[test]
    fn quote_plain_and_embedded_quotes() {
        assert_eq!(quote("/sdcard/a b"), "'/sdcard/a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn quoted_args_split_back_losslessly() {
        let name = "we'ird $name `x`";
        let cmd = format!("mv {} {}", quote(name), quote("/dst"));
        let parts = shlex::split(&cmd).unwrap();
        assert_eq!(parts, vec!["mv", name, "/dst"]);
    }

    #[test]
    fn stat_line_parses_dir() {
        let entry = parse_stat_line("41f9|3452|1700000000|/sdcard/DCIM").unwrap();
        assert!(entry.is_dir());
        assert_eq!(entry.name(), "DCIM");
        assert_eq!(entry.mode(), 0o771);
    }

    #[test]
    fn stat_line_keeps_pipes_in_name() {
        let entry = parse_stat_line("81a4|12|0|/sdcard/a|b.txt\n").unwrap();
        assert_eq!(entry.kind(), EntryKind::File);
        assert_eq!(entry.size(), 12);
        assert_eq!(entry.name(), "a|b.txt");
    }

    #[test]
    fn stat_line_rejects_garbage() {
        assert!(matches!(
            parse_stat_line("stat: '/x': No such file"),
            Err(CoreError::Parse(_))
        ));
        assert!(parse_stat_line("zz|1|1|/a").is_err());
    }

    #[test]
    fn count_parsing() {
        assert_eq!(parse_count("2\n").unwrap(), 2);
        assert!(matches!(parse_count("two"), Err(CoreError::Parse(_))));
    }

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size_suffix("30").unwrap(), 30);
        assert_eq!(parse_size_suffix("1K").unwrap(), 1024);
        assert_eq!(parse_size_suffix("1.5k").unwrap(), 1536);
        assert_eq!(parse_size_suffix("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size_suffix("1G").unwrap(), 1 << 30);
        assert_eq!(parse_size_suffix("1E").unwrap(), 1 << 60);
    }

    #[test]
    fn size_suffix_errors() {
        assert!(parse_size_suffix("").is_err());
        assert!(parse_size_suffix("12X").is_err());
        assert!(parse_size_suffix("K").is_err());
        assert!(parse_size_suffix("-1").is_err());
    }

    #[test]
    fn du_output_uses_first_field() {
        assert_eq!(parse_du_output("4.0K\t/sdcard/src\n").unwrap(), 4096);
        assert_eq!(parse_du_output("30\t/sdcard/src").unwrap(), 30);
        assert!(parse_du_output("").is_err());
    }

    #[test]
    fn human_size_matches_du_style() {
        assert_eq!(human_size(30), "30");
        assert_eq!(human_size(1536), "1.5K");
        assert_eq!(human_size(20 * 1024 * 1024), "20M");
    }

    #[test]
    fn human_size_is_readable_by_parser() {
        for bytes in [0u64, 1023, 4096, 5 * 1024 * 1024] {
            let parsed = parse_size_suffix(&human_size(bytes)).unwrap();
            assert_eq!(parsed, bytes);
        }
    }
}
