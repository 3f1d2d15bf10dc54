use anyhow::{anyhow, bail, Context};
use droidpane_core::event::Command;
use droidpane_core::fs::BackendKind;
use droidpane_core::nav::filter::{SortKey, SortOrder};

/// Actions that can result from one line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum InputAction {
    /// Dispatch a core Command.
    Command(Command),
    /// Cancel the job with this number, or every job.
    Cancel(Option<u64>),
    /// Remove a finished job from the table.
    Dismiss(u64),
    /// Print both panes.
    Show,
    /// Print the job table.
    Jobs,
    /// Print the activity log.
    Log,
    Help,
    /// Quit the application.
    Quit,
    /// Blank line.
    Nothing,
}

pub const HELP: &str = "\
navigation: cd PATH | enter | up | back | fwd | refresh | switch | tab
cursor:     j [N] | k [N] | top | bottom
view:       ls | hidden | sort name|filetype|date [asc|desc] | filter [/re/|~fuzzy|text]
marks:      mark | markall | invert | unmark
jobs:       cp | mv | rm | rename NAME | mkdir NAME | jobs | cancel [N] | dismiss N
shell:      exec [-r] [-b] CMD | !CMD   (-r on the device, -b in the background)
other:      log [clear] | help | quit";

/// Parses one input line. Arguments are split shell-style, so names with
/// spaces can be quoted.
pub fn parse_line(line: &str) -> anyhow::Result<InputAction> {
    if let Some(action) = parse_exec(line)? {
        return Ok(action);
    }
    let words = shlex::split(line).ok_or_else(|| anyhow!("unbalanced quotes"))?;
    let Some((verb, args)) = words.split_first() else {
        return Ok(InputAction::Nothing);
    };

    let command = match verb.as_str() {
        "q" | "quit" | "exit" => return Ok(InputAction::Quit),
        "?" | "help" => return Ok(InputAction::Help),
        "ls" | "show" => return Ok(InputAction::Show),
        "jobs" => return Ok(InputAction::Jobs),
        "log" => {
            return match args {
                [] => Ok(InputAction::Log),
                [sub] if sub == "clear" => Ok(InputAction::Command(Command::ClearLog)),
                _ => bail!("usage: log [clear]"),
            }
        }
        "cancel" => {
            let id = args.first().map(|n| parse_job_number(n)).transpose()?;
            return Ok(InputAction::Cancel(id));
        }
        "dismiss" => {
            let id = args.first().context("dismiss needs a job number")?;
            return Ok(InputAction::Dismiss(parse_job_number(id)?));
        }
        "cd" => Command::ChangeDir(one_arg(verb, args)?),
        "enter" | "o" => Command::Enter,
        "up" | ".." => Command::GoUp,
        "back" => Command::GoBack,
        "fwd" | "forward" => Command::GoForward,
        "refresh" | "r" => Command::Refresh,
        "switch" => Command::SwitchBackend,
        "tab" => Command::FocusOther,
        "hidden" => Command::ToggleHidden,
        "sort" => parse_sort(args)?,
        "filter" => Command::Filter(args.join(" ")),
        "j" => Command::MoveCursor(count(args)?),
        "k" => Command::MoveCursor(-count(args)?),
        "top" => Command::CursorTop,
        "bottom" => Command::CursorBottom,
        "mark" | "m" => Command::ToggleMark,
        "markall" => Command::MarkAll,
        "invert" => Command::InvertMarks,
        "unmark" => Command::ClearMarks,
        "cp" | "copy" => Command::Copy,
        "mv" | "move" => Command::Move,
        "rm" | "delete" => Command::Delete,
        "rename" => Command::Rename(one_arg(verb, args)?),
        "mkdir" => Command::Mkdir(one_arg(verb, args)?),
        other => bail!("unknown command {other:?}; try help"),
    };
    Ok(InputAction::Command(command))
}

/// Parses `exec [-r] [-b] CMD` and `!CMD`. The command text is passed on
/// verbatim so pipes and quoting reach the shell untouched.
fn parse_exec(line: &str) -> anyhow::Result<Option<InputAction>> {
    let line = line.trim_start();
    let mut rest = match line.strip_prefix('!') {
        Some(rest) => rest,
        None => {
            let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            if verb != "exec" {
                return Ok(None);
            }
            rest
        }
    };

    let mut backend = BackendKind::Local;
    let mut background = false;
    loop {
        rest = rest.trim_start();
        let (word, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        match word {
            "-r" | "--remote" => backend = BackendKind::Remote,
            "-b" | "--bg" => background = true,
            _ => break,
        }
        rest = tail;
    }

    let cmd = rest.trim();
    if cmd.is_empty() {
        bail!("exec needs a command");
    }
    Ok(Some(InputAction::Command(Command::Exec {
        backend,
        cmd: cmd.to_string(),
        background,
    })))
}

fn one_arg(verb: &str, args: &[String]) -> anyhow::Result<String> {
    match args {
        [arg] => Ok(arg.clone()),
        [] => bail!("{verb} needs an argument"),
        _ => bail!("{verb} takes one argument; quote names with spaces"),
    }
}

fn count(args: &[String]) -> anyhow::Result<isize> {
    match args.first() {
        Some(n) => n.parse().with_context(|| format!("not a count: {n}")),
        None => Ok(1),
    }
}

fn parse_job_number(text: &str) -> anyhow::Result<u64> {
    text.trim_start_matches('#')
        .parse()
        .with_context(|| format!("not a job number: {text}"))
}

fn parse_sort(args: &[String]) -> anyhow::Result<Command> {
    let key = match args.first().map(String::as_str) {
        Some("name") => SortKey::Name,
        Some("filetype" | "type") => SortKey::FileType,
        Some("date") => SortKey::Date,
        Some(other) => bail!("unknown sort key {other:?}"),
        None => bail!("sort needs a key: name, filetype or date"),
    };
    let order = match args.get(1).map(String::as_str) {
        None | Some("asc") => SortOrder::Asc,
        Some("desc") => SortOrder::Desc,
        Some(other) => bail!("unknown sort order {other:?}"),
    };
    Ok(Command::SetSort(key, order))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Command {
        match parse_line(line).unwrap() {
            InputAction::Command(command) => command,
            other => panic!("{line:?} gave {other:?}"),
        }
    }

    #[test]
    fn blank_line_does_nothing() {
        assert_eq!(parse_line("   ").unwrap(), InputAction::Nothing);
    }

    #[test]
    fn navigation_commands() {
        assert_eq!(command("cd /sdcard/DCIM"), Command::ChangeDir("/sdcard/DCIM".into()));
        assert_eq!(command("up"), Command::GoUp);
        assert_eq!(command(".."), Command::GoUp);
        assert_eq!(command("back"), Command::GoBack);
        assert_eq!(command("switch"), Command::SwitchBackend);
        assert_eq!(command("tab"), Command::FocusOther);
    }

    #[test]
    fn quoted_names_keep_spaces() {
        assert_eq!(
            command("rename 'holiday photos'"),
            Command::Rename("holiday photos".into())
        );
        assert_eq!(command("mkdir \"new dir\""), Command::Mkdir("new dir".into()));
    }

    #[test]
    fn missing_or_extra_arguments_are_errors() {
        assert!(parse_line("cd").is_err());
        assert!(parse_line("rename a b").is_err());
        assert!(parse_line("dismiss").is_err());
        assert!(parse_line("rename 'open").is_err());
    }

    #[test]
    fn cursor_counts() {
        assert_eq!(command("j"), Command::MoveCursor(1));
        assert_eq!(command("j 5"), Command::MoveCursor(5));
        assert_eq!(command("k 3"), Command::MoveCursor(-3));
        assert!(parse_line("j lots").is_err());
    }

    #[test]
    fn sort_keys_and_orders() {
        assert_eq!(
            command("sort date desc"),
            Command::SetSort(SortKey::Date, SortOrder::Desc)
        );
        assert_eq!(
            command("sort type"),
            Command::SetSort(SortKey::FileType, SortOrder::Asc)
        );
        assert!(parse_line("sort size").is_err());
        assert!(parse_line("sort name up").is_err());
    }

    #[test]
    fn filter_keeps_query_syntax() {
        assert_eq!(command("filter /^IMG_/"), Command::Filter("/^IMG_/".into()));
        assert_eq!(command("filter ~cam"), Command::Filter("~cam".into()));
        assert_eq!(command("filter"), Command::Filter(String::new()));
    }

    #[test]
    fn job_commands() {
        assert_eq!(parse_line("cancel").unwrap(), InputAction::Cancel(None));
        assert_eq!(parse_line("cancel 3").unwrap(), InputAction::Cancel(Some(3)));
        assert_eq!(parse_line("cancel #4").unwrap(), InputAction::Cancel(Some(4)));
        assert_eq!(parse_line("dismiss 2").unwrap(), InputAction::Dismiss(2));
        assert_eq!(command("cp"), Command::Copy);
        assert_eq!(command("rm"), Command::Delete);
    }

    #[test]
    fn exec_keeps_the_command_verbatim() {
        assert_eq!(
            command("exec ls -l | grep 'a b'"),
            Command::Exec {
                backend: BackendKind::Local,
                cmd: "ls -l | grep 'a b'".into(),
                background: false,
            }
        );
        assert_eq!(
            command("exec -r -b  du -sh /sdcard"),
            Command::Exec {
                backend: BackendKind::Remote,
                cmd: "du -sh /sdcard".into(),
                background: true,
            }
        );
        assert_eq!(
            command("!df -h"),
            Command::Exec {
                backend: BackendKind::Local,
                cmd: "df -h".into(),
                background: false,
            }
        );
        assert!(parse_line("exec").is_err());
        assert!(parse_line("exec -r").is_err());
        assert!(parse_line("executor").is_err());
    }

    #[test]
    fn log_and_log_clear() {
        assert_eq!(parse_line("log").unwrap(), InputAction::Log);
        assert_eq!(command("log clear"), Command::ClearLog);
        assert!(parse_line("log wipe").is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let err = parse_line("frobnicate").unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
    }
}
