//! Configuration management for droidpane.
//!
//! User preferences ([`settings::Config`]) are stored as a TOML file and
//! loaded at startup.

pub mod settings;

use std::ffi::OsString;
use std::path::PathBuf;

pub use settings::Config;

const CONFIG_FILE: &str = "config.toml";

/// Where the binary looks for its configuration file.
///
/// `$XDG_CONFIG_HOME/droidpane/config.toml`, falling back to
/// `$HOME/.config/droidpane/config.toml`.
pub fn default_config_path() -> PathBuf {
    config_path_from(
        std::env::var_os("XDG_CONFIG_HOME"),
        std::env::var_os("HOME"),
    )
}

fn config_path_from(xdg: Option<OsString>, home: Option<OsString>) -> PathBuf {
    let base = match xdg.filter(|dir| !dir.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => home
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"))
            .join(".config"),
    };
    base.join("droidpane").join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_config_home_wins() {
        let path = config_path_from(Some("/xdg".into()), Some("/home/u".into()));
        assert_eq!(path, PathBuf::from("/xdg/droidpane/config.toml"));
    }

    #[test]
    fn falls_back_to_home() {
        let path = config_path_from(None, Some("/home/u".into()));
        assert_eq!(path, PathBuf::from("/home/u/.config/droidpane/config.toml"));

        let empty_xdg = config_path_from(Some("".into()), Some("/home/u".into()));
        assert_eq!(empty_xdg, path);
    }

    #[test]
    fn no_home_uses_root() {
        let path = config_path_from(None, None);
        assert_eq!(path, PathBuf::from("/.config/droidpane/config.toml"));
    }
}
