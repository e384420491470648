// marksync platform paths for Linux
// Config: ~/.config/marksync
// Data:   ~/.local/share/marksync

use std::env;
use std::path::PathBuf;

fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
}

/// Uses `$XDG_CONFIG_HOME/marksync` if set, otherwise `~/.config/marksync`.
pub fn get_config_dir() -> PathBuf {
    match env::var("XDG_CONFIG_HOME") {
        Ok(xdg) => PathBuf::from(xdg).join("marksync"),
        Err(_) => home_dir().join(".config").join("marksync"),
    }
}

/// Uses `$XDG_DATA_HOME/marksync` if set, otherwise `~/.local/share/marksync`.
pub fn get_data_dir() -> PathBuf {
    match env::var("XDG_DATA_HOME") {
        Ok(xdg) => PathBuf::from(xdg).join("marksync"),
        Err(_) => home_dir().join(".local").join("share").join("marksync"),
    }
}
