//! XDG directory helpers for config/data locations.

use std::path::PathBuf;

/// Base directory for persistent data (applied-state baseline, image mounts).
///
/// Uses `NODESYNC_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/nodesync` or
/// `~/.local/share/nodesync`.
pub(crate) fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NODESYNC_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("nodesync")
}

/// Applied-state baseline path (last-applied.json).
pub(crate) fn applied_state_path() -> PathBuf {
    data_dir().join("last-applied.json")
}

/// Base directory for configuration files.
///
/// Uses `NODESYNC_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/nodesync`
/// or `~/.config/nodesync`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NODESYNC_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("nodesync")
}
