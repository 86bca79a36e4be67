//! Path utilities for the `.rove` workspace directory.

use std::path::{Path, PathBuf};

/// Environment variable name for the workspace path.
/// When set, all cache, debug and visual files live under it.
pub const ROVE_WORKSPACE_PATH_ENV: &str = "ROVE_WORKSPACE_PATH";

/// Root the relative paths below resolve against.
pub fn get_workspace_dir() -> PathBuf {
    if let Ok(workspace_path) = std::env::var(ROVE_WORKSPACE_PATH_ENV) {
        PathBuf::from(workspace_path)
    } else {
        std::env::current_dir().unwrap_or_default()
    }
}

/// Get the base .rove directory path.
pub fn get_rove_dir() -> PathBuf {
    get_workspace_dir().join(".rove")
}

/// Debug artifacts: `.rove/debug/`
pub fn get_debug_dir() -> PathBuf {
    get_rove_dir().join("debug")
}

/// Screenshots and descriptions: `.rove/visual/`
pub fn get_visual_dir() -> PathBuf {
    get_rove_dir().join("visual")
}

/// Expand `~` and anchor relative paths at the workspace directory.
pub fn resolve_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path).to_string();
    let path = Path::new(&expanded);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        get_workspace_dir().join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_workspace_env_redirects_rove_dir() {
        std::env::set_var(ROVE_WORKSPACE_PATH_ENV, "/tmp/rove-ws");
        assert_eq!(get_rove_dir(), PathBuf::from("/tmp/rove-ws/.rove"));
        assert_eq!(get_debug_dir(), PathBuf::from("/tmp/rove-ws/.rove/debug"));
        assert_eq!(
            resolve_path(".rove/cache"),
            PathBuf::from("/tmp/rove-ws/.rove/cache")
        );
        assert_eq!(resolve_path("/var/cache/rove"), PathBuf::from("/var/cache/rove"));
        std::env::remove_var(ROVE_WORKSPACE_PATH_ENV);
    }

    #[test]
    #[serial]
    fn test_tilde_is_expanded() {
        std::env::remove_var(ROVE_WORKSPACE_PATH_ENV);
        let resolved = resolve_path("~/rove-cache");
        assert!(!resolved.to_string_lossy().contains('~'));
        assert!(resolved.ends_with("rove-cache"));
    }
}
