//! Canonical on-disk locations for ordersync.
//!
//! Single source of truth - import this instead of hardcoding paths.

use std::path::{Path, PathBuf};

/// Directory holding the config file, relative to a project root
pub const CONFIG_DIR: &str = ".ordersync";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

/// Config file path for a project root (`<root>/.ordersync/config.yaml`)
pub fn config_file_in(root: &Path) -> PathBuf {
    root.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Per-user cache directory for ordersync state (`<cache dir>/ordersync`)
///
/// Falls back to the system temp directory when no cache dir is known.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ordersync")
}

/// Default run lock for a container (`<cache dir>/ordersync/<container>.lock`)
pub fn default_lock_file(container: &str) -> PathBuf {
    cache_dir().join(format!("{}.lock", container))
}
