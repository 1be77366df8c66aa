//! Configuration for ordersync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (ORDERSYNC_*)
//! 2. Config file (.ordersync/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - `--config <path>` wins if given
//! - Otherwise searches current directory and parents for .ordersync/config.yaml
//! - Paths in config file are relative to the directory containing .ordersync/

pub mod paths;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::shopify::{DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS};
use crate::adapters::{AzureConfig, ShopifyConfig};
use crate::core::DEFAULT_INTERVAL_SECS;
use crate::domain::SyncTarget;

const ENV_PREFIX: &str = "ORDERSYNC_";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub shop: ShopSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSection {
    pub backend: Option<StorageBackend>,
    /// Azure storage account name
    pub account: Option<String>,
    /// Azure account key (base64)
    pub key: Option<String>,
    /// Blob endpoint override (emulators, sovereign clouds)
    pub endpoint: Option<String>,
    /// Root directory for the local backend (relative to config file)
    pub root: Option<String>,
    pub container: Option<String>,
    pub watermark_blob: Option<String>,
    pub orders_blob: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopSection {
    /// `<alias>.myshopify.com`
    pub alias: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Overrides the URL derived from `alias`
    pub base_url: Option<String>,
    pub page_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleSection {
    pub interval_seconds: Option<u64>,
    /// Lock file path (relative to config file)
    pub lock_file: Option<String>,
}

/// Where the watermark and order log live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Azure,
    Local,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            "local" => Ok(Self::Local),
            other => bail!("Unknown storage backend '{}' (expected 'azure' or 'local')", other),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Azure => f.write_str("azure"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// Resolved storage settings
#[derive(Debug, Clone)]
pub enum StorageSettings {
    Azure(AzureConfig),
    Local { root: PathBuf },
}

impl StorageSettings {
    pub fn backend(&self) -> StorageBackend {
        match self {
            Self::Azure(_) => StorageBackend::Azure,
            Self::Local { .. } => StorageBackend::Local,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub interval: Duration,
    pub lock_file: PathBuf,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub storage: StorageSettings,
    pub shop: ShopifyConfig,
    pub target: SyncTarget,
    pub schedule: ScheduleSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Human-readable summary with secrets redacted
    pub fn redacted_summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "config file:     {}",
            self.config_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        ));
        lines.push(format!("storage backend: {}", self.storage.backend()));
        match &self.storage {
            StorageSettings::Azure(azure) => {
                lines.push(format!("  account:       {}", azure.account));
                lines.push("  key:           <redacted>".to_string());
                if let Some(endpoint) = &azure.endpoint {
                    lines.push(format!("  endpoint:      {}", endpoint));
                }
            }
            StorageSettings::Local { root } => {
                lines.push(format!("  root:          {}", root.display()));
            }
        }
        lines.push(format!("  container:     {}", self.target.container));
        lines.push(format!("  watermark:     {}", self.target.watermark_blob));
        lines.push(format!("  orders log:    {}", self.target.orders_blob));
        lines.push(format!("shop:            {}", self.shop.base_url));
        lines.push(format!("  username:      {}", self.shop.username));
        lines.push("  password:      <redacted>".to_string());
        lines.push(format!("  page size:     {}", self.shop.page_size));
        lines.push(format!("  timeout:       {}s", self.shop.timeout_secs));
        lines.push(format!("schedule:        every {}s", self.schedule.interval.as_secs()));
        lines.push(format!("  lock file:     {}", self.schedule.lock_file.display()));
        lines.join("\n")
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = paths::config_file_in(&current);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Project root for a config file: the parent of `.ordersync/`
fn base_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Environment overlay, keyed without the `ORDERSYNC_` prefix
struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, key)).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid {}{}='{}': {}", ENV_PREFIX, key, raw, e)),
            None => Ok(None),
        }
    }
}

fn required(value: Option<String>, name: &str, env_key: &str) -> Result<String> {
    value.with_context(|| {
        format!(
            "Missing required setting {} (set it in the config file or {}{})",
            name, ENV_PREFIX, env_key
        )
    })
}

/// Merge a parsed config file with the environment overlay
fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let env = Env { lookup };
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), config),
        None => (None, ConfigFile::default()),
    };
    let base = config_file
        .as_deref()
        .map(base_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let storage_cfg = config.storage;
    let shop_cfg = config.shop;
    let schedule_cfg = config.schedule;

    // Target
    let target = SyncTarget {
        container: env
            .get("CONTAINER")
            .or(storage_cfg.container)
            .unwrap_or_else(|| "orders".to_string()),
        watermark_blob: env
            .get("WATERMARK_BLOB")
            .or(storage_cfg.watermark_blob)
            .unwrap_or_else(|| "status.txt".to_string()),
        orders_blob: env
            .get("ORDERS_BLOB")
            .or(storage_cfg.orders_blob)
            .unwrap_or_else(|| "orders.csv".to_string()),
    };

    let timeout_secs = env
        .parse("TIMEOUT_SECONDS")?
        .or(shop_cfg.timeout_seconds)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    // Storage
    let backend = env
        .parse::<StorageBackend>("STORAGE_BACKEND")?
        .or(storage_cfg.backend)
        .unwrap_or_default();

    let storage = match backend {
        StorageBackend::Azure => StorageSettings::Azure(AzureConfig {
            account: required(
                env.get("STORAGE_ACCOUNT").or(storage_cfg.account),
                "storage.account",
                "STORAGE_ACCOUNT",
            )?,
            key: required(
                env.get("STORAGE_KEY").or(storage_cfg.key),
                "storage.key",
                "STORAGE_KEY",
            )?,
            endpoint: env.get("STORAGE_ENDPOINT").or(storage_cfg.endpoint),
            timeout_secs,
        }),
        StorageBackend::Local => {
            let root = if let Some(env_root) = env.get("STORAGE_ROOT") {
                PathBuf::from(env_root)
            } else if let Some(ref root) = storage_cfg.root {
                resolve_path(&base, root)
            } else {
                paths::cache_dir().join("blobs")
            };
            StorageSettings::Local { root }
        }
    };

    // Shop
    let username = required(
        env.get("SHOP_USERNAME").or(shop_cfg.username),
        "shop.username",
        "SHOP_USERNAME",
    )?;
    let password = required(
        env.get("SHOP_PASSWORD").or(shop_cfg.password),
        "shop.password",
        "SHOP_PASSWORD",
    )?;
    let mut shop = match env.get("SHOP_BASE_URL").or(shop_cfg.base_url) {
        Some(base_url) => ShopifyConfig {
            base_url,
            username,
            password,
            page_size: DEFAULT_PAGE_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        },
        None => {
            let alias = required(
                env.get("SHOP_ALIAS").or(shop_cfg.alias),
                "shop.alias",
                "SHOP_ALIAS",
            )?;
            ShopifyConfig::for_shop(&alias, username, password)
        }
    };
    shop.page_size = env
        .parse("PAGE_SIZE")?
        .or(shop_cfg.page_size)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    shop.timeout_secs = timeout_secs;
    if shop.page_size == 0 {
        bail!("Page size must be at least 1");
    }

    // Schedule
    let interval_secs = env
        .parse("INTERVAL_SECONDS")?
        .or(schedule_cfg.interval_seconds)
        .unwrap_or(DEFAULT_INTERVAL_SECS);
    if interval_secs == 0 {
        bail!("Schedule interval must be at least 1 second");
    }
    let lock_file = if let Some(env_lock) = env.get("LOCK_FILE") {
        PathBuf::from(env_lock)
    } else if let Some(ref lock) = schedule_cfg.lock_file {
        resolve_path(&base, lock)
    } else {
        paths::default_lock_file(&target.container)
    };

    Ok(ResolvedConfig {
        storage,
        shop,
        target,
        schedule: ScheduleSettings {
            interval: Duration::from_secs(interval_secs),
            lock_file,
        },
        config_file,
    })
}

/// Load configuration from all sources.
///
/// `explicit` is the `--config` path; without it the file is discovered
/// from the current directory.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("Failed to determine current directory")?;
            find_config_file(&cwd)
        }
    };

    let file = match config_path {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(file, &|key| std::env::var(key).ok())
}
