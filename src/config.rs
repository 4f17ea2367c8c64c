//! Publish configuration.
//!
//! Handles loading, validating, and merging `publish.toml`. Stock defaults
//! are the base layer; the file in the content root is merged on top; CLI
//! flags and environment variables (`PUBLISH_WORKERS`, `PUBLISH_PREFIX`)
//! are applied last.
//!
//! ## Config File Location
//!
//! ```text
//! content/
//! ├── publish.toml             # Overrides stock defaults
//! ├── posts/
//! └── galleries/
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [site]
//! base_url = "https://example.com"   # Absolute; used for links and the feed
//! title = "Untitled"
//! author_name = ""
//! author_email = ""
//!
//! [posts]
//! page_size = 5
//!
//! [galleries]
//! page_size = 10
//!
//! [sync]
//! prefix = ""            # Prepended to every remote key
//! timeout_secs = 30      # Per-request HTTP timeout
//! # workers = 8          # Omit for auto (= CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::types::ContentKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name looked up in the content root.
pub const CONFIG_FILENAME: &str = "publish.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration loaded from `publish.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    pub site: SiteConfig,
    pub posts: KindConfig,
    pub galleries: KindConfig,
    pub sync: SyncConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            posts: KindConfig { page_size: 5 },
            galleries: KindConfig { page_size: 10 },
            sync: SyncConfig::default(),
        }
    }
}

impl PublishConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.site.base_url.as_str();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::Validation(format!(
                "site.base_url must be an absolute http(s) URL, got {url:?}"
            )));
        }
        for kind in ContentKind::ALL {
            if self.kind(kind).page_size == 0 {
                return Err(ConfigError::Validation(format!(
                    "{kind}.page_size must be at least 1"
                )));
            }
        }
        if self.sync.workers == Some(0) {
            return Err(ConfigError::Validation(
                "sync.workers must be at least 1".into(),
            ));
        }
        if self.sync.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "sync.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn kind(&self, kind: ContentKind) -> &KindConfig {
        match kind {
            ContentKind::Posts => &self.posts,
            ContentKind::Galleries => &self.galleries,
        }
    }

    /// Apply CLI/env overrides, then re-validate.
    pub fn with_overrides(mut self, overrides: &Overrides) -> Result<Self, ConfigError> {
        if let Some(workers) = overrides.workers {
            self.sync.workers = Some(workers);
        }
        if let Some(prefix) = &overrides.prefix {
            self.sync.prefix = prefix.clone();
        }
        self.validate()?;
        Ok(self)
    }
}

/// Values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub prefix: Option<String>,
}

/// Site identity used for canonical links and the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub base_url: String,
    pub title: String,
    pub author_name: String,
    pub author_email: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://example.com".to_string(),
            title: "Untitled".to_string(),
            author_name: String::new(),
            author_email: String::new(),
        }
    }
}

/// Per-kind settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct KindConfig {
    pub page_size: usize,
}

impl Default for KindConfig {
    fn default() -> Self {
        Self { page_size: 5 }
    }
}

/// Remote sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Prepended to every remote key.
    pub prefix: String,
    /// Number of concurrent sync workers.
    /// When absent, defaults to the number of CPU cores.
    pub workers: Option<usize>,
    /// HTTP timeout per request.
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            workers: None,
            timeout_secs: 30,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → one worker per available core
/// - `Some(n)` → `n`; sync is network-bound, so this may exceed the core count
pub fn effective_workers(config: &SyncConfig) -> usize {
    config.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PublishConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `publish.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no `publish.toml`.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<PublishConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PublishConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `publish.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<PublishConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `publish.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# publish configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Place this file at the content root (content/publish.toml).
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Site identity
# ---------------------------------------------------------------------------
[site]
# Absolute URL the site is served from. Pagination links, feed entry ids
# and rewritten root-relative links are built from it.
base_url = "https://example.com"

# Feed title.
title = "Untitled"

# Feed author. The <author> element is omitted when the name is empty.
author_name = ""
author_email = ""

# ---------------------------------------------------------------------------
# Pagination
# ---------------------------------------------------------------------------
[posts]
# Posts per page in posts.json / posts/page/<n>.json.
page_size = 5

[galleries]
# Albums per page in galleries.json / galleries/page/<n>.json.
page_size = 10

# ---------------------------------------------------------------------------
# Remote sync
# ---------------------------------------------------------------------------
[sync]
# Prepended to every remote key, e.g. "site" -> "site/posts/abc".
# Overridden by PUBLISH_PREFIX / --prefix.
prefix = ""

# Per-request HTTP timeout in seconds.
timeout_secs = 30

# Concurrent upload workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# Overridden by PUBLISH_WORKERS / --workers.
# workers = 8
"##
}
