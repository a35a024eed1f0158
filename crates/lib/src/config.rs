//! Gateway configuration: base URL, API key, and instance name.
//!
//! Config is loaded from a JSON file (e.g. `~/.zapcrm/config.json`) with
//! environment overrides, and is mutable at runtime through [`ConfigStore`]:
//! every gateway call takes a fresh snapshot, so updates apply to the next
//! request without a restart. In-flight requests keep the values they
//! captured at call time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Connection settings for the external messaging gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Gateway base URL (default "http://localhost:8080").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key sent as the `apikey` header on every request.
    #[serde(default)]
    pub api_key: String,

    /// Name of the instance (paired session) on the gateway.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_instance_name() -> String {
    "main".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            instance_name: default_instance_name(),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Apply env overrides: ZAPCRM_GATEWAY_URL, ZAPCRM_API_KEY, ZAPCRM_INSTANCE.
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Some(url) = std::env::var("ZAPCRM_GATEWAY_URL").ok().and_then(non_empty) {
        config.base_url = url;
    }
    if let Some(key) = std::env::var("ZAPCRM_API_KEY").ok().and_then(non_empty) {
        config.api_key = key;
    }
    if let Some(name) = std::env::var("ZAPCRM_INSTANCE").ok().and_then(non_empty) {
        config.instance_name = name;
    }
}

/// Resolve config path from env or default (~/.zapcrm/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("ZAPCRM_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".zapcrm").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => defaults.
/// Env overrides are applied last. Returns the config and the path used.
pub fn load_config(path: Option<PathBuf>) -> Result<(GatewayConfig, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        GatewayConfig::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_env_overrides(&mut config);
    Ok((config, path))
}

/// Write the config as pretty JSON, creating the parent directory if needed.
pub fn save_config(config: &GatewayConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating config dir {}", parent.display()))?;
        }
    }
    let s = serde_json::to_string_pretty(config).context("serializing config")?;
    std::fs::write(path, s).with_context(|| format!("writing config to {}", path.display()))?;
    Ok(())
}

/// Create the config file with defaults if it does not exist yet.
pub fn init_config_file(path: &Path) -> Result<GatewayConfig> {
    if path.exists() {
        let (config, _) = load_config(Some(path.to_path_buf()))?;
        return Ok(config);
    }
    let config = GatewayConfig::default();
    save_config(&config, path)?;
    Ok(config)
}

/// Shared, runtime-mutable gateway configuration.
///
/// Readers call [`ConfigStore::snapshot`] per request. [`ConfigStore::update`]
/// is the single writer: it mutates the shared value and persists it to the
/// backing file when one is attached.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<GatewayConfig>>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// In-memory store with no backing file (tests, embedded use).
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: None,
        }
    }

    /// Store backed by a config file; updates are persisted there.
    pub fn with_path(config: GatewayConfig, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: Some(path),
        }
    }

    /// Current configuration. Cloned so callers keep the values they read
    /// even if the store is updated mid-request.
    pub fn snapshot(&self) -> GatewayConfig {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Mutate the configuration and persist it. Returns the new snapshot.
    pub fn update(&self, f: impl FnOnce(&mut GatewayConfig)) -> Result<GatewayConfig> {
        let updated = {
            let mut g = self.inner.write().unwrap_or_else(|e| e.into_inner());
            f(&mut g);
            g.clone()
        };
        if let Some(ref path) = self.path {
            save_config(&updated, path)?;
        }
        Ok(updated)
    }
}
