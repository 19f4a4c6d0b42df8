//! Configuration management for the CLI

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_SCALER_ENDPOINT: &str = "http://localhost:50051";

/// CLI configuration, read from `~/.config/placerctl/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Daemon HTTP endpoint
    pub api_url: Option<String>,
    /// Daemon external scaler endpoint
    pub scaler_endpoint: Option<String>,
    /// Controller settings file used by `spread` and `teardown`
    pub settings_path: Option<String>,
}

impl Config {
    /// Load configuration from the default location; missing file yields defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// First of `flag`, the config file value, then `DEFAULT_API_URL`
    pub fn api_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn scaler_endpoint(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.scaler_endpoint.clone())
            .unwrap_or_else(|| DEFAULT_SCALER_ENDPOINT.to_string())
    }

    pub fn settings_path(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| self.settings_path.clone())
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("placerctl").join("config.json"))
    }
}

/// Get kubeconfig path
pub fn kubeconfig_path(override_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var("KUBECONFIG") {
        return Ok(PathBuf::from(path));
    }

    let home = dirs_next::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".kube").join("config"))
}

/// Kubernetes client from an explicit kubeconfig, or the inferred
/// in-cluster/local configuration when none exists on disk
pub async fn kube_client(override_path: Option<&str>) -> Result<kube::Client> {
    let path = kubeconfig_path(override_path)?;
    if !path.exists() {
        return kube::Client::try_default()
            .await
            .context("Failed to create Kubernetes client");
    }

    let kubeconfig = Kubeconfig::read_from(&path)
        .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("Invalid kubeconfig")?;
    kube::Client::try_from(config).context("Failed to create Kubernetes client")
}
