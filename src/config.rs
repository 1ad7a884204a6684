//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads a TOML file and deserializes into strongly-typed structs. Secrets
//! (the IPC password) may be referenced by env-var name and resolved at
//! runtime via `std::env::var`. Key names follow the global config wire
//! format (`IPCPassword`, `WebLimiterDelay`, …).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Top-level global configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    /// Enables auth middleware on the IPC front-end when present.
    /// The IPC layer itself lives in the embedding application.
    #[serde(rename = "IPCPassword", default)]
    pub ipc_password: Option<String>,

    /// Seconds added to the active-match initial delay per registered account.
    #[serde(rename = "LoadBalancingDelay", default = "default_load_balancing_delay")]
    pub load_balancing_delay: u64,

    /// Seconds the process-wide inventory semaphore stays held after a fetch.
    #[serde(rename = "InventoryLimiterDelay", default = "default_inventory_limiter_delay")]
    pub inventory_limiter_delay: u64,

    /// Milliseconds between requests to a single service. Zero disables
    /// web limiting entirely.
    #[serde(rename = "WebLimiterDelay", default = "default_web_limiter_delay")]
    pub web_limiter_delay_ms: u64,

    /// Per-request timeout, seconds.
    #[serde(rename = "ConnectionTimeout", default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Optional outgoing proxy URI.
    #[serde(rename = "WebProxy", default)]
    pub web_proxy: Option<String>,

    /// Maximum concurrent connections per service.
    #[serde(rename = "MaxConnections", default = "default_max_connections")]
    pub max_connections: usize,

    /// Host of the matching directory server (scheme-less).
    #[serde(rename = "StatisticsServer", default = "default_statistics_server")]
    pub statistics_server: String,

    /// Platform host overrides, mainly for tests.
    #[serde(default)]
    pub hosts: Hosts,
}

fn default_load_balancing_delay() -> u64 {
    15
}
fn default_inventory_limiter_delay() -> u64 {
    4
}
fn default_web_limiter_delay() -> u64 {
    300
}
fn default_connection_timeout() -> u64 {
    90
}
fn default_max_connections() -> usize {
    5
}
fn default_statistics_server() -> String {
    "directory.swapfarm.dev".to_string()
}

/// Base URLs of the platform hosts the web client talks to.
#[derive(Debug, Deserialize, Clone)]
pub struct Hosts {
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_store")]
    pub store: String,
    #[serde(default = "default_help")]
    pub help: String,
    #[serde(default = "default_api")]
    pub api: String,
}

fn default_community() -> String {
    "https://steamcommunity.com".to_string()
}
fn default_store() -> String {
    "https://store.steampowered.com".to_string()
}
fn default_help() -> String {
    "https://help.steampowered.com".to_string()
}
fn default_api() -> String {
    "https://api.steampowered.com".to_string()
}

impl Default for Hosts {
    fn default() -> Self {
        Self {
            community: default_community(),
            store: default_store(),
            help: default_help(),
            api: default_api(),
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ipc_password: None,
            load_balancing_delay: default_load_balancing_delay(),
            inventory_limiter_delay: default_inventory_limiter_delay(),
            web_limiter_delay_ms: default_web_limiter_delay(),
            connection_timeout: default_connection_timeout(),
            web_proxy: None,
            max_connections: default_max_connections(),
            statistics_server: default_statistics_server(),
            hosts: Hosts::default(),
        }
    }
}

impl GlobalConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: GlobalConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Per-request timeout as a `Duration`.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    /// How long a session probe outcome stays valid: one-sixth of the
    /// connection timeout.
    pub fn session_validity_window(&self) -> Duration {
        Duration::from_secs(self.connection_timeout / 6)
    }

    /// Background hold time of the rate guard per service.
    pub fn web_limiter_delay(&self) -> Duration {
        Duration::from_millis(self.web_limiter_delay_ms)
    }

    /// Background hold time of the inventory semaphore after a fetch.
    pub fn inventory_limiter_delay(&self) -> Duration {
        Duration::from_secs(self.inventory_limiter_delay)
    }

    /// Base URL of the directory server.
    pub fn statistics_url(&self) -> String {
        if self.statistics_server.contains("://") {
            self.statistics_server.clone()
        } else {
            format!("https://{}", self.statistics_server)
        }
    }
}
