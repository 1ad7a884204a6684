//! Process-wide shared context.
//!
//! One instance per process, passed by `Arc` into every constructor.
//! Carries the global configuration, the inventory fetch semaphore
//! (serialises inventory reads across all accounts), and the per-service
//! web limiter table.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::GlobalConfig;
use crate::web::limiter::WebLimiters;

pub struct SharedContext {
    pub config: GlobalConfig,
    /// One inventory read at a time, process-wide.
    pub inventory_semaphore: Arc<Semaphore>,
    pub limiters: WebLimiters,
}

impl SharedContext {
    pub fn new(config: GlobalConfig) -> Arc<Self> {
        let service_hosts: Vec<String> = [
            &config.hosts.community,
            &config.hosts.store,
            &config.hosts.help,
            &config.hosts.api,
            &config.statistics_url(),
        ]
        .into_iter()
        .map(|url| host_of(url))
        .collect();

        let limiters = WebLimiters::new(
            service_hosts,
            config.max_connections,
            config.web_limiter_delay(),
        );

        Arc::new(Self {
            config,
            inventory_semaphore: Arc::new(Semaphore::new(1)),
            limiters,
        })
    }
}

/// The host component of a base URL, used as the limiter service key.
pub fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}
