//! Per-service request limiting.
//!
//! Each service carries two guards: a single-permit rate guard, released in
//! the background a fixed delay after acquisition, and an open-connections
//! guard sized to the configured maximum, released when the request
//! completes. Unknown services share a default guard pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// One service's guard pair.
#[derive(Clone)]
struct ServiceGuards {
    rate: Arc<Semaphore>,
    connections: Arc<Semaphore>,
}

impl ServiceGuards {
    fn new(max_connections: usize) -> Self {
        Self {
            rate: Arc::new(Semaphore::new(1)),
            connections: Arc::new(Semaphore::new(max_connections)),
        }
    }
}

/// Held for the duration of a request. Dropping it releases the
/// connections guard; the rate guard is released on its own schedule.
pub struct LimiterPermit {
    _connection: OwnedSemaphorePermit,
}

/// Per-service limiter table.
///
/// With `delay == 0` both guards are bypassed entirely.
pub struct WebLimiters {
    services: HashMap<String, ServiceGuards>,
    fallback: ServiceGuards,
    delay: Duration,
}

impl WebLimiters {
    /// Build a limiter table for the given service hosts.
    pub fn new<I, S>(hosts: I, max_connections: usize, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let services = hosts
            .into_iter()
            .map(|host| (host.into(), ServiceGuards::new(max_connections)))
            .collect();

        Self {
            services,
            fallback: ServiceGuards::new(max_connections),
            delay,
        }
    }

    /// Acquire both guards for a request against `host`.
    ///
    /// Suspends until a connection slot and the rate slot are free. The
    /// rate slot is handed to a background task that releases it after the
    /// configured delay, regardless of how the request ends.
    pub async fn acquire(&self, host: &str) -> Option<LimiterPermit> {
        if self.delay.is_zero() {
            return None;
        }

        let guards = self.services.get(host).unwrap_or(&self.fallback);

        let connection = Arc::clone(&guards.connections)
            .acquire_owned()
            .await
            .expect("connections semaphore closed");
        let rate = Arc::clone(&guards.rate)
            .acquire_owned()
            .await
            .expect("rate semaphore closed");

        trace!(host, "Web limiter slots acquired");

        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(rate);
        });

        Some(LimiterPermit {
            _connection: connection,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
