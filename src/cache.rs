//! Lazily-resolved, time-bounded cached values.
//!
//! [`Cacheable`] wraps a fallible asynchronous resolver. Concurrent readers
//! share one resolution; stale values are purged by a background task a
//! grace period after their lifetime ends.

use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Grace period added to the lifetime before a stale value is purged.
const PURGE_GRACE: Duration = Duration::from_secs(5 * 60);

/// What `get` returns when a resolution fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFallback {
    /// Return the type default; also drops any previously cached value.
    DefaultForType,
    /// Return nothing — the caller sees the failure as-is.
    FailedNow,
    /// Return the last successfully resolved value, even if expired.
    SuccessPreviously,
}

type Resolver<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

struct CachedValue<T> {
    value: T,
    resolved_at: Instant,
}

struct Inner<T> {
    state: RwLock<Option<CachedValue<T>>>,
    /// Single-flight guard: at most one concurrent resolution.
    init_guard: Mutex<()>,
    purge: StdMutex<Option<JoinHandle<()>>>,
}

/// A memoized asynchronous value with a maximum lifetime.
///
/// `lifetime = None` means "cache forever; no purge".
pub struct Cacheable<T> {
    resolver: Resolver<T>,
    lifetime: Option<Duration>,
    inner: Arc<Inner<T>>,
}

impl<T> Cacheable<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    pub fn new<F, Fut>(lifetime: Option<Duration>, resolver: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            resolver: Box::new(move || Box::pin(resolver())),
            lifetime,
            inner: Arc::new(Inner {
                state: RwLock::new(None),
                init_guard: Mutex::new(()),
                purge: StdMutex::new(None),
            }),
        }
    }

    /// Return the cached value, resolving it if absent or expired.
    ///
    /// Returns `(true, Some(value))` on a fresh or freshly-resolved value.
    /// On resolution failure the second element is chosen per `fallback`
    /// and the first is `false`.
    pub async fn get(&self, fallback: CacheFallback) -> (bool, Option<T>) {
        if let Some(value) = self.fresh_value().await {
            return (true, Some(value));
        }

        let _guard = self.inner.init_guard.lock().await;

        // Someone else may have resolved while we waited for the guard.
        if let Some(value) = self.fresh_value().await {
            return (true, Some(value));
        }

        match (self.resolver)().await {
            Ok(value) => {
                let resolved_at = Instant::now();
                {
                    let mut state = self.inner.state.write().await;
                    *state = Some(CachedValue {
                        value: value.clone(),
                        resolved_at,
                    });
                }
                self.schedule_purge(resolved_at);
                (true, Some(value))
            }
            Err(e) => {
                warn!(error = %e, "Cacheable resolution failed");
                match fallback {
                    CacheFallback::DefaultForType => {
                        let mut state = self.inner.state.write().await;
                        *state = None;
                        (false, Some(T::default()))
                    }
                    CacheFallback::FailedNow => (false, None),
                    CacheFallback::SuccessPreviously => {
                        let state = self.inner.state.read().await;
                        (false, state.as_ref().map(|c| c.value.clone()))
                    }
                }
            }
        }
    }

    /// Clear the cached value and cancel any pending purge.
    pub async fn reset(&self) {
        self.cancel_purge();
        let mut state = self.inner.state.write().await;
        *state = None;
        debug!("Cacheable reset");
    }

    async fn fresh_value(&self) -> Option<T> {
        let state = self.inner.state.read().await;
        let cached = state.as_ref()?;
        match self.lifetime {
            None => Some(cached.value.clone()),
            Some(lifetime) if cached.resolved_at.elapsed() < lifetime => {
                Some(cached.value.clone())
            }
            Some(_) => None,
        }
    }

    fn cancel_purge(&self) {
        if let Some(handle) = self.inner.purge.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Schedule a soft reset at `lifetime + PURGE_GRACE` past this
    /// resolution. A purge that finds a newer resolution is a no-op.
    fn schedule_purge(&self, resolved_at: Instant) {
        let Some(lifetime) = self.lifetime else {
            return;
        };

        self.cancel_purge();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(lifetime + PURGE_GRACE).await;
            let mut state = inner.state.write().await;
            match state.as_ref() {
                Some(cached) if cached.resolved_at == resolved_at => {
                    *state = None;
                    debug!("Cacheable purged after lifetime");
                }
                _ => {}
            }
        });

        *self.inner.purge.lock().unwrap() = Some(handle);
    }
}

impl<T> Drop for Cacheable<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.purge.lock().unwrap().take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
