//! Session-aware HTTP client core.
//!
//! Every platform request flows through [`WebClient::send_request`], which
//! layers per-service limiting, preemptive session validity probing,
//! transparent session refresh, and retry-on-anomaly over a shared
//! `reqwest` client with a per-host cookie jar.
//!
//! Session expiry is detected from the *final* URL of a response: a path
//! beginning with `/login`, or the distinguished fallback host, means the
//! platform bounced us to re-authentication. A final URL pointing at our
//! own profile when we asked for something else is a known upstream
//! misbehaviour and is retried without refreshing.

use anyhow::{anyhow, Context, Result};
use reqwest::cookie::Jar;
use reqwest::{Method, Response, Url};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::account::AccountHandle;
use crate::cache::Cacheable;
use crate::context::{host_of, SharedContext};
use crate::types::{SteamId, SwapfarmError};

/// Default bound on attempts per logical request.
pub const DEFAULT_MAX_TRIES: u8 = 5;

/// Cheap, stable path probed to test session validity: the account
/// overview redirects to `/login` once the session is gone.
const SESSION_PROBE_PATH: &str = "/my";

/// Distinguished host the platform redirects to on a dead session.
const FALLBACK_HOST: &str = "lostauth";

// ---------------------------------------------------------------------------
// Request addressing
// ---------------------------------------------------------------------------

/// The primary platform hosts plus the Web-API host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKind {
    Community,
    Store,
    Help,
    Api,
}

/// How the session id is attached to a POST form, selected per endpoint.
/// For GET/HEAD this only gates the preemptive session probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionField {
    None,
    /// `sessionid`
    Lowercase,
    /// `sessionID`
    CamelCase,
    /// `SessionID`
    PascalCase,
}

impl SessionField {
    pub fn field_name(self) -> Option<&'static str> {
        match self {
            SessionField::None => None,
            SessionField::Lowercase => Some("sessionid"),
            SessionField::CamelCase => Some("sessionID"),
            SessionField::PascalCase => Some("SessionID"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

pub(crate) struct SessionState {
    /// The `sessionid` cookie value planted across the primary hosts.
    pub session_id: Option<String>,
    /// Last probe, successful or not.
    pub last_session_check: Instant,
    /// Last probe that observed a valid session.
    pub last_session_refresh: Instant,
}

impl SessionState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            session_id: None,
            last_session_check: now,
            last_session_refresh: now,
        }
    }

    /// The session is considered expired when the newest probe did not
    /// observe a valid session.
    pub fn is_expired(&self) -> bool {
        self.last_session_check != self.last_session_refresh
    }
}

// ---------------------------------------------------------------------------
// Web client
// ---------------------------------------------------------------------------

pub struct WebClient {
    pub(crate) http: reqwest::Client,
    pub(crate) jar: Arc<Jar>,
    pub(crate) context: Arc<SharedContext>,
    /// Non-owning back-reference; the account owns this client.
    pub(crate) account: Weak<dyn AccountHandle>,
    pub(crate) session: RwLock<SessionState>,
    /// Single-flight refresh.
    refresh_guard: Mutex<()>,
    /// Single-flight validity probe.
    probe_guard: Mutex<()>,
    pub(crate) api_key: OnceLock<Cacheable<String>>,
}

impl WebClient {
    pub fn new(
        context: Arc<SharedContext>,
        account: Weak<dyn AccountHandle>,
    ) -> Result<Arc<Self>> {
        let jar = Arc::new(Jar::default());

        let mut builder = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(context.config.connection_timeout())
            .user_agent("swapfarm/0.1.0");

        if let Some(proxy) = &context.config.web_proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .with_context(|| format!("Invalid WebProxy: {proxy}"))?,
            );
        }

        let http = builder.build().context("Failed to build HTTP client")?;

        let client = Arc::new(Self {
            http,
            jar,
            context,
            account,
            session: RwLock::new(SessionState::new()),
            refresh_guard: Mutex::new(()),
            probe_guard: Mutex::new(()),
            api_key: OnceLock::new(),
        });

        // The API-key resolver needs the client back; a weak handle keeps
        // the Cacheable from pinning it alive.
        let weak = Arc::downgrade(&client);
        let cacheable = Cacheable::new(None, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(client) => client.resolve_api_key().await,
                    None => Err(anyhow!("Web client dropped")),
                }
            }
        });
        let _ = client.api_key.set(cacheable);

        Ok(client)
    }

    pub(crate) fn base(&self, host: HostKind) -> &str {
        let hosts = &self.context.config.hosts;
        match host {
            HostKind::Community => &hosts.community,
            HostKind::Store => &hosts.store,
            HostKind::Help => &hosts.help,
            HostKind::Api => &hosts.api,
        }
    }

    fn full_url(&self, host: HostKind, path: &str) -> String {
        format!("{}{}", self.base(host), path)
    }

    fn service_key(&self, host: HostKind) -> String {
        host_of(self.base(host))
    }

    // -- Final-URL anomaly predicates --------------------------------------

    /// Whether a final URL means the session is gone.
    pub(crate) fn is_session_expired_url(url: &Url) -> bool {
        url.path().starts_with("/login") || url.host_str() == Some(FALLBACK_HOST)
    }

    /// Whether a final URL is the account's own profile while the request
    /// targeted something else (a known upstream misbehaviour).
    pub(crate) fn is_profile_redirect(url: &Url, requested_path: &str, steam_id: SteamId) -> bool {
        let profile_path = format!("/profiles/{steam_id}");
        url.path().trim_end_matches('/') == profile_path
            && requested_path.trim_end_matches('/') != profile_path
    }

    // -- Session validity --------------------------------------------------

    /// The current `sessionid` value, if a session was initialised.
    pub(crate) async fn session_id(&self) -> Option<String> {
        self.session.read().await.session_id.clone()
    }

    /// HEAD the account overview and report whether the session held.
    async fn probe_session(&self) -> Result<bool> {
        let _permit = self
            .context
            .limiters
            .acquire(&self.service_key(HostKind::Community))
            .await;

        let url = self.full_url(HostKind::Community, SESSION_PROBE_PATH);
        let resp = self
            .http
            .head(&url)
            .send()
            .await
            .context("Session probe failed")?;

        Ok(!Self::is_session_expired_url(resp.url()))
    }

    /// Preemptively verify the session, probing at most once per validity
    /// window and refreshing when the newest probe saw an expired session.
    pub(crate) async fn ensure_session_valid(&self) -> Result<()> {
        let window = self.context.config.session_validity_window();

        {
            let state = self.session.read().await;
            if state.last_session_check.elapsed() < window {
                if state.is_expired() {
                    drop(state);
                    self.refresh_session().await?;
                }
                return Ok(());
            }
        }

        let _guard = self.probe_guard.lock().await;

        // Another task may have probed while we waited.
        {
            let state = self.session.read().await;
            if state.last_session_check.elapsed() < window {
                if state.is_expired() {
                    drop(state);
                    self.refresh_session().await?;
                }
                return Ok(());
            }
        }

        let valid = self.probe_session().await?;
        let now = Instant::now();
        {
            let mut state = self.session.write().await;
            state.last_session_check = now;
            if valid {
                state.last_session_refresh = now;
            }
        }

        if !valid {
            self.refresh_session().await?;
        }
        Ok(())
    }

    /// Renegotiate the session through the account manager.
    ///
    /// Exclusive per account; requires the account to be connected and the
    /// previous refresh to be at least one validity window old.
    pub async fn refresh_session(&self) -> Result<bool> {
        let account = self
            .account
            .upgrade()
            .ok_or_else(|| SwapfarmError::SessionRefresh("account handle gone".into()))?;

        if !account.is_connected() {
            return Err(
                SwapfarmError::SessionRefresh("account is not connected".into()).into(),
            );
        }

        let _guard = self.refresh_guard.lock().await;

        let window = self.context.config.session_validity_window();
        {
            let state = self.session.read().await;
            if state.last_session_refresh.elapsed() < window {
                // A refresh just happened on another task.
                return Ok(true);
            }
        }

        debug!("Refreshing web session");
        let ok = account
            .renegotiate_session()
            .await
            .context("Session renegotiation failed")?;

        if ok {
            let now = Instant::now();
            let mut state = self.session.write().await;
            state.last_session_check = now;
            state.last_session_refresh = now;
        } else {
            warn!("Session renegotiation was declined by the account manager");
        }

        Ok(ok)
    }

    /// Mark the session freshly valid (called from session init).
    pub(crate) async fn mark_session_valid(&self, session_id: String) {
        let now = Instant::now();
        let mut state = self.session.write().await;
        state.session_id = Some(session_id);
        state.last_session_check = now;
        state.last_session_refresh = now;
    }

    // -- Request core ------------------------------------------------------

    /// Send a request with limiting, session handling, and bounded retry.
    ///
    /// Returns the response whatever its status; decode helpers decide how
    /// to treat non-success statuses.
    pub(crate) async fn send_request(
        &self,
        method: Method,
        host: HostKind,
        path: &str,
        form: Option<&[(String, String)]>,
        session: SessionField,
        max_tries: u8,
    ) -> Result<Response> {
        if path.is_empty() {
            return Err(SwapfarmError::InvalidInput("empty request path".into()).into());
        }

        let steam_id = self.account.upgrade().map(|a| a.steam_id());

        let mut tries = max_tries;
        while tries > 0 {
            tries -= 1;

            if session != SessionField::None {
                if let Err(e) = self.ensure_session_valid().await {
                    warn!(error = %e, "Preemptive session check failed, proceeding");
                }
            }

            let _permit = self.context.limiters.acquire(&self.service_key(host)).await;

            let url = self.full_url(host, path);
            let mut request = self.http.request(method.clone(), &url);

            if let Some(fields) = form {
                let mut data: Vec<(String, String)> = fields.to_vec();
                if let Some(name) = session.field_name() {
                    match self.session_id().await {
                        Some(sid) => data.push((name.to_string(), sid)),
                        None => warn!(path, "POST with session mode but no session id"),
                    }
                }
                request = request.form(&data);
            }

            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(path, error = %e, tries_left = tries, "Request transport failure");
                    continue;
                }
            };

            let final_url = resp.url().clone();

            if Self::is_session_expired_url(&final_url) {
                warn!(path, %final_url, "Session expired mid-request, refreshing");
                if let Err(e) = self.refresh_session().await {
                    warn!(error = %e, "Session refresh failed");
                }
                continue;
            }

            if let Some(id) = steam_id {
                if Self::is_profile_redirect(&final_url, path, id) {
                    warn!(path, %final_url, "Profile redirect anomaly, retrying");
                    continue;
                }
            }

            return Ok(resp);
        }

        Err(SwapfarmError::TriesExhausted(max_tries).into())
    }

    // -- Request primitives ------------------------------------------------

    pub async fn get_html(&self, host: HostKind, path: &str, session: SessionField) -> Result<String> {
        let resp = self
            .send_request(Method::GET, host, path, None, session, DEFAULT_MAX_TRIES)
            .await?;
        let resp = resp.error_for_status().context("GET returned error status")?;
        resp.text().await.context("Failed to read HTML body")
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        host: HostKind,
        path: &str,
        session: SessionField,
    ) -> Result<T> {
        let resp = self
            .send_request(Method::GET, host, path, None, session, DEFAULT_MAX_TRIES)
            .await?;
        let resp = resp.error_for_status().context("GET returned error status")?;
        resp.json().await.context("Failed to decode JSON body")
    }

    pub async fn get_xml(&self, host: HostKind, path: &str, session: SessionField) -> Result<String> {
        self.get_html(host, path, session).await
    }

    pub async fn get_bytes(&self, host: HostKind, path: &str, session: SessionField) -> Result<Vec<u8>> {
        let resp = self
            .send_request(Method::GET, host, path, None, session, DEFAULT_MAX_TRIES)
            .await?;
        let resp = resp.error_for_status().context("GET returned error status")?;
        Ok(resp.bytes().await.context("Failed to read body")?.to_vec())
    }

    pub async fn head(&self, host: HostKind, path: &str) -> Result<()> {
        let resp = self
            .send_request(Method::HEAD, host, path, None, SessionField::None, DEFAULT_MAX_TRIES)
            .await?;
        resp.error_for_status().context("HEAD returned error status")?;
        Ok(())
    }

    pub async fn post_form_html(
        &self,
        host: HostKind,
        path: &str,
        form: &[(String, String)],
        session: SessionField,
    ) -> Result<String> {
        let resp = self
            .send_request(Method::POST, host, path, Some(form), session, DEFAULT_MAX_TRIES)
            .await?;
        let resp = resp.error_for_status().context("POST returned error status")?;
        resp.text().await.context("Failed to read HTML body")
    }

    pub async fn post_form_json<T: serde::de::DeserializeOwned>(
        &self,
        host: HostKind,
        path: &str,
        form: &[(String, String)],
        session: SessionField,
    ) -> Result<T> {
        let resp = self
            .send_request(Method::POST, host, path, Some(form), session, DEFAULT_MAX_TRIES)
            .await?;
        let resp = resp.error_for_status().context("POST returned error status")?;
        resp.json().await.context("Failed to decode JSON body")
    }

    // -- Higher-level helpers ----------------------------------------------

    /// Join a community group. Best-effort; callers log failures.
    pub async fn join_group(&self, group_id: u64) -> Result<()> {
        if group_id == 0 {
            return Err(SwapfarmError::InvalidInput("groupID is zero".into()).into());
        }
        let form = vec![("action".to_string(), "join".to_string())];
        self.post_form_html(
            HostKind::Community,
            &format!("/gid/{group_id}"),
            &form,
            SessionField::CamelCase,
        )
        .await?;
        Ok(())
    }

    /// Whether the given profile exposes a public inventory.
    pub async fn has_public_inventory(&self, steam_id: SteamId) -> Result<bool> {
        if steam_id == 0 {
            return Err(SwapfarmError::InvalidInput("steamID is zero".into()).into());
        }
        let xml = self
            .get_xml(
                HostKind::Community,
                &format!("/profiles/{steam_id}?xml=1"),
                SessionField::Lowercase,
            )
            .await?;
        Ok(xml.contains("<privacyState>public</privacyState>"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
