//! Access token acquisition and distribution.
//!
//! One background task per credential type owns the current value and hands
//! copies to concurrent callers over a request/response rendezvous. The task
//! refreshes the value when it has gone stale or when a caller forces a
//! rotation; a failed refresh keeps the last-known value in service and is
//! retried on the next request.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::types::ResponseEnvelope;

/// Attempt bound shared by the brokers and the request executor.
pub(crate) const RETRY_MAX: usize = 3;

/// Bearer credential with its expiry instant.
///
/// Replaced wholesale on each refresh, never mutated in place. A stale value
/// may still be handed out; callers decide with [`AccessToken::is_fresh`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            token: token.into(),
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
        }
    }

    /// Empty credential that is already expired; the broker's seed value.
    pub fn stale() -> Self {
        Self {
            token: String::new(),
            expires_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Something that can produce a fresh credential.
///
/// `Sync` because the broker task borrows the source across await points.
pub(crate) trait TokenSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<AccessToken>> + Send;
}

// =============================================================================
// Broker
// =============================================================================

enum BrokerMessage {
    Read(oneshot::Sender<AccessToken>),
    Invalidate(oneshot::Sender<AccessToken>),
}

/// Handle to the owning background task of one credential.
#[derive(Clone)]
pub struct TokenBroker {
    tx: mpsc::Sender<BrokerMessage>,
}

impl TokenBroker {
    /// Spawn the owning task. `store`, when present, shares the credential
    /// across broker instances under `cache_key`.
    pub(crate) fn spawn<S: TokenSource>(
        source: S,
        store: Option<Arc<dyn CacheStore>>,
        cache_key: String,
    ) -> Self {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(run(rx, source, store, cache_key));
        Self { tx }
    }

    /// Current credential; may be stale if the last refresh failed.
    pub async fn read(&self) -> Result<AccessToken> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BrokerMessage::Read(tx))
            .await
            .map_err(|_| Error::BrokerClosed)?;
        rx.await.map_err(|_| Error::BrokerClosed)
    }

    /// Force a refresh and wait for the rotated credential.
    pub async fn invalidate(&self) -> Result<AccessToken> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BrokerMessage::Invalidate(tx))
            .await
            .map_err(|_| Error::BrokerClosed)?;
        rx.await.map_err(|_| Error::BrokerClosed)
    }
}

async fn run<S: TokenSource>(
    mut rx: mpsc::Receiver<BrokerMessage>,
    source: S,
    store: Option<Arc<dyn CacheStore>>,
    cache_key: String,
) {
    let mut current = AccessToken::stale();
    while let Some(msg) = rx.recv().await {
        let (force, reply) = match msg {
            BrokerMessage::Read(tx) => (false, tx),
            BrokerMessage::Invalidate(tx) => (true, tx),
        };
        if force || !current.is_fresh() {
            match refresh(&source, store.as_deref(), &cache_key, force).await {
                Ok(token) => {
                    info!(key = %cache_key, "credential refreshed");
                    current = token;
                }
                Err(e) => {
                    warn!(key = %cache_key, "credential refresh failed, serving last value: {}", e);
                }
            }
        }
        // Receiver may have given up; nothing to do about it.
        let _ = reply.send(current.clone());
    }
}

async fn refresh<S: TokenSource>(
    source: &S,
    store: Option<&dyn CacheStore>,
    cache_key: &str,
    force: bool,
) -> Result<AccessToken> {
    if !force
        && let Some(store) = store
        && let Some(token) = store.get(cache_key)
        && token.is_fresh()
    {
        debug!(key = %cache_key, "adopted credential from cache store");
        return Ok(token);
    }

    let token = source.fetch().await?;
    if let Some(store) = store
        && let Err(e) = store.set(cache_key, &token)
    {
        warn!(key = %cache_key, "cache store write failed: {}", e);
    }
    Ok(token)
}

// =============================================================================
// Sources
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenFetchResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Fetches the primary access token from the credential authority.
pub(crate) struct AppTokenSource {
    http: reqwest::Client,
    url: String,
}

impl AppTokenSource {
    pub(crate) fn new(http: reqwest::Client, api_base: &str, app_id: &str, secret: &str) -> Self {
        Self {
            http,
            url: format!(
                "{}/token?grant_type=client_credential&appid={}&secret={}",
                api_base, app_id, secret
            ),
        }
    }
}

impl TokenSource for AppTokenSource {
    async fn fetch(&self) -> Result<AccessToken> {
        let resp: TokenFetchResponse = self.http.get(&self.url).send().await?.json().await?;
        if resp.errcode != 0 {
            return Err(Error::Api {
                code: resp.errcode,
                message: resp.errmsg,
            });
        }
        let token = resp.access_token.ok_or(Error::Api {
            code: resp.errcode,
            message: "token endpoint returned no access_token".into(),
        })?;
        Ok(AccessToken::new(token, resp.expires_in.unwrap_or(0)))
    }
}

#[derive(Debug, Deserialize)]
struct TicketFetchResponse {
    #[serde(default)]
    ticket: String,
    #[serde(default)]
    expires_in: i64,
}

/// Fetches the JS-API ticket; requires a fresh primary token per attempt.
pub(crate) struct JsTicketSource {
    http: reqwest::Client,
    url: String,
    tokens: TokenBroker,
}

impl JsTicketSource {
    pub(crate) fn new(http: reqwest::Client, api_base: &str, tokens: TokenBroker) -> Self {
        Self {
            http,
            url: format!("{}/ticket/getticket?type=jsapi&access_token=", api_base),
            tokens,
        }
    }
}

impl TokenSource for JsTicketSource {
    async fn fetch(&self) -> Result<AccessToken> {
        for _ in 0..RETRY_MAX {
            let token = self.tokens.read().await?;
            if !token.is_fresh() {
                continue;
            }
            let body = self
                .http
                .get(format!("{}{}", self.url, token.token))
                .send()
                .await?
                .bytes()
                .await?;
            let envelope: ResponseEnvelope = serde_json::from_slice(&body)?;
            match envelope.error_code {
                0 => {
                    let resp: TicketFetchResponse = serde_json::from_slice(&body)?;
                    return Ok(AccessToken::new(resp.ticket, resp.expires_in));
                }
                42001 => continue,
                code => {
                    return Err(Error::Api {
                        code,
                        message: envelope.error_message,
                    });
                }
            }
        }
        Err(Error::TooManyAttempts("jsapi ticket".into()))
    }
}
