//! The shared client: configuration, credential brokers, and the retrying
//! request executor behind every authenticated REST call.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::crypto::MessageCrypto;
use crate::error::{Error, Result};
use crate::router::Route;
use crate::token::{AccessToken, AppTokenSource, JsTicketSource, RETRY_MAX, TokenBroker};
use crate::types::ResponseEnvelope;
use crate::cache::CacheStore;

const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com/cgi-bin";
const DEFAULT_FILE_BASE: &str = "http://file.api.weixin.qq.com/cgi-bin/media";
const DEFAULT_SNS_BASE: &str = "https://api.weixin.qq.com/sns";
const REDIRECT_URL: &str =
    "https://open.weixin.qq.com/connect/oauth2/authorize?appid={appid}&redirect_uri={redirect}&response_type=code&scope={scope}&state={state}#wechat_redirect";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The platform's "access token expired" sentinel.
const ERR_TOKEN_EXPIRED: i64 = 42001;

/// Shared Official Account client.
///
/// Cheap to clone; all clones share the credential brokers and route table.
/// Must be constructed inside a tokio runtime (the brokers are spawned
/// tasks).
#[derive(Clone)]
pub struct Weixin {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) token: String,
    pub(crate) app_id: String,
    pub(crate) app_secret: String,
    pub(crate) crypto: Option<MessageCrypto>,
    pub(crate) http: reqwest::Client,
    pub(crate) api_base: String,
    pub(crate) file_base: String,
    pub(crate) sns_base: String,
    pub(crate) tokens: Option<TokenBroker>,
    pub(crate) tickets: Option<TokenBroker>,
    pub(crate) routes: RwLock<Vec<Route>>,
    pub(crate) user_data: Option<Arc<dyn Any + Send + Sync>>,
}

/// Builder for [`Weixin`].
pub struct WeixinBuilder {
    token: String,
    app_id: String,
    app_secret: String,
    encoding_aes_key: Option<String>,
    store: Option<Arc<dyn CacheStore>>,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
    api_base: String,
    file_base: String,
    sns_base: String,
    timeout: Duration,
}

impl WeixinBuilder {
    fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            encoding_aes_key: None,
            store: None,
            user_data: None,
            api_base: DEFAULT_API_BASE.to_string(),
            file_base: DEFAULT_FILE_BASE.to_string(),
            sns_base: DEFAULT_SNS_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// App id/secret pair. Without it every authenticated REST operation
    /// fails with a configuration error; webhook verification and replies
    /// keep working.
    pub fn credentials(mut self, app_id: &str, app_secret: &str) -> Self {
        self.app_id = app_id.to_string();
        self.app_secret = app_secret.to_string();
        self
    }

    /// 43-character `EncodingAESKey`; enables encrypted-mode webhooks.
    pub fn encoding_aes_key(mut self, key: &str) -> Self {
        self.encoding_aes_key = Some(key.to_string());
        self
    }

    /// Credential store shared across client/process instances.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Opaque application value handed to every handler invocation.
    pub fn user_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.user_data = Some(Arc::new(data));
        self
    }

    /// Override the REST endpoint base (tests, regional gateways).
    pub fn api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    /// Override the media endpoint base.
    pub fn file_base(mut self, base: &str) -> Self {
        self.file_base = base.trim_end_matches('/').to_string();
        self
    }

    /// Override the OAuth endpoint base.
    pub fn sns_base(mut self, base: &str) -> Self {
        self.sns_base = base.trim_end_matches('/').to_string();
        self
    }

    /// Per-call HTTP timeout (default 10s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Weixin> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let crypto = self
            .encoding_aes_key
            .as_deref()
            .map(MessageCrypto::new)
            .transpose()?;

        let (tokens, tickets) = if !self.app_id.is_empty() && !self.app_secret.is_empty() {
            let tokens = TokenBroker::spawn(
                AppTokenSource::new(http.clone(), &self.api_base, &self.app_id, &self.app_secret),
                self.store.clone(),
                format!("weixin:access_token:{}", self.app_id),
            );
            let tickets = TokenBroker::spawn(
                JsTicketSource::new(http.clone(), &self.api_base, tokens.clone()),
                None,
                format!("weixin:jsapi_ticket:{}", self.app_id),
            );
            (Some(tokens), Some(tickets))
        } else {
            (None, None)
        };

        Ok(Weixin {
            inner: Arc::new(Inner {
                token: self.token,
                app_id: self.app_id,
                app_secret: self.app_secret,
                crypto,
                http,
                api_base: self.api_base,
                file_base: self.file_base,
                sns_base: self.sns_base,
                tokens,
                tickets,
                routes: RwLock::new(Vec::new()),
                user_data: self.user_data,
            }),
        })
    }
}

impl Weixin {
    pub fn builder(token: &str) -> WeixinBuilder {
        WeixinBuilder::new(token)
    }

    /// Convenience constructor. Empty `app_id`/`app_secret` yields a
    /// webhook-only client.
    pub fn new(token: &str, app_id: &str, app_secret: &str) -> Result<Self> {
        Self::builder(token).credentials(app_id, app_secret).build()
    }

    pub fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    pub fn app_secret(&self) -> &str {
        &self.inner.app_secret
    }

    /// Opaque application value configured at build time.
    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.user_data.clone()
    }

    pub(crate) fn token_broker(&self) -> Result<&TokenBroker> {
        self.inner
            .tokens
            .as_ref()
            .ok_or_else(|| Error::Config("app id/secret not configured".into()))
    }

    fn ticket_broker(&self) -> Result<&TokenBroker> {
        self.inner
            .tickets
            .as_ref()
            .ok_or_else(|| Error::Config("app id/secret not configured".into()))
    }

    // =========================================================================
    // Credential accessors
    // =========================================================================

    /// A fresh access token, retrying reads up to the attempt bound while
    /// the broker catches up.
    pub async fn access_token(&self) -> Result<AccessToken> {
        let broker = self.token_broker()?;
        for _ in 0..RETRY_MAX {
            let token = broker.read().await?;
            if token.is_fresh() {
                return Ok(token);
            }
        }
        Err(Error::TooManyAttempts("access token".into()))
    }

    /// Force a rotation of the access token and wait for the new value.
    pub async fn refresh_access_token(&self) -> Result<AccessToken> {
        self.token_broker()?.invalidate().await
    }

    /// A fresh JS-API ticket, retrying reads up to the attempt bound.
    pub async fn js_api_ticket(&self) -> Result<String> {
        let broker = self.ticket_broker()?;
        for _ in 0..RETRY_MAX {
            let ticket = broker.read().await?;
            if ticket.is_fresh() {
                return Ok(ticket.token);
            }
        }
        Err(Error::TooManyAttempts("jsapi ticket".into()))
    }

    /// Sign a page URL for the JS SDK.
    pub async fn js_signature(
        &self,
        url: &str,
        timestamp: i64,
        noncestr: &str,
    ) -> Result<String> {
        let ticket = self.js_api_ticket().await?;
        Ok(js_sign(&ticket, noncestr, timestamp, url))
    }

    /// OAuth redirect URL sending a user to the consent page.
    pub fn create_redirect_url(&self, redirect: &str, scope: &str, state: &str) -> String {
        REDIRECT_URL
            .replace("{appid}", &self.inner.app_id)
            .replace("{redirect}", &urlencoding::encode(redirect))
            .replace("{scope}", scope)
            .replace("{state}", state)
    }

    // =========================================================================
    // Retrying request executor
    // =========================================================================

    /// Authenticated GET. `url` must end in `access_token=`; the executor
    /// appends the credential. Returns the raw body for type-specific
    /// decoding.
    pub async fn get_request(&self, url: &str) -> Result<Vec<u8>> {
        let broker = self.token_broker()?;
        for _ in 0..RETRY_MAX {
            let token = broker.read().await?;
            if !token.is_fresh() {
                // Attempt slot is spent waiting for the broker to catch up.
                continue;
            }
            let reply = self
                .inner
                .http
                .get(format!("{}{}", url, token.token))
                .send()
                .await?
                .bytes()
                .await?;
            match check_envelope(&reply)? {
                EnvelopeStatus::Success => return Ok(reply.to_vec()),
                EnvelopeStatus::Expired => continue,
            }
        }
        Err(Error::TooManyAttempts(url.to_string()))
    }

    /// Authenticated JSON POST; same contract as [`Weixin::get_request`].
    pub async fn post_request(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let broker = self.token_broker()?;
        for _ in 0..RETRY_MAX {
            let token = broker.read().await?;
            if !token.is_fresh() {
                continue;
            }
            let reply = self
                .inner
                .http
                .post(format!("{}{}", url, token.token))
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/json; charset=utf-8",
                )
                .body(body.clone())
                .send()
                .await?
                .bytes()
                .await?;
            match check_envelope(&reply)? {
                EnvelopeStatus::Success => return Ok(reply.to_vec()),
                EnvelopeStatus::Expired => continue,
            }
        }
        Err(Error::TooManyAttempts(url.to_string()))
    }

    pub(crate) fn api_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.inner.api_base, path_and_query)
    }

    pub(crate) fn file_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.inner.file_base, path_and_query)
    }

    pub(crate) fn sns_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.inner.sns_base, path_and_query)
    }
}

pub(crate) enum EnvelopeStatus {
    Success,
    Expired,
}

/// Interpret the `{errcode, errmsg}` envelope shared by REST responses.
pub(crate) fn check_envelope(body: &[u8]) -> Result<EnvelopeStatus> {
    let envelope: ResponseEnvelope = serde_json::from_slice(body)?;
    match envelope.error_code {
        0 => Ok(EnvelopeStatus::Success),
        ERR_TOKEN_EXPIRED => {
            debug!("access token rejected with 42001, retrying with a re-read credential");
            Ok(EnvelopeStatus::Expired)
        }
        code => Err(Error::Api {
            code,
            message: envelope.error_message,
        }),
    }
}

/// JSON-encode an outbound body.
///
/// Unlike some platform SDKs there is no entity-unescaping pass here:
/// serde_json leaves `<`, `>` and `&` literal, which is what the platform
/// requires.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// JS SDK signature: SHA-1 over the fixed-order query string.
pub(crate) fn js_sign(ticket: &str, noncestr: &str, timestamp: i64, url: &str) -> String {
    let payload = format!(
        "jsapi_ticket={}&noncestr={}&timestamp={}&url={}",
        ticket, noncestr, timestamp, url
    );
    hex::encode(Sha1::digest(payload.as_bytes()))
}
