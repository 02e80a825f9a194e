//! Environment-based configuration.

use std::env;

use tracing::debug;

use crate::client::{Weixin, WeixinBuilder};
use crate::error::{Error, Result};

/// Account credentials loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub encoding_aes_key: Option<String>,
}

impl Config {
    /// Load from the environment, honoring a `.env` file if present.
    ///
    /// `WECHAT_TOKEN` is required. `WECHAT_APP_ID`/`WECHAT_APP_SECRET`
    /// enable the REST surface and `WECHAT_ENCODING_AES_KEY` enables
    /// encrypted-mode webhooks.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine; real env vars still apply.
        if dotenvy::dotenv().is_ok() {
            debug!("loaded configuration from .env");
        }

        let token = env::var("WECHAT_TOKEN")
            .map_err(|_| Error::Config("WECHAT_TOKEN is not set".into()))?;

        Ok(Self {
            token,
            app_id: env::var("WECHAT_APP_ID").ok(),
            app_secret: env::var("WECHAT_APP_SECRET").ok(),
            encoding_aes_key: env::var("WECHAT_ENCODING_AES_KEY").ok(),
        })
    }

    /// A builder pre-filled from this configuration, for callers that want
    /// to add a cache store or user data before building.
    pub fn builder(&self) -> WeixinBuilder {
        let mut builder = Weixin::builder(&self.token);
        if let (Some(app_id), Some(app_secret)) = (&self.app_id, &self.app_secret) {
            builder = builder.credentials(app_id, app_secret);
        }
        if let Some(key) = &self.encoding_aes_key {
            builder = builder.encoding_aes_key(key);
        }
        builder
    }
}

impl Weixin {
    /// Build a client from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        config.builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_carries_credentials() {
        let config = Config {
            token: "t".into(),
            app_id: Some("appid".into()),
            app_secret: Some("secret".into()),
            encoding_aes_key: None,
        };
        let wx = Weixin::from_config(&config).unwrap();
        assert_eq!(wx.app_id(), "appid");
        assert_eq!(wx.app_secret(), "secret");
    }

    #[tokio::test]
    async fn partial_credentials_yield_webhook_only_client() {
        let config = Config {
            token: "t".into(),
            app_id: Some("appid".into()),
            app_secret: None,
            encoding_aes_key: None,
        };
        let wx = Weixin::from_config(&config).unwrap();
        assert!(wx.access_token().await.is_err());
    }
}
