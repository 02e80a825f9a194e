//! Server-side SDK for WeChat Official Accounts.
//!
//! The [`Weixin`] client bundles three things: a webhook endpoint
//! (verification probe, signature checks, optional AES decryption and
//! pattern-based routing), a REST surface (messages, menus, QR scenes,
//! media, profiles) and a background access-token broker that keeps the
//! shared credential fresh across all of it.
//!
//! ```no_run
//! use weixin_mp::{ResponseWriter, Weixin};
//! use weixin_mp::types::MSG_TYPE_TEXT;
//!
//! #[tokio::main]
//! async fn main() -> weixin_mp::Result<()> {
//!     let wx = Weixin::builder("my-webhook-token")
//!         .credentials("my-app-id", "my-app-secret")
//!         .build()?;
//!
//!     wx.handle_func(MSG_TYPE_TEXT, |w: ResponseWriter, msg| async move {
//!         w.reply_text(&format!("you said: {}", msg.content.unwrap_or_default()));
//!     })?;
//!
//!     let app = axum::Router::new().nest("/wechat", wx.router());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

mod api;
mod cache;
mod client;
mod config;
mod crypto;
mod error;
mod media;
mod post;
mod reply;
mod router;
mod token;
pub mod types;
mod webhook;

pub use cache::{CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use client::{Weixin, WeixinBuilder};
pub use config::Config;
pub use crypto::MessageCrypto;
pub use error::{Error, Result};
pub use reply::ResponseWriter;
pub use token::{AccessToken, TokenBroker};
pub use types::{Article, Menu, MenuButton, Music, Request, TemplateData, TemplateField};

pub mod prelude {
    //! Common imports for handler-heavy application code.
    pub use crate::types::*;
    pub use crate::{Error, Result, ResponseWriter, Weixin};
}
