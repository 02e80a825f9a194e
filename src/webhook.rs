//! Webhook HTTP surface: the verification probe and event deliveries.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::{debug, warn};

use crate::client::Weixin;
use crate::crypto::MessageCrypto;
use crate::types::{EncryptedEnvelope, EventParams, Request, VerifyParams};

impl Weixin {
    /// Webhook endpoint as a mountable router. Nest it at the callback path
    /// configured on the platform.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(verify).post(receive))
            .with_state(self.clone())
    }
}

/// GET: the platform probes the endpoint by asking for its `echostr` back.
async fn verify(State(wx): State<Weixin>, Query(params): Query<VerifyParams>) -> Response {
    if !MessageCrypto::verify(
        &wx.inner.token,
        &params.timestamp,
        &params.nonce,
        &params.signature,
    ) {
        warn!("verification probe with a bad signature");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    params.echostr.into_response()
}

/// POST: a message or event delivery.
async fn receive(
    State(wx): State<Weixin>,
    Query(params): Query<EventParams>,
    body: String,
) -> Response {
    if !MessageCrypto::verify(
        &wx.inner.token,
        &params.timestamp,
        &params.nonce,
        &params.signature,
    ) {
        warn!("delivery with a bad signature");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let xml = match decode_payload(&wx, &params, body) {
        Ok(xml) => xml,
        Err(response) => return response,
    };

    let msg: Request = match serde_xml_rs::from_str(&xml) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("undecodable delivery payload: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    debug!(key = %msg.routing_key(), from = %msg.from_user_name, "delivery");
    match wx.dispatch(msg).await {
        Some(reply) => reply.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Unwrap an encrypted-mode delivery down to the inner XML document.
///
/// With no AES key configured the body passes through untouched. With one,
/// an `Encrypt` element must carry a valid message signature before any
/// decryption happens; an envelope without it (compatibility mode) also
/// passes through.
fn decode_payload(
    wx: &Weixin,
    params: &EventParams,
    body: String,
) -> std::result::Result<String, Response> {
    let Some(crypto) = &wx.inner.crypto else {
        return Ok(body);
    };

    let envelope: EncryptedEnvelope = match serde_xml_rs::from_str(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("undecodable delivery envelope: {}", e);
            return Err(StatusCode::BAD_REQUEST.into_response());
        }
    };
    let Some(encrypted) = envelope.encrypt.filter(|e| !e.is_empty()) else {
        return Ok(body);
    };

    let Some(msg_signature) = params.msg_signature.as_deref() else {
        warn!("encrypted delivery without msg_signature");
        return Err(StatusCode::BAD_REQUEST.into_response());
    };
    if !MessageCrypto::verify_message(
        &wx.inner.token,
        &params.timestamp,
        &params.nonce,
        &encrypted,
        msg_signature,
    ) {
        warn!("encrypted delivery with a bad msg_signature");
        return Err(StatusCode::BAD_REQUEST.into_response());
    }

    match crypto.decrypt(&encrypted) {
        Ok(xml) => Ok(xml),
        Err(e) => {
            warn!("delivery decryption failed: {}", e);
            Err(StatusCode::BAD_REQUEST.into_response())
        }
    }
}
