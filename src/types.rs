//! Wire types for the WeChat Official Account platform.
//!
//! Inbound webhook payloads are XML with CDATA fields; REST payloads are
//! JSON. The inbound [`Request`] is a flat union of every per-type field:
//! only the subset selected by `msg_type` is meaningful for a given event.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Message and event type constants
// =============================================================================

/// The generic event category; routed as `event.<Event>`.
pub const MSG_EVENT: &str = "event";

pub const EVENT_SUBSCRIBE: &str = "subscribe";
pub const EVENT_UNSUBSCRIBE: &str = "unsubscribe";
pub const EVENT_SCAN: &str = "SCAN";
pub const EVENT_VIEW: &str = "VIEW";
pub const EVENT_CLICK: &str = "CLICK";
pub const EVENT_LOCATION: &str = "LOCATION";
pub const EVENT_TEMPLATE_SENT: &str = "TEMPLATESENDJOBFINISH";

/// Route patterns, matched anchored against the routing key.
pub const MSG_TYPE_DEFAULT: &str = ".*";
pub const MSG_TYPE_TEXT: &str = "text";
pub const MSG_TYPE_IMAGE: &str = "image";
pub const MSG_TYPE_VOICE: &str = "voice";
pub const MSG_TYPE_VIDEO: &str = "video";
pub const MSG_TYPE_SHORT_VIDEO: &str = "shortvideo";
pub const MSG_TYPE_LOCATION: &str = "location";
pub const MSG_TYPE_LINK: &str = "link";
pub const MSG_TYPE_EVENT: &str = "event\\..*";
pub const MSG_TYPE_EVENT_SUBSCRIBE: &str = "event\\.subscribe";
pub const MSG_TYPE_EVENT_UNSUBSCRIBE: &str = "event\\.unsubscribe";
pub const MSG_TYPE_EVENT_SCAN: &str = "event\\.SCAN";
pub const MSG_TYPE_EVENT_VIEW: &str = "event\\.VIEW";
pub const MSG_TYPE_EVENT_CLICK: &str = "event\\.CLICK";
pub const MSG_TYPE_EVENT_LOCATION: &str = "event\\.LOCATION";
pub const MSG_TYPE_EVENT_TEMPLATE_SENT: &str = "event\\.TEMPLATESENDJOBFINISH";

/// Media types accepted by the upload endpoint.
pub const MEDIA_TYPE_IMAGE: &str = "image";
pub const MEDIA_TYPE_VOICE: &str = "voice";
pub const MEDIA_TYPE_VIDEO: &str = "video";
pub const MEDIA_TYPE_THUMB: &str = "thumb";

/// OAuth redirect scopes.
pub const REDIRECT_SCOPE_BASIC: &str = "snsapi_base";
pub const REDIRECT_SCOPE_USER_INFO: &str = "snsapi_userinfo";

// =============================================================================
// Webhook query parameters
// =============================================================================

/// Verification probe parameters (GET request from the platform).
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyParams {
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub echostr: String,
}

/// Event delivery parameters (POST request from the platform).
#[derive(Debug, Clone, Deserialize)]
pub struct EventParams {
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
    #[serde(default)]
    pub encrypt_type: Option<String>,
    #[serde(default)]
    pub msg_signature: Option<String>,
}

/// Outer XML envelope carried by encrypted-mode deliveries.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "xml")]
pub struct EncryptedEnvelope {
    #[serde(rename = "ToUserName", default)]
    pub to_user_name: String,
    #[serde(rename = "Encrypt", default)]
    pub encrypt: Option<String>,
}

// =============================================================================
// Inbound event
// =============================================================================

/// Decoded inbound message or event.
///
/// Every field beyond the header is optional on the wire; `msg_type` selects
/// which ones the platform actually populated.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename = "xml")]
pub struct Request {
    #[serde(rename = "ToUserName", default)]
    pub to_user_name: String,
    #[serde(rename = "FromUserName", default)]
    pub from_user_name: String,
    #[serde(rename = "CreateTime", default)]
    pub create_time: i64,
    #[serde(rename = "MsgType", default)]
    pub msg_type: String,
    #[serde(rename = "MsgId", default)]
    pub msg_id: Option<i64>,
    #[serde(rename = "Content", default)]
    pub content: Option<String>,
    #[serde(rename = "PicUrl", default)]
    pub pic_url: Option<String>,
    #[serde(rename = "MediaId", default)]
    pub media_id: Option<String>,
    #[serde(rename = "Format", default)]
    pub format: Option<String>,
    #[serde(rename = "Recognition", default)]
    pub recognition: Option<String>,
    #[serde(rename = "ThumbMediaId", default)]
    pub thumb_media_id: Option<String>,
    #[serde(rename = "Location_X", default)]
    pub location_x: Option<f64>,
    #[serde(rename = "Location_Y", default)]
    pub location_y: Option<f64>,
    #[serde(rename = "Scale", default)]
    pub scale: Option<f64>,
    #[serde(rename = "Label", default)]
    pub label: Option<String>,
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Url", default)]
    pub url: Option<String>,
    #[serde(rename = "Event", default)]
    pub event: Option<String>,
    #[serde(rename = "EventKey", default)]
    pub event_key: Option<String>,
    #[serde(rename = "Ticket", default)]
    pub ticket: Option<String>,
    #[serde(rename = "Latitude", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude", default)]
    pub longitude: Option<f64>,
    #[serde(rename = "Precision", default)]
    pub precision: Option<f64>,
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
}

impl Request {
    /// Routing key: the message type, or `event.<Event>` for the generic
    /// event category.
    pub fn routing_key(&self) -> String {
        if self.msg_type == MSG_EVENT {
            format!("{}.{}", MSG_EVENT, self.event.as_deref().unwrap_or_default())
        } else {
            self.msg_type.clone()
        }
    }
}

// =============================================================================
// REST response envelope
// =============================================================================

/// Structured error wrapper present on most REST responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "errcode", default)]
    pub error_code: i64,
    #[serde(rename = "errmsg", default)]
    pub error_message: String,
}

// =============================================================================
// Outbound payload types
// =============================================================================

/// Music message payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Music {
    pub title: String,
    pub description: String,
    #[serde(rename = "musicurl")]
    pub music_url: String,
    #[serde(rename = "hqmusicurl")]
    pub hq_music_url: String,
    pub thumb_media_id: String,
}

/// Single news article.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub description: String,
    #[serde(rename = "picurl")]
    pub pic_url: String,
    pub url: String,
}

// =============================================================================
// QR scenes
// =============================================================================

const SHOW_QR_SCENE_URL: &str = "https://mp.weixin.qq.com/cgi-bin/showqrcode";

/// Created QR scene.
#[derive(Debug, Clone, Deserialize)]
pub struct QrScene {
    pub ticket: String,
    #[serde(default)]
    pub expire_seconds: i64,
    #[serde(default)]
    pub url: Option<String>,
}

impl QrScene {
    /// URL serving the QR code image for this scene.
    pub fn to_url(&self) -> String {
        format!("{}?ticket={}", SHOW_QR_SCENE_URL, self.ticket)
    }
}

// =============================================================================
// Menus
// =============================================================================

/// Custom menu.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Menu {
    #[serde(rename = "button", default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<MenuButton>,
}

/// Menu button; `sub_buttons` nests one level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuButton {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub button_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(rename = "sub_button", default, skip_serializing_if = "Vec::is_empty")]
    pub sub_buttons: Vec<MenuButton>,
    #[serde(rename = "appid", default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(rename = "pagepath", default, skip_serializing_if = "Option::is_none")]
    pub page_path: Option<String>,
}

/// Button types accepted by the menu API.
pub const MENU_BUTTON_TYPE_KEY: &str = "click";
pub const MENU_BUTTON_TYPE_URL: &str = "view";
pub const MENU_BUTTON_TYPE_SCANCODE_PUSH: &str = "scancode_push";
pub const MENU_BUTTON_TYPE_SCANCODE_WAITMSG: &str = "scancode_waitmsg";
pub const MENU_BUTTON_TYPE_PIC_SYSPHOTO: &str = "pic_sysphoto";
pub const MENU_BUTTON_TYPE_PIC_PHOTO_OR_ALBUM: &str = "pic_photo_or_album";
pub const MENU_BUTTON_TYPE_PIC_WEIXIN: &str = "pic_weixin";
pub const MENU_BUTTON_TYPE_LOCATION_SELECT: &str = "location_select";
pub const MENU_BUTTON_TYPE_MEDIA_ID: &str = "media_id";
pub const MENU_BUTTON_TYPE_VIEW_LIMITED: &str = "view_limited";
pub const MENU_BUTTON_TYPE_MINI_PROGRAM: &str = "miniprogram";

// =============================================================================
// Users
// =============================================================================

/// OAuth access token issued for a single user.
#[derive(Debug, Clone, Deserialize)]
pub struct UserAccessToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(rename = "expires_in", default)]
    pub expire_seconds: i64,
    #[serde(rename = "openid", default)]
    pub open_id: String,
    #[serde(default)]
    pub scope: String,
    #[serde(rename = "unionid", default)]
    pub union_id: Option<String>,
}

/// Follower profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub subscribe: i64,
    #[serde(default)]
    pub language: String,
    #[serde(rename = "openid", default)]
    pub open_id: String,
    #[serde(rename = "unionid", default)]
    pub union_id: Option<String>,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub sex: i64,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub province: String,
    #[serde(rename = "headimgurl", default)]
    pub head_image_url: String,
    #[serde(default)]
    pub subscribe_time: i64,
    #[serde(default)]
    pub remark: String,
    #[serde(rename = "groupid", default)]
    pub group_id: i64,
}

// =============================================================================
// Materials
// =============================================================================

/// Permanent material entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Material {
    #[serde(default)]
    pub media_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub update_time: i64,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<MaterialContent>,
}

/// News content of a material entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaterialContent {
    #[serde(default)]
    pub news_item: Vec<MaterialNewsItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaterialNewsItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumb_media_id: String,
    #[serde(default)]
    pub show_cover_pic: i64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content_source_url: String,
}

/// Batched material listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Materials {
    #[serde(default)]
    pub total_count: i64,
    #[serde(default)]
    pub item_count: i64,
    #[serde(rename = "item", default)]
    pub items: Vec<Material>,
}

// =============================================================================
// Template messages
// =============================================================================

/// Template message data: field name → value/color.
pub type TemplateData = HashMap<String, TemplateField>;

/// One field of a template message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateField {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Template delivery status carried by the `TEMPLATESENDJOBFINISH` event.
pub const TEMPLATE_SENT_STATUS_SUCCESS: &str = "success";
pub const TEMPLATE_SENT_STATUS_USER_BLOCK: &str = "failed:user block";
pub const TEMPLATE_SENT_STATUS_SYSTEM_FAILED: &str = "failed:system failed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_message() {
        let xml = r#"<xml>
            <ToUserName><![CDATA[gh_abc]]></ToUserName>
            <FromUserName><![CDATA[openid123]]></FromUserName>
            <CreateTime>1234567890</CreateTime>
            <MsgType><![CDATA[text]]></MsgType>
            <Content><![CDATA[hello]]></Content>
            <MsgId>4242</MsgId>
        </xml>"#;

        let msg: Request = serde_xml_rs::from_str(xml).unwrap();
        assert_eq!(msg.to_user_name, "gh_abc");
        assert_eq!(msg.from_user_name, "openid123");
        assert_eq!(msg.create_time, 1234567890);
        assert_eq!(msg.msg_type, "text");
        assert_eq!(msg.content.as_deref(), Some("hello"));
        assert_eq!(msg.msg_id, Some(4242));
        assert_eq!(msg.routing_key(), "text");
    }

    #[test]
    fn parse_subscribe_event() {
        let xml = r#"<xml>
            <ToUserName><![CDATA[gh_abc]]></ToUserName>
            <FromUserName><![CDATA[openid123]]></FromUserName>
            <CreateTime>1234567890</CreateTime>
            <MsgType><![CDATA[event]]></MsgType>
            <Event><![CDATA[subscribe]]></Event>
            <EventKey><![CDATA[qrscene_42]]></EventKey>
        </xml>"#;

        let msg: Request = serde_xml_rs::from_str(xml).unwrap();
        assert_eq!(msg.routing_key(), "event.subscribe");
        assert_eq!(msg.event_key.as_deref(), Some("qrscene_42"));
    }

    #[test]
    fn parse_encrypted_envelope() {
        let xml = r#"<xml>
            <ToUserName><![CDATA[gh_abc]]></ToUserName>
            <Encrypt><![CDATA[b64cipher==]]></Encrypt>
        </xml>"#;

        let env: EncryptedEnvelope = serde_xml_rs::from_str(xml).unwrap();
        assert_eq!(env.to_user_name, "gh_abc");
        assert_eq!(env.encrypt.as_deref(), Some("b64cipher=="));
    }

    #[test]
    fn menu_round_trip_skips_empty() {
        let menu = Menu {
            buttons: vec![MenuButton {
                name: "today".into(),
                button_type: Some(MENU_BUTTON_TYPE_KEY.into()),
                key: Some("V1001_TODAY".into()),
                ..Default::default()
            }],
        };
        let json = serde_json::to_string(&menu).unwrap();
        assert!(json.contains(r#""type":"click""#));
        assert!(!json.contains("sub_button"));

        let parsed: Menu = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.buttons[0].key.as_deref(), Some("V1001_TODAY"));
    }

    #[test]
    fn qr_scene_url() {
        let qr = QrScene {
            ticket: "tkt".into(),
            expire_seconds: 60,
            url: None,
        };
        assert_eq!(
            qr.to_url(),
            "https://mp.weixin.qq.com/cgi-bin/showqrcode?ticket=tkt"
        );
    }

    #[test]
    fn envelope_defaults_to_success() {
        let env: ResponseEnvelope = serde_json::from_str(r#"{"foo":1}"#).unwrap();
        assert_eq!(env.error_code, 0);
    }
}
