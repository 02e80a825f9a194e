//! Synchronous webhook replies and the per-event [`ResponseWriter`].
//!
//! Replies are rendered with fixed templates rather than an XML serializer;
//! the platform parser is strict about element order and CDATA framing, and
//! the templates are the exact accepted form.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use crate::client::Weixin;
use crate::error::Result;
use crate::types::{Article, Music, TemplateData};

const REPLY_HEADER: &str = "<ToUserName><![CDATA[{to}]]></ToUserName><FromUserName><![CDATA[{from}]]></FromUserName><CreateTime>{created}</CreateTime>";

/// Reply writer handed to every route handler.
///
/// Addressing is already reversed from the inbound event: the sender becomes
/// the reply target. At most one reply is rendered per delivery; the last
/// call wins, and with no call at all the delivery is answered empty.
#[derive(Clone)]
pub struct ResponseWriter {
    wx: Weixin,
    to_user: String,
    from_user: String,
    body: Arc<Mutex<Option<String>>>,
}

impl ResponseWriter {
    pub(crate) fn new(wx: Weixin, to_user: &str, from_user: &str) -> Self {
        Self {
            wx,
            to_user: to_user.to_string(),
            from_user: from_user.to_string(),
            body: Arc::new(Mutex::new(None)),
        }
    }

    /// The rendered reply body, if any handler produced one.
    pub(crate) fn take_body(&self) -> Option<String> {
        self.body.lock().take()
    }

    fn header(&self) -> String {
        REPLY_HEADER
            .replace("{to}", &self.to_user)
            .replace("{from}", &self.from_user)
            .replace("{created}", &chrono::Utc::now().timestamp().to_string())
    }

    fn reply(&self, body: String) {
        *self.body.lock() = Some(body);
    }

    /// The shared client, for REST calls from inside a handler.
    pub fn weixin(&self) -> &Weixin {
        &self.wx
    }

    /// Opaque application value configured at build time.
    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.wx.user_data()
    }

    // =========================================================================
    // Synchronous replies
    // =========================================================================

    /// Acknowledge without a visible reply.
    pub fn reply_ok(&self) {
        self.reply("success".to_string());
    }

    pub fn reply_text(&self, text: &str) {
        self.reply(format!(
            "<xml>{}<MsgType><![CDATA[text]]></MsgType><Content><![CDATA[{}]]></Content></xml>",
            self.header(),
            text
        ));
    }

    pub fn reply_image(&self, media_id: &str) {
        self.reply(format!(
            "<xml>{}<MsgType><![CDATA[image]]></MsgType><Image><MediaId><![CDATA[{}]]></MediaId></Image></xml>",
            self.header(),
            media_id
        ));
    }

    pub fn reply_voice(&self, media_id: &str) {
        self.reply(format!(
            "<xml>{}<MsgType><![CDATA[voice]]></MsgType><Voice><MediaId><![CDATA[{}]]></MediaId></Voice></xml>",
            self.header(),
            media_id
        ));
    }

    pub fn reply_video(&self, media_id: &str, title: &str, description: &str) {
        self.reply(format!(
            "<xml>{}<MsgType><![CDATA[video]]></MsgType><Video><MediaId><![CDATA[{}]]></MediaId><Title><![CDATA[{}]]></Title><Description><![CDATA[{}]]></Description></Video></xml>",
            self.header(),
            media_id,
            title,
            description
        ));
    }

    pub fn reply_music(&self, music: &Music) {
        self.reply(format!(
            "<xml>{}<MsgType><![CDATA[music]]></MsgType><Music><Title><![CDATA[{}]]></Title><Description><![CDATA[{}]]></Description><MusicUrl><![CDATA[{}]]></MusicUrl><HQMusicUrl><![CDATA[{}]]></HQMusicUrl><ThumbMediaId><![CDATA[{}]]></ThumbMediaId></Music></xml>",
            self.header(),
            music.title,
            music.description,
            music.music_url,
            music.hq_music_url,
            music.thumb_media_id
        ));
    }

    /// Article carousel; the platform caps this at 10 items.
    pub fn reply_news(&self, articles: &[Article]) {
        let mut items = String::new();
        for article in articles {
            // The stray space after </Title> is part of the accepted form.
            items.push_str(&format!(
                "<item><Title><![CDATA[{}]]></Title> <Description><![CDATA[{}]]></Description><PicUrl><![CDATA[{}]]></PicUrl><Url><![CDATA[{}]]></Url></item>",
                article.title, article.description, article.pic_url, article.url
            ));
        }
        self.reply(format!(
            "<xml>{}<MsgType><![CDATA[news]]></MsgType><ArticleCount>{}</ArticleCount><Articles>{}</Articles></xml>",
            self.header(),
            articles.len(),
            items
        ));
    }

    /// Hand the conversation to a customer-service account.
    ///
    /// The service account id takes the ToUserName slot.
    pub fn transfer_customer_service(&self, service_id: &str) {
        self.reply(format!(
            "<xml><ToUserName><![CDATA[{}]]></ToUserName><FromUserName><![CDATA[{}]]></FromUserName><CreateTime>{}</CreateTime><MsgType><![CDATA[transfer_customer_service]]></MsgType></xml>",
            service_id,
            self.from_user,
            chrono::Utc::now().timestamp()
        ));
    }

    // =========================================================================
    // Asynchronous pushes to the same subscriber
    // =========================================================================

    pub async fn post_text(&self, text: &str) -> Result<()> {
        self.wx.post_text(&self.to_user, text).await
    }

    pub async fn post_image(&self, media_id: &str) -> Result<()> {
        self.wx.post_image(&self.to_user, media_id).await
    }

    pub async fn post_voice(&self, media_id: &str) -> Result<()> {
        self.wx.post_voice(&self.to_user, media_id).await
    }

    pub async fn post_video(&self, media_id: &str, title: &str, description: &str) -> Result<()> {
        self.wx
            .post_video(&self.to_user, media_id, title, description)
            .await
    }

    pub async fn post_music(&self, music: &Music) -> Result<()> {
        self.wx.post_music(&self.to_user, music).await
    }

    pub async fn post_news(&self, articles: &[Article]) -> Result<()> {
        self.wx.post_news(&self.to_user, articles).await
    }

    pub async fn post_template_message(
        &self,
        template_id: &str,
        url: &str,
        data: &TemplateData,
    ) -> Result<i64> {
        self.wx
            .post_template_message(&self.to_user, template_id, url, data)
            .await
    }

    // =========================================================================
    // Media forwarders
    // =========================================================================

    pub async fn upload_media(
        &self,
        media_type: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.wx.upload_media(media_type, filename, data).await
    }

    pub async fn upload_media_from_file<P: AsRef<Path>>(
        &self,
        media_type: &str,
        path: P,
    ) -> Result<String> {
        self.wx.upload_media_from_file(media_type, path).await
    }

    pub async fn download_media<W>(&self, media_id: &str, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.wx.download_media(media_id, sink).await
    }

    pub async fn download_media_to_file<P: AsRef<Path>>(
        &self,
        media_id: &str,
        path: P,
    ) -> Result<()> {
        self.wx.download_media_to_file(media_id, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn writer() -> ResponseWriter {
        let wx = Weixin::builder("t").build().unwrap();
        ResponseWriter::new(wx, "openid123", "gh_abc")
    }

    #[tokio::test]
    async fn text_reply_matches_wire_form() {
        let w = writer().await;
        w.reply_text("hi there");
        let body = w.take_body().unwrap();
        assert!(body.starts_with("<xml><ToUserName><![CDATA[openid123]]></ToUserName><FromUserName><![CDATA[gh_abc]]></FromUserName><CreateTime>"));
        assert!(body.ends_with(
            "</CreateTime><MsgType><![CDATA[text]]></MsgType><Content><![CDATA[hi there]]></Content></xml>"
        ));
        // One reply per delivery: the body is consumed.
        assert!(w.take_body().is_none());
    }

    #[tokio::test]
    async fn reply_ok_renders_success() {
        let w = writer().await;
        w.reply_ok();
        assert_eq!(w.take_body().unwrap(), "success");
    }

    #[tokio::test]
    async fn last_reply_wins() {
        let w = writer().await;
        w.reply_text("first");
        w.reply_ok();
        assert_eq!(w.take_body().unwrap(), "success");
    }

    #[tokio::test]
    async fn news_reply_counts_items_and_keeps_item_form() {
        let w = writer().await;
        let articles = vec![
            Article {
                title: "t1".into(),
                description: "d1".into(),
                pic_url: "p1".into(),
                url: "u1".into(),
            },
            Article {
                title: "t2".into(),
                description: "d2".into(),
                pic_url: "p2".into(),
                url: "u2".into(),
            },
        ];
        w.reply_news(&articles);
        let body = w.take_body().unwrap();
        assert!(body.contains("<ArticleCount>2</ArticleCount>"));
        assert!(body.contains(
            "<item><Title><![CDATA[t1]]></Title> <Description><![CDATA[d1]]></Description><PicUrl><![CDATA[p1]]></PicUrl><Url><![CDATA[u1]]></Url></item>"
        ));
    }

    #[tokio::test]
    async fn transfer_addresses_service_account() {
        let w = writer().await;
        w.transfer_customer_service("kf2001@gh_abc");
        let body = w.take_body().unwrap();
        assert!(body.starts_with("<xml><ToUserName><![CDATA[kf2001@gh_abc]]></ToUserName><FromUserName><![CDATA[gh_abc]]></FromUserName>"));
        assert!(body.ends_with("<MsgType><![CDATA[transfer_customer_service]]></MsgType></xml>"));
    }

    #[tokio::test]
    async fn video_and_music_replies_render_all_fields() {
        let w = writer().await;
        w.reply_video("MID", "title", "desc");
        let body = w.take_body().unwrap();
        assert!(body.contains(
            "<Video><MediaId><![CDATA[MID]]></MediaId><Title><![CDATA[title]]></Title><Description><![CDATA[desc]]></Description></Video>"
        ));

        w.reply_music(&Music {
            title: "song".into(),
            description: "d".into(),
            music_url: "mu".into(),
            hq_music_url: "hq".into(),
            thumb_media_id: "th".into(),
        });
        let body = w.take_body().unwrap();
        assert!(body.contains(
            "<Music><Title><![CDATA[song]]></Title><Description><![CDATA[d]]></Description><MusicUrl><![CDATA[mu]]></MusicUrl><HQMusicUrl><![CDATA[hq]]></HQMusicUrl><ThumbMediaId><![CDATA[th]]></ThumbMediaId></Music>"
        ));
    }
}
