//! Temporary media upload and download.
//!
//! These go through the media endpoint base rather than the REST base. A
//! download is only an error envelope when the platform answers with
//! `text/plain`; any other content type is the media blob itself.

use std::path::Path;

use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::client::{EnvelopeStatus, Weixin, check_envelope};
use crate::error::{Error, Result};
use crate::token::RETRY_MAX;

#[derive(serde::Deserialize)]
struct UploadResponse {
    #[serde(default)]
    media_id: Option<String>,
    #[serde(default)]
    thumb_media_id: Option<String>,
}

impl Weixin {
    /// Upload a temporary media blob; returns the platform media id.
    ///
    /// `media_type` is one of the `MEDIA_TYPE_*` constants. Thumbnails come
    /// back under a dedicated response key, which is folded into the same
    /// return value.
    pub async fn upload_media(
        &self,
        media_type: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        let broker = self.token_broker()?;
        let url = self.file_url(&format!("/upload?type={}&access_token=", media_type));
        for _ in 0..RETRY_MAX {
            let token = broker.read().await?;
            if !token.is_fresh() {
                continue;
            }
            // multipart forms are single-use, so each attempt rebuilds one.
            let part = reqwest::multipart::Part::bytes(data.clone())
                .file_name(filename.to_string())
                .mime_str("application/octet-stream")
                .map_err(Error::Transport)?;
            let form = reqwest::multipart::Form::new().part("media", part);

            let reply = self
                .inner
                .http
                .post(format!("{}{}", url, token.token))
                .multipart(form)
                .send()
                .await?
                .bytes()
                .await?;
            match check_envelope(&reply)? {
                EnvelopeStatus::Expired => continue,
                EnvelopeStatus::Success => {
                    let response: UploadResponse = serde_json::from_slice(&reply)?;
                    return response
                        .media_id
                        .or(response.thumb_media_id)
                        .ok_or_else(|| Error::Api {
                            code: -1,
                            message: "upload response carried no media id".into(),
                        });
                }
            }
        }
        Err(Error::TooManyAttempts(url))
    }

    /// Upload a temporary media blob from a file on disk.
    pub async fn upload_media_from_file<P: AsRef<Path>>(
        &self,
        media_type: &str,
        path: P,
    ) -> Result<String> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Config(format!("not a file path: {}", path.display())))?
            .to_string();
        let data = tokio::fs::read(path).await?;
        self.upload_media(media_type, &filename, data).await
    }

    /// Download a temporary media blob into `sink`.
    pub async fn download_media<W>(&self, media_id: &str, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let broker = self.token_broker()?;
        let url = self.file_url(&format!("/get?media_id={}&access_token=", media_id));
        for _ in 0..RETRY_MAX {
            let token = broker.read().await?;
            if !token.is_fresh() {
                continue;
            }
            let response = self
                .inner
                .http
                .get(format!("{}{}", url, token.token))
                .send()
                .await?;

            let is_envelope = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.starts_with("text/plain"));

            if is_envelope {
                let reply = response.bytes().await?;
                match check_envelope(&reply)? {
                    EnvelopeStatus::Expired => continue,
                    // A zero envelope on a download is unexpected but benign.
                    EnvelopeStatus::Success => {
                        debug!("download answered with a success envelope and no media body");
                        return Ok(());
                    }
                }
            }

            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                sink.write_all(&chunk?).await?;
            }
            sink.flush().await?;
            return Ok(());
        }
        Err(Error::TooManyAttempts(url))
    }

    /// Download a temporary media blob to a file on disk.
    pub async fn download_media_to_file<P: AsRef<Path>>(
        &self,
        media_id: &str,
        path: P,
    ) -> Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        self.download_media(media_id, &mut file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MEDIA_TYPE_IMAGE;
    use mockito::Matcher;

    async fn client_with(server: &mockito::Server) -> Weixin {
        Weixin::builder("t")
            .credentials("appid", "secret")
            .api_base(&server.url())
            .file_base(&server.url())
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
    async fn upload_returns_media_id() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        let mock = server
            .mock("POST", Matcher::Regex(r"^/upload\?type=image".into()))
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data".into()),
            )
            .with_body(r#"{"type":"image","media_id":"MID1","created_at":1234567890}"#)
            .expect(1)
            .create_async()
            .await;

        let wx = client_with(&server).await;
        let media_id = wx
            .upload_media(MEDIA_TYPE_IMAGE, "pic.jpg", b"jpegdata".to_vec())
            .await
            .unwrap();
        assert_eq!(media_id, "MID1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_folds_thumb_media_id() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        server
            .mock("POST", Matcher::Regex(r"^/upload\?type=thumb".into()))
            .with_body(r#"{"type":"thumb","thumb_media_id":"THUMB1","created_at":1}"#)
            .create_async()
            .await;

        let wx = client_with(&server).await;
        let media_id = wx
            .upload_media("thumb", "t.jpg", b"jpegdata".to_vec())
            .await
            .unwrap();
        assert_eq!(media_id, "THUMB1");
    }

    #[tokio::test]
    async fn upload_retries_expired_sentinel() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        let mock = server
            .mock("POST", Matcher::Regex(r"^/upload".into()))
            .with_body(r#"{"errcode":42001,"errmsg":"access_token expired"}"#)
            .expect(3)
            .create_async()
            .await;

        let wx = client_with(&server).await;
        let err = wx
            .upload_media(MEDIA_TYPE_IMAGE, "pic.jpg", b"jpegdata".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyAttempts(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn download_streams_binary_body() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        server
            .mock("GET", Matcher::Regex(r"^/get\?media_id=MID1".into()))
            .with_header("content-type", "image/jpeg")
            .with_body(b"jpegdata".as_slice())
            .create_async()
            .await;

        let wx = client_with(&server).await;
        let mut sink = Vec::new();
        wx.download_media("MID1", &mut sink).await.unwrap();
        assert_eq!(sink, b"jpegdata");
    }

    #[tokio::test]
    async fn download_surfaces_text_plain_envelope_errors() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        server
            .mock("GET", Matcher::Regex(r"^/get\?media_id=missing".into()))
            .with_header("content-type", "text/plain")
            .with_body(r#"{"errcode":40007,"errmsg":"invalid media_id"}"#)
            .create_async()
            .await;

        let wx = client_with(&server).await;
        let mut sink = Vec::new();
        let err = wx.download_media("missing", &mut sink).await.unwrap_err();
        assert!(matches!(err, Error::Api { code: 40007, .. }));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn download_to_file_writes_disk() {
        let mut server = mockito::Server::new_async().await;
        token_mock(&mut server);
        server
            .mock("GET", Matcher::Regex(r"^/get\?media_id=MID1".into()))
            .with_header("content-type", "image/jpeg")
            .with_body(b"jpegdata".as_slice())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.jpg");
        let wx = client_with(&server).await;
        wx.download_media_to_file("MID1", &path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"jpegdata");
    }
}
