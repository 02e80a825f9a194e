//! Account-management REST operations: menus, QR scenes, short URLs,
//! materials, follower profiles, OAuth exchange and the callback IP list.

use serde_json::json;

use crate::client::{Weixin, to_json};
use crate::error::Result;
use crate::types::{Materials, Menu, QrScene, UserAccessToken, UserInfo};

impl Weixin {
    // =========================================================================
    // Menus
    // =========================================================================

    /// Install the account's custom menu, replacing any existing one.
    pub async fn create_menu(&self, menu: &Menu) -> Result<()> {
        let body = to_json(menu)?;
        self.post_request(&self.api_url("/menu/create?access_token="), body)
            .await?;
        Ok(())
    }

    /// Fetch the currently installed menu.
    pub async fn get_menu(&self) -> Result<Menu> {
        let reply = self
            .get_request(&self.api_url("/menu/get?access_token="))
            .await?;

        #[derive(serde::Deserialize)]
        struct GetMenuResponse {
            menu: Menu,
        }
        let response: GetMenuResponse = serde_json::from_slice(&reply)?;
        Ok(response.menu)
    }

    /// Remove the custom menu.
    pub async fn delete_menu(&self) -> Result<()> {
        self.get_request(&self.api_url("/menu/delete?access_token="))
            .await?;
        Ok(())
    }

    // =========================================================================
    // QR scenes
    // =========================================================================

    async fn create_qr(&self, body: Vec<u8>) -> Result<QrScene> {
        let reply = self
            .post_request(&self.api_url("/qrcode/create?access_token="), body)
            .await?;
        Ok(serde_json::from_slice(&reply)?)
    }

    /// Temporary QR scene with a numeric id.
    pub async fn create_qr_scene(&self, scene_id: u32, expire_seconds: u32) -> Result<QrScene> {
        let body = to_json(&json!({
            "expire_seconds": expire_seconds,
            "action_name": "QR_SCENE",
            "action_info": { "scene": { "scene_id": scene_id } },
        }))?;
        self.create_qr(body).await
    }

    /// Temporary QR scene with a string id.
    pub async fn create_qr_scene_by_string(
        &self,
        scene: &str,
        expire_seconds: u32,
    ) -> Result<QrScene> {
        let body = to_json(&json!({
            "expire_seconds": expire_seconds,
            "action_name": "QR_STR_SCENE",
            "action_info": { "scene": { "scene_str": scene } },
        }))?;
        self.create_qr(body).await
    }

    /// Permanent QR scene with a numeric id.
    pub async fn create_qr_limit_scene(&self, scene_id: u32) -> Result<QrScene> {
        let body = to_json(&json!({
            "action_name": "QR_LIMIT_SCENE",
            "action_info": { "scene": { "scene_id": scene_id } },
        }))?;
        self.create_qr(body).await
    }

    /// Permanent QR scene with a string id.
    pub async fn create_qr_limit_scene_by_string(&self, scene: &str) -> Result<QrScene> {
        let body = to_json(&json!({
            "action_name": "QR_LIMIT_STR_SCENE",
            "action_info": { "scene": { "scene_str": scene } },
        }))?;
        self.create_qr(body).await
    }

    // =========================================================================
    // Misc account operations
    // =========================================================================

    /// Shorten a long URL.
    pub async fn short_url(&self, long_url: &str) -> Result<String> {
        let body = to_json(&json!({
            "action": "long2short",
            "long_url": long_url,
        }))?;
        let reply = self
            .post_request(&self.api_url("/shorturl?access_token="), body)
            .await?;

        #[derive(serde::Deserialize)]
        struct ShortUrlResponse {
            #[serde(default)]
            short_url: String,
        }
        let response: ShortUrlResponse = serde_json::from_slice(&reply)?;
        Ok(response.short_url)
    }

    /// Page through permanent materials of one type.
    pub async fn batch_get_material(
        &self,
        material_type: &str,
        offset: u32,
        count: u32,
    ) -> Result<Materials> {
        let body = to_json(&json!({
            "type": material_type,
            "offset": offset,
            "count": count,
        }))?;
        let reply = self
            .post_request(
                &self.api_url("/material/batchget_material?access_token="),
                body,
            )
            .await?;
        Ok(serde_json::from_slice(&reply)?)
    }

    /// Fetch a follower's profile by open id.
    pub async fn get_user_info(&self, open_id: &str) -> Result<UserInfo> {
        let url = self.api_url(&format!(
            "/user/info?openid={}&lang=zh_CN&access_token=",
            open_id
        ));
        let reply = self.get_request(&url).await?;
        Ok(serde_json::from_slice(&reply)?)
    }

    /// Exchange an OAuth authorization code for a user access token.
    ///
    /// This hits the sns endpoint with the app credentials directly; no
    /// broker token is involved.
    pub async fn get_user_access_token(&self, code: &str) -> Result<UserAccessToken> {
        let url = self.sns_url(&format!(
            "/oauth2/access_token?appid={}&secret={}&code={}&grant_type=authorization_code",
            self.app_id(),
            self.app_secret(),
            code
        ));
        let reply = self.inner.http.get(url).send().await?.bytes().await?;
        Ok(serde_json::from_slice(&reply)?)
    }

    /// The platform's callback source IP list.
    pub async fn get_ip_list(&self) -> Result<Vec<String>> {
        let reply = self
            .get_request(&self.api_url("/getcallbackip?access_token="))
            .await?;

        #[derive(serde::Deserialize)]
        struct IpListResponse {
            #[serde(default)]
            ip_list: Vec<String>,
        }
        let response: IpListResponse = serde_json::from_slice(&reply)?;
        Ok(response.ip_list)
    }
}
