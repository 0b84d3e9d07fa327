use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::error::ChatApiError;

/// Thin wrapper over the external chat service's JSON endpoints. One
/// instance per bot: the cookie jar carries the service's session cookie
/// for the lifetime of the login (§4.2 `login`/`joinRoom`).
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChatApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .user_agent("fleetd-bot")
            .build()?;
        Ok(ChatClient { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check_response(resp: reqwest::Response) -> Result<Value, ChatApiError> {
        let body: Value = resp.json().await.map_err(|_| ChatApiError::InvalidResponse)?;
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(ChatApiError::Rejected(error.to_string()));
        }
        Ok(body)
    }

    pub async fn login(&self, name: &str, icon: &str) -> Result<Value, ChatApiError> {
        let token_resp: Value = self
            .http
            .get(self.url("/?api=json"))
            .send()
            .await?
            .json()
            .await
            .map_err(|_| ChatApiError::InvalidResponse)?;
        let token = token_resp.get("token").and_then(Value::as_str).unwrap_or_default();

        #[derive(Serialize)]
        struct LoginForm<'a> {
            name: &'a str,
            token: &'a str,
            login: &'a str,
            #[serde(rename = "direct-join")]
            direct_join: &'a str,
            language: &'a str,
            icon: &'a str,
        }

        let resp = self
            .http
            .post(self.url("/?api=json"))
            .form(&LoginForm {
                name,
                token,
                login: "ENTER",
                direct_join: "",
                language: "en-US",
                icon,
            })
            .send()
            .await?;
        Self::check_response(resp).await
    }

    pub async fn logout(&self) -> Result<Value, ChatApiError> {
        let resp = self.http.post(self.url("/logout?api=json")).send().await?;
        Self::check_response(resp).await
    }

    pub async fn get_lounge(&self) -> Result<Value, ChatApiError> {
        let resp = self.http.get(self.url("/lounge/?api=json")).send().await?;
        Self::check_response(resp).await
    }

    pub async fn join_room(&self, room_url: &str) -> Result<Value, ChatApiError> {
        let resp = self.http.get(format!("{room_url}&api=json")).send().await?;
        Self::check_response(resp).await
    }

    pub async fn update_room(&self, update_time: f64, fast: bool) -> Result<Value, ChatApiError> {
        let prefix = if fast { "fast=1&" } else { "" };
        let resp = self
            .http
            .get(self.url(&format!("/json.php?{prefix}update={update_time}")))
            .send()
            .await?;
        Self::check_response(resp).await
    }

    pub async fn leave_room(&self) -> Result<Value, ChatApiError> {
        self.room_action(&[("leave", "leave")]).await
    }

    pub async fn give_host(&self, user_id: &str) -> Result<Value, ChatApiError> {
        self.room_action(&[("new_host", user_id)]).await
    }

    pub async fn kick(&self, user_id: &str) -> Result<Value, ChatApiError> {
        self.room_action(&[("kick", user_id)]).await
    }

    pub async fn ban(&self, user_id: &str) -> Result<Value, ChatApiError> {
        self.room_action(&[("ban", user_id)]).await
    }

    pub async fn launch_player(&self, title: &str, url: &str) -> Result<Value, ChatApiError> {
        self.room_action(&[("music", "music"), ("name", title), ("url", url)]).await
    }

    pub async fn send_message(
        &self,
        text: &str,
        user_id: Option<&str>,
        url: Option<&str>,
    ) -> Result<Value, ChatApiError> {
        let mut form = vec![("message", text)];
        if let Some(user_id) = user_id {
            form.push(("to", user_id));
        }
        if let Some(url) = url {
            form.push(("url", url));
        }
        self.room_action(&form).await
    }

    async fn room_action(&self, form: &[(&str, &str)]) -> Result<Value, ChatApiError> {
        let resp = self
            .http
            .post(self.url("/room/?ajax=1&api=json"))
            .form(form)
            .send()
            .await?;
        Self::check_response(resp).await
    }
}
