//! Blackbird Sport cloud API client.
//!
//! The API is the one the stock Android app speaks: GET endpoints with
//! a `ton` session token in the query string, JSON envelopes whose
//! `status` field must be `"ok"`, and one multipart POST for the
//! record upload.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::multipart;
use serde_json::Value;
use tracing::{debug, info};

use crate::BlackbirdError;
use crate::config::Settings;
use crate::session::SessionData;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client bound to one set of [`Settings`].
#[derive(Clone, Debug)]
pub struct CloudClient {
    http: reqwest::Client,
    settings: Settings,
}

impl CloudClient {
    pub fn new(settings: Settings) -> Result<Self, BlackbirdError> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, settings })
    }

    fn now_ms() -> String {
        chrono::Utc::now().timestamp_millis().to_string()
    }

    /// Unwraps a JSON envelope, surfacing the server's `msg` when the
    /// status is anything but `"ok"`.
    async fn check(
        response: reqwest::Response,
        endpoint: &'static str,
    ) -> Result<Value, BlackbirdError> {
        let payload: Value = response.error_for_status()?.json().await?;
        if payload["status"] != "ok" {
            let msg = payload["msg"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(BlackbirdError::Api { endpoint, msg });
        }
        Ok(payload)
    }

    /// Registers this client and returns a fresh session token.
    pub async fn set_client(&self) -> Result<String, BlackbirdError> {
        debug!("registering client for a session token");
        let response = self
            .http
            .get(format!("{}/bk_setClient", self.settings.base_url))
            .query(&[
                ("version", self.settings.app_version.as_str()),
                ("type", self.settings.client_type.as_str()),
                ("detail", self.settings.client_detail.as_str()),
                ("code", ""),
                ("imei", self.settings.imei.as_str()),
                ("timeStamp", Self::now_ms().as_str()),
                ("channelId", self.settings.channel_id.as_str()),
            ])
            .send()
            .await?;
        let payload = Self::check(response, "bk_setClient").await?;
        payload["token"]["token"]
            .as_str()
            .map(str::to_string)
            .ok_or(BlackbirdError::Api {
                endpoint: "bk_setClient",
                msg: "no token in response".to_string(),
            })
    }

    /// Authenticates and returns the session to cache. A token is
    /// registered on the fly when none is supplied.
    pub async fn login(
        &self,
        ton: Option<String>,
        user_id: &str,
        password: &str,
    ) -> Result<SessionData, BlackbirdError> {
        let ton = match ton {
            Some(ton) => ton,
            None => self.set_client().await?,
        };
        debug!("authenticating {user_id}");
        let response = self
            .http
            .get(format!("{}/bk_login", self.settings.base_url))
            .query(&[
                ("ton", ton.as_str()),
                ("userId", user_id),
                ("password", password),
                ("timeStamp", Self::now_ms().as_str()),
            ])
            .send()
            .await?;
        let cookies: HashMap<String, String> = response
            .cookies()
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect();
        let payload = Self::check(response, "bk_login").await?;
        let account_id = json_as_string(&payload["user"]["accountId"]);
        info!("authenticated, account id {account_id}");
        Ok(SessionData {
            ton,
            user_id: user_id.to_string(),
            account_id,
            cookies,
        })
    }

    /// Fetches the profile behind the cached session.
    pub async fn user_info(&self, session: &SessionData) -> Result<Value, BlackbirdError> {
        let mut request = self
            .http
            .get(format!("{}/bk_getUserInfo", self.settings.base_url))
            .query(&[
                ("ton", session.ton.as_str()),
                ("friendId", session.account_id.as_str()),
            ]);
        if !session.cookies.is_empty() {
            request = request.header(reqwest::header::COOKIE, session.cookie_header());
        }
        let response = request.send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    /// Uploads one zipped record.
    pub async fn upload_record(
        &self,
        zip_data: Vec<u8>,
        ton: &str,
        record_id: &str,
        fittime: &str,
        device_type: &str,
        sn: &str,
    ) -> Result<Value, BlackbirdError> {
        info!("uploading record {record_id} (fittime {fittime})");
        let part = multipart::Part::bytes(zip_data)
            .file_name(format!("sportRecord_{record_id}.zip"))
            .mime_str("application/zip")?;
        let form = multipart::Form::new().part("RecordFile", part);
        let response = self
            .http
            .post(format!("{}/bk_uploadRecord", self.settings.base_url))
            .query(&[
                ("ton", ton),
                ("deviceType", device_type),
                ("sn", sn),
                ("fittime", fittime),
                ("localRecordId", record_id),
            ])
            .multipart(form)
            .send()
            .await?;
        Self::check(response, "bk_uploadRecord").await
    }
}

/// The server is loose about `accountId`'s JSON type; normalize to a
/// string the way the app does.
fn json_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_normalizes_across_json_types() {
        assert_eq!(json_as_string(&serde_json::json!("123")), "123");
        assert_eq!(json_as_string(&serde_json::json!(123)), "123");
        assert_eq!(json_as_string(&Value::Null), "");
    }
}
