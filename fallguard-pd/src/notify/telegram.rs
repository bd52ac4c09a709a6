//! Telegram Bot API notifier
//!
//! Alerts are photos with an inline keyboard whose single button carries `resolve:<event id>`.
//! Acknowledgements arrive as callback queries through `getUpdates` long-polling.

use super::{ActionPress, Notifier, NotifierFactory, Update};
use crate::config::NotifyConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use fallguard_common::config::BotCredentials;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("fallguard-pd/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RESOLVE_BUTTON_TEXT: &str = "Resolve";

/// Bot API envelope
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

impl User {
    fn display_name(&self) -> String {
        match (&self.last_name, &self.username) {
            (Some(last), _) => format!("{} {}", self.first_name, last),
            (None, Some(username)) if self.first_name.is_empty() => format!("@{}", username),
            _ => self.first_name.clone(),
        }
    }
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let action = raw.callback_query.and_then(|query| {
            let data = query.data?;
            Some(ActionPress {
                action_id: query.id,
                data,
                responder_name: query.from.display_name(),
                responder_id: query.from.id.to_string(),
            })
        });
        Update {
            update_id: raw.update_id,
            action,
        }
    }
}

/// Split a stored message reference into `(chat_id, message_id)`
pub fn parse_message_ref(message_ref: &str) -> Option<(&str, i64)> {
    let (chat, message) = message_ref.rsplit_once(':')?;
    if chat.is_empty() {
        return None;
    }
    Some((chat, message.parse().ok()?))
}

fn resolve_keyboard(action_ref: &str) -> String {
    json!({
        "inline_keyboard": [[{ "text": RESOLVE_BUTTON_TEXT, "callback_data": action_ref }]]
    })
    .to_string()
}

/// Transport failure for `method`; the URL carries the bot token and is dropped
fn send_failed(method: &str, err: reqwest::Error) -> Error {
    Error::Delivery(format!("{}: {}", method, err.without_url()))
}

/// Telegram client for one bot token and chat
pub struct TelegramNotifier {
    http_client: reqwest::Client,
    api_base: String,
    credentials: BotCredentials,
    /// Bot id part of the token; the secret never leaves this struct
    key: String,
    poll_client_timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(credentials: BotCredentials, config: &NotifyConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            key: credentials.redacted_token(),
            credentials,
            poll_client_timeout: config.poll_client_timeout(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.credentials.bot_token, method)
    }

    async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| {
                Error::Delivery(format!("{}: invalid response ({}): {}", method, status, e.without_url()))
            })?;

        if !body.ok {
            return Err(Error::Delivery(format!(
                "{}: {}",
                method,
                body.description.unwrap_or_else(|| status.to_string())
            )));
        }
        body.result
            .ok_or_else(|| Error::Delivery(format!("{}: empty result", method)))
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut request = self.http_client.post(self.method_url(method)).json(&payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| send_failed(method, e))?;
        Self::decode(method, response).await
    }

    async fn call_multipart<T: DeserializeOwned>(&self, method: &str, form: Form) -> Result<T> {
        let response = self
            .http_client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_failed(method, e))?;
        Self::decode(method, response).await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn credential_key(&self) -> &str {
        &self.key
    }

    async fn send_alert(
        &self,
        image: Vec<u8>,
        caption: &str,
        action_ref: &str,
    ) -> Result<Option<String>> {
        let photo = Part::bytes(image)
            .file_name("fall.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("chat_id", self.credentials.chat_id.clone())
            .text("caption", caption.to_string())
            .text("reply_markup", resolve_keyboard(action_ref))
            .part("photo", photo);

        let sent: SentMessage = self.call_multipart("sendPhoto", form).await?;
        Ok(Some(format!("{}:{}", sent.chat.id, sent.message_id)))
    }

    async fn send_reminder(&self, text: &str) -> Result<()> {
        let _: SentMessage = self
            .call_json(
                "sendMessage",
                json!({ "chat_id": self.credentials.chat_id, "text": text }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn send_clip(&self, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fall_clip.mp4".to_string());
        let video = Part::bytes(bytes).file_name(file_name).mime_str("video/mp4")?;
        let form = Form::new()
            .text("chat_id", self.credentials.chat_id.clone())
            .text("caption", caption.to_string())
            .part("video", video);

        let _: SentMessage = self.call_multipart("sendVideo", form).await?;
        Ok(())
    }

    async fn edit_caption(&self, message_ref: &str, text: &str) -> Result<()> {
        let (chat_id, message_id) = parse_message_ref(message_ref)
            .ok_or_else(|| Error::Delivery(format!("malformed message ref: {}", message_ref)))?;

        // Edited messages come back as the message object; only success matters
        let _: serde_json::Value = self
            .call_json(
                "editMessageCaption",
                json!({ "chat_id": chat_id, "message_id": message_id, "caption": text }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn poll_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let raw: Vec<RawUpdate> = self
            .call_json(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": timeout.as_secs(),
                    "allowed_updates": ["callback_query"],
                }),
                Some(self.poll_client_timeout.max(timeout + Duration::from_secs(5))),
            )
            .await?;

        debug!("Bot {} received {} updates", self.key, raw.len());
        Ok(raw.into_iter().map(Update::from).collect())
    }

    async fn ack_action(&self, action_id: &str, text: Option<&str>) -> Result<()> {
        let mut payload = json!({ "callback_query_id": action_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        let _: bool = self.call_json("answerCallbackQuery", payload, None).await?;
        Ok(())
    }
}

/// Creates Telegram notifiers from resolved credentials
pub struct TelegramFactory {
    config: NotifyConfig,
}

impl TelegramFactory {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }
}

impl NotifierFactory for TelegramFactory {
    fn create(&self, credentials: &BotCredentials) -> Result<Arc<dyn Notifier>> {
        Ok(Arc::new(TelegramNotifier::new(credentials.clone(), &self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_update_maps_to_action() {
        let raw: ApiResponse<Vec<RawUpdate>> = serde_json::from_str(
            r#"{
                "ok": true,
                "result": [
                    {
                        "update_id": 900,
                        "callback_query": {
                            "id": "cbq-1",
                            "from": {"id": 77, "is_bot": false, "first_name": "Ann", "last_name": "Lee"},
                            "data": "resolve:12",
                            "message": {"message_id": 5}
                        }
                    },
                    {"update_id": 901, "message": {"message_id": 6, "text": "hi"}}
                ]
            }"#,
        )
        .unwrap();

        let updates: Vec<Update> = raw.result.unwrap().into_iter().map(Update::from).collect();
        assert_eq!(updates.len(), 2);

        let action = updates[0].action.as_ref().unwrap();
        assert_eq!(action.action_id, "cbq-1");
        assert_eq!(action.responder_name, "Ann Lee");
        assert_eq!(action.responder_id, "77");
        assert_eq!(action.resolve_event_id(), Some(12));

        assert_eq!(updates[1].update_id, 901);
        assert!(updates[1].action.is_none());
    }

    #[test]
    fn test_error_envelope() {
        let raw: ApiResponse<bool> =
            serde_json::from_str(r#"{"ok": false, "description": "Bad Request: query is too old"}"#)
                .unwrap();
        assert!(!raw.ok);
        assert!(raw.result.is_none());
        assert_eq!(raw.description.as_deref(), Some("Bad Request: query is too old"));
    }

    #[test]
    fn test_message_ref_parsing() {
        assert_eq!(parse_message_ref("-1001234:55"), Some(("-1001234", 55)));
        assert_eq!(parse_message_ref("55"), None);
        assert_eq!(parse_message_ref(":55"), None);
        assert_eq!(parse_message_ref("-1:abc"), None);
    }

    #[test]
    fn test_keyboard_carries_action_ref() {
        let markup: serde_json::Value = serde_json::from_str(&resolve_keyboard("resolve:3")).unwrap();
        assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], "resolve:3");
    }

    #[test]
    fn test_credential_key_hides_secret() {
        let creds = BotCredentials::new("4242:SECRET", "-1").unwrap();
        let notifier = TelegramNotifier::new(creds, &NotifyConfig::default()).unwrap();
        assert_eq!(notifier.credential_key(), "4242:***");
        assert!(notifier.method_url("getMe").ends_with("/bot4242:SECRET/getMe"));
    }

    #[tokio::test]
    async fn test_transport_error_omits_token() {
        let creds = BotCredentials::new("4242:TOPSECRET", "-1").unwrap();
        let config = NotifyConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..NotifyConfig::default()
        };
        let notifier = TelegramNotifier::new(creds, &config).unwrap();

        let err = notifier.send_reminder("still down").await.unwrap_err();
        let text = err.to_string();
        assert!(matches!(err, Error::Delivery(_)));
        assert!(text.contains("sendMessage"), "{}", text);
        assert!(!text.contains("TOPSECRET"), "{}", text);
    }
}
