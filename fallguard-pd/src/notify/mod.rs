//! Notification and resolution workflow
//!
//! Every confirmed fall is sent as an alert carrying an inline "resolve" action. A reminder
//! task repeats the alert until the event is resolved. One polling loop per bot credential
//! receives resolve actions and applies them to the event store.

pub mod poller;
pub mod telegram;
pub mod workflow;

use crate::config::NotifyConfig;
use crate::error::Result;
use async_trait::async_trait;
use fallguard_common::config::{
    BotCredentials, ConfiguredCredentials, CredentialCascade, EnvCredentials, ExplicitCredentials,
    GroupCredentials,
};
use fallguard_common::db::Group;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use poller::{resolve_action, spawn_poller, PollSettings, ResolutionOutcome};
pub use telegram::{TelegramFactory, TelegramNotifier};
pub use workflow::{deliver_clip, spawn_alert, AlertContext, FallAlert};

/// Prefix of the action payload attached to alerts
pub const RESOLVE_ACTION_PREFIX: &str = "resolve:";

/// Action payload for resolving `event_id`
pub fn resolve_action_ref(event_id: i64) -> String {
    format!("{}{}", RESOLVE_ACTION_PREFIX, event_id)
}

/// Operator pressed an alert's action button
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPress {
    /// Id used to acknowledge the press
    pub action_id: String,
    /// Payload attached to the alert (`resolve:<event id>`)
    pub data: String,
    pub responder_name: String,
    pub responder_id: String,
}

impl ActionPress {
    /// Event id when this is a resolve action
    pub fn resolve_event_id(&self) -> Option<i64> {
        self.data
            .strip_prefix(RESOLVE_ACTION_PREFIX)
            .and_then(|id| id.trim().parse().ok())
    }
}

/// One item from the update feed
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub update_id: i64,
    pub action: Option<ActionPress>,
}

/// Outbound messaging and acknowledgement feed for one bot/chat
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Identity of the bot; pollers are shared per key
    fn credential_key(&self) -> &str;

    /// Send a snapshot with a resolve action, returning a reference for later edits
    async fn send_alert(&self, image: Vec<u8>, caption: &str, action_ref: &str)
        -> Result<Option<String>>;

    async fn send_reminder(&self, text: &str) -> Result<()>;

    async fn send_clip(&self, path: &Path, caption: &str) -> Result<()>;

    async fn edit_caption(&self, message_ref: &str, text: &str) -> Result<()>;

    /// Long-poll for updates with id at or above `offset`
    async fn poll_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>>;

    async fn ack_action(&self, action_id: &str, text: Option<&str>) -> Result<()>;
}

/// Builds notifiers for resolved credentials
pub trait NotifierFactory: Send + Sync {
    fn create(&self, credentials: &BotCredentials) -> Result<Arc<dyn Notifier>>;
}

/// Pick notification credentials for a pipeline
///
/// Request > group > environment > config file; first complete set wins.
pub fn resolve_credentials(
    explicit: Option<BotCredentials>,
    group: Option<&Group>,
    config: &NotifyConfig,
) -> Option<(BotCredentials, &'static str)> {
    CredentialCascade::new()
        .then(ExplicitCredentials(explicit))
        .then(GroupCredentials {
            bot_token: group.and_then(|g| g.bot_token.clone()),
            chat_id: group.and_then(|g| g.chat_id.clone()),
        })
        .then(EnvCredentials::default())
        .then(ConfiguredCredentials(config.default_credentials()))
        .resolve()
}
