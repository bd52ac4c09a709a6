//! Configuration loading, root folder resolution and notification credentials
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! Notification credentials follow their own cascade, resolved per pipeline start:
//! explicit per-request config, then the source's group config, then the process-wide default.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable that overrides the root folder
pub const ROOT_FOLDER_ENV: &str = "FALLGUARD_ROOT";

/// Environment variables holding the process-wide default bot credentials
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const CHAT_ID_ENV: &str = "TELEGRAM_CHAT_ID";

/// Config file name looked up in the platform config directories
const CONFIG_FILE_NAME: &str = "fallguard.toml";

/// Resolve the root folder that holds the database and event artifacts
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_root: Option<&Path>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_root {
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Locate the config file: an explicit path wins, otherwise the user then system location
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let user_config = dirs::config_dir().map(|d| d.join("fallguard").join(CONFIG_FILE_NAME));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/fallguard").join(CONFIG_FILE_NAME);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load a TOML config file into `T`
///
/// A missing file is not fatal: a warning is logged and `T::default()` is returned.
/// A file that exists but fails to parse is an error.
pub fn load_toml<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using compiled defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<T>(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/fallguard (or /var/lib/fallguard for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("fallguard"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/fallguard"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("fallguard"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/fallguard"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("fallguard"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\fallguard"))
    } else {
        PathBuf::from("./fallguard_data")
    }
}

// ============================================================================
// Notification credentials
// ============================================================================

/// Bot credentials used to deliver alerts and poll for acknowledgements
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

impl BotCredentials {
    /// Build credentials, returning `None` unless both parts are non-empty
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Option<Self> {
        let bot_token = bot_token.into().trim().to_string();
        let chat_id = chat_id.into().trim().to_string();
        if bot_token.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some(Self { bot_token, chat_id })
    }

    /// Build credentials from optional parts (as stored on a group row)
    pub fn from_parts(bot_token: Option<&str>, chat_id: Option<&str>) -> Option<Self> {
        Self::new(bot_token?, chat_id?)
    }

    /// Token with everything but the bot id masked, safe for logs
    pub fn redacted_token(&self) -> String {
        match self.bot_token.split_once(':') {
            Some((bot_id, _)) => format!("{}:***", bot_id),
            None => "***".to_string(),
        }
    }
}

impl fmt::Debug for BotCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotCredentials")
            .field("bot_token", &self.redacted_token())
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// One provider in the credential cascade
pub trait CredentialSource: Send + Sync {
    /// Short label used in logs
    fn label(&self) -> &'static str;

    /// Credentials from this provider, if it has a complete set
    fn credentials(&self) -> Option<BotCredentials>;
}

/// Credentials passed explicitly with a pipeline start request
pub struct ExplicitCredentials(pub Option<BotCredentials>);

impl CredentialSource for ExplicitCredentials {
    fn label(&self) -> &'static str {
        "request"
    }

    fn credentials(&self) -> Option<BotCredentials> {
        self.0.clone()
    }
}

/// Credentials stored on the source's group
pub struct GroupCredentials {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl CredentialSource for GroupCredentials {
    fn label(&self) -> &'static str {
        "group"
    }

    fn credentials(&self) -> Option<BotCredentials> {
        BotCredentials::from_parts(self.bot_token.as_deref(), self.chat_id.as_deref())
    }
}

/// Process-wide default taken from environment variables
pub struct EnvCredentials {
    pub token_var: &'static str,
    pub chat_var: &'static str,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self {
            token_var: BOT_TOKEN_ENV,
            chat_var: CHAT_ID_ENV,
        }
    }
}

impl CredentialSource for EnvCredentials {
    fn label(&self) -> &'static str {
        "environment"
    }

    fn credentials(&self) -> Option<BotCredentials> {
        let token = std::env::var(self.token_var).ok()?;
        let chat = std::env::var(self.chat_var).ok()?;
        BotCredentials::new(token, chat)
    }
}

/// Process-wide default taken from the config file
pub struct ConfiguredCredentials(pub Option<BotCredentials>);

impl CredentialSource for ConfiguredCredentials {
    fn label(&self) -> &'static str {
        "config file"
    }

    fn credentials(&self) -> Option<BotCredentials> {
        self.0.clone()
    }
}

/// Ordered list of credential providers, resolved first-match-wins
#[derive(Default)]
pub struct CredentialCascade {
    providers: Vec<Box<dyn CredentialSource>>,
}

impl CredentialCascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider with lower priority than all providers added so far
    pub fn then(mut self, provider: impl CredentialSource + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// First complete set of credentials, with the label of the provider that supplied it
    pub fn resolve(&self) -> Option<(BotCredentials, &'static str)> {
        self.providers
            .iter()
            .find_map(|p| p.credentials().map(|c| (c, p.label())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_credentials_require_both_parts() {
        assert!(BotCredentials::new("123:abc", "").is_none());
        assert!(BotCredentials::new("  ", "42").is_none());
        assert!(BotCredentials::new("123:abc", "42").is_some());
        assert!(BotCredentials::from_parts(Some("123:abc"), None).is_none());
    }

    #[test]
    fn test_debug_hides_token_secret() {
        let creds = BotCredentials::new("123456:SECRETPART", "-100").unwrap();
        let printed = format!("{:?}", creds);
        assert!(printed.contains("123456:***"));
        assert!(!printed.contains("SECRETPART"));
    }

    #[test]
    fn test_cascade_explicit_beats_group() {
        let explicit = BotCredentials::new("1:a", "10");
        let cascade = CredentialCascade::new()
            .then(ExplicitCredentials(explicit.clone()))
            .then(GroupCredentials {
                bot_token: Some("2:b".to_string()),
                chat_id: Some("20".to_string()),
            });

        let (creds, label) = cascade.resolve().unwrap();
        assert_eq!(Some(creds), explicit);
        assert_eq!(label, "request");
    }

    #[test]
    fn test_cascade_skips_incomplete_group() {
        let cascade = CredentialCascade::new()
            .then(ExplicitCredentials(None))
            .then(GroupCredentials {
                bot_token: Some("2:b".to_string()),
                chat_id: None,
            })
            .then(ConfiguredCredentials(BotCredentials::new("3:c", "30")));

        let (creds, label) = cascade.resolve().unwrap();
        assert_eq!(creds.chat_id, "30");
        assert_eq!(label, "config file");
    }

    #[test]
    fn test_cascade_empty_resolves_none() {
        let cascade = CredentialCascade::new().then(ExplicitCredentials(None));
        assert!(cascade.resolve().is_none());
    }

    #[test]
    #[serial]
    fn test_env_credentials() {
        std::env::set_var("FALLGUARD_TEST_TOKEN", "9:z");
        std::env::set_var("FALLGUARD_TEST_CHAT", "99");
        let source = EnvCredentials {
            token_var: "FALLGUARD_TEST_TOKEN",
            chat_var: "FALLGUARD_TEST_CHAT",
        };
        assert_eq!(source.credentials(), BotCredentials::new("9:z", "99"));

        std::env::remove_var("FALLGUARD_TEST_CHAT");
        assert!(source.credentials().is_none());
        std::env::remove_var("FALLGUARD_TEST_TOKEN");
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        std::env::set_var("FALLGUARD_TEST_ROOT", "/tmp/from-env");
        let cli = PathBuf::from("/tmp/from-cli");
        let toml_root = PathBuf::from("/tmp/from-toml");

        assert_eq!(
            resolve_root_folder(Some(&cli), "FALLGUARD_TEST_ROOT", Some(&toml_root)),
            cli
        );
        assert_eq!(
            resolve_root_folder(None, "FALLGUARD_TEST_ROOT", Some(&toml_root)),
            PathBuf::from("/tmp/from-env")
        );

        std::env::remove_var("FALLGUARD_TEST_ROOT");
        assert_eq!(
            resolve_root_folder(None, "FALLGUARD_TEST_ROOT", Some(&toml_root)),
            toml_root
        );
        assert!(!resolve_root_folder(None, "FALLGUARD_TEST_ROOT", None)
            .as_os_str()
            .is_empty());
    }

    #[derive(Debug, Default, Deserialize)]
    struct Sample {
        #[serde(default)]
        port: u16,
    }

    #[test]
    fn test_load_toml_missing_file_uses_default() {
        let sample: Sample = load_toml(Some(Path::new("/nonexistent/fallguard.toml"))).unwrap();
        assert_eq!(sample.port, 0);
    }

    #[test]
    fn test_load_toml_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(matches!(load_toml::<Sample>(Some(&path)), Err(Error::Config(_))));
    }
}
