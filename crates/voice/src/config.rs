use crate::transport::{CommitExpiry, TapCommitPolicy};
use reqwest::Url;
use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_SIGNALING_URL: &str = "https://api.openai.com/v1/realtime/calls";
pub const DEFAULT_MODEL: &str = "gpt-realtime";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all voice transport configuration loaded from the environment.
#[derive(Debug)]
pub struct VoiceConfig {
    pub signaling_url: Url,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub signaling_timeout: Duration,
    pub commit_timeout: Duration,
    pub commit_expiry: CommitExpiry,
    pub instructions: Option<String>,
}

impl VoiceConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let signaling_url_str = std::env::var("REALTIME_SIGNALING_URL")
            .unwrap_or_else(|_| DEFAULT_SIGNALING_URL.to_string());
        let signaling_url = Url::parse(&signaling_url_str).map_err(|e| {
            ConfigError::InvalidValue("REALTIME_SIGNALING_URL".to_string(), e.to_string())
        })?;

        let model = std::env::var("REALTIME_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);

        let signaling_timeout = millis_var("SIGNALING_TIMEOUT_MS", 15_000)?;
        let commit_timeout = millis_var("TAP_COMMIT_TIMEOUT_MS", 1_500)?;

        let expiry_str =
            std::env::var("TAP_COMMIT_EXPIRY").unwrap_or_else(|_| "respond".to_string());
        let commit_expiry = match expiry_str.trim().to_lowercase().as_str() {
            "respond" => CommitExpiry::CreateResponse,
            "listen" => CommitExpiry::ReturnToListening,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TAP_COMMIT_EXPIRY".to_string(),
                    format!("'{}' is not one of 'respond' or 'listen'", other),
                ));
            }
        };

        let instructions = std::env::var("SESSION_INSTRUCTIONS")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            signaling_url,
            model,
            api_key,
            signaling_timeout,
            commit_timeout,
            commit_expiry,
            instructions,
        })
    }

    pub fn commit_policy(&self) -> TapCommitPolicy {
        TapCommitPolicy {
            timeout: self.commit_timeout,
            on_expiry: self.commit_expiry,
        }
    }
}

fn millis_var(name: &str, default: u64) -> Result<Duration, ConfigError> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(Duration::from_millis(default));
    };
    let millis = raw.trim().parse::<u64>().map_err(|_| {
        ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a whole number of milliseconds", raw),
        )
    })?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_millis(millis))
}
