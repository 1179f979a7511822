//! Configuration types for the roomlink client

use std::time::Duration;

use roomlink_backend::Role;
use serde::{Deserialize, Serialize};

pub use roomlink_backend::AudioPublishOptions;

/// Main configuration for a [`Session`](crate::Session)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Service URL (ws:// or wss://)
    pub url: String,

    /// Access token minted by external tooling
    pub token: String,

    /// Role requested at connect time (default: Both)
    pub role: Role,

    /// Auto-subscribe to remote tracks where the role allows it
    pub auto_subscribe: bool,

    /// Default channel label for reliable sends (None = backend default)
    pub reliable_label: Option<String>,

    /// Default channel label for lossy sends (None = backend default)
    pub lossy_label: Option<String>,

    /// Retry interval for operations deferred until readiness
    /// (default: 250ms)
    #[serde(with = "duration_millis")]
    pub readiness_retry: Duration,

    /// Optional observational deadline for async connects; when set,
    /// a warning is logged if readiness is not observed in time. The
    /// connect itself is never cancelled.
    #[serde(default, with = "opt_duration_millis")]
    pub connect_timeout: Option<Duration>,

    /// Encoder tuning handed to the backend at connect time, before
    /// the first publish
    pub audio: AudioPublishOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "wss://localhost:7880".to_string(),
            token: String::new(),
            role: Role::Both,
            auto_subscribe: true,
            reliable_label: None,
            lossy_label: None,
            readiness_retry: Duration::from_millis(250),
            connect_timeout: None,
            audio: AudioPublishOptions::default(),
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `url` is empty or not a ws:// / wss:// URL
    /// - `token` is empty
    /// - `readiness_retry` is zero
    /// - a data label is present but empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.url.is_empty() {
            return Err(Error::InvalidConfig("url cannot be empty".to_string()));
        }
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "url must start with ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.token.is_empty() {
            return Err(Error::InvalidConfig("token cannot be empty".to_string()));
        }
        if self.readiness_retry.is_zero() {
            return Err(Error::InvalidConfig(
                "readiness_retry must be non-zero".to_string(),
            ));
        }
        for label in [&self.reliable_label, &self.lossy_label].into_iter().flatten() {
            if label.is_empty() {
                return Err(Error::InvalidConfig(
                    "data channel labels must be non-empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

mod duration_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

mod opt_duration_millis {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<u64>::deserialize(d)?;
        Ok(ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SessionConfig {
        SessionConfig {
            token: "tok".to_string(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_token_fails() {
        let config = SessionConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_url_scheme_fails() {
        let mut config = valid_config();
        config.url = "http://localhost:7880".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_fails() {
        let mut config = valid_config();
        config.readiness_retry = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_label_fails() {
        let mut config = valid_config();
        config.lossy_label = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = valid_config();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.url, deserialized.url);
        assert_eq!(config.readiness_retry, deserialized.readiness_retry);
        assert_eq!(config.connect_timeout, deserialized.connect_timeout);
    }
}
