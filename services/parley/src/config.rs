use openai_realtime::SecretString;
use openai_realtime::websocket::{DEFAULT_MODEL, DEFAULT_URL};
use openai_realtime_types::Voice;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub model: String,
    pub url: String,
    pub instructions: Option<String>,
    pub voice: Voice,
    pub log_level: Level,
    pub playback_capacity: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let model = std::env::var("REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let url = std::env::var("REALTIME_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        if !(url.starts_with("wss://") || url.starts_with("ws://")) {
            return Err(ConfigError::InvalidValue(
                "REALTIME_URL".to_string(),
                format!("'{}' is not a websocket URL", url),
            ));
        }

        let instructions = std::env::var("REALTIME_INSTRUCTIONS").ok();
        let voice = std::env::var("REALTIME_VOICE")
            .map(|name| Voice::from(name.as_str()))
            .unwrap_or(Voice::Alloy);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let playback_capacity = match std::env::var("PLAYBACK_CAPACITY") {
            Ok(value) => value
                .parse::<usize>()
                .ok()
                .filter(|capacity| *capacity > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "PLAYBACK_CAPACITY".to_string(),
                        format!("'{}' is not a positive integer", value),
                    )
                })?,
            Err(_) => 512,
        };

        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
            url,
            instructions,
            voice,
            log_level,
            playback_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openai_realtime::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("REALTIME_MODEL");
            env::remove_var("REALTIME_URL");
            env::remove_var("REALTIME_INSTRUCTIONS");
            env::remove_var("REALTIME_VOICE");
            env::remove_var("RUST_LOG");
            env::remove_var("PLAYBACK_CAPACITY");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.api_key.expose_secret(), "test-openai-key");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.instructions, None);
        assert_eq!(config.voice, Voice::Alloy);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.playback_capacity, 512);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "custom-openai-key");
            env::set_var("REALTIME_MODEL", "gpt-4o-mini-realtime-preview");
            env::set_var("REALTIME_URL", "ws://127.0.0.1:8080/v1/realtime");
            env::set_var("REALTIME_INSTRUCTIONS", "Answer in one sentence.");
            env::set_var("REALTIME_VOICE", "Shimmer");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PLAYBACK_CAPACITY", "64");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.model, "gpt-4o-mini-realtime-preview");
        assert_eq!(config.url, "ws://127.0.0.1:8080/v1/realtime");
        assert_eq!(config.instructions.as_deref(), Some("Answer in one sentence."));
        assert_eq!(config.voice, Voice::Shimmer);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.playback_capacity, 64);
    }

    #[test]
    #[serial]
    fn test_config_debug_hides_api_key() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");
        assert!(!format!("{:?}", config).contains("test-openai-key"));
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "OPENAI_API_KEY"),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_playback_capacity() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("PLAYBACK_CAPACITY", "0");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "PLAYBACK_CAPACITY"),
            _ => panic!("Expected InvalidValue for PLAYBACK_CAPACITY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_url() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("REALTIME_URL", "https://api.openai.com/v1/realtime");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "REALTIME_URL"),
            _ => panic!("Expected InvalidValue for REALTIME_URL"),
        }
    }
}
