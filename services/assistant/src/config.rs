use crate::persona::PersonaKind;
use kemet_core::{backend::BackendCredentials, vehicle::DEFAULT_VEHICLE_ID};
use kemet_realtime::{Provider, RealtimeConfig};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::Level;

/// Key variables accepted for the Supabase backend, in order of preference.
pub const BACKEND_KEY_VARS: [&str; 3] =
    ["SUPABASE_KEY", "SUPABASE_ANON_KEY", "SUPABASE_SERVICE_KEY"];

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    /// `None` runs the vehicle gateway in mock mode.
    pub backend: Option<BackendCredentials>,
    pub vehicle_id: String,
    pub realtime: RealtimeConfig,
    pub persona: PersonaKind,
    pub persona_path: Option<PathBuf>,
    pub voice: Option<String>,
    pub log_level: Level,
}

/// Reads a variable, treating an empty value as unset.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let backend_url = non_empty_var("SUPABASE_URL");
        let backend_key = BACKEND_KEY_VARS.iter().find_map(|name| non_empty_var(name));
        let backend = match (backend_url, backend_key) {
            (Some(url), Some(key)) => Some(BackendCredentials {
                url,
                key: SecretString::from(key),
            }),
            _ => None,
        };

        let vehicle_id =
            non_empty_var("VEHICLE_ID").unwrap_or_else(|| DEFAULT_VEHICLE_ID.to_string());

        let provider = std::env::var("REALTIME_PROVIDER")
            .unwrap_or_else(|_| "xai".to_string())
            .parse::<Provider>()
            .map_err(|e| ConfigError::InvalidValue("REALTIME_PROVIDER".to_string(), e))?;
        let api_key = non_empty_var(provider.api_key_var()).ok_or_else(|| {
            ConfigError::MissingVar(format!(
                "{} must be set for '{}' provider",
                provider.api_key_var(),
                provider
            ))
        })?;
        let url =
            non_empty_var("REALTIME_URL").unwrap_or_else(|| provider.default_url().to_string());
        if !(url.starts_with("wss://") || url.starts_with("ws://")) {
            return Err(ConfigError::InvalidValue(
                "REALTIME_URL".to_string(),
                format!("'{}' is not a websocket URL", url),
            ));
        }

        let persona = std::env::var("PERSONA")
            .unwrap_or_else(|_| "kemet".to_string())
            .parse::<PersonaKind>()
            .map_err(|e| ConfigError::InvalidValue("PERSONA".to_string(), e))?;
        let persona_path = non_empty_var("PERSONA_PATH").map(PathBuf::from);
        let voice = non_empty_var("REALTIME_VOICE");

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            backend,
            vehicle_id,
            realtime: RealtimeConfig {
                provider,
                url,
                api_key: SecretString::from(api_key),
            },
            persona,
            persona_path,
            voice,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            for var in [
                "SUPABASE_URL",
                "SUPABASE_KEY",
                "SUPABASE_ANON_KEY",
                "SUPABASE_SERVICE_KEY",
                "VEHICLE_ID",
                "REALTIME_PROVIDER",
                "XAI_API_KEY",
                "OPENAI_API_KEY",
                "REALTIME_URL",
                "REALTIME_VOICE",
                "PERSONA",
                "PERSONA_PATH",
                "RUST_LOG",
            ] {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("XAI_API_KEY", "test-xai-key");
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

        assert!(config.backend.is_none());
        assert_eq!(config.vehicle_id, "demo-vehicle-01");
        assert_eq!(config.realtime.provider, Provider::Xai);
        assert_eq!(config.realtime.url, "wss://api.x.ai/v1/realtime");
        assert_eq!(config.realtime.api_key.expose_secret(), "test-xai-key");
        assert_eq!(config.persona, PersonaKind::Kemet);
        assert_eq!(config.persona_path, None);
        assert_eq!(config.voice, None);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_backend_needs_url_and_key() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("SUPABASE_URL", "https://demo.supabase.co");
        }
        assert!(Config::from_env().unwrap().backend.is_none());

        unsafe {
            env::remove_var("SUPABASE_URL");
            env::set_var("SUPABASE_KEY", "service-key");
        }
        assert!(Config::from_env().unwrap().backend.is_none());
    }

    #[test]
    #[serial]
    fn test_backend_key_fallback_order() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("SUPABASE_URL", "https://demo.supabase.co");
            env::set_var("SUPABASE_KEY", "");
            env::set_var("SUPABASE_ANON_KEY", "anon-key");
            env::set_var("SUPABASE_SERVICE_KEY", "service-key");
        }

        let backend = Config::from_env().unwrap().backend.expect("backend configured");
        assert_eq!(backend.url, "https://demo.supabase.co");
        assert_eq!(backend.key.expose_secret(), "anon-key");
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("REALTIME_PROVIDER", "openai");
            env::set_var("OPENAI_API_KEY", "test-openai-key");
            env::set_var("REALTIME_URL", "ws://localhost:9000/realtime");
            env::set_var("REALTIME_VOICE", "alloy");
            env::set_var("VEHICLE_ID", "car-7");
            env::set_var("PERSONA", "relaxed");
            env::set_var("PERSONA_PATH", "/custom/persona.md");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.realtime.provider, Provider::OpenAI);
        assert_eq!(config.realtime.url, "ws://localhost:9000/realtime");
        assert_eq!(config.voice.as_deref(), Some("alloy"));
        assert_eq!(config.vehicle_id, "car-7");
        assert_eq!(config.persona, PersonaKind::Relaxed);
        assert_eq!(
            config.persona_path,
            Some(PathBuf::from("/custom/persona.md"))
        );
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_provider_key() {
        clear_env_vars();
        unsafe {
            env::set_var("REALTIME_PROVIDER", "openai");
            env::set_var("XAI_API_KEY", "wrong-provider-key");
        }

        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_provider() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("REALTIME_PROVIDER", "carrier-pigeon");
        }

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "REALTIME_PROVIDER"),
            _ => panic!("Expected InvalidValue for REALTIME_PROVIDER"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_realtime_url() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("REALTIME_URL", "https://api.x.ai/v1/realtime");
        }

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "REALTIME_URL"),
            _ => panic!("Expected InvalidValue for REALTIME_URL"),
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

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_persona() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("PERSONA", "pirate");
        }

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "PERSONA"),
            _ => panic!("Expected InvalidValue for PERSONA"),
        }
    }
}
