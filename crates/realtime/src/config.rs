use secrecy::SecretString;
use std::{fmt, str::FromStr};

/// Hosted realtime services speaking the OpenAI-compatible protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    Xai,
    OpenAI,
}

impl Provider {
    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::Xai => "wss://api.x.ai/v1/realtime",
            Provider::OpenAI => {
                "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01"
            }
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::Xai => "XAI_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::Xai => "xai",
            Provider::OpenAI => "openai",
        })
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xai" | "grok" => Ok(Provider::Xai),
            "openai" => Ok(Provider::OpenAI),
            other => Err(format!("'{}' is not a supported realtime provider", other)),
        }
    }
}

/// Where and how to open the realtime websocket.
#[derive(Debug)]
pub struct RealtimeConfig {
    pub provider: Provider,
    pub url: String,
    pub api_key: SecretString,
}
