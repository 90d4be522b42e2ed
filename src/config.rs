//! Session configuration surface
//!
//! Everything the caller supplies at connect time: the synthetic voice, the
//! model name, the opaque system prompt and the remote-close transcript
//! policy. The endpoint credential comes from the environment and its
//! absence is a fatal setup error before any connection attempt.

use crate::error::{LiveError, Result};

/// Default live model endpoint.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Synthetic voices offered by the live endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Voice {
    #[default]
    Zephyr,
    Puck,
    Charon,
    Kore,
    Fenrir,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Zephyr => "Zephyr",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
        }
    }

    /// Parse a voice name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "zephyr" => Some(Voice::Zephyr),
            "puck" => Some(Voice::Puck),
            "charon" => Some(Voice::Charon),
            "kore" => Some(Voice::Kore),
            "fenrir" => Some(Voice::Fenrir),
            _ => None,
        }
    }
}

/// What happens to the transcript when the remote side ends the session.
///
/// User-initiated stops always clear it; remote closes are a policy choice
/// because both behaviors exist in the wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    #[default]
    PreserveTranscript,
    ClearTranscript,
}

/// Caller-supplied configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub voice: Voice,
    /// Opaque system prompt; templating from participant context and
    /// language is the caller's concern.
    pub system_instruction: String,
    pub close_policy: ClosePolicy,
}

impl SessionConfig {
    pub fn new(voice: Voice, system_instruction: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice,
            system_instruction: system_instruction.into(),
            close_policy: ClosePolicy::default(),
        }
    }
}

/// Read the endpoint credential from `GEMINI_API_KEY`.
pub fn api_key_from_env() -> Result<String> {
    std::env::var("GEMINI_API_KEY")
        .map_err(|_| LiveError::Setup("GEMINI_API_KEY environment variable not set".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_parse_round_trips() {
        for voice in [
            Voice::Zephyr,
            Voice::Puck,
            Voice::Charon,
            Voice::Kore,
            Voice::Fenrir,
        ] {
            assert_eq!(Voice::parse(voice.as_str()), Some(voice));
            assert_eq!(Voice::parse(&voice.as_str().to_uppercase()), Some(voice));
        }
        assert_eq!(Voice::parse("nope"), None);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new(Voice::Kore, "be helpful");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.voice, Voice::Kore);
        assert_eq!(config.close_policy, ClosePolicy::PreserveTranscript);
    }
}
