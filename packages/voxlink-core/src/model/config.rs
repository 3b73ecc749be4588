//! Validated per-call session configuration.
//!
//! A [`SessionConfig`] is an immutable snapshot assembled once per call from
//! the resolved agent. The builder validates every enumerated field (model,
//! voice, sensitivities) before a socket is opened, so a bad configuration
//! fails the call at setup instead of mid-conversation.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::protocol_constants::ALLOWED_MODELS;

/// Errors from session configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown voice: {0}")]
    UnknownVoice(String),

    #[error("Unknown VAD sensitivity: {0}")]
    UnknownSensitivity(String),

    #[error("Language code must be non-empty (BCP-47)")]
    EmptyLanguage,

    #[error("System prompt must be non-empty")]
    EmptyPrompt,
}

/// Prebuilt model voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

impl Voice {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
            Self::Leda => "Leda",
            Self::Orus => "Orus",
            Self::Zephyr => "Zephyr",
        }
    }
}

impl FromStr for Voice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Puck" => Ok(Self::Puck),
            "Charon" => Ok(Self::Charon),
            "Kore" => Ok(Self::Kore),
            "Fenrir" => Ok(Self::Fenrir),
            "Aoede" => Ok(Self::Aoede),
            "Leda" => Ok(Self::Leda),
            "Orus" => Ok(Self::Orus),
            "Zephyr" => Ok(Self::Zephyr),
            other => Err(ConfigError::UnknownVoice(other.to_string())),
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Voice-activity detection sensitivity step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadSensitivity {
    Low,
    /// Server default; not sent on the wire.
    #[default]
    Med,
    High,
}

impl FromStr for VadSensitivity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "med" | "medium" => Ok(Self::Med),
            "high" => Ok(Self::High),
            other => Err(ConfigError::UnknownSensitivity(other.to_string())),
        }
    }
}

/// Automatic voice-activity detection tuning for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadTuning {
    pub start_sensitivity: VadSensitivity,
    pub end_sensitivity: VadSensitivity,
    pub silence_duration_ms: u32,
    pub prefix_padding_ms: u32,
    /// When false, automatic VAD is disabled and the orchestrator drives
    /// turn boundaries with explicit activity signals.
    pub automatic: bool,
}

impl Default for VadTuning {
    fn default() -> Self {
        Self {
            start_sensitivity: VadSensitivity::Med,
            end_sensitivity: VadSensitivity::Med,
            silence_duration_ms: 800,
            prefix_padding_ms: 100,
            automatic: true,
        }
    }
}

/// Immutable configuration for one model session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub voice: Voice,
    /// BCP-47 language code, e.g. "en-US".
    pub language: String,
    pub system_prompt: String,
    pub vad: VadTuning,
    pub input_transcription: bool,
    pub output_transcription: bool,
    /// Declare sliding-window context compression for extended sessions.
    /// The client only requests the window; the server implements it.
    pub context_compression: bool,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder that validates against the enumerated allowed sets.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    model: Option<String>,
    voice: Option<String>,
    language: Option<String>,
    system_prompt: Option<String>,
    vad: VadTuning,
    input_transcription: bool,
    output_transcription: bool,
    context_compression: bool,
}

impl SessionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn vad(mut self, vad: VadTuning) -> Self {
        self.vad = vad;
        self
    }

    pub fn transcription(mut self, input: bool, output: bool) -> Self {
        self.input_transcription = input;
        self.output_transcription = output;
        self
    }

    pub fn context_compression(mut self, enabled: bool) -> Self {
        self.context_compression = enabled;
        self
    }

    /// Validates every field and yields the immutable snapshot.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let model = self.model.unwrap_or_default();
        if !ALLOWED_MODELS.contains(&model.as_str()) {
            return Err(ConfigError::UnknownModel(model));
        }

        let voice_name = self.voice.unwrap_or_default();
        let voice = Voice::from_str(&voice_name)?;

        let language = self.language.unwrap_or_default();
        if language.trim().is_empty() {
            return Err(ConfigError::EmptyLanguage);
        }

        let system_prompt = self.system_prompt.unwrap_or_default();
        if system_prompt.trim().is_empty() {
            return Err(ConfigError::EmptyPrompt);
        }

        Ok(SessionConfig {
            model,
            voice,
            language,
            system_prompt,
            vad: self.vad,
            input_transcription: self.input_transcription,
            output_transcription: self.output_transcription,
            context_compression: self.context_compression,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_constants::ALLOWED_VOICES;

    fn valid_builder() -> SessionConfigBuilder {
        SessionConfig::builder()
            .model("gemini-2.0-flash-live-001")
            .voice("Puck")
            .language("en-US")
            .system_prompt("You answer phones.")
    }

    #[test]
    fn builds_valid_config() {
        let config = valid_builder().build().expect("should build");
        assert_eq!(config.voice, Voice::Puck);
        assert_eq!(config.model, "gemini-2.0-flash-live-001");
        assert!(config.vad.automatic);
    }

    #[test]
    fn rejects_unknown_model() {
        let err = valid_builder().model("gpt-4o").build().unwrap_err();
        assert_eq!(err, ConfigError::UnknownModel("gpt-4o".into()));
    }

    #[test]
    fn rejects_unknown_voice() {
        let err = valid_builder().voice("HAL9000").build().unwrap_err();
        assert_eq!(err, ConfigError::UnknownVoice("HAL9000".into()));
    }

    #[test]
    fn rejects_empty_language_and_prompt() {
        assert_eq!(
            valid_builder().language("  ").build().unwrap_err(),
            ConfigError::EmptyLanguage
        );
        assert_eq!(
            valid_builder().system_prompt("").build().unwrap_err(),
            ConfigError::EmptyPrompt
        );
    }

    #[test]
    fn every_allowed_voice_parses() {
        for name in ALLOWED_VOICES {
            let voice = Voice::from_str(name).expect("allowed voice should parse");
            assert_eq!(voice.as_str(), *name);
        }
    }

    #[test]
    fn sensitivity_parses_all_steps() {
        assert_eq!("low".parse::<VadSensitivity>().unwrap(), VadSensitivity::Low);
        assert_eq!("med".parse::<VadSensitivity>().unwrap(), VadSensitivity::Med);
        assert_eq!("high".parse::<VadSensitivity>().unwrap(), VadSensitivity::High);
        assert!("extreme".parse::<VadSensitivity>().is_err());
    }
}
