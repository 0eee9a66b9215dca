//! Immutable session settings snapshots.

use serde::{Deserialize, Serialize};

use crate::core::realtime::{InputTranscriptionConfig, TurnDetectionConfig};
use crate::core::tools::ToolDefinition;

/// Conversation settings supplied by the host.
///
/// A snapshot is never mutated once handed to a session; updates replace it
/// wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// System instructions for the assistant
    pub instructions: Option<String>,
    /// Output voice
    pub voice: String,
    pub turn_detection: TurnDetectionConfig,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Output token limit per response; `None` means unlimited
    pub max_response_output_tokens: Option<u32>,
    /// Transcribe user audio; required for user entries in the history
    pub input_audio_transcription: Option<InputTranscriptionConfig>,
    /// `auto`, `none`, `required`, or a tool name
    pub tool_choice: Option<String>,
    /// Upper bound on a single tool execution
    pub tool_timeout_ms: Option<u64>,
    /// Host tools; not part of the serialized form
    #[serde(skip)]
    pub tools: Vec<ToolDefinition>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instructions: None,
            voice: "alloy".to_string(),
            turn_detection: TurnDetectionConfig::default(),
            temperature: None,
            max_response_output_tokens: None,
            input_audio_transcription: Some(InputTranscriptionConfig::default()),
            tool_choice: None,
            tool_timeout_ms: None,
            tools: Vec::new(),
        }
    }
}

impl Settings {
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_turn_detection(mut self, turn_detection: TurnDetectionConfig) -> Self {
        self.turn_detection = turn_detection;
        self
    }

    /// Check the snapshot for values no provider would accept.
    pub fn validate(&self) -> Result<(), String> {
        if self.voice.trim().is_empty() {
            return Err("voice must not be empty".to_string());
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(format!("temperature must be within 0.0..=2.0, got {t}"));
            }
        }
        if self.max_response_output_tokens == Some(0) {
            return Err("max_response_output_tokens must be at least 1".to_string());
        }
        self.turn_detection.validate().map_err(|e| e.to_string())?;

        let mut names = std::collections::HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err("tool names must not be empty".to_string());
            }
            if !names.insert(tool.name.as_str()) {
                return Err(format!("duplicate tool name '{}'", tool.name));
            }
            if let Some(params) = &tool.parameters {
                if !params.is_object() {
                    return Err(format!("parameters of tool '{}' must be an object", tool.name));
                }
            }
        }

        if let Some(choice) = &self.tool_choice {
            let builtin = matches!(choice.as_str(), "auto" | "none" | "required");
            if !builtin && !names.contains(choice.as_str()) {
                return Err(format!("tool_choice '{choice}' does not name a tool"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition::from_sync_fn(name, "test tool", Some(json!({"type": "object"})), |_| {
            Ok(json!({}))
        })
    }

    #[test]
    fn test_default_is_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_temperature_bounds() {
        let settings = Settings {
            temperature: Some(3.0),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_duplicate_tools_rejected() {
        let settings = Settings::default()
            .with_tool(tool("get_weather"))
            .with_tool(tool("get_weather"));
        assert!(settings.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_tool_choice_must_name_tool() {
        let mut settings = Settings::default().with_tool(tool("get_weather"));
        settings.tool_choice = Some("get_weather".to_string());
        assert!(settings.validate().is_ok());
        settings.tool_choice = Some("lookup".to_string());
        assert!(settings.validate().is_err());
        settings.tool_choice = Some("required".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip_skips_tools() {
        let settings = Settings::default()
            .with_instructions("Be brief.")
            .with_voice("verse")
            .with_tool(tool("get_weather"));
        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(!yaml.contains("get_weather"));

        let parsed: Settings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.voice, "verse");
        assert_eq!(parsed.instructions.as_deref(), Some("Be brief."));
        assert!(parsed.tools.is_empty());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed: Settings = serde_yaml::from_str("voice: coral\n").unwrap();
        assert_eq!(parsed.voice, "coral");
        assert!(parsed.turn_detection.is_automatic());
    }
}
