use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::FeatureFlags;
use crate::llm::{FunctionDefinition, ToolCall, ToolDefinition};

pub const GENERATE_IMAGE: &str = "generate_image";
pub const GENERATE_TTS: &str = "generate_tts";
pub const GENERATE_STT: &str = "generate_stt";

/// Tool definitions advertised to the model, one per enabled feature.
pub fn tool_definitions(features: &FeatureFlags) -> Vec<ToolDefinition> {
    let mut tools = Vec::new();

    if features.image_generation {
        tools.push(ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: GENERATE_IMAGE.to_string(),
                description: "Generate image basing on description".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "description": {
                            "type": "string",
                            "description": "Description of the image, e.g. a house under an apple tree"
                        },
                        "size": {
                            "type": "string",
                            "enum": ["square", "portrait", "landscape"],
                            "description": "Size of the generated image. Use square if no information is provided"
                        }
                    },
                    "required": ["description"]
                }),
            },
        });
    }

    if features.text_to_speech {
        tools.push(ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: GENERATE_TTS.to_string(),
                description: "Generate or convert from text to speech".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "input_text": {
                            "type": "string",
                            "description": "Text to be converted to speech"
                        }
                    },
                    "required": ["input_text"]
                }),
            },
        });
    }

    // The audio comes from the user's attachment, so no parameters.
    if features.speech_to_text {
        tools.push(ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: GENERATE_STT.to_string(),
                description: "Transcript or convert from speech to text".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
        });
    }

    info!(
        "IMAGE_GENERATION: {}, TEXT_TO_SPEECH: {}, SPEECH_TO_TEXT: {}",
        enabled(features.image_generation),
        enabled(features.text_to_speech),
        enabled(features.speech_to_text)
    );

    tools
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "Enabled"
    } else {
        "Disabled"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    #[default]
    Square,
    Portrait,
    Landscape,
}

impl ImageSize {
    /// Pixel dimensions understood by the image generation endpoint.
    pub fn dimensions(self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Portrait => "1024x1792",
            ImageSize::Landscape => "1792x1024",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageArgs {
    pub description: String,
    #[serde(default)]
    pub size: ImageSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TtsArgs {
    pub input_text: String,
}

/// A tool call the model asked for, with typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    GenerateImage(ImageArgs),
    GenerateTts(TtsArgs),
    GenerateStt,
}

impl ToolInvocation {
    pub fn parse(call: &ToolCall) -> Result<Self> {
        let name = call.function.name.as_str();
        // Some models send an empty string for argument-less calls.
        let raw = match call.function.arguments.trim() {
            "" => "{}",
            raw => raw,
        };

        match name {
            GENERATE_IMAGE => serde_json::from_str(raw)
                .map(ToolInvocation::GenerateImage)
                .with_context(|| format!("Invalid arguments for {name}: {raw}")),
            GENERATE_TTS => serde_json::from_str(raw)
                .map(ToolInvocation::GenerateTts)
                .with_context(|| format!("Invalid arguments for {name}: {raw}")),
            GENERATE_STT => Ok(ToolInvocation::GenerateStt),
            _ => anyhow::bail!("Unknown tool requested by the model: {}", name),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::GenerateImage(_) => GENERATE_IMAGE,
            ToolInvocation::GenerateTts(_) => GENERATE_TTS,
            ToolInvocation::GenerateStt => GENERATE_STT,
        }
    }
}
