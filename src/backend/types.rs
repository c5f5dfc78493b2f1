//! Wire types for the Bedrock runtime `invoke` endpoint.
//!
//! Text calls use the Nova messages payload (`messages` + `inferenceConfig`);
//! image calls use the Nova Canvas task payload (`TEXT_IMAGE` /
//! `IMAGE_VARIATION` with an `imageGenerationConfig`). All structs derive
//! `Serialize`/`Deserialize` for JSON conversion in the shape the service
//! expects.

use serde::{Deserialize, Serialize};

const MAX_TOKENS: u32 = 2000;
const IMAGE_WIDTH: u32 = 1024;
const IMAGE_HEIGHT: u32 = 1024;
const CFG_SCALE: f32 = 8.0;
const SIMILARITY_STRENGTH: f32 = 0.7;

/// Request body for a text-completion invoke.
#[derive(Debug, Clone, Serialize)]
pub struct TextRequest {
    pub messages: Vec<NovaMessage>,
    #[serde(rename = "inferenceConfig")]
    pub inference_config: InferenceConfig,
}

impl TextRequest {
    /// Build a single-turn user request with the given sampling temperature.
    pub fn user(prompt: &str, temperature: f32) -> Self {
        Self {
            messages: vec![NovaMessage {
                role: "user".into(),
                content: vec![TextBlock {
                    text: prompt.to_string(),
                }],
            }],
            inference_config: InferenceConfig {
                temperature,
                max_tokens: MAX_TOKENS,
            },
        }
    }
}

/// One message in a Nova conversation.
#[derive(Debug, Clone, Serialize)]
pub struct NovaMessage {
    /// Sender role: "user" or "assistant".
    pub role: String,
    pub content: Vec<TextBlock>,
}

/// A block of plain text inside a message or a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

/// Sampling parameters for a text invoke.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceConfig {
    pub temperature: f32,
    #[serde(rename = "maxTokens")]
    pub max_tokens: u32,
}

/// Response body of a text invoke.
#[derive(Debug, Clone, Deserialize)]
pub struct TextResponse {
    pub output: TextOutput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextOutput {
    pub message: OutputMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputMessage {
    pub content: Vec<TextBlock>,
}

impl TextResponse {
    /// The first text block of the reply, if the model produced one.
    pub fn first_text(&self) -> Option<&str> {
        self.output
            .message
            .content
            .first()
            .map(|block| block.text.as_str())
    }
}

/// The Canvas task kind, serialized as `TEXT_IMAGE` / `IMAGE_VARIATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    TextImage,
    ImageVariation,
}

/// Request body for an image invoke.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_to_image_params: Option<TextToImageParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_variation_params: Option<ImageVariationParams>,
    pub image_generation_config: ImageGenerationConfig,
}

impl ImageRequest {
    /// Build a fresh text-to-image request.
    pub fn text_to_image(prompt: &str, seed: u64) -> Self {
        Self {
            task_type: TaskType::TextImage,
            text_to_image_params: Some(TextToImageParams {
                text: prompt.to_string(),
            }),
            image_variation_params: None,
            image_generation_config: ImageGenerationConfig::with_seed(seed),
        }
    }

    /// Build a variation request seeded with a base64-encoded reference image.
    pub fn variation(prompt: &str, reference_b64: String, seed: u64) -> Self {
        Self {
            task_type: TaskType::ImageVariation,
            text_to_image_params: None,
            image_variation_params: Some(ImageVariationParams {
                text: prompt.to_string(),
                images: vec![reference_b64],
                similarity_strength: SIMILARITY_STRENGTH,
            }),
            image_generation_config: ImageGenerationConfig::with_seed(seed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TextToImageParams {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageVariationParams {
    pub text: String,
    /// Base64-encoded reference images anchoring the variation.
    pub images: Vec<String>,
    pub similarity_strength: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationConfig {
    pub number_of_images: u32,
    pub width: u32,
    pub height: u32,
    pub cfg_scale: f32,
    pub seed: u64,
}

impl ImageGenerationConfig {
    fn with_seed(seed: u64) -> Self {
        Self {
            number_of_images: 1,
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
            cfg_scale: CFG_SCALE,
            seed,
        }
    }
}

/// Response body of an image invoke: base64 payloads in `images`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub images: Vec<String>,
    /// Error detail Canvas sometimes reports alongside an empty image list.
    #[serde(default)]
    pub error: Option<String>,
}
