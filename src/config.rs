//! fourcut configuration loaded from `fourcut.toml`.
//!
//! [`FourcutConfig`] holds every configurable knob. Values missing from the
//! file fall back to sensible defaults. The `BEDROCK_API_KEY` environment
//! variable takes precedence over the file for the API key.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration loaded from `fourcut.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FourcutConfig {
    /// Bedrock API key.
    #[serde(default)]
    pub api_key: String,

    /// Service region the runtime endpoint is derived from.
    #[serde(default = "default_region")]
    pub region: String,

    /// Model used for every text call (planning, prompts, QA, repair).
    #[serde(default = "default_text_model_id")]
    pub text_model_id: String,

    /// Model used for every image call.
    #[serde(default = "default_image_model_id")]
    pub image_model_id: String,

    /// Style guide applied to every panel unless the CLI overrides it.
    #[serde(default = "default_style_guide")]
    pub style_guide: String,

    /// Cuts per strip unless the CLI overrides it.
    #[serde(default = "default_num_cuts")]
    pub num_cuts: u32,

    /// Repair budget per failing cut unless the CLI overrides it.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Directory rendered images are stored under.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_text_model_id() -> String {
    "amazon.nova-lite-v1:0".to_string()
}

fn default_image_model_id() -> String {
    "amazon.nova-canvas-v1:0".to_string()
}

fn default_style_guide() -> String {
    "warm pastel tones, webtoon style, clean lines, expressive faces".to_string()
}

fn default_num_cuts() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_artifact_dir() -> String {
    "artifacts".to_string()
}

impl Default for FourcutConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            region: default_region(),
            text_model_id: default_text_model_id(),
            image_model_id: default_image_model_id(),
            style_guide: default_style_guide(),
            num_cuts: default_num_cuts(),
            max_retries: default_max_retries(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl FourcutConfig {
    /// Load configuration from `fourcut.toml` in the current directory.
    /// Uses defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        let path = Path::new("fourcut.toml");
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<FourcutConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment takes precedence over the config file for the API key.
        if let Ok(key) = std::env::var("BEDROCK_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }
}
