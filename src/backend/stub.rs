//! Offline backend for the demo path.
//!
//! Produces a canned storyboard, prompts and PASS verdicts plus an embedded
//! one-pixel PNG, so the whole pipeline can be exercised without credentials
//! or network access.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::error::BackendError;
use super::{GeneratedImage, GenerationBackend};

/// Small delay per call so the progress UI has something to show.
const STUB_LATENCY: Duration = Duration::from_millis(150);

/// A 1x1 PNG, enough for every consumer that only moves bytes around.
const ONE_PIXEL_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

pub struct StubBackend {
    num_cuts: u32,
}

impl StubBackend {
    pub fn new(num_cuts: u32) -> Self {
        Self { num_cuts }
    }

    fn storyboard_json(&self) -> String {
        let cuts: Vec<serde_json::Value> = (1..=self.num_cuts)
            .map(|i| {
                serde_json::json!({
                    "cut_index": i,
                    "summary": format!("moment {i} of the day"),
                    "emotion": "content",
                    "scene": format!("scene {i} lifted from the diary"),
                    "dialogue": null,
                    "camera": "medium shot"
                })
            })
            .collect();
        serde_json::json!({
            "cuts": cuts,
            "character_appearance": "round-faced diarist with short dark hair and a yellow sweater"
        })
        .to_string()
    }

    fn png_bytes() -> Vec<u8> {
        BASE64
            .decode(ONE_PIXEL_PNG_B64)
            .expect("embedded PNG constant is valid base64")
    }
}

impl GenerationBackend for StubBackend {
    async fn text_complete(
        &self,
        prompt: &str,
        _temperature: f32,
    ) -> Result<String, BackendError> {
        tokio::time::sleep(STUB_LATENCY).await;
        // The instruction templates each embed their own JSON schema, which
        // doubles as the dispatch marker here.
        if prompt.contains(r#""cuts""#) {
            Ok(format!("Here is the storyboard: {}", self.storyboard_json()))
        } else if prompt.contains(r#""status""#) {
            Ok(r#"{"status":"PASS"}"#.to_string())
        } else {
            Ok(
                "A cozy pastel webtoon panel of the diarist's day, soft lighting, clean lines"
                    .to_string(),
            )
        }
    }

    async fn text_to_image(
        &self,
        _prompt: &str,
        seed: u64,
    ) -> Result<GeneratedImage, BackendError> {
        tokio::time::sleep(STUB_LATENCY).await;
        Ok(GeneratedImage {
            bytes: Self::png_bytes(),
            model_id: "stub".into(),
            seed,
        })
    }

    async fn image_variation(
        &self,
        _prompt: &str,
        _reference: &[u8],
        seed: u64,
    ) -> Result<GeneratedImage, BackendError> {
        tokio::time::sleep(STUB_LATENCY).await;
        Ok(GeneratedImage {
            bytes: Self::png_bytes(),
            model_id: "stub".into(),
            seed,
        })
    }
}
