//! The generation backend port and its implementations.
//!
//! [`GenerationBackend`] is the capability the pipeline drives: prompt to
//! text, prompt to image, prompt plus reference image to image.
//! [`BedrockClient`] talks to the real service; [`StubBackend`] powers the
//! offline demo path.

pub mod client;
pub mod error;
pub mod stub;
pub mod types;

pub use client::BedrockClient;
pub use error::BackendError;
pub use stub::StubBackend;

/// A generated image plus the metadata the pipeline records about it.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// Decoded image bytes (PNG).
    pub bytes: Vec<u8>,
    /// Which model produced the image.
    pub model_id: String,
    /// The seed sent with the call. Reproducibility is best-effort only.
    pub seed: u64,
}

/// Capabilities the orchestration pipeline needs from a generation service.
///
/// Implementations report every failure as a [`BackendError`]; the pipeline
/// decides which calls are fatal to the job and which degrade gracefully.
pub trait GenerationBackend {
    /// Complete a text prompt. The returned text may wrap structured
    /// payloads in prose; callers extract what they need.
    async fn text_complete(&self, prompt: &str, temperature: f32)
    -> Result<String, BackendError>;

    /// Render an image from a text prompt alone.
    async fn text_to_image(&self, prompt: &str, seed: u64)
    -> Result<GeneratedImage, BackendError>;

    /// Render an image from a prompt anchored to a reference image.
    async fn image_variation(
        &self,
        prompt: &str,
        reference: &[u8],
        seed: u64,
    ) -> Result<GeneratedImage, BackendError>;
}
