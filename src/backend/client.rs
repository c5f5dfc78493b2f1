use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;

use super::error::BackendError;
use super::types::{ImageRequest, ImageResponse, TextRequest, TextResponse};
use super::{GeneratedImage, GenerationBackend};

/// HTTP client for the Bedrock runtime `invoke` endpoint.
pub struct BedrockClient {
    api_key: String,
    text_model_id: String,
    image_model_id: String,
    client: Client,
    base_url: String,
}

impl BedrockClient {
    pub fn new(
        api_key: String,
        region: &str,
        text_model_id: String,
        image_model_id: String,
    ) -> Self {
        Self::with_base_url(
            api_key,
            format!("https://bedrock-runtime.{region}.amazonaws.com"),
            text_model_id,
            image_model_id,
        )
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        api_key: String,
        base_url: String,
        text_model_id: String,
        image_model_id: String,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self {
            api_key,
            text_model_id,
            image_model_id,
            client,
            base_url,
        }
    }

    async fn invoke<B, R>(&self, model_id: &str, body: &B) -> Result<R, BackendError>
    where
        B: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}/model/{model_id}/invoke", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(BackendError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(BackendError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<R>().await?)
    }

    fn decode_image(&self, response: ImageResponse, seed: u64) -> Result<GeneratedImage, BackendError> {
        let ImageResponse { images, error } = response;
        let Some(encoded) = images.first() else {
            let detail = error.unwrap_or_else(|| "no image payload in response".to_string());
            return Err(BackendError::MalformedResponse(detail));
        };
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| BackendError::MalformedResponse(format!("undecodable image payload: {e}")))?;
        Ok(GeneratedImage {
            bytes,
            model_id: self.image_model_id.clone(),
            seed,
        })
    }
}

impl GenerationBackend for BedrockClient {
    async fn text_complete(
        &self,
        prompt: &str,
        temperature: f32,
    ) -> Result<String, BackendError> {
        let request = TextRequest::user(prompt, temperature);
        let response: TextResponse = self.invoke(&self.text_model_id, &request).await?;
        response
            .first_text()
            .map(str::to_owned)
            .ok_or_else(|| BackendError::MalformedResponse("no text content in model output".into()))
    }

    async fn text_to_image(
        &self,
        prompt: &str,
        seed: u64,
    ) -> Result<GeneratedImage, BackendError> {
        tracing::debug!(model_id = %self.image_model_id, seed, "text-to-image call");
        let request = ImageRequest::text_to_image(prompt, seed);
        let response: ImageResponse = self.invoke(&self.image_model_id, &request).await?;
        self.decode_image(response, seed)
    }

    async fn image_variation(
        &self,
        prompt: &str,
        reference: &[u8],
        seed: u64,
    ) -> Result<GeneratedImage, BackendError> {
        tracing::debug!(model_id = %self.image_model_id, seed, "image-variation call");
        let request = ImageRequest::variation(prompt, BASE64.encode(reference), seed);
        let response: ImageResponse = self.invoke(&self.image_model_id, &request).await?;
        self.decode_image(response, seed)
    }
}
