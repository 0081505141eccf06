use crate::embeddings::Embedder;
use crate::traits::Generator;
use crate::CapabilityError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-004";
pub const DEFAULT_GENERATION_MODEL: &str = "gemma-3-4b-it";
pub const DEFAULT_GEMINI_DIMENSIONS: usize = 768;

const BACKEND: &str = "gemini";

/// Gemini REST client serving both the embedding and the generation
/// capability.
pub struct GeminiClient {
    endpoint: String,
    api_key: String,
    embed_model: String,
    generation_model: String,
    dimensions: usize,
    client: Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CapabilityError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            api_key: api_key.into(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            dimensions: DEFAULT_GEMINI_DIMENSIONS,
            client,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_embed_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.embed_model = model.into();
        self.dimensions = dimensions.max(1);
        self
    }

    pub fn with_generation_model(mut self, model: impl Into<String>) -> Self {
        self.generation_model = model.into();
        self
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.endpoint, model, method)
    }

    async fn call(&self, url: String, body: Value) -> Result<Value, CapabilityError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CapabilityError::Unavailable(format!(
                "{BACKEND} rate limited the request"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {body}"),
            });
        }

        Ok(response.json().await?)
    }
}

fn parse_embedding(response: &Value, dimensions: usize) -> Result<Vec<f32>, CapabilityError> {
    let values = response
        .pointer("/embedding/values")
        .and_then(Value::as_array)
        .ok_or_else(|| CapabilityError::MalformedOutput("embedding values missing".to_string()))?;

    let vector = values
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| CapabilityError::MalformedOutput("embedding has non-numeric values".to_string()))?;

    if vector.len() != dimensions {
        return Err(CapabilityError::MalformedOutput(format!(
            "embedding dimension {} != {}",
            vector.len(),
            dimensions
        )));
    }
    Ok(vector)
}

fn parse_generation(response: &Value) -> Result<String, CapabilityError> {
    let text = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.pointer("/text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(CapabilityError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "generation returned no text".to_string(),
        });
    }
    Ok(text)
}

#[async_trait]
impl Embedder for GeminiClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        // The API rejects empty content; the zero vector is the defined answer.
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }

        let start = Instant::now();
        let response = self
            .call(
                self.model_url(&self.embed_model, "embedContent"),
                json!({
                    "model": format!("models/{}", self.embed_model),
                    "content": { "parts": [{ "text": text }] },
                }),
            )
            .await?;
        let vector = parse_embedding(&response, self.dimensions)?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(model = %self.embed_model, duration_ms = elapsed, "embedding complete");
        if elapsed > 5_000 {
            warn!(duration_ms = elapsed, slow = true, "slow embedding call");
        }
        Ok(vector)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let start = Instant::now();
        let response = self
            .call(
                self.model_url(&self.generation_model, "generateContent"),
                json!({
                    "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                }),
            )
            .await?;
        let text = parse_generation(&response)?;

        debug!(
            model = %self.generation_model,
            prompt_len = prompt.len(),
            response_len = text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "generation complete"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_urls_follow_rest_layout() {
        let client = GeminiClient::new("key")
            .unwrap()
            .with_endpoint("http://localhost:8089/");
        assert_eq!(
            client.model_url("text-embedding-004", "embedContent"),
            "http://localhost:8089/v1beta/models/text-embedding-004:embedContent"
        );
    }

    #[test]
    fn embedding_dimension_is_checked() {
        let response = json!({ "embedding": { "values": [0.1, 0.2, 0.3] } });
        assert_eq!(parse_embedding(&response, 3).unwrap().len(), 3);
        assert!(matches!(
            parse_embedding(&response, 768),
            Err(CapabilityError::MalformedOutput(_))
        ));
        assert!(parse_embedding(&json!({}), 3).is_err());
    }

    #[test]
    fn generation_parts_are_concatenated() {
        let response = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "there" }] } }]
        });
        assert_eq!(parse_generation(&response).unwrap(), "Hello there");
        assert!(parse_generation(&json!({ "candidates": [] })).is_err());
    }

    #[tokio::test]
    async fn empty_text_embeds_without_a_request() {
        let client = GeminiClient::new("key")
            .unwrap()
            .with_endpoint("http://127.0.0.1:9")
            .with_embed_model("text-embedding-004", 8);
        assert_eq!(client.embed("   ").await.unwrap(), vec![0.0; 8]);
    }
}
