//! Google Gemini provider.
//!
//! Posts a `generateContent` request with the prompt, inline media, the
//! system instruction and a JSON response schema. The HTTP call is only
//! compiled with the `gemini` feature; without it `generate` reports
//! [`ProviderError::NotConfigured`].

#![cfg_attr(not(feature = "gemini"), allow(dead_code))]

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource, GEMINI_API_KEY_ENV},
    GenerationConfig, ProviderError, ReasoningProvider, ReasoningRequest, ReasoningResponse,
    TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const CREDENTIAL_NAME: &str = "Gemini API key";

pub struct GeminiProvider {
    credential: ApiCredential,
    base_url: String,
    #[cfg(feature = "gemini")]
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_credential(
            ApiCredential::new(api_key, CredentialSource::Programmatic, CREDENTIAL_NAME),
            DEFAULT_BASE_URL.to_string(),
        )
    }

    /// Create from provider options (`api_key`, `base_url`), falling back to
    /// `GEMINI_API_KEY` for the key.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            GEMINI_API_KEY_ENV,
            CREDENTIAL_NAME,
        )?;

        let base_url = config["base_url"]
            .as_str()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self::with_credential(credential, base_url))
    }

    fn with_credential(credential: ApiCredential, base_url: String) -> Self {
        Self {
            credential,
            base_url,
            #[cfg(feature = "gemini")]
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    #[cfg(feature = "gemini")]
    async fn send(
        &self,
        body: &GenerateContentRequest,
        config: &GenerationConfig,
    ) -> Result<GenerateContentResponse, ProviderError> {
        use std::time::Duration;

        // The credential is exposed here and nowhere else.
        let response = self
            .client
            .post(self.endpoint(&config.model))
            .header("x-goog-api-key", self.credential.expose())
            .timeout(config.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let message = match response.json::<GeminiError>().await {
                Ok(body) => body.error.message,
                Err(_) => status.to_string(),
            };
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    #[serde(rename = "text")]
    Text(String),
    InlineData(InlineData),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<JsonValue>,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

/// Answer parts may carry extra keys (thought signatures); only text is read.
#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

fn build_request(request: &ReasoningRequest, config: &GenerationConfig) -> GenerateContentRequest {
    let mut parts = vec![Part::Text(request.prompt.clone())];
    parts.extend(request.media.iter().map(|m| {
        Part::InlineData(InlineData {
            mime_type: m.mime_type.clone(),
            data: m.data.clone(),
        })
    }));

    GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part::Text(request.system_instruction.clone())],
        },
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config: GeminiGenerationConfig {
            response_mime_type: "application/json",
            response_json_schema: config.response_schema.clone(),
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        },
    }
}

fn into_response(
    body: GenerateContentResponse,
    config: &GenerationConfig,
) -> Result<ReasoningResponse, ProviderError> {
    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyResponse)?;

    let text: String = candidate
        .content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }

    let usage = body
        .usage_metadata
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(ReasoningResponse {
        text,
        model: body.model_version.unwrap_or_else(|| config.model.clone()),
        finish_reason: candidate.finish_reason,
        usage,
    })
}

#[async_trait]
impl ReasoningProvider for GeminiProvider {
    #[cfg(feature = "gemini")]
    async fn generate(
        &self,
        request: &ReasoningRequest,
        config: &GenerationConfig,
    ) -> Result<ReasoningResponse, ProviderError> {
        let body = build_request(request, config);
        tracing::debug!(
            model = %config.model,
            n_media = request.media.len(),
            "Sending generateContent request"
        );

        let response = super::retry_rate_limited(|| self.send(&body, config)).await?;
        let response = into_response(response, config)?;

        tracing::debug!(
            model = %response.model,
            finish_reason = ?response.finish_reason,
            total_tokens = response.usage.total(),
            "Reasoning service answered"
        );
        Ok(response)
    }

    #[cfg(not(feature = "gemini"))]
    async fn generate(
        &self,
        _request: &ReasoningRequest,
        _config: &GenerationConfig,
    ) -> Result<ReasoningResponse, ProviderError> {
        Err(ProviderError::NotConfigured(
            "Gemini provider requires the 'gemini' feature".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Factory for Gemini providers.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "AIza...",       // Optional, falls back to GEMINI_API_KEY env
///   "base_url": "https://..."   // Optional, custom API endpoint
/// }
/// ```
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ReasoningProvider>, ProviderError> {
        Ok(Arc::new(GeminiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", GEMINI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Gemini API key required: set 'api_key' in provider_options or {} env",
                GEMINI_API_KEY_ENV
            )));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaPart;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let request = ReasoningRequest {
            system_instruction: "You are MedMind.".to_string(),
            prompt: "PATIENT SYMPTOMS: cough".to_string(),
            media: vec![MediaPart::from_bytes(b"hello", "image/png")],
        };
        let config = GenerationConfig {
            response_schema: Some(json!({"type": "object"})),
            ..Default::default()
        };

        let body = serde_json::to_value(build_request(&request, &config)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are MedMind.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "PATIENT SYMPTOMS: cough");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["data"], "aGVsbG8=");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseJsonSchema"]["type"], "object");
        assert!(body["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn test_response_text_joined() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"summary\":"}, {"text": "\"ok\"}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 30},
            "modelVersion": "gemini-2.5-flash-001"
        }))
        .unwrap();

        let response = into_response(body, &GenerationConfig::default()).unwrap();
        assert_eq!(response.text, "{\"summary\":\"ok\"}");
        assert_eq!(response.model, "gemini-2.5-flash-001");
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(response.usage.total(), 150);
    }

    #[test]
    fn test_empty_candidates_is_empty_response() {
        let body: GenerateContentResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(matches!(
            into_response(body, &GenerationConfig::default()),
            Err(ProviderError::EmptyResponse)
        ));
    }

    #[test]
    fn test_endpoint() {
        let provider =
            GeminiProvider::from_config(&json!({"api_key": "key", "base_url": "http://localhost:8080"}))
                .unwrap();
        assert_eq!(
            provider.endpoint("gemini-2.5-flash"),
            "http://localhost:8080/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_factory_create_with_api_key() {
        let factory = GeminiProviderFactory;
        let provider = factory
            .create(&json!({"api_key": "test-api-key", "base_url": "https://example.test/v1/"}))
            .unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn test_factory_validate_invalid_base_url() {
        let factory = GeminiProviderFactory;
        let result = factory.validate_config(&json!({"api_key": "k", "base_url": "invalid-url"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_trims_base_url() {
        let provider =
            GeminiProvider::from_config(&json!({"api_key": "k", "base_url": "https://x.test/v1beta/"}))
                .unwrap();
        assert_eq!(provider.base_url, "https://x.test/v1beta");
        assert!(provider.credential.to_string().contains("from config"));
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "AIza-super-secret-key-12345";
        let provider = GeminiProvider::new(secret_key);

        let debug_output = format!("{:?}", provider);
        assert!(!debug_output.contains(secret_key), "API key was exposed in Debug output!");
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[cfg(not(feature = "gemini"))]
    #[tokio::test]
    async fn test_generate_without_feature_not_configured() {
        let provider = GeminiProvider::new("key");
        let result = provider
            .generate(&ReasoningRequest::default(), &GenerationConfig::default())
            .await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }
}
