//! Analysis service.
//!
//! One request runs as follows:
//! 1. Collect evidence from the inputs (deterministic)
//! 2. Demo short-circuit: with a demo context and a matching cached record,
//!    run the cached path and stop
//! 3. Encode media, build the prompt, call the provider under the request
//!    timeout
//! 4. Parse the answer, log schema drift, run the pipeline
//!
//! Any failure in 3 or 4 surfaces as [`RuntimeError::AnalysisFailed`].

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use medmind_core::{
    collect_all, fixtures, run_cached, run_pipeline, schema, Analysis, ClinicalText,
    CollectionInput, EvidenceToken, TranscriptSegment,
};

use crate::config::RuntimeConfig;
use crate::media::MediaPart;
use crate::prompts::{build_prompt, SYSTEM_INSTRUCTION};
use crate::providers::{ProviderRegistry, ReasoningProvider, ReasoningRequest};
use crate::{FailureCause, RuntimeError};

/// Inputs for one analysis.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub image_paths: Vec<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub symptoms_text: String,
    pub report_text: String,
    pub transcript_segments: Option<Vec<TranscriptSegment>>,
    /// Simulation instructions for demo cases.
    pub demo_context: Option<String>,
}

impl AnalysisRequest {
    /// Image file names, as used in evidence ids.
    pub fn image_names(&self) -> Vec<String> {
        self.image_paths
            .iter()
            .map(|p| match p.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => p.to_string_lossy().into_owned(),
            })
            .collect()
    }

    fn text(&self) -> ClinicalText<'_> {
        ClinicalText {
            symptoms_text: &self.symptoms_text,
            report_text: &self.report_text,
        }
    }
}

pub struct AnalysisService {
    provider: Arc<dyn ReasoningProvider>,
    config: RuntimeConfig,
}

impl AnalysisService {
    pub fn new(provider: Arc<dyn ReasoningProvider>, config: RuntimeConfig) -> Self {
        Self { provider, config }
    }

    /// Create the configured provider through `registry`.
    pub fn from_config(config: RuntimeConfig, registry: &ProviderRegistry) -> Result<Self, RuntimeError> {
        registry
            .validate(&config.provider, &config.provider_options)
            .map_err(RuntimeError::ProviderSetup)?;
        let provider = registry
            .create(&config.provider, &config.provider_options)
            .map_err(RuntimeError::ProviderSetup)?;
        Ok(Self::new(provider, config))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, RuntimeError> {
        let images = request.image_names();
        let evidence = collect_all(&CollectionInput {
            images: &images,
            report_text: &request.report_text,
            symptoms_text: &request.symptoms_text,
            transcript_segments: request.transcript_segments.as_deref(),
        });
        tracing::debug!(n_evidence = evidence.len(), "Collected evidence");

        if let Some(analysis) = self.try_cached(request, &evidence) {
            return Ok(analysis);
        }

        self.analyze_live(request, &evidence).await.map_err(|cause| {
            tracing::error!(provider = self.provider.name(), error = %cause, "Analysis failed");
            RuntimeError::AnalysisFailed { cause }
        })
    }

    fn try_cached(&self, request: &AnalysisRequest, evidence: &[EvidenceToken]) -> Option<Analysis> {
        if !self.config.use_fixtures || request.demo_context.is_none() {
            return None;
        }
        let case_id = fixtures::detect_case(&request.symptoms_text)?;
        let analysis = run_cached(case_id, evidence, request.text());
        if analysis.is_none() {
            tracing::debug!(case_id, "No cached record for demo case");
        }
        analysis
    }

    async fn analyze_live(
        &self,
        request: &AnalysisRequest,
        evidence: &[EvidenceToken],
    ) -> Result<Analysis, FailureCause> {
        let mut media = Vec::with_capacity(request.image_paths.len() + 1);
        for path in &request.image_paths {
            media.push(MediaPart::from_path(path).await?);
        }
        if let Some(path) = &request.audio_path {
            media.push(MediaPart::from_audio_path(path).await?);
        }

        let response_schema = match schema::response_schema() {
            Ok(schema) => Some(schema),
            Err(e) => {
                tracing::warn!(error = %e, "Sending request without response schema");
                None
            }
        };
        let generation = self.config.generation_config(response_schema);

        let reasoning_request = ReasoningRequest {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            prompt: build_prompt(
                &request.symptoms_text,
                &request.report_text,
                request.demo_context.as_deref(),
                evidence,
            ),
            media,
        };

        let timeout = self.config.request_timeout;
        let response = tokio::time::timeout(timeout, self.provider.generate(&reasoning_request, &generation))
            .await
            .map_err(|_| FailureCause::Timeout(timeout))??;

        let raw: Value = serde_json::from_str(json_payload(&response.text))?;
        if !raw.is_object() {
            return Err(FailureCause::NotAnObject);
        }
        schema::report_drift(&raw);

        Ok(run_pipeline(&raw, evidence, request.text()))
    }
}

/// Strip a Markdown code fence around the answer, if present.
fn json_payload(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
