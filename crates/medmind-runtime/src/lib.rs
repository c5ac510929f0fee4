//! # medmind-runtime
//!
//! Reasoning-service runtime for MedMind.
//!
//! This crate sends a patient's images, reports and symptoms to a reasoning
//! provider and hands the answer to the deterministic pipeline in
//! `medmind-core`. It owns everything that can fail or block: file reads,
//! network calls, timeouts and configuration.
//!
//! ## Important
//!
//! `medmind-core` never calls a provider. A saved reasoning record can be
//! post-processed without this crate.
//!
//! ## Example
//!
//! ```rust,ignore
//! use medmind_runtime::{AnalysisRequest, AnalysisService, ProviderRegistry, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_file("medmind.yaml")?.with_env_overrides()?;
//! let service = AnalysisService::from_config(config, &ProviderRegistry::with_defaults())?;
//!
//! let analysis = service.analyze(&AnalysisRequest {
//!     image_paths: vec!["chest.jpg".into()],
//!     symptoms_text: "Fever and productive cough for 2 days.".to_string(),
//!     report_text: "O2 Sat 91% on room air".to_string(),
//!     ..Default::default()
//! }).await?;
//! ```

use std::time::Duration;

use thiserror::Error;

pub mod config;
pub mod media;
pub mod orchestrator;
pub mod prompts;
pub mod providers;

pub use config::{ConfigError, RuntimeConfig};
pub use media::{MediaError, MediaPart};
pub use orchestrator::{AnalysisRequest, AnalysisService};
pub use providers::{
    GenerationConfig, ProviderError, ProviderRegistry, ReasoningProvider, ReasoningRequest,
    ReasoningResponse,
};

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Provider setup failed: {0}")]
    ProviderSetup(#[source] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The one failure consumers see for a request. The cause is logged
    /// when it happens and kept as the error source.
    #[error("Analysis failed")]
    AnalysisFailed {
        #[source]
        cause: FailureCause,
    },
}

/// Why a live analysis failed.
#[derive(Error, Debug)]
pub enum FailureCause {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Reasoning service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Reasoning output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Reasoning output is not a JSON object")]
    NotAnObject,
}
