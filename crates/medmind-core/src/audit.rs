//! Audit trail carried inside every analysis.
//!
//! The trace records the evidence set the analysis was grounded against,
//! the untouched reasoning-service output, and the names of the
//! post-processing stages in the order they ran. The action log is
//! append-only.

use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceToken;

/// Trace id prefix for live analyses.
pub const LIVE_TRACE_PREFIX: &str = "medmind";

/// Trace id prefix for cached demo analyses.
pub const DEMO_TRACE_PREFIX: &str = "demo";

/// A post-processing stage, as named in the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    NormalizeToCanonical,
    EnforceEvidenceGrounding,
    ApplyEmergencyRules,
    ApplyConfidenceCalibration,
    ApplyCalibrationFallback,
    FinalizeAnalysis,
}

impl Stage {
    /// Stages in the order a full pipeline run records them.
    pub const ORDER: [Stage; 6] = [
        Stage::NormalizeToCanonical,
        Stage::EnforceEvidenceGrounding,
        Stage::ApplyEmergencyRules,
        Stage::ApplyConfidenceCalibration,
        Stage::ApplyCalibrationFallback,
        Stage::FinalizeAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::NormalizeToCanonical => "normalizeToCanonical",
            Stage::EnforceEvidenceGrounding => "enforceEvidenceGrounding",
            Stage::ApplyEmergencyRules => "applyEmergencyRules",
            Stage::ApplyConfidenceCalibration => "applyConfidenceCalibration",
            Stage::ApplyCalibrationFallback => "applyCalibrationFallback",
            Stage::FinalizeAnalysis => "finalizeAnalysis",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrace {
    pub trace_id: String,

    pub evidence: Vec<EvidenceToken>,

    /// The reasoning-service record exactly as received.
    pub model_output_raw: serde_json::Value,

    postprocessing_actions: Vec<String>,
}

impl AuditTrace {
    /// Start a trace with an empty action log.
    pub fn new(
        trace_id: impl Into<String>,
        evidence: Vec<EvidenceToken>,
        model_output_raw: serde_json::Value,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            evidence,
            model_output_raw,
            postprocessing_actions: Vec::new(),
        }
    }

    /// Append a stage to the action log.
    pub fn record(&mut self, stage: Stage) {
        self.postprocessing_actions.push(stage.as_str().to_string());
    }

    pub fn actions(&self) -> &[String] {
        &self.postprocessing_actions
    }

    pub fn has_run(&self, stage: Stage) -> bool {
        self.postprocessing_actions.iter().any(|a| a == stage.as_str())
    }
}

/// A fresh trace id, `<prefix>-<unix millis>`.
pub fn new_trace_id(prefix: &str) -> String {
    format!("{}-{}", prefix, chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_appends_in_order() {
        let mut trace = AuditTrace::new("t-1", Vec::new(), serde_json::Value::Null);
        trace.record(Stage::NormalizeToCanonical);
        trace.record(Stage::EnforceEvidenceGrounding);

        assert_eq!(trace.actions(), ["normalizeToCanonical", "enforceEvidenceGrounding"]);
        assert!(trace.has_run(Stage::EnforceEvidenceGrounding));
        assert!(!trace.has_run(Stage::FinalizeAnalysis));
    }

    #[test]
    fn test_trace_id_format() {
        let id = new_trace_id(LIVE_TRACE_PREFIX);
        let millis = id.strip_prefix("medmind-").expect("prefix");
        assert!(millis.parse::<i64>().is_ok());
    }

    #[test]
    fn test_actions_serialize() {
        let mut trace = AuditTrace::new("t-2", Vec::new(), serde_json::json!({"a": 1}));
        trace.record(Stage::FinalizeAnalysis);
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["postprocessing_actions"][0], "finalizeAnalysis");
        assert_eq!(json["model_output_raw"]["a"], 1);
    }
}
