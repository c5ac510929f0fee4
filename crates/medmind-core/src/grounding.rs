//! Evidence grounding.
//!
//! A diagnosis that cites no supporting evidence keeps its place in the
//! differential but loses confidence, is flagged with a warning, and has its
//! reasoning marked. The penalty is recorded on the diagnosis so it is never
//! applied twice.

use std::collections::HashSet;

use crate::audit::Stage;
use crate::evidence::EvidenceToken;
use crate::pipeline::{PipelineStage, StageContext};
use crate::types::Analysis;

/// Multiplier applied to calibrated confidence of an ungrounded diagnosis.
pub const GROUNDING_PENALTY: f64 = 0.4;

/// Warning attached to every ungrounded diagnosis.
pub const NO_EVIDENCE_WARNING: &str = "No explicit supporting evidence found. Confidence penalized.";

/// Prefix added to the reasoning of an ungrounded diagnosis.
pub const LOW_CONFIDENCE_PREFIX: &str = "[LOW CONFIDENCE: NO EVIDENCE] ";

/// Penalize ungrounded diagnoses and set `evidence_ok`.
pub fn enforce_grounding(analysis: &mut Analysis, evidence: &[EvidenceToken]) {
    let known: HashSet<&str> = evidence.iter().map(|t| t.id.as_str()).collect();
    let mut penalized = 0usize;

    for diagnosis in &mut analysis.differentials {
        if diagnosis.is_grounded() {
            for id in &diagnosis.supporting_evidence {
                if !known.contains(id.as_str()) {
                    tracing::debug!(
                        diagnosis = %diagnosis.name,
                        evidence_id = %id,
                        "Dangling evidence reference"
                    );
                }
            }
            continue;
        }

        if !diagnosis.is_penalized() {
            diagnosis.grounding_factor = GROUNDING_PENALTY;
            let percent = diagnosis.calibrated_confidence * GROUNDING_PENALTY;
            diagnosis.set_calibrated_percent(percent);
            penalized += 1;
        }
        diagnosis.warn_once(NO_EVIDENCE_WARNING);
        if !diagnosis.reasoning.starts_with(LOW_CONFIDENCE_PREFIX) {
            diagnosis.reasoning = format!("{}{}", LOW_CONFIDENCE_PREFIX, diagnosis.reasoning);
        }
    }

    analysis.evidence_ok = analysis.differentials.iter().all(|d| d.is_grounded());
    analysis.audit.record(Stage::EnforceEvidenceGrounding);

    tracing::debug!(
        trace_id = %analysis.audit.trace_id,
        penalized,
        evidence_ok = analysis.evidence_ok,
        "Enforced evidence grounding"
    );
}

/// Pipeline stage wrapper for [`enforce_grounding`].
pub struct GroundingEnforcer;

impl GroundingEnforcer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GroundingEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for GroundingEnforcer {
    fn stage(&self) -> Stage {
        Stage::EnforceEvidenceGrounding
    }

    fn apply(&self, analysis: &mut Analysis, ctx: &StageContext<'_>) {
        enforce_grounding(analysis, ctx.evidence);
    }
}
