//! Canonical analysis record.
//!
//! Narrative fields serialize in camelCase; diagnosis and audit fields keep
//! snake_case, matching the record consumers already read.

use serde::{Deserialize, Serialize};

use crate::audit::AuditTrace;

/// Quality score assumed before calibration has run.
pub const DEFAULT_QUALITY_SCORE: f64 = 0.85;

/// Clinical urgency of a diagnosis, least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Urgency {
    #[default]
    Routine,
    Soon,
    Urgent,
    Emergency,
}

impl Urgency {
    /// Parse case-insensitively. Unknown values become `Routine`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "soon" => Urgency::Soon,
            "urgent" => Urgency::Urgent,
            "emergency" => Urgency::Emergency,
            _ => Urgency::Routine,
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Urgency::Routine => "Routine",
            Urgency::Soon => "Soon",
            Urgency::Urgent => "Urgent",
            Urgency::Emergency => "Emergency",
        };
        f.write_str(s)
    }
}

fn unpenalized() -> f64 {
    1.0
}

/// One differential diagnosis.
///
/// Confidence is held in two forms: a percentage (`0..=100`) and a fraction
/// (`0..=1`). Stages that change one update the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub name: String,

    pub raw_confidence: f64,

    pub calibrated_confidence: f64,

    pub raw_confidence_fraction: f64,

    pub calibrated_confidence_fraction: f64,

    pub reasoning: String,

    pub urgency: Urgency,

    pub supporting_evidence: Vec<String>,

    pub conflicting_evidence: Vec<String>,

    pub warnings: Vec<String>,

    /// Multiplier applied by grounding; 1.0 until a penalty is recorded.
    #[serde(default = "unpenalized")]
    pub grounding_factor: f64,
}

impl Diagnosis {
    /// A diagnosis with the given name and raw confidence (percent), not yet
    /// calibrated.
    pub fn new(name: impl Into<String>, raw_confidence: f64) -> Self {
        let fraction = raw_confidence / 100.0;
        Self {
            name: name.into(),
            raw_confidence,
            calibrated_confidence: raw_confidence,
            raw_confidence_fraction: fraction,
            calibrated_confidence_fraction: fraction,
            reasoning: String::new(),
            urgency: Urgency::Routine,
            supporting_evidence: Vec::new(),
            conflicting_evidence: Vec::new(),
            warnings: Vec::new(),
            grounding_factor: unpenalized(),
        }
    }

    /// Set calibrated confidence from a percentage, keeping the fraction in step.
    pub fn set_calibrated_percent(&mut self, percent: f64) {
        self.calibrated_confidence = percent;
        self.calibrated_confidence_fraction = percent / 100.0;
    }

    pub fn is_grounded(&self) -> bool {
        !self.supporting_evidence.is_empty()
    }

    pub fn is_penalized(&self) -> bool {
        self.grounding_factor < 1.0
    }

    /// Append a warning unless it is already present.
    pub fn warn_once(&mut self, warning: &str) {
        if !self.warnings.iter().any(|w| w == warning) {
            self.warnings.push(warning.to_string());
        }
    }
}

/// SOAP-format clinical note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoapNote {
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
}

/// Structured note for the treating clinician.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DoctorNote {
    pub chief_complaint: String,
    pub history_of_present_illness: String,
    pub imaging_findings: String,
    pub lab_interpretation: String,
    pub assessment_differential: String,
    pub plan_and_recommendations: String,
}

/// How well the different inputs agree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyAnalysis {
    pub matches: Vec<String>,
    pub mismatches: Vec<String>,
    pub notes: String,
}

/// Modality and input-quality figures written by calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMeta {
    pub n_modalities: usize,
    pub quality_score: f64,
}

impl Default for AnalysisMeta {
    fn default() -> Self {
        Self {
            n_modalities: 0,
            quality_score: DEFAULT_QUALITY_SCORE,
        }
    }
}

/// The canonical analysis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub summary: String,

    pub abnormalities: Vec<String>,

    pub differentials: Vec<Diagnosis>,

    pub red_flags: Vec<String>,

    pub recommended_tests: Vec<String>,

    pub soap_note: SoapNote,

    pub doctor_note: DoctorNote,

    pub consistency: ConsistencyAnalysis,

    pub timeline_hypothesis: String,

    pub reasoning_chain: Vec<String>,

    pub patient_explanation: String,

    pub doctor_explanation: String,

    pub child_explanation: String,

    pub next_steps: String,

    pub meta: AnalysisMeta,

    pub emergency: bool,

    #[serde(rename = "emergency_reasons")]
    pub emergency_reasons: Vec<String>,

    #[serde(rename = "cached_demo")]
    pub cached_demo: bool,

    /// True iff every diagnosis cited supporting evidence. Set by grounding.
    #[serde(rename = "_evidence_ok")]
    pub evidence_ok: bool,

    pub audit: AuditTrace,
}

impl Analysis {
    pub fn trace_id(&self) -> &str {
        &self.audit.trace_id
    }
}
