//! # medmind-core
//!
//! Deterministic post-processing for clinical reasoning output.
//!
//! An external reasoning service reads a patient's images, reports and
//! symptoms and returns a loosely structured differential diagnosis. This
//! crate turns that untrusted record into a canonical analysis that is:
//!
//! 1. **Grounded**: every diagnosis either cites evidence tokens collected
//!    from the inputs or is visibly penalized
//! 2. **Safety-checked**: fixed emergency rules run over the raw inputs
//!    regardless of the model's conclusion
//! 3. **Calibrated**: confidence reflects input quality and modality count
//! 4. **Auditable**: every stage that ran is recorded, with the evidence set
//!    and the untouched model output
//!
//! No stage fails. Malformed input is defaulted, never rejected.
//!
//! ## Example
//!
//! ```rust,ignore
//! use medmind_core::{analyze, CollectionInput};
//!
//! let raw: serde_json::Value = serde_json::from_str(&model_output)?;
//! let images = vec!["chest.jpg".to_string()];
//! let analysis = analyze(&raw, &CollectionInput {
//!     images: &images,
//!     report_text: "O2 Sat 91% on room air",
//!     symptoms_text: "Fever and productive cough for 2 days.",
//!     transcript_segments: None,
//! });
//!
//! if analysis.emergency {
//!     println!("ESCALATE: {:?}", analysis.emergency_reasons);
//! }
//! ```

pub mod audit;
pub mod calibration;
pub mod canonical;
pub mod evidence;
pub mod fixtures;
pub mod grounding;
pub mod pipeline;
pub mod safety;
pub mod schema;
pub mod types;

// Re-export main types at crate root
pub use audit::{AuditTrace, Stage};
pub use calibration::{apply_confidence_calibration, apply_fallback};
pub use canonical::canonicalize;
pub use evidence::{
    collect, collect_all, CollectionInput, EvidenceKind, EvidenceMeta, EvidenceToken,
    TranscriptSegment,
};
pub use grounding::enforce_grounding;
pub use pipeline::{run_cached, run_pipeline, ClinicalText, PipelineStage, StageContext};
pub use safety::{apply_emergency_rules, SafetyCheckResult};
pub use schema::SchemaError;
pub use types::{
    Analysis, AnalysisMeta, ConsistencyAnalysis, Diagnosis, DoctorNote, SoapNote, Urgency,
};

/// Collect evidence from `input` and run `raw` through the full pipeline.
///
/// This is the main entry point once the reasoning service has answered.
pub fn analyze(raw: &serde_json::Value, input: &CollectionInput<'_>) -> Analysis {
    let evidence = collect_all(input);
    run_pipeline(
        raw,
        &evidence,
        ClinicalText {
            symptoms_text: input.symptoms_text,
            report_text: input.report_text,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_analysis() {
        let raw = json!({
            "summary": "Probable pneumonia.",
            "differentials": [{
                "name": "Pneumonia",
                "confidence": 90,
                "urgency": "Soon",
                "supporting_evidence": ["lab:General:O2=91"]
            }]
        });
        let analysis = analyze(
            &raw,
            &CollectionInput {
                report_text: "O2 Sat 91% on room air",
                ..Default::default()
            },
        );

        assert!(analysis.evidence_ok);
        assert!(!analysis.emergency);
        assert_eq!(analysis.differentials[0].urgency, Urgency::Soon);
        assert_eq!(analysis.audit.actions().last().map(String::as_str), Some("finalizeAnalysis"));
    }

    #[test]
    fn test_emergency_escalates() {
        let raw = json!({
            "differentials": [{"name": "Pulmonary embolism", "confidence": 0.6, "urgency": "Soon"}]
        });
        let analysis = analyze(
            &raw,
            &CollectionInput {
                symptoms_text: "Sudden chest pain and SpO2 82%",
                ..Default::default()
            },
        );

        assert!(analysis.emergency);
        assert_eq!(
            analysis.emergency_reasons,
            vec![
                "Reported sudden chest pain",
                "Critical Oxygen Saturation detected: 82% (< 85%)",
            ]
        );
        // penalized to 24% before the safety net runs, still above the upgrade threshold
        let d = &analysis.differentials[0];
        assert_eq!(d.urgency, Urgency::Urgent);
        assert_eq!(
            d.warnings,
            vec![
                grounding::NO_EVIDENCE_WARNING,
                safety::URGENCY_UPGRADE_WARNING,
            ]
        );
    }
}
