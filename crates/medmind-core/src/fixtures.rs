//! Canned demo cases and their cached reasoning records.
//!
//! A cached record stands in for the reasoning service during demos. It is
//! handed out as a fresh deep copy and goes through the same pipeline as
//! live output, so demo results carry a real audit trail.

use serde_json::Value;

use crate::audit::Stage;
use crate::evidence::{self, EvidenceToken};
use crate::grounding::NO_EVIDENCE_WARNING;
use crate::pipeline::{run_cached, ClinicalText};

const PNEUMONIA_JSON: &str = include_str!("../fixtures/pneumonia.json");
const ANEMIA_JSON: &str = include_str!("../fixtures/anemia.json");

/// File name of the placeholder image attached to every demo case.
pub const DEMO_IMAGE_FILE: &str = "simulated_scan.jpg";

/// Symptom phrases that identify a demo case.
const CASE_MARKERS: &[(&str, &str)] = &[
    ("rust-colored", "pneumonia"),
    ("pagophagia", "anemia"),
    ("pop", "acl"),
    ("mole", "skin"),
];

/// A canned demo input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoCase {
    pub id: &'static str,
    pub label: &'static str,
    pub symptoms: &'static str,
    pub report: &'static str,
    pub image_label: &'static str,
    /// Simulation instructions passed to the reasoning service.
    pub context: &'static str,
}

impl DemoCase {
    pub fn images(&self) -> Vec<String> {
        vec![DEMO_IMAGE_FILE.to_string()]
    }

    pub fn text(&self) -> ClinicalText<'static> {
        ClinicalText {
            symptoms_text: self.symptoms,
            report_text: self.report,
        }
    }

    /// Evidence collected from this case's canned inputs.
    pub fn evidence(&self) -> Vec<EvidenceToken> {
        evidence::collect(&self.images(), self.report, self.symptoms)
    }
}

const DEMO_CASES: [DemoCase; 4] = [
    DemoCase {
        id: "pneumonia",
        label: "Pneumonia",
        symptoms: "Patient (45M) presents with high fever (39.2°C), productive cough with rust-colored sputum, and sharp pleuritic chest pain on the right side. Symptoms started abruptly 2 days ago. Chills and rigor reported.",
        report: "Vitals: HR 105 bpm, BP 130/85, RR 26/min, O2 Sat 91% on room air.\nAusculation: Crackles heard in the right lower lung field.",
        image_label: "Chest X-Ray: RLL Consolidation",
        context: "SIMULATION: Analyze this case as if the image provided is a Chest X-Ray showing clear Right Lower Lobe (RLL) consolidation and air bronchograms consistent with bacterial pneumonia.",
    },
    DemoCase {
        id: "anemia",
        label: "Severe Anemia",
        symptoms: "Patient (32F) reports progressive fatigue, weakness, and dizziness upon standing over the past 3 months. Notes heavier than usual menstrual periods and craving for ice (pagophagia).",
        report: "LAB RESULTS:\nHemoglobin: 8.2 g/dL (Low)\nMCV: 72 fL (Low)\nFerritin: 10 ng/mL (Low)\nTIBC: 450 mcg/dL (High)\nPeripheral Smear: Hypochromic microcytic red cells observed.",
        image_label: "Peripheral Blood Smear",
        context: "SIMULATION: Analyze this case as a classic presentation of Iron Deficiency Anemia. Treat the image as a blood smear showing hypochromia and microcytosis.",
    },
    DemoCase {
        id: "acl",
        label: "ACL Tear",
        symptoms: "Athlete (24M) felt a \"pop\" in the left knee while cutting direction during soccer. Immediate swelling and inability to bear weight. Knee feels unstable (\"giving way\").",
        report: "Physical Exam:\n+ Lachman Test\n+ Anterior Drawer Test\nMinimal range of motion due to effusion.",
        image_label: "MRI Left Knee (T2 Sagittal)",
        context: "SIMULATION: Analyze this case as an Anterior Cruciate Ligament (ACL) tear. Treat the image as a T2-weighted MRI sequence showing discontinuity of the ACL fibers and bone bruising.",
    },
    DemoCase {
        id: "skin",
        label: "Melanoma",
        symptoms: "Patient (55M) noticed a mole on the upper back has changed shape and color over the last 6 months. Reports occasional itching but no bleeding.",
        report: "Dermatoscopy report pending. Family history of skin cancer.",
        image_label: "Dermatoscopy: Asymmetric Lesion",
        context: "SIMULATION: Analyze this case as a potential Malignant Melanoma. Treat the image as a skin lesion showing Asymmetry, Irregular Borders, Color variation, and Diameter > 6mm (ABCD criteria).",
    },
];

/// All demo cases, in display order.
pub fn demo_cases() -> &'static [DemoCase] {
    &DEMO_CASES
}

pub fn demo_case(id: &str) -> Option<&'static DemoCase> {
    DEMO_CASES.iter().find(|case| case.id == id)
}

/// Case ids that have a cached record.
pub fn cached_case_ids() -> &'static [&'static str] {
    &["pneumonia", "anemia"]
}

/// Fresh copy of the cached record for `case_id`.
pub fn lookup(case_id: &str) -> Option<Value> {
    let source = match case_id {
        "pneumonia" => PNEUMONIA_JSON,
        "anemia" => ANEMIA_JSON,
        _ => return None,
    };

    match serde_json::from_str(source) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(case_id, error = %e, "Cached record is not valid JSON");
            None
        }
    }
}

/// Identify a demo case from its symptom text.
pub fn detect_case(symptoms: &str) -> Option<&'static str> {
    let lower = symptoms.to_lowercase();
    CASE_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, case_id)| *case_id)
}

/// A problem found by [`sanity_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityViolation {
    pub case_id: String,
    pub message: String,
}

impl std::fmt::Display for SanityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.case_id, self.message)
    }
}

/// Check every cached record, raw and after a pipeline run.
///
/// Returns an empty list when all records are sound.
pub fn sanity_check() -> Vec<SanityViolation> {
    let mut violations = Vec::new();

    for case_id in cached_case_ids() {
        let mut fail = |message: String| {
            violations.push(SanityViolation {
                case_id: case_id.to_string(),
                message,
            })
        };

        let Some(raw) = lookup(case_id) else {
            fail("cached record missing or unreadable".to_string());
            continue;
        };

        if raw.get("cached_demo").and_then(Value::as_bool) != Some(true) {
            fail("missing cached_demo flag".to_string());
        }
        let has_trace_id = raw
            .get("audit")
            .and_then(|a| a.get("trace_id"))
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty());
        if !has_trace_id {
            fail("missing audit trace_id".to_string());
        }

        let (evidence, text) = match demo_case(case_id) {
            Some(case) => (case.evidence(), case.text()),
            None => (Vec::new(), ClinicalText::default()),
        };
        let Some(analysis) = run_cached(case_id, &evidence, text) else {
            fail("pipeline produced no analysis".to_string());
            continue;
        };

        for (i, d) in analysis.differentials.iter().enumerate() {
            let warned = d.warnings.iter().any(|w| w == NO_EVIDENCE_WARNING);
            if !d.is_grounded() && !warned {
                fail(format!("diagnosis #{} ({}) has no evidence and no warning", i, d.name));
            }
            if !(0.0..=1.0).contains(&d.calibrated_confidence_fraction) {
                fail(format!("diagnosis #{} ({}) has out-of-range confidence", i, d.name));
            }
        }

        let expected: Vec<&str> = Stage::ORDER.iter().map(Stage::as_str).collect();
        if analysis.audit.actions() != expected.as_slice() {
            fail(format!("unexpected audit log {:?}", analysis.audit.actions()));
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_returns_fresh_copies() {
        let mut first = lookup("pneumonia").expect("fixture");
        first["summary"] = Value::String("changed".to_string());
        let second = lookup("pneumonia").expect("fixture");
        assert_ne!(first["summary"], second["summary"]);
    }

    #[test]
    fn test_lookup_unknown_case() {
        assert!(lookup("acl").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn test_detect_case() {
        for case in demo_cases() {
            assert_eq!(detect_case(case.symptoms), Some(case.id), "case {}", case.id);
        }
        assert_eq!(detect_case("headache and nausea"), None);
    }

    #[test]
    fn test_demo_cases_listed() {
        let ids: Vec<_> = demo_cases().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["pneumonia", "anemia", "acl", "skin"]);
        assert!(demo_case("skin").is_some());
        assert!(demo_case("flu").is_none());
    }

    #[test]
    fn test_pneumonia_demo_collects_o2() {
        let case = demo_case("pneumonia").expect("case");
        let ids: Vec<_> = case.evidence().into_iter().map(|t| t.id).collect();
        assert!(ids.contains(&"lab:General:O2=91".to_string()));
        assert!(ids.contains(&"image:simulated_scan.jpg:Primary_Finding".to_string()));
    }

    #[test]
    fn test_sanity_check_passes() {
        let violations = sanity_check();
        assert!(violations.is_empty(), "{:?}", violations);
    }
}
