//! Canonicalization of reasoning-service output.
//!
//! The reasoning service returns loosely shaped JSON: the diagnosis list
//! moves between keys, confidence arrives as a fraction, a percentage or a
//! string, and whole sections may be missing. [`canonicalize`] turns any
//! such record into an [`Analysis`] and never fails.

use serde_json::{Map, Value};

use crate::audit::{new_trace_id, AuditTrace, Stage, LIVE_TRACE_PREFIX};
use crate::evidence::EvidenceToken;
use crate::types::{
    Analysis, AnalysisMeta, ConsistencyAnalysis, Diagnosis, DoctorNote, SoapNote, Urgency,
};

/// Keys the diagnosis list may arrive under, in priority order.
pub const DIAGNOSIS_LIST_KEYS: &[&str] = &["differentials", "differentialDiagnosis", "diagnosisList"];

/// Name used when a diagnosis has none.
pub const UNKNOWN_CONDITION: &str = "Unknown Condition";

/// Confidence values above this are percentages; at or below, fractions.
pub const PERCENT_THRESHOLD: f64 = 1.5;

/// Normalize a confidence value to `(percent, fraction)`.
///
/// Non-finite input counts as 0. Values above 1.5 are read as percentages,
/// anything else as a fraction. Both results are clamped to their ranges.
pub fn normalize_confidence(value: f64) -> (f64, f64) {
    if !value.is_finite() {
        return (0.0, 0.0);
    }
    if value > PERCENT_THRESHOLD {
        let percent = value.clamp(0.0, 100.0);
        (percent, percent / 100.0)
    } else {
        let fraction = value.clamp(0.0, 1.0);
        (fraction * 100.0, fraction)
    }
}

/// Build the canonical analysis from a raw reasoning record.
///
/// `evidence` is the token set collected for this request. It becomes the
/// audit evidence unless empty, in which case tokens carried by the raw
/// record's own audit block are used.
pub fn canonicalize(raw: &Value, evidence: &[EvidenceToken]) -> Analysis {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    let differentials: Vec<Diagnosis> = diagnosis_list(obj)
        .iter()
        .map(canonical_diagnosis)
        .collect();

    let mut audit = canonical_audit(obj, raw, evidence);
    audit.record(Stage::NormalizeToCanonical);

    let analysis = Analysis {
        summary: string_field(obj, "summary"),
        abnormalities: string_list(obj.get("abnormalities")),
        differentials,
        red_flags: string_list(obj.get("redFlags")),
        recommended_tests: string_list(obj.get("recommendedTests")),
        soap_note: lenient::<SoapNote>(obj.get("soapNote")),
        doctor_note: lenient::<DoctorNote>(obj.get("doctorNote")),
        consistency: lenient::<ConsistencyAnalysis>(obj.get("consistency")),
        timeline_hypothesis: string_field(obj, "timelineHypothesis"),
        reasoning_chain: string_list(obj.get("reasoningChain")),
        patient_explanation: string_field(obj, "patientExplanation"),
        doctor_explanation: string_field(obj, "doctorExplanation"),
        child_explanation: string_field(obj, "childExplanation"),
        next_steps: string_field(obj, "nextSteps"),
        meta: lenient::<AnalysisMeta>(obj.get("meta")),
        emergency: false,
        emergency_reasons: Vec::new(),
        cached_demo: obj.get("cached_demo").and_then(Value::as_bool).unwrap_or(false),
        evidence_ok: false,
        audit,
    };

    tracing::debug!(
        trace_id = %analysis.audit.trace_id,
        n_differentials = analysis.differentials.len(),
        n_evidence = analysis.audit.evidence.len(),
        "Canonicalized reasoning output"
    );

    analysis
}

/// First non-empty diagnosis list among the accepted keys.
fn diagnosis_list(obj: &Map<String, Value>) -> &[Value] {
    DIAGNOSIS_LIST_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_array))
        .find(|list| !list.is_empty())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn canonical_diagnosis(item: &Value) -> Diagnosis {
    let empty = Map::new();
    let obj = match item {
        Value::Object(obj) => obj,
        Value::String(name) if !name.trim().is_empty() => {
            return Diagnosis::new(name.trim(), 0.0);
        }
        _ => &empty,
    };

    let name = first_present(obj, &["name", "condition"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CONDITION);

    let (raw_confidence, raw_confidence_fraction) =
        normalize_confidence(confidence_value(obj, "raw_confidence"));
    let (calibrated_confidence, calibrated_confidence_fraction) =
        normalize_confidence(confidence_value(obj, "calibrated_confidence"));

    Diagnosis {
        name: name.to_string(),
        raw_confidence,
        calibrated_confidence,
        raw_confidence_fraction,
        calibrated_confidence_fraction,
        reasoning: string_field(obj, "reasoning"),
        urgency: obj
            .get("urgency")
            .and_then(Value::as_str)
            .map(Urgency::parse_lenient)
            .unwrap_or_default(),
        supporting_evidence: string_list(first_present(
            obj,
            &["supporting_evidence", "supportingEvidence"],
        )),
        conflicting_evidence: string_list(first_present(
            obj,
            &["conflicting_evidence", "conflictingEvidence", "counterarguments"],
        )),
        warnings: string_list(obj.get("warnings")),
        grounding_factor: 1.0,
    }
}

/// `key`, falling back to the generic `confidence` field.
fn confidence_value(obj: &Map<String, Value>, key: &str) -> f64 {
    first_present(obj, &[key, "confidence"])
        .map(coerce_number)
        .unwrap_or(0.0)
}

fn coerce_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse::<f64>()
            .unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn canonical_audit(obj: &Map<String, Value>, raw: &Value, evidence: &[EvidenceToken]) -> AuditTrace {
    let Some(audit) = obj.get("audit").and_then(Value::as_object) else {
        return AuditTrace::new(new_trace_id(LIVE_TRACE_PREFIX), evidence.to_vec(), raw.clone());
    };

    let trace_id = audit
        .get("trace_id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| new_trace_id(LIVE_TRACE_PREFIX));

    let tokens = if evidence.is_empty() {
        audit
            .get("evidence")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|v| serde_json::from_value::<EvidenceToken>(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        evidence.to_vec()
    };

    let model_output_raw = audit
        .get("model_output_raw")
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| raw.clone());

    AuditTrace::new(trace_id, tokens, model_output_raw)
}

/// The first of `keys` present with a non-null value.
fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|v| !v.is_null())
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// String members of an array; anything else yields an empty list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Deserialize a nested block, defaulting when absent or malformed.
fn lenient<T>(value: Option<&Value>) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    value
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}
