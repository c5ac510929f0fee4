//! JSON Schema for reasoning-service output.
//!
//! The same schema is sent to the reasoning service as its response format
//! and used afterwards to report drift. Drift is logged, never rejected:
//! canonicalization tolerates whatever arrives.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded analysis schema (loaded at compile time).
const ANALYSIS_SCHEMA_JSON: &str = include_str!("../schema/analysis.schema.json");

/// Compiled validator, built once.
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from loading the embedded schema.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(ANALYSIS_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// The schema as sent to the reasoning service, without meta keywords.
pub fn response_schema() -> Result<serde_json::Value, SchemaError> {
    let mut value: serde_json::Value = serde_json::from_str(ANALYSIS_SCHEMA_JSON)
        .map_err(|e| SchemaError::LoadError(e.to_string()))?;

    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("$id");
        obj.remove("title");
    }
    Ok(value)
}

/// Validate reasoning output against the schema.
///
/// Returns every violation as `"<message> at <instance path>"`.
pub fn validate_model_output(output: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(output)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Log schema drift at `warn` and carry on.
pub fn report_drift(output: &serde_json::Value) -> usize {
    match validate_model_output(output) {
        Ok(()) => 0,
        Err(errors) => {
            for error in &errors {
                tracing::warn!(error = %error, "Reasoning output deviates from schema");
            }
            errors.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete_output() -> serde_json::Value {
        json!({
            "summary": "Likely community acquired pneumonia.",
            "abnormalities": ["RLL consolidation"],
            "differentials": [{
                "name": "Bacterial Pneumonia",
                "confidence": 0.9,
                "reasoning": "Consolidation with fever.",
                "urgency": "Urgent",
                "supporting_evidence": ["image:scan.jpg:Primary_Finding"]
            }],
            "reasoningChain": ["Fever", "Consolidation"],
            "redFlags": [],
            "recommendedTests": ["CBC"],
            "soapNote": {"subjective": "", "objective": "", "assessment": "", "plan": ""},
            "doctorNote": {
                "chiefComplaint": "", "historyOfPresentIllness": "", "imagingFindings": "",
                "labInterpretation": "", "assessmentDifferential": "", "planAndRecommendations": ""
            },
            "consistency": {"matches": [], "mismatches": [], "notes": ""},
            "timelineHypothesis": "",
            "patientExplanation": "",
            "doctorExplanation": "",
            "childExplanation": "",
            "nextSteps": ""
        })
    }

    #[test]
    fn test_complete_output_passes() {
        assert!(validate_model_output(&complete_output()).is_ok());
    }

    #[test]
    fn test_missing_sections_reported() {
        let errors = validate_model_output(&json!({"summary": "only"})).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_bad_urgency_reported_with_path() {
        let mut output = complete_output();
        output["differentials"][0]["urgency"] = json!("Whenever");
        let errors = validate_model_output(&output).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("/differentials/0/urgency"), "{}", errors[0]);
    }

    #[test]
    fn test_report_drift_counts() {
        assert_eq!(report_drift(&complete_output()), 0);
        assert!(report_drift(&json!([])) > 0);
    }

    #[test]
    fn test_response_schema_strips_meta() {
        let schema = response_schema().unwrap();
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["differentials"].is_object());
    }
}
