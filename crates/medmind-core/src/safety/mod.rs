//! Emergency safety net.
//!
//! Deterministic rules run over the raw symptom/report text and the model's
//! reported abnormalities. They can only raise urgency, never lower it, and
//! they run regardless of what the reasoning service concluded.
//!
//! ## Triggers
//!
//! | Source | Rule |
//! |--------|------|
//! | Text | Emergency phrase table |
//! | Text | First SpO2 reading `< 85`, systolic BP `< 90`, HR `> 140` |
//! | Abnormalities | Any critical imaging finding |

pub mod rules;

use crate::audit::Stage;
use crate::pipeline::{ClinicalText, PipelineStage, StageContext};
use crate::types::{Analysis, Urgency};

use rules::{critical_finding_in, EMERGENCY_PHRASES, VITAL_RULES};

/// Calibrated confidence fraction above which a diagnosis is upgraded.
pub const UPGRADE_THRESHOLD: f64 = 0.2;

/// Warning attached to a diagnosis upgraded by a global trigger.
pub const URGENCY_UPGRADE_WARNING: &str = "Urgency upgraded due to global emergency trigger.";

/// Outcome of one family of safety checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyCheckResult {
    pub flag: bool,
    pub reasons: Vec<String>,
}

impl SafetyCheckResult {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            flag: !reasons.is_empty(),
            reasons,
        }
    }
}

/// Check narrative text for emergency phrases and critical vitals.
pub fn check_text_red_flags(text: &str) -> SafetyCheckResult {
    let mut reasons: Vec<String> = EMERGENCY_PHRASES
        .iter()
        .filter(|(pattern, _)| pattern.is_match(text))
        .map(|(_, reason)| reason.to_string())
        .collect();

    reasons.extend(VITAL_RULES.iter().filter_map(|rule| rule.check(text)));

    SafetyCheckResult::from_reasons(reasons)
}

/// Check reported abnormalities for critical imaging findings.
///
/// Each abnormality yields at most one reason.
pub fn check_image_emergency(abnormalities: &[String]) -> SafetyCheckResult {
    let reasons = abnormalities
        .iter()
        .filter(|finding| critical_finding_in(finding).is_some())
        .map(|finding| format!("Critical imaging finding detected: {}", finding))
        .collect();

    SafetyCheckResult::from_reasons(reasons)
}

/// Apply the emergency rules to `analysis`.
///
/// Sets `emergency` and `emergency_reasons`. When flagged, upgrades every
/// non-emergency diagnosis above the confidence threshold to `Urgent` and
/// merges the reasons into `red_flags`.
pub fn apply_emergency_rules(analysis: &mut Analysis, text: ClinicalText<'_>) {
    let full_text = format!("{} {}", text.symptoms_text, text.report_text);

    let text_result = check_text_red_flags(&full_text);
    let image_result = check_image_emergency(&analysis.abnormalities);

    let is_emergency = text_result.flag || image_result.flag;
    let mut reasons = text_result.reasons;
    reasons.extend(image_result.reasons);

    analysis.emergency = is_emergency;
    analysis.emergency_reasons = if is_emergency { reasons } else { Vec::new() };
    analysis.audit.record(Stage::ApplyEmergencyRules);

    if !is_emergency {
        return;
    }

    tracing::warn!(
        trace_id = %analysis.audit.trace_id,
        reasons = ?analysis.emergency_reasons,
        "Emergency trigger fired"
    );

    for diagnosis in &mut analysis.differentials {
        if diagnosis.urgency != Urgency::Emergency
            && diagnosis.calibrated_confidence_fraction > UPGRADE_THRESHOLD
        {
            diagnosis.urgency = Urgency::Urgent;
            diagnosis.warnings.push(URGENCY_UPGRADE_WARNING.to_string());
        }
    }

    for reason in &analysis.emergency_reasons {
        if !analysis.red_flags.contains(reason) {
            analysis.red_flags.push(reason.clone());
        }
    }
    dedup_preserving_order(&mut analysis.red_flags);
}

fn dedup_preserving_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// Pipeline stage wrapper for [`apply_emergency_rules`].
pub struct EmergencySafetyNet;

impl EmergencySafetyNet {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmergencySafetyNet {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for EmergencySafetyNet {
    fn stage(&self) -> Stage {
        Stage::ApplyEmergencyRules
    }

    fn apply(&self, analysis: &mut Analysis, ctx: &StageContext<'_>) {
        apply_emergency_rules(analysis, ctx.text);
    }
}
