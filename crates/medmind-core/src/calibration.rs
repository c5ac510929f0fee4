//! Confidence calibration.
//!
//! The model's raw confidence ignores how much input it actually had. The
//! calibrator scales it by input quality and by the number of distinct
//! modalities, then multiplies in any grounding penalty already recorded on
//! the diagnosis, so the penalty survives recalculation.
//!
//! ```text
//! calibrated = round2(raw/100 × quality × modal_boost × grounding_factor × 100)
//! modal_boost = min(1, 0.5 + 0.25 × (n_modalities − 1))
//! ```

use std::collections::BTreeSet;

use crate::audit::Stage;
use crate::canonical::normalize_confidence;
use crate::evidence::{kinds_present, EvidenceKind, EvidenceToken};
use crate::pipeline::{PipelineStage, StageContext};
use crate::types::{Analysis, AnalysisMeta};

/// Per-modality quality weights. One weight per row when any listed kind is
/// present.
pub const QUALITY_WEIGHTS: &[(&[EvidenceKind], f64)] = &[
    (&[EvidenceKind::Image], 0.9),
    (&[EvidenceKind::Lab, EvidenceKind::Text], 0.95),
    (&[EvidenceKind::Audio], 0.85),
];

/// Quality assumed when no weighted modality is present.
pub const DEFAULT_QUALITY: f64 = 0.8;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Geometric mean of the weights that apply to `kinds`.
pub fn quality_score(kinds: &BTreeSet<EvidenceKind>) -> f64 {
    let weights: Vec<f64> = QUALITY_WEIGHTS
        .iter()
        .filter(|(row, _)| row.iter().any(|k| kinds.contains(k)))
        .map(|(_, weight)| *weight)
        .collect();

    if weights.is_empty() {
        return DEFAULT_QUALITY;
    }
    weights.iter().product::<f64>().powf(1.0 / weights.len() as f64)
}

/// Boost for the number of modalities, reaching 1.0 at three.
pub fn modal_boost(n_modalities: usize) -> f64 {
    let extra = n_modalities.max(1) - 1;
    (0.5 + 0.25 * extra as f64).min(1.0)
}

/// Calibrated confidence (percent, two decimals) for a raw percentage.
pub fn calibrate_confidence(raw_confidence: f64, n_modalities: usize, quality: f64) -> f64 {
    round2(raw_confidence / 100.0 * quality * modal_boost(n_modalities) * 100.0)
}

/// Recalculate calibrated confidence for every diagnosis and set `meta`.
pub fn apply_confidence_calibration(analysis: &mut Analysis, evidence: &[EvidenceToken]) {
    let kinds = kinds_present(evidence);
    let n_modalities = kinds.len().max(1);
    let quality = quality_score(&kinds);

    for diagnosis in &mut analysis.differentials {
        let percent = calibrate_confidence(
            diagnosis.raw_confidence * diagnosis.grounding_factor,
            n_modalities,
            quality,
        );
        diagnosis.set_calibrated_percent(percent);
    }

    analysis.meta = AnalysisMeta {
        n_modalities,
        quality_score: round2(quality),
    };
    analysis.audit.record(Stage::ApplyConfidenceCalibration);

    tracing::debug!(
        trace_id = %analysis.audit.trace_id,
        n_modalities,
        quality_score = analysis.meta.quality_score,
        "Calibrated confidence"
    );
}

/// Repair unusable confidence values after calibration.
///
/// Non-finite pairs are rebuilt from whichever form is usable. A calibrated
/// fraction that is zero, NaN or negative falls back to the raw fraction.
pub fn apply_fallback(analysis: &mut Analysis) {
    let mut repaired = 0usize;

    for diagnosis in &mut analysis.differentials {
        repair_pair(&mut diagnosis.raw_confidence, &mut diagnosis.raw_confidence_fraction);
        repair_pair(
            &mut diagnosis.calibrated_confidence,
            &mut diagnosis.calibrated_confidence_fraction,
        );

        if !(diagnosis.calibrated_confidence_fraction > 0.0) {
            let fraction = diagnosis.raw_confidence_fraction.clamp(0.0, 1.0);
            diagnosis.calibrated_confidence_fraction = fraction;
            diagnosis.calibrated_confidence = (fraction * 100.0).round();
            repaired += 1;
        }
    }

    analysis.audit.record(Stage::ApplyCalibrationFallback);

    if repaired > 0 {
        tracing::debug!(
            trace_id = %analysis.audit.trace_id,
            repaired,
            "Calibration fallback applied"
        );
    }
}

fn repair_pair(percent: &mut f64, fraction: &mut f64) {
    if percent.is_finite() && fraction.is_finite() {
        return;
    }
    let usable = if percent.is_finite() {
        *percent
    } else if fraction.is_finite() {
        *fraction
    } else {
        0.0
    };
    let (p, f) = normalize_confidence(usable);
    *percent = p;
    *fraction = f;
}

/// Pipeline stage wrapper for [`apply_confidence_calibration`].
pub struct ConfidenceCalibrator;

impl ConfidenceCalibrator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConfidenceCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for ConfidenceCalibrator {
    fn stage(&self) -> Stage {
        Stage::ApplyConfidenceCalibration
    }

    fn apply(&self, analysis: &mut Analysis, ctx: &StageContext<'_>) {
        apply_confidence_calibration(analysis, ctx.evidence);
    }
}

/// Pipeline stage wrapper for [`apply_fallback`].
pub struct CalibrationFallbackGuard;

impl CalibrationFallbackGuard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CalibrationFallbackGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for CalibrationFallbackGuard {
    fn stage(&self) -> Stage {
        Stage::ApplyCalibrationFallback
    }

    fn apply(&self, analysis: &mut Analysis, _ctx: &StageContext<'_>) {
        apply_fallback(analysis);
    }
}
