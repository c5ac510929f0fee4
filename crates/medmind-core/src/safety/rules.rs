//! Static rule tables for the emergency safety net.
//!
//! Tables are compiled once and shared read-only. Adding a trigger means
//! adding a row here; the evaluation logic in the parent module does not
//! change.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Phrase triggers and the reason each one reports.
    pub static ref EMERGENCY_PHRASES: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)severe shortness of breath").unwrap(), "Reported severe shortness of breath"),
        (Regex::new(r"(?i)unable to breathe").unwrap(), "Reported inability to breathe"),
        (Regex::new(r"(?i)respiratory distress").unwrap(), "Mention of respiratory distress"),
        (Regex::new(r"(?i)sudden chest pain").unwrap(), "Reported sudden chest pain"),
        (Regex::new(r"(?i)acute chest pain").unwrap(), "Reported acute chest pain"),
        (Regex::new(r"(?i)active bleeding").unwrap(), "Mention of active bleeding"),
        (Regex::new(r"(?i)massive hemorrhage").unwrap(), "Mention of massive hemorrhage"),
        (Regex::new(r"(?i)loss of consciousness").unwrap(), "Reported loss of consciousness"),
        (Regex::new(r"(?i)unresponsive").unwrap(), "Patient reported unresponsive"),
        (Regex::new(r"(?i)stroke code").unwrap(), "Mention of Stroke Code"),
        (Regex::new(r"(?i)myocardial infarction").unwrap(), "Mention of MI/Heart Attack"),
    ];

    /// Vital-sign thresholds. Only the first match of each pattern is read.
    pub static ref VITAL_RULES: Vec<VitalRule> = vec![
        VitalRule {
            name: "o2_saturation",
            pattern: Regex::new(r"(?i)(?:O2|oxygen|sat|spO2)[\s\w]*?(\d{2,3})\s*%").unwrap(),
            limit: VitalLimit::Below(85),
            describe: |v| format!("Critical Oxygen Saturation detected: {}% (< 85%)", v),
        },
        VitalRule {
            name: "systolic_bp",
            pattern: Regex::new(r"(?i)(?:BP|blood pressure)[\s:]*?(\d{2,3})/\d{2,3}").unwrap(),
            limit: VitalLimit::Below(90),
            describe: |v| format!("Critical Hypotension detected: Systolic BP {} (< 90)", v),
        },
        VitalRule {
            name: "heart_rate",
            pattern: Regex::new(r"(?i)(?:HR|heart rate|pulse)[\s:]*?(\d{2,3})").unwrap(),
            limit: VitalLimit::Above(140),
            describe: |v| format!("Critical Tachycardia detected: HR {} (> 140)", v),
        },
    ];
}

/// Imaging findings that make a study critical on their own.
pub const CRITICAL_IMAGE_FINDINGS: &[&str] = &[
    "pneumothorax",
    "hemothorax",
    "aortic dissection",
    "pulmonary embolism",
    "perforation",
    "midline shift",
    "intracranial hemorrhage",
    "free air",
    "massive effusion",
];

/// Which side of a threshold is critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VitalLimit {
    Below(u32),
    Above(u32),
}

impl VitalLimit {
    pub fn breached(&self, value: u32) -> bool {
        match *self {
            VitalLimit::Below(limit) => value < limit,
            VitalLimit::Above(limit) => value > limit,
        }
    }
}

/// A vital sign read from free text and its critical threshold.
pub struct VitalRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub limit: VitalLimit,
    pub describe: fn(u32) -> String,
}

impl VitalRule {
    /// First reading of this vital in `text`, if any.
    pub fn first_reading(&self, text: &str) -> Option<u32> {
        self.pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Reason string when the first reading breaches the limit.
    pub fn check(&self, text: &str) -> Option<String> {
        self.first_reading(text)
            .filter(|v| self.limit.breached(*v))
            .map(self.describe)
    }
}

/// The first critical finding mentioned in `abnormality`, case-insensitively.
pub fn critical_finding_in(abnormality: &str) -> Option<&'static str> {
    let lower = abnormality.to_lowercase();
    CRITICAL_IMAGE_FINDINGS
        .iter()
        .copied()
        .find(|finding| lower.contains(finding))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> &'static VitalRule {
        VITAL_RULES.iter().find(|r| r.name == name).expect("rule")
    }

    #[test]
    fn test_limits() {
        assert!(VitalLimit::Below(85).breached(84));
        assert!(!VitalLimit::Below(85).breached(85));
        assert!(VitalLimit::Above(140).breached(141));
        assert!(!VitalLimit::Above(140).breached(140));
    }

    #[test]
    fn test_o2_reading() {
        assert_eq!(rule("o2_saturation").first_reading("SpO2 82% on 2L"), Some(82));
        assert_eq!(rule("o2_saturation").first_reading("O2 Sat 91% on room air"), Some(91));
        assert_eq!(rule("o2_saturation").first_reading("oxygen is fine"), None);
    }

    #[test]
    fn test_bp_reading() {
        let bp = rule("systolic_bp");
        assert_eq!(bp.first_reading("BP 82/60, pale"), Some(82));
        assert_eq!(
            bp.check("Blood pressure: 85/50").as_deref(),
            Some("Critical Hypotension detected: Systolic BP 85 (< 90)")
        );
        assert_eq!(bp.check("BP 120/80"), None);
    }

    #[test]
    fn test_only_first_reading_counts() {
        // first reading is normal, later tachycardia is not considered
        assert_eq!(rule("heart_rate").check("HR 90 at triage, pulse 150 later"), None);
        assert_eq!(
            rule("heart_rate").check("Pulse 152").as_deref(),
            Some("Critical Tachycardia detected: HR 152 (> 140)")
        );
    }

    #[test]
    fn test_critical_finding_lookup() {
        assert_eq!(critical_finding_in("Small Left PNEUMOTHORAX"), Some("pneumothorax"));
        assert_eq!(critical_finding_in("Free air under diaphragm"), Some("free air"));
        assert_eq!(critical_finding_in("Right lower lobe consolidation"), None);
    }

    #[test]
    fn test_phrase_table() {
        let hits: Vec<_> = EMERGENCY_PHRASES
            .iter()
            .filter(|(re, _)| re.is_match("Patient UNRESPONSIVE after acute chest pain"))
            .map(|(_, reason)| *reason)
            .collect();
        assert_eq!(hits, vec!["Reported acute chest pain", "Patient reported unresponsive"]);
    }
}
