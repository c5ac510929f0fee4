//! Prompt text for the reasoning service.
//!
//! The system instruction is fixed. The user prompt carries the free text,
//! optional demo context and the canonical evidence block, whose ids the
//! model must cite in `supporting_evidence`.

use medmind_core::EvidenceToken;

/// Fixed system instruction.
pub const SYSTEM_INSTRUCTION: &str = "You are MedMind.
1. Extract abnormalities.
2. Diagnose with EVIDENCE.
3. REQUIRED: Map 'supporting_evidence' using Canonical IDs provided.
4. If evidence is missing for a diagnosis, do NOT list it or mark confidence 0.";

const EVIDENCE_HEADER: &str = "*** CANONICAL EVIDENCE TOKENS AVAILABLE ***
(Refer to these exact IDs when listing supporting_evidence)";
const EVIDENCE_FOOTER: &str = "*******************************************";

/// One line per token: `- <id> ("<value>")`.
pub fn evidence_block(evidence: &[EvidenceToken]) -> String {
    let mut block = String::from(EVIDENCE_HEADER);
    for token in evidence {
        block.push_str(&format!("\n- {} (\"{}\")", token.id, token.value));
    }
    block.push('\n');
    block.push_str(EVIDENCE_FOOTER);
    block
}

/// The user prompt. Blank inputs are written as `None`.
pub fn build_prompt(
    symptoms: &str,
    report: &str,
    demo_context: Option<&str>,
    evidence: &[EvidenceToken],
) -> String {
    let or_none = |s: &str| {
        if s.trim().is_empty() {
            "None".to_string()
        } else {
            s.to_string()
        }
    };

    let mut prompt = format!(
        "PATIENT SYMPTOMS: {}\nREPORTS: {}\n",
        or_none(symptoms),
        or_none(report)
    );
    if let Some(context) = demo_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("DEMO CONTEXT: {}\n", context));
    }
    prompt.push('\n');
    prompt.push_str(&evidence_block(evidence));
    prompt
}
