//! Evidence tokens extracted from clinical inputs.
//!
//! Every diagnosis the reasoning service returns has to cite evidence by id.
//! Tokens are produced here, once per request, from image names, lab values
//! in the report and the symptom/report narrative. They are immutable after
//! collection and travel with the analysis inside its audit trace.
//!
//! ## Id formats
//!
//! | Kind | Id |
//! |------|----|
//! | image | `image:<sanitized file name>:Primary_Finding` |
//! | lab | `lab:General:<FIELD>=<value>` |
//! | text | `text:<source>:<start>-<end>:<slug>` |
//! | audio | `audio:<source>:<start>-<end>:seg_<index>` |

use std::collections::{BTreeSet, HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder region covering the central 80% of an image (0-1000 space).
pub const GLOBAL_IMAGE_REGION: [u32; 4] = [100, 100, 800, 800];

/// Label attached to the placeholder image region.
pub const GLOBAL_REGION_LABEL: &str = "detected_region_global";

/// Extraction quality assigned to every regex lab match.
pub const LAB_MATCH_QUALITY: f64 = 0.95;

/// Source name for symptom narrative tokens.
pub const SYMPTOMS_SOURCE: &str = "symptoms";

/// Source name for report narrative and lab tokens.
pub const REPORT_SOURCE: &str = "report";

/// Fragments shorter than this (in characters, after trimming) are ignored.
const MIN_FRAGMENT_CHARS: usize = 3;

/// Number of characters of a fragment used for its id slug.
const SLUG_CHARS: usize = 15;

lazy_static! {
    // Lab fields recognised in report text. Every match yields one token.
    static ref LAB_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("HB", Regex::new(r"(?i)(?:Hb|Hemoglobin|Hgb)[\s:]*?(\d+(?:\.\d+)?)").unwrap()),
        ("WBC", Regex::new(r"(?i)(?:WBC|White\s?blood\s?cell)[\s:]*?(\d+(?:\.\d+)?)").unwrap()),
        ("PLT", Regex::new(r"(?i)(?:Plt|Platelets?)[\s:]*?(\d{2,})").unwrap()),
        ("NA", Regex::new(r"(?i)(?:Na\+|Sodium)[\s:]*?(\d{2,3})").unwrap()),
        ("K", Regex::new(r"(?i)(?:K\+|Potassium)[\s:]*?(\d+(?:\.\d+)?)").unwrap()),
        ("CR", Regex::new(r"(?i)(?:Cr|Creatinine)[\s:]*?(\d+(?:\.\d+)?)").unwrap()),
        ("O2", Regex::new(r"(?i)(?:SpO2|O2|Oxygen)(?:\s*sat(?:uration)?)?[\s:]*?(\d{2,3})").unwrap()),
        ("GLU", Regex::new(r"(?i)(?:Glucose|Glu)[\s:]*?(\d{2,3})").unwrap()),
    ];

    // Sentence boundaries for the narrative fallback.
    static ref SENTENCE_DELIMITER: Regex = Regex::new(r"[.!?\n]+").unwrap();

    static ref UNSAFE_FILE_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9.-]").unwrap();
}

/// Input modality an evidence token was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Image,
    Lab,
    Text,
    Audio,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Image => "image",
            EvidenceKind::Lab => "lab",
            EvidenceKind::Text => "text",
            EvidenceKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific token metadata.
///
/// Serialized untagged, so each variant reads as a plain JSON object.
/// `TextSpan` precedes `AudioSegment` so integer character offsets deserialize
/// as a span; anything unrecognised is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvidenceMeta {
    ImageRegion { bbox: [u32; 4], label: String },
    LabMatch { field: String, raw: String, quality: f64 },
    TextSpan { start: usize, end: usize },
    AudioSegment { start: f64, end: f64 },
    Other(serde_json::Value),
}

/// An atomic, uniquely identified fact from one input modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceToken {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: EvidenceKind,

    pub value: String,

    #[serde(default)]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EvidenceMeta>,
}

impl EvidenceToken {
    /// Token for a whole image, referenced by its file name.
    pub fn image(file_name: &str) -> Self {
        let safe_name = UNSAFE_FILE_NAME_CHARS.replace_all(file_name, "_");
        Self {
            id: format!("image:{}:Primary_Finding", safe_name),
            kind: EvidenceKind::Image,
            value: format!("Whole image analysis of {}", file_name),
            source: file_name.to_string(),
            meta: Some(EvidenceMeta::ImageRegion {
                bbox: GLOBAL_IMAGE_REGION,
                label: GLOBAL_REGION_LABEL.to_string(),
            }),
        }
    }

    /// Token for one lab value matched in report text.
    pub fn lab(field: &str, value: &str, raw: &str) -> Self {
        Self {
            id: format!("lab:General:{}={}", field, value),
            kind: EvidenceKind::Lab,
            value: value.to_string(),
            source: REPORT_SOURCE.to_string(),
            meta: Some(EvidenceMeta::LabMatch {
                field: field.to_string(),
                raw: raw.to_string(),
                quality: LAB_MATCH_QUALITY,
            }),
        }
    }

    /// Token for a trimmed narrative fragment at `start..end` (characters).
    pub fn text_span(source: &str, start: usize, end: usize, fragment: &str) -> Self {
        Self {
            id: format!("text:{}:{}-{}:{}", source, start, end, slug(fragment)),
            kind: EvidenceKind::Text,
            value: fragment.to_string(),
            source: source.to_string(),
            meta: Some(EvidenceMeta::TextSpan { start, end }),
        }
    }

    /// Token for one timestamped transcript segment.
    pub fn audio_segment(source: &str, index: usize, segment: &TranscriptSegment) -> Self {
        Self {
            id: format!(
                "audio:{}:{:.1}-{:.1}:seg_{}",
                source, segment.start, segment.end, index
            ),
            kind: EvidenceKind::Audio,
            value: segment.text.clone(),
            source: source.to_string(),
            meta: Some(EvidenceMeta::AudioSegment {
                start: segment.start,
                end: segment.end,
            }),
        }
    }
}

/// A transcript segment with timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Everything the collector reads for one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionInput<'a> {
    /// Image file names, in upload order.
    pub images: &'a [String],

    pub report_text: &'a str,

    pub symptoms_text: &'a str,

    /// Explicit transcript segments. When present they replace the
    /// sentence fallback for the symptom narrative.
    pub transcript_segments: Option<&'a [TranscriptSegment]>,
}

/// Collect evidence from images, report and symptom text.
pub fn collect(images: &[String], report_text: &str, symptoms_text: &str) -> Vec<EvidenceToken> {
    collect_all(&CollectionInput {
        images,
        report_text,
        symptoms_text,
        transcript_segments: None,
    })
}

/// Collect evidence in the fixed order image, lab, symptoms, report.
///
/// Never fails; empty input yields an empty list. Ids are unique in the
/// result (see [`dedupe_ids`]).
pub fn collect_all(input: &CollectionInput<'_>) -> Vec<EvidenceToken> {
    let mut tokens: Vec<EvidenceToken> = input
        .images
        .iter()
        .map(|name| EvidenceToken::image(name))
        .collect();

    tokens.extend(extract_lab_values(input.report_text));

    match input.transcript_segments {
        Some(segments) if !segments.is_empty() => {
            tokens.extend(tokenize_segments(SYMPTOMS_SOURCE, segments));
        }
        _ => tokens.extend(tokenize_narrative(SYMPTOMS_SOURCE, input.symptoms_text)),
    }

    tokens.extend(tokenize_narrative(REPORT_SOURCE, input.report_text));

    let tokens = dedupe_ids(tokens);
    tracing::debug!(
        n_tokens = tokens.len(),
        kinds = ?kinds_present(&tokens),
        "Collected evidence"
    );
    tokens
}

/// Extract one lab token per pattern match in `text`.
pub fn extract_lab_values(text: &str) -> Vec<EvidenceToken> {
    let mut tokens = Vec::new();
    if text.is_empty() {
        return tokens;
    }

    for (field, regex) in LAB_PATTERNS.iter() {
        for caps in regex.captures_iter(text) {
            if let (Some(whole), Some(value)) = (caps.get(0), caps.get(1)) {
                tokens.push(EvidenceToken::lab(field, value.as_str(), whole.as_str()));
            }
        }
    }

    tokens
}

/// Tokenize explicit transcript segments, one token per segment.
pub fn tokenize_segments(source: &str, segments: &[TranscriptSegment]) -> Vec<EvidenceToken> {
    segments
        .iter()
        .enumerate()
        .map(|(index, segment)| EvidenceToken::audio_segment(source, index, segment))
        .collect()
}

/// Split narrative text into sentence-like fragments.
///
/// Each fragment keeps its trailing delimiter, is trimmed, and is dropped
/// when shorter than three characters. Offsets count characters, not
/// bytes, from the start of `text` to the trimmed fragment.
pub fn tokenize_narrative(source: &str, text: &str) -> Vec<EvidenceToken> {
    let mut tokens = Vec::new();

    for (offset, piece) in split_keeping_delimiters(text) {
        let trimmed = piece.trim();
        if trimmed.chars().count() < MIN_FRAGMENT_CHARS {
            continue;
        }
        let start_byte = offset + (piece.len() - piece.trim_start().len());
        let start = text[..start_byte].chars().count();
        let end = start + trimmed.chars().count();
        tokens.push(EvidenceToken::text_span(source, start, end, trimmed));
    }

    tokens
}

fn split_keeping_delimiters(text: &str) -> Vec<(usize, &str)> {
    let mut pieces = Vec::new();
    let mut last = 0;

    for m in SENTENCE_DELIMITER.find_iter(text) {
        pieces.push((last, &text[last..m.end()]));
        last = m.end();
    }
    if last < text.len() {
        pieces.push((last, &text[last..]));
    }

    pieces
}

fn slug(fragment: &str) -> String {
    fragment
        .chars()
        .take(SLUG_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Make ids unique within one collection.
///
/// A repeated id with a value already seen under that id is the same fact
/// and is dropped. A repeated id with a new value gets a `~<n>` suffix,
/// `n` starting at 2.
pub fn dedupe_ids(tokens: Vec<EvidenceToken>) -> Vec<EvidenceToken> {
    let mut values_by_id: HashMap<String, Vec<String>> = HashMap::new();
    let mut emitted: HashSet<String> = HashSet::new();
    let mut unique = Vec::with_capacity(tokens.len());

    for mut token in tokens {
        let values = values_by_id.entry(token.id.clone()).or_default();
        if values.contains(&token.value) {
            continue;
        }
        values.push(token.value.clone());

        if emitted.contains(&token.id) {
            let mut n = 2;
            while emitted.contains(&format!("{}~{}", token.id, n)) {
                n += 1;
            }
            token.id = format!("{}~{}", token.id, n);
        }

        emitted.insert(token.id.clone());
        unique.push(token);
    }

    unique
}

/// Distinct evidence kinds present in `tokens`.
pub fn kinds_present(tokens: &[EvidenceToken]) -> BTreeSet<EvidenceKind> {
    tokens.iter().map(|t| t.kind).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(tokens: &[EvidenceToken]) -> Vec<&str> {
        tokens.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_image_token_sanitizes_file_name() {
        let token = EvidenceToken::image("chest x-ray (1).png");
        assert_eq!(token.id, "image:chest_x-ray__1_.png:Primary_Finding");
        assert_eq!(token.value, "Whole image analysis of chest x-ray (1).png");
        assert_eq!(token.source, "chest x-ray (1).png");
        assert_eq!(
            token.meta,
            Some(EvidenceMeta::ImageRegion {
                bbox: [100, 100, 800, 800],
                label: "detected_region_global".to_string(),
            })
        );
    }

    #[test]
    fn test_o2_saturation_with_sat_word() {
        let tokens = extract_lab_values("O2 Sat 91% on room air");
        assert_eq!(ids(&tokens), vec!["lab:General:O2=91"]);
        match &tokens[0].meta {
            Some(EvidenceMeta::LabMatch { field, raw, quality }) => {
                assert_eq!(field, "O2");
                assert_eq!(raw, "O2 Sat 91");
                assert_eq!(*quality, 0.95);
            }
            other => panic!("unexpected meta: {:?}", other),
        }
    }

    #[test]
    fn test_lab_panel_extraction() {
        let report = "CBC: Hb 8.2 g/dL, WBC 6.0, Platelets 450. Sodium 138, Potassium 4.1, Creatinine 0.9, Glucose 105";
        let tokens = extract_lab_values(report);
        let found = ids(&tokens);

        for expected in [
            "lab:General:HB=8.2",
            "lab:General:WBC=6.0",
            "lab:General:PLT=450",
            "lab:General:NA=138",
            "lab:General:K=4.1",
            "lab:General:CR=0.9",
            "lab:General:GLU=105",
        ] {
            assert!(found.contains(&expected), "missing {} in {:?}", expected, found);
        }
        assert!(tokens.iter().all(|t| t.source == "report"));
    }

    #[test]
    fn test_every_lab_match_yields_token() {
        let tokens = extract_lab_values("Hb 7.9 yesterday, Hb 8.4 today");
        assert_eq!(ids(&tokens), vec!["lab:General:HB=7.9", "lab:General:HB=8.4"]);
    }

    #[test]
    fn test_narrative_fallback_keeps_delimiters() {
        let tokens = tokenize_narrative("symptoms", "Fever for 3 days. Cough!  ok. Rust-colored sputum");
        assert_eq!(tokens.len(), 4);

        assert_eq!(tokens[0].value, "Fever for 3 days.");
        assert_eq!(tokens[0].id, "text:symptoms:0-17:fever_for_3_day");

        assert_eq!(tokens[1].value, "Cough!");
        assert_eq!(tokens[1].meta, Some(EvidenceMeta::TextSpan { start: 18, end: 24 }));

        // exactly three characters
        assert_eq!(tokens[2].value, "ok.");

        // trailing text without a delimiter
        assert_eq!(tokens[3].value, "Rust-colored sputum");
        assert_eq!(tokens[3].id, "text:symptoms:30-49:rust_colored_sp");
    }

    #[test]
    fn test_short_fragments_dropped() {
        let tokens = tokenize_narrative("report", "Hi. A. Stable overnight.");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].value, "Hi.");
        assert_eq!(tokens[1].value, "Stable overnight.");
    }

    #[test]
    fn test_offsets_point_into_text() {
        let text = "  Chest pain at rest.\nShortness of breath on exertion.";
        for token in tokenize_narrative("symptoms", text) {
            match token.meta {
                Some(EvidenceMeta::TextSpan { start, end }) => {
                    assert_eq!(&text[start..end], token.value);
                }
                other => panic!("unexpected meta: {:?}", other),
            }
        }
    }

    #[test]
    fn test_offsets_count_characters() {
        let text = "Fièvre. Toux sèche.";
        let tokens = tokenize_narrative("symptoms", text);
        assert_eq!(ids(&tokens), vec!["text:symptoms:0-7:fi_vre_", "text:symptoms:8-19:toux_s_che_"]);

        for token in &tokens {
            match token.meta {
                Some(EvidenceMeta::TextSpan { start, end }) => {
                    let span: String = text.chars().skip(start).take(end - start).collect();
                    assert_eq!(span, token.value);
                }
                ref other => panic!("unexpected meta: {:?}", other),
            }
        }
    }

    #[test]
    fn test_transcript_segments_replace_symptom_fallback() {
        let segments = vec![
            TranscriptSegment { start: 0.0, end: 2.5, text: "I've had a cough".to_string() },
            TranscriptSegment { start: 2.5, end: 6.0, text: "since Monday".to_string() },
        ];
        let tokens = collect_all(&CollectionInput {
            images: &[],
            report_text: "",
            symptoms_text: "I've had a cough since Monday.",
            transcript_segments: Some(&segments),
        });

        assert_eq!(
            ids(&tokens),
            vec!["audio:symptoms:0.0-2.5:seg_0", "audio:symptoms:2.5-6.0:seg_1"]
        );
        assert!(tokens.iter().all(|t| t.kind == EvidenceKind::Audio));
    }

    #[test]
    fn test_collector_order() {
        let images = vec!["scan.jpg".to_string()];
        let tokens = collect(&images, "SpO2 88%. Lungs clear.", "Short of breath.");
        let kinds: Vec<_> = tokens.iter().map(|t| (t.kind, t.source.as_str())).collect();

        assert_eq!(
            kinds,
            vec![
                (EvidenceKind::Image, "scan.jpg"),
                (EvidenceKind::Lab, "report"),
                (EvidenceKind::Text, "symptoms"),
                (EvidenceKind::Text, "report"),
                (EvidenceKind::Text, "report"),
            ]
        );
    }

    #[test]
    fn test_empty_input_yields_no_tokens() {
        assert!(collect(&[], "", "").is_empty());
    }

    #[test]
    fn test_duplicate_lab_fact_dropped() {
        let tokens = collect(&[], "Hb 8.2. Repeat Hb 8.2", "");
        let labs: Vec<_> = tokens.iter().filter(|t| t.kind == EvidenceKind::Lab).collect();
        assert_eq!(labs.len(), 1);
    }

    #[test]
    fn test_colliding_file_names_suffixed() {
        let images = vec!["a b.png".to_string(), "a_b.png".to_string(), "a?b.png".to_string()];
        let tokens = collect(&images, "", "");
        assert_eq!(
            ids(&tokens),
            vec![
                "image:a_b.png:Primary_Finding",
                "image:a_b.png:Primary_Finding~2",
                "image:a_b.png:Primary_Finding~3",
            ]
        );
    }

    #[test]
    fn test_token_serializes_with_type_field() {
        let json = serde_json::to_value(EvidenceToken::lab("K", "4.1", "K+ 4.1")).unwrap();
        assert_eq!(json["type"], "lab");
        assert_eq!(json["meta"]["field"], "K");
    }

    proptest! {
        #[test]
        fn proptest_ids_unique(
            images in proptest::collection::vec("[a-z ?_]{1,6}\\.(png|jpg)", 0..8),
            report in "[A-Za-z0-9 .:!?\n]{0,80}",
            symptoms in "[A-Za-z0-9 .!?\n]{0,80}",
        ) {
            let tokens = collect(&images, &report, &symptoms);
            let unique: HashSet<&str> = tokens.iter().map(|t| t.id.as_str()).collect();
            prop_assert_eq!(unique.len(), tokens.len());
        }
    }
}
