//! Document Extractor
//!
//! Turns an assessment document reference into an ExtractedScoreSet: fetch
//! the bytes, run the OCR form parser, and map recognized entities and
//! tables through an assessment-type-specific schema. Every score field
//! carries min(parser confidence, schema confidence).

use edplan_core::{
    AssessmentDocument, AssessmentType, DocumentStore, ExtractedScoreSet, OcrDocument, OcrHints,
    OcrProvider, ScoreRecord,
};
use edplan_infra::{with_retries, RetryPolicy};
use edplan_types::{EdPlanError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Expected score kind for a subtest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    /// Mean 10, SD 3
    Scaled,
    /// Mean 100, SD 15
    Standard,
    /// Mean 50, SD 10 (behavioral scales)
    TScore,
}

impl ScoreKind {
    fn plausible_range(&self) -> (f64, f64) {
        match self {
            ScoreKind::Scaled => (1.0, 19.0),
            ScoreKind::Standard => (40.0, 160.0),
            ScoreKind::TScore => (20.0, 100.0),
        }
    }
}

/// One expected subtest: canonical name, case-insensitive synonyms, the
/// score kind with its plausible range, and whether the subtest is mandatory
/// for the instrument.
pub struct SubtestPattern {
    pub canonical: &'static str,
    pub synonyms: &'static [&'static str],
    pub kind: ScoreKind,
    pub mandatory: bool,
}

/// Pattern set for one assessment instrument
pub struct AssessmentSchema {
    pub test_label: &'static str,
    pub patterns: &'static [SubtestPattern],
}

const WISC_V: AssessmentSchema = AssessmentSchema {
    test_label: "WISC-V",
    patterns: &[
        SubtestPattern { canonical: "Verbal Comprehension Index", synonyms: &["vci", "verbal comprehension"], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Visual Spatial Index", synonyms: &["vsi", "visual spatial"], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Fluid Reasoning Index", synonyms: &["fri", "fluid reasoning"], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Working Memory Index", synonyms: &["wmi", "working memory"], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Processing Speed Index", synonyms: &["psi", "processing speed"], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Similarities", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Vocabulary", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Block Design", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Visual Puzzles", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Matrix Reasoning", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Figure Weights", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Digit Span", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Picture Span", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Coding", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Symbol Search", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
    ],
};

const WIAT_IV: AssessmentSchema = AssessmentSchema {
    test_label: "WIAT-IV",
    patterns: &[
        SubtestPattern { canonical: "Word Reading", synonyms: &[], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Reading Comprehension", synonyms: &[], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Pseudoword Decoding", synonyms: &["pseudo-word decoding"], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Numerical Operations", synonyms: &[], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Math Problem Solving", synonyms: &["math problem-solving"], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Spelling", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Sentence Composition", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Essay Composition", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Listening Comprehension", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Oral Expression", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
    ],
};

const WJ_IV: AssessmentSchema = AssessmentSchema {
    test_label: "WJ-IV",
    patterns: &[
        SubtestPattern { canonical: "Letter-Word Identification", synonyms: &["letter word identification"], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Passage Comprehension", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Applied Problems", synonyms: &[], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Calculation", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Writing Samples", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Spelling", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
    ],
};

const KTEA_3: AssessmentSchema = AssessmentSchema {
    test_label: "KTEA-3",
    patterns: &[
        SubtestPattern { canonical: "Letter & Word Recognition", synonyms: &["letter and word recognition", "word reading"], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Reading Comprehension", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Math Concepts & Applications", synonyms: &["math concepts and applications"], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Math Computation", synonyms: &["calculation"], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Written Expression", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
        SubtestPattern { canonical: "Spelling", synonyms: &[], kind: ScoreKind::Standard, mandatory: false },
    ],
};

const DAS_II: AssessmentSchema = AssessmentSchema {
    test_label: "DAS-II",
    patterns: &[
        SubtestPattern { canonical: "Verbal Comprehension", synonyms: &[], kind: ScoreKind::Standard, mandatory: true },
        SubtestPattern { canonical: "Pattern Construction", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Sequential-Quantitative Reasoning", synonyms: &["sequential quantitative reasoning"], kind: ScoreKind::Scaled, mandatory: false },
        SubtestPattern { canonical: "Recall of Digits", synonyms: &[], kind: ScoreKind::Scaled, mandatory: false },
    ],
};

const BASC_3: AssessmentSchema = AssessmentSchema {
    test_label: "BASC-3",
    patterns: &[
        SubtestPattern { canonical: "Hyperactivity", synonyms: &[], kind: ScoreKind::TScore, mandatory: true },
        SubtestPattern { canonical: "Attention Problems", synonyms: &[], kind: ScoreKind::TScore, mandatory: true },
        SubtestPattern { canonical: "Aggression", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
        SubtestPattern { canonical: "Conduct Problems", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
        SubtestPattern { canonical: "Anxiety", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
        SubtestPattern { canonical: "Depression", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
        SubtestPattern { canonical: "Somatization", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
        SubtestPattern { canonical: "Withdrawal", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
        SubtestPattern { canonical: "Social Skills", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
    ],
};

const CONNERS_3: AssessmentSchema = AssessmentSchema {
    test_label: "CONNERS-3",
    patterns: &[
        SubtestPattern { canonical: "Inattention", synonyms: &[], kind: ScoreKind::TScore, mandatory: true },
        SubtestPattern { canonical: "Hyperactivity", synonyms: &["hyperactivity/impulsivity"], kind: ScoreKind::TScore, mandatory: true },
        SubtestPattern { canonical: "Peer Relations", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
        SubtestPattern { canonical: "Aggression", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
    ],
};

const BRIEF_2: AssessmentSchema = AssessmentSchema {
    test_label: "BRIEF-2",
    patterns: &[
        SubtestPattern { canonical: "Inhibit", synonyms: &[], kind: ScoreKind::TScore, mandatory: true },
        SubtestPattern { canonical: "Working Memory", synonyms: &[], kind: ScoreKind::TScore, mandatory: true },
        SubtestPattern { canonical: "Emotional Control", synonyms: &[], kind: ScoreKind::TScore, mandatory: false },
        SubtestPattern { canonical: "Task-Monitor", synonyms: &["task monitor"], kind: ScoreKind::TScore, mandatory: false },
    ],
};

/// Generic fallback for unknown instruments: no expected subtests, every
/// numeric mention in the standard-score range is taken at parser
/// confidence.
const GENERIC: AssessmentSchema = AssessmentSchema {
    test_label: "Other",
    patterns: &[],
};

pub fn schema_for(assessment_type: AssessmentType) -> &'static AssessmentSchema {
    match assessment_type {
        AssessmentType::WiscV => &WISC_V,
        AssessmentType::WiatIv => &WIAT_IV,
        AssessmentType::WjIv => &WJ_IV,
        AssessmentType::Ktea3 => &KTEA_3,
        AssessmentType::DasIi => &DAS_II,
        AssessmentType::Basc3 => &BASC_3,
        AssessmentType::Conners3 => &CONNERS_3,
        AssessmentType::Brief2 => &BRIEF_2,
        AssessmentType::Other => &GENERIC,
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl SubtestPattern {
    fn matches(&self, mention: &str) -> bool {
        let normalized = normalize(mention);
        if normalized.contains(&normalize(self.canonical)) {
            return true;
        }
        self.synonyms
            .iter()
            .any(|synonym| normalized.contains(&normalize(synonym)))
    }
}

/// Extract the first numeric value from a text span
fn first_number(text: &str) -> Option<f64> {
    let mut current = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() || (c == '.' && !current.is_empty()) {
            current.push(c);
        } else if !current.is_empty() {
            if let Ok(value) = current.parse() {
                return Some(value);
            }
            current.clear();
        }
    }
    None
}

/// Result of extracting one document
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub score_set: ExtractedScoreSet,
    /// Raw mean of per-field confidences, clamped to [0, 1]
    pub overall_confidence: f64,
    pub manual_review_required: bool,
    /// Whether any transient retry happened, for the trace outcome
    pub retried: bool,
    /// Size of the fetched document, for the trace record
    pub document_bytes: usize,
    /// Recognized report text, chunked into the vector index as
    /// assessment excerpts
    pub report_text: String,
}

/// The document extractor
pub struct DocumentExtractor {
    store: Arc<dyn DocumentStore>,
    ocr: Arc<dyn OcrProvider>,
    retry: RetryPolicy,
    /// Any field confidence below this marks the document for manual review
    review_floor: f64,
}

impl DocumentExtractor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ocr: Arc<dyn OcrProvider>,
        retry: RetryPolicy,
        review_floor: f64,
    ) -> Self {
        Self {
            store,
            ocr,
            retry,
            review_floor,
        }
    }

    /// Run fetch -> OCR -> schema mapping for one document
    pub async fn extract(&self, document: &AssessmentDocument) -> Result<ExtractionOutcome> {
        let bytes = self.store.fetch(&document.storage_uri).await?;
        debug!(
            document_id = %document.id,
            bytes = bytes.len(),
            "fetched assessment document"
        );

        let hints = OcrHints {
            document_kind: Some(document.assessment_type.label().to_string()),
        };
        let (parsed, retried) =
            with_retries(self.retry, "ocr.parse", || self.ocr.parse(&bytes, &hints)).await;
        let parsed = parsed?;

        if parsed.is_empty() {
            return Err(EdPlanError::ExtractionFailed {
                stage: "ocr".to_string(),
                reason: "zero entities recovered from document".to_string(),
            });
        }

        let records = self.map_to_records(document.assessment_type, &parsed);
        if records.iter().all(|r| !r.has_numeric_score()) {
            return Err(EdPlanError::ExtractionFailed {
                stage: "mapping".to_string(),
                reason: "no score fields could be mapped from the parsed document".to_string(),
            });
        }

        let confidences: Vec<f64> = records.iter().map(|r| r.confidence).collect();
        let overall_confidence = if confidences.is_empty() {
            0.0
        } else {
            (confidences.iter().sum::<f64>() / confidences.len() as f64).clamp(0.0, 1.0)
        };
        let has_gaps = records.iter().any(|r| !r.has_numeric_score());

        let score_set = ExtractedScoreSet::new(document.id, records);
        score_set.validate()?;
        let manual_review_required = overall_confidence < 0.76
            || has_gaps
            || score_set.confidence_floor() < self.review_floor;

        info!(
            document_id = %document.id,
            records = score_set.records.len(),
            overall_confidence,
            manual_review_required,
            "extraction complete"
        );

        let report_text = parsed
            .text_blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ExtractionOutcome {
            score_set,
            overall_confidence,
            manual_review_required,
            retried,
            document_bytes: bytes.len(),
            report_text,
        })
    }

    /// Apply the assessment-type schema to the parsed document
    fn map_to_records(
        &self,
        assessment_type: AssessmentType,
        parsed: &OcrDocument,
    ) -> Vec<ScoreRecord> {
        let schema = schema_for(assessment_type);
        let mut records = Vec::new();

        // Entities first, then table rows; the first mention of a subtest wins.
        let mut mentions: Vec<(String, f64)> = parsed
            .entities
            .iter()
            .map(|e| (e.mention_text.clone(), e.confidence))
            .collect();
        for table in &parsed.tables {
            for row in &table.rows {
                mentions.push((row.join(" "), table.confidence));
            }
        }

        for pattern in schema.patterns {
            let hit = mentions
                .iter()
                .find(|(mention, _)| pattern.matches(mention));

            match hit {
                Some((mention, parser_confidence)) => {
                    records.push(self.record_from_mention(
                        schema.test_label,
                        pattern,
                        mention,
                        *parser_confidence,
                    ));
                }
                None if pattern.mandatory => {
                    // Mandatory subtests that never appeared are recorded as
                    // gaps so the document is flagged for manual review.
                    records.push(ScoreRecord {
                        test_name: schema.test_label.to_string(),
                        subtest_name: pattern.canonical.to_string(),
                        standard_score: None,
                        scaled_score: None,
                        t_score: None,
                        percentile_rank: None,
                        confidence_interval_low: None,
                        confidence_interval_high: None,
                        classification: None,
                        confidence: 0.0,
                        source_text_span: String::new(),
                        extraction_flag: Some("mandatory subtest not found".to_string()),
                    });
                }
                None => {}
            }
        }

        // Generic fallback: unknown instruments take any mention carrying a
        // number in the standard-score range.
        if schema.patterns.is_empty() {
            for (mention, parser_confidence) in &mentions {
                if let Some(value) = first_number(mention) {
                    if (40.0..=160.0).contains(&value) {
                        let name = mention
                            .split(|c: char| c.is_ascii_digit())
                            .next()
                            .unwrap_or("")
                            .trim()
                            .to_string();
                        if name.is_empty() {
                            continue;
                        }
                        records.push(ScoreRecord {
                            test_name: "Other".to_string(),
                            subtest_name: name,
                            standard_score: Some(value),
                            scaled_score: None,
                            t_score: None,
                            percentile_rank: None,
                            confidence_interval_low: None,
                            confidence_interval_high: None,
                            classification: None,
                            confidence: *parser_confidence,
                            source_text_span: mention.clone(),
                            extraction_flag: None,
                        });
                    }
                }
            }
        }

        records
    }

    fn record_from_mention(
        &self,
        test_label: &str,
        pattern: &SubtestPattern,
        mention: &str,
        parser_confidence: f64,
    ) -> ScoreRecord {
        let value = first_number(mention);
        let (min, max) = pattern.kind.plausible_range();

        // Schema confidence reflects how well the recovered value fits the
        // instrument's expectations; the effective confidence is the minimum
        // of parser and schema confidence.
        let (value, schema_confidence, flag) = match value {
            Some(v) if (min..=max).contains(&v) => (Some(v), 1.0, None),
            Some(v) => {
                debug!(
                    subtest = pattern.canonical,
                    value = v,
                    "score outside plausible range"
                );
                (None, 0.3, Some(format!("value {} outside expected range", v)))
            }
            None => (None, 0.2, Some("no numeric value recovered".to_string())),
        };
        let confidence = parser_confidence.min(schema_confidence).clamp(0.0, 1.0);

        let (standard_score, scaled_score, t_score) = match (value, pattern.kind) {
            (Some(v), ScoreKind::Standard) => (Some(v), None, None),
            (Some(v), ScoreKind::Scaled) => (None, Some(v), None),
            (Some(v), ScoreKind::TScore) => (None, None, Some(v)),
            (None, _) => (None, None, None),
        };

        ScoreRecord {
            test_name: test_label.to_string(),
            subtest_name: pattern.canonical.to_string(),
            standard_score,
            scaled_score,
            t_score,
            percentile_rank: None,
            confidence_interval_low: None,
            confidence_interval_high: None,
            classification: None,
            confidence,
            source_text_span: mention.to_string(),
            extraction_flag: flag,
        }
    }
}
