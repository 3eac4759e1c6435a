//! Quantification Engine
//!
//! Converts an ExtractedScoreSet into a normalized Present-Level-of-
//! Performance profile: per-domain scores, composites, strengths and needs,
//! and a grade equivalent. All computation is pure; the engine has no I/O.

use crate::assessments::{
    BehavioralClassification, ScoreClassification, ScoreRecord,
};
use crate::students::Grade;
use chrono::{DateTime, Utc};
use edplan_types::{DocumentId, Result, StudentId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Skill domains that score records are grouped into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Reading,
    Math,
    Writing,
    OralLanguage,
    VerbalComprehension,
    VisualSpatial,
    FluidReasoning,
    WorkingMemory,
    ProcessingSpeed,
    Attention,
    Social,
    Emotional,
}

/// Composite family a domain contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainKind {
    Cognitive,
    Academic,
    Behavioral,
}

impl Domain {
    pub fn kind(&self) -> DomainKind {
        match self {
            Domain::VerbalComprehension
            | Domain::VisualSpatial
            | Domain::FluidReasoning
            | Domain::WorkingMemory
            | Domain::ProcessingSpeed => DomainKind::Cognitive,
            Domain::Reading | Domain::Math | Domain::Writing | Domain::OralLanguage => {
                DomainKind::Academic
            }
            Domain::Attention | Domain::Social | Domain::Emotional => DomainKind::Behavioral,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Domain::Reading => "reading",
            Domain::Math => "math",
            Domain::Writing => "writing",
            Domain::OralLanguage => "oral_language",
            Domain::VerbalComprehension => "verbal_comprehension",
            Domain::VisualSpatial => "visual_spatial",
            Domain::FluidReasoning => "fluid_reasoning",
            Domain::WorkingMemory => "working_memory",
            Domain::ProcessingSpeed => "processing_speed",
            Domain::Attention => "attention",
            Domain::Social => "social",
            Domain::Emotional => "emotional",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Domain::Reading => "Reading",
            Domain::Math => "Math",
            Domain::Writing => "Writing",
            Domain::OralLanguage => "Oral Language",
            Domain::VerbalComprehension => "Verbal Comprehension",
            Domain::VisualSpatial => "Visual Spatial",
            Domain::FluidReasoning => "Fluid Reasoning",
            Domain::WorkingMemory => "Working Memory",
            Domain::ProcessingSpeed => "Processing Speed",
            Domain::Attention => "Attention",
            Domain::Social => "Social",
            Domain::Emotional => "Emotional",
        }
    }
}

/// Fixed mapping from subtest names to domains. Matching is against a
/// normalized (lowercase, alphanumeric) form of the subtest name, so
/// punctuation and spacing variants collapse to the same key.
const SUBTEST_DOMAINS: &[(&str, Domain)] = &[
    // WISC-V / DAS-II cognitive subtests and indexes
    ("similarities", Domain::VerbalComprehension),
    ("vocabulary", Domain::VerbalComprehension),
    ("verbalcomprehension", Domain::VerbalComprehension),
    ("verbalcomprehensionindex", Domain::VerbalComprehension),
    ("wordreasoning", Domain::VerbalComprehension),
    ("blockdesign", Domain::VisualSpatial),
    ("visualpuzzles", Domain::VisualSpatial),
    ("visualspatial", Domain::VisualSpatial),
    ("visualspatialindex", Domain::VisualSpatial),
    ("patternconstruction", Domain::VisualSpatial),
    ("matrixreasoning", Domain::FluidReasoning),
    ("figureweights", Domain::FluidReasoning),
    ("fluidreasoning", Domain::FluidReasoning),
    ("fluidreasoningindex", Domain::FluidReasoning),
    ("sequentialquantitativereasoning", Domain::FluidReasoning),
    ("digitspan", Domain::WorkingMemory),
    ("picturespan", Domain::WorkingMemory),
    ("lettersnumbersequencing", Domain::WorkingMemory),
    ("workingmemoryindex", Domain::WorkingMemory),
    ("recallofdigits", Domain::WorkingMemory),
    ("coding", Domain::ProcessingSpeed),
    ("symbolsearch", Domain::ProcessingSpeed),
    ("cancellation", Domain::ProcessingSpeed),
    ("processingspeed", Domain::ProcessingSpeed),
    ("processingspeedindex", Domain::ProcessingSpeed),
    // WIAT-IV / WJ-IV / KTEA-3 achievement subtests
    ("wordreading", Domain::Reading),
    ("readingcomprehension", Domain::Reading),
    ("pseudoworddecoding", Domain::Reading),
    ("letterwordidentification", Domain::Reading),
    ("passagecomprehension", Domain::Reading),
    ("readingfluency", Domain::Reading),
    ("decodingfluency", Domain::Reading),
    ("numericaloperations", Domain::Math),
    ("mathproblemsolving", Domain::Math),
    ("appliedproblems", Domain::Math),
    ("calculation", Domain::Math),
    ("mathfluency", Domain::Math),
    ("mathconceptsapplications", Domain::Math),
    ("spelling", Domain::Writing),
    ("sentencecomposition", Domain::Writing),
    ("essaycomposition", Domain::Writing),
    ("writingsamples", Domain::Writing),
    ("writtenexpression", Domain::Writing),
    ("listeningcomprehension", Domain::OralLanguage),
    ("oralexpression", Domain::OralLanguage),
    ("oralreadingfluency", Domain::OralLanguage),
    ("oraldiscourse", Domain::OralLanguage),
    // BASC-3 / CONNERS-3 / BRIEF-2 behavioral scales
    ("hyperactivity", Domain::Attention),
    ("attentionproblems", Domain::Attention),
    ("inattention", Domain::Attention),
    ("executivefunctioning", Domain::Attention),
    ("inhibit", Domain::Attention),
    ("taskmonitor", Domain::Attention),
    ("aggression", Domain::Social),
    ("conductproblems", Domain::Social),
    ("socialskills", Domain::Social),
    ("peerrelations", Domain::Social),
    ("withdrawal", Domain::Social),
    ("anxiety", Domain::Emotional),
    ("depression", Domain::Emotional),
    ("emotionalselfcontrol", Domain::Emotional),
    ("emotionalcontrol", Domain::Emotional),
    ("somatization", Domain::Emotional),
];

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Look up the domain for a (test, subtest) pair. The test name only
/// disambiguates scales that appear on several instruments; the subtest name
/// carries the mapping.
pub fn domain_for(_test_name: &str, subtest_name: &str) -> Option<Domain> {
    let normalized = normalize_name(subtest_name);
    SUBTEST_DOMAINS
        .iter()
        .find(|(key, _)| normalized == *key)
        .map(|(_, domain)| *domain)
}

/// Convert a scaled score (mean 10, SD 3) to a standard-score equivalent
/// (mean 100, SD 15).
pub fn scaled_to_standard(scaled: f64) -> f64 {
    100.0 + (scaled - 10.0) * 5.0
}

/// Percentile rank from a standard score via the normal distribution
/// (mean 100, SD 15), rounded to the nearest integer.
pub fn percentile_from_standard(standard: f64) -> f64 {
    let z = (standard - 100.0) / 15.0;
    (normal_cdf(z) * 100.0).round().clamp(0.0, 100.0)
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation
fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    // Abramowitz & Stegun 7.1.26, max absolute error 1.5e-7
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Aggregated score for one domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainScore {
    pub domain: Domain,
    /// Standard score for cognitive/academic domains, T-score for behavioral
    pub score: f64,
    pub percentile: Option<f64>,
    pub classification: String,
    pub record_count: usize,
    /// Minimum confidence among contributing records
    pub confidence: f64,
}

impl DomainScore {
    pub fn is_behavioral(&self) -> bool {
        self.domain.kind() == DomainKind::Behavioral
    }

    /// Severity key used to order the needs list: standard scores sort as-is,
    /// T-scores are mirrored around the typical range so a higher T (worse)
    /// sorts like a lower standard score.
    fn severity_key(&self) -> f64 {
        if self.is_behavioral() {
            100.0 - self.score
        } else {
            self.score
        }
    }

    fn indicates_need(&self) -> bool {
        if self.is_behavioral() {
            BehavioralClassification::from_t_score(self.score).indicates_need()
        } else {
            ScoreClassification::from_standard_score(self.score).indicates_need()
        }
    }

    fn indicates_strength(&self) -> bool {
        if self.is_behavioral() {
            false
        } else {
            ScoreClassification::from_standard_score(self.score).indicates_strength()
        }
    }
}

/// Subtests that could not be mapped to a domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmappedScore {
    pub test_name: String,
    pub subtest_name: String,
}

/// Normalized Present-Level-of-Performance profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantifiedProfile {
    pub id: Uuid,
    pub student_id: StudentId,
    pub document_ids: Vec<DocumentId>,
    /// Composites normalized to 0-100; None when no domain contributed
    pub cognitive_composite: Option<f64>,
    pub academic_composite: Option<f64>,
    /// Inverted: higher means fewer behavioral concerns
    pub behavioral_composite: Option<f64>,
    pub domain_scores: Vec<DomainScore>,
    /// "G.T" with one decimal, e.g. "2.5"
    pub grade_equivalent: String,
    /// Domain tags with classification at or above High Average, strongest first
    pub strengths: Vec<Domain>,
    /// Domain tags with need-level classification, most severe first
    pub needs: Vec<Domain>,
    /// Free-text summary, at most 500 characters
    pub learning_profile: String,
    /// Minimum of contributing per-field confidences
    pub confidence_floor: f64,
    pub unmapped_scores: Vec<UnmappedScore>,
    /// Set when the needs list is empty; generation proceeds with a
    /// strengths-only goal emphasis
    pub strengths_only: bool,
    /// Set when confidence_floor is below the configured floor; the
    /// resulting IEP is forced to stay a draft
    pub requires_manual_review: bool,
    pub created_at: DateTime<Utc>,
}

impl QuantifiedProfile {
    pub fn status_label(&self) -> &'static str {
        if self.requires_manual_review {
            "requires_manual_review"
        } else {
            "complete"
        }
    }
}

/// The quantification engine
pub struct QuantificationEngine {
    /// Profiles below this confidence floor are marked for manual review
    pub review_floor: f64,
}

impl QuantificationEngine {
    pub fn new(review_floor: f64) -> Self {
        Self { review_floor }
    }

    /// Convert score records into a QuantifiedProfile for a student at the
    /// given grade. Unmapped subtests are reported and ignored for
    /// composites; a domain with zero contributing scores is absent, never
    /// zero.
    pub fn quantify(
        &self,
        student_id: StudentId,
        document_ids: Vec<DocumentId>,
        records: &[ScoreRecord],
        grade: Grade,
    ) -> Result<QuantifiedProfile> {
        let mut by_domain: std::collections::HashMap<Domain, Vec<(f64, f64)>> =
            std::collections::HashMap::new();
        let mut unmapped = Vec::new();
        let mut confidence_floor = f64::INFINITY;

        for record in records {
            let Some(domain) = domain_for(&record.test_name, &record.subtest_name) else {
                unmapped.push(UnmappedScore {
                    test_name: record.test_name.clone(),
                    subtest_name: record.subtest_name.clone(),
                });
                continue;
            };

            let value = if domain.kind() == DomainKind::Behavioral {
                record.t_score
            } else {
                // Prefer the standard score; fall back to the scaled-score
                // linear transform for the test family.
                record
                    .standard_score
                    .or_else(|| record.scaled_score.map(scaled_to_standard))
            };

            let Some(value) = value else {
                // Flagged records without a usable numeric value contribute
                // nothing to the domain mean.
                continue;
            };

            confidence_floor = confidence_floor.min(record.confidence);
            by_domain
                .entry(domain)
                .or_default()
                .push((value, record.confidence));
        }

        let mut domain_scores: Vec<DomainScore> = by_domain
            .into_iter()
            .map(|(domain, contributions)| {
                let weight_sum: f64 = contributions.iter().map(|(_, w)| w).sum();
                let score = if weight_sum > 0.0 {
                    contributions.iter().map(|(v, w)| v * w).sum::<f64>() / weight_sum
                } else {
                    contributions.iter().map(|(v, _)| v).sum::<f64>()
                        / contributions.len() as f64
                };
                let min_confidence = contributions
                    .iter()
                    .map(|(_, w)| *w)
                    .fold(f64::INFINITY, f64::min);

                let (percentile, classification) = if domain.kind() == DomainKind::Behavioral {
                    (
                        None,
                        BehavioralClassification::from_t_score(score)
                            .label()
                            .to_string(),
                    )
                } else {
                    (
                        Some(percentile_from_standard(score)),
                        ScoreClassification::from_standard_score(score)
                            .label()
                            .to_string(),
                    )
                };

                DomainScore {
                    domain,
                    score,
                    percentile,
                    classification,
                    record_count: contributions.len(),
                    confidence: min_confidence,
                }
            })
            .collect();
        domain_scores.sort_by(|a, b| a.domain.tag().cmp(b.domain.tag()));

        let cognitive_composite =
            composite_standard(&domain_scores, DomainKind::Cognitive);
        let academic_composite = composite_standard(&domain_scores, DomainKind::Academic);
        let behavioral_composite = composite_behavioral(&domain_scores);

        let mut strengths: Vec<&DomainScore> = domain_scores
            .iter()
            .filter(|d| d.indicates_strength())
            .collect();
        strengths.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut needs: Vec<&DomainScore> =
            domain_scores.iter().filter(|d| d.indicates_need()).collect();
        needs.sort_by(|a, b| {
            a.severity_key()
                .partial_cmp(&b.severity_key())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let strengths: Vec<Domain> = strengths.iter().map(|d| d.domain).collect();
        let needs: Vec<Domain> = needs.iter().map(|d| d.domain).collect();

        let grade_equivalent = grade_equivalent(grade, &domain_scores);
        let confidence_floor = if confidence_floor.is_finite() {
            confidence_floor
        } else {
            0.0
        };
        let strengths_only = needs.is_empty();
        let requires_manual_review =
            confidence_floor < self.review_floor || domain_scores.is_empty();

        let learning_profile = learning_profile_text(
            grade,
            &strengths,
            &needs,
            cognitive_composite,
            academic_composite,
            behavioral_composite,
        );

        let profile = QuantifiedProfile {
            id: Uuid::new_v4(),
            student_id,
            document_ids,
            cognitive_composite,
            academic_composite,
            behavioral_composite,
            domain_scores,
            grade_equivalent,
            strengths,
            needs,
            learning_profile,
            confidence_floor,
            unmapped_scores: unmapped,
            strengths_only,
            requires_manual_review,
            created_at: Utc::now(),
        };
        Ok(profile)
    }
}

/// Weighted mean standard score for a composite family, normalized to 0-100
/// by a linear map from the 40-160 standard-score range.
fn composite_standard(domain_scores: &[DomainScore], kind: DomainKind) -> Option<f64> {
    let scores: Vec<f64> = domain_scores
        .iter()
        .filter(|d| d.domain.kind() == kind)
        .map(|d| d.score)
        .collect();
    if scores.is_empty() {
        return None;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    Some(((mean - 40.0) / 120.0 * 100.0).clamp(0.0, 100.0))
}

/// Behavioral composite over the 40-80 T-score range, inverted so a higher
/// composite means fewer concerns.
fn composite_behavioral(domain_scores: &[DomainScore]) -> Option<f64> {
    let scores: Vec<f64> = domain_scores
        .iter()
        .filter(|d| d.domain.kind() == DomainKind::Behavioral)
        .map(|d| d.score)
        .collect();
    if scores.is_empty() {
        return None;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    Some(((80.0 - mean) / 40.0 * 100.0).clamp(0.0, 100.0))
}

/// Grade equivalent: the declared grade minus one level per 15 standard-score
/// points of the academic mean below 100, floored at 0, as "G.T".
fn grade_equivalent(grade: Grade, domain_scores: &[DomainScore]) -> String {
    let academic: Vec<f64> = domain_scores
        .iter()
        .filter(|d| d.domain.kind() == DomainKind::Academic)
        .map(|d| d.score)
        .collect();
    let offset = if academic.is_empty() {
        0.0
    } else {
        let mean = academic.iter().sum::<f64>() / academic.len() as f64;
        ((100.0 - mean).max(0.0)) / 15.0
    };
    let equivalent = (grade.0 as f64 - offset).max(0.0);
    format!("{:.1}", equivalent)
}

fn learning_profile_text(
    grade: Grade,
    strengths: &[Domain],
    needs: &[Domain],
    cognitive: Option<f64>,
    academic: Option<f64>,
    behavioral: Option<f64>,
) -> String {
    let strengths_text = if strengths.is_empty() {
        "no measured relative strengths".to_string()
    } else {
        strengths
            .iter()
            .map(|d| d.label())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let needs_text = if needs.is_empty() {
        "no identified priority needs".to_string()
    } else {
        needs.iter().map(|d| d.label()).collect::<Vec<_>>().join(", ")
    };
    let composites_text = [
        ("cognitive", cognitive),
        ("academic", academic),
        ("behavioral", behavioral),
    ]
    .iter()
    .filter_map(|(name, value)| value.map(|v| format!("{} {:.0}", name, v)))
    .collect::<Vec<_>>()
    .join(", ");

    let mut text = format!(
        "Grade {} student. Relative strengths: {}. Priority needs (most severe first): {}. Composites (0-100): {}.",
        grade, strengths_text, needs_text, composites_text
    );
    if text.len() > 500 {
        text.truncate(497);
        text.push_str("...");
    }
    text
}

/// Repository trait for quantified profiles
#[async_trait::async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn insert(&self, profile: QuantifiedProfile) -> Result<Uuid>;
    async fn get(&self, id: Uuid) -> Result<Option<QuantifiedProfile>>;
    async fn find_by_document(&self, document_id: DocumentId) -> Result<Option<QuantifiedProfile>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(test: &str, subtest: &str, standard: Option<f64>, confidence: f64) -> ScoreRecord {
        ScoreRecord {
            test_name: test.to_string(),
            subtest_name: subtest.to_string(),
            standard_score: standard,
            scaled_score: None,
            t_score: None,
            percentile_rank: None,
            confidence_interval_low: None,
            confidence_interval_high: None,
            classification: None,
            confidence,
            source_text_span: format!("{} {}", subtest, standard.unwrap_or(0.0)),
            extraction_flag: if standard.is_none() {
                Some("missing".to_string())
            } else {
                None
            },
        }
    }

    fn behavioral_record(subtest: &str, t: f64, confidence: f64) -> ScoreRecord {
        ScoreRecord {
            t_score: Some(t),
            standard_score: None,
            ..record("BASC-3", subtest, Some(0.0), confidence)
        }
    }

    fn engine() -> QuantificationEngine {
        QuantificationEngine::new(0.60)
    }

    #[test]
    fn test_domain_mapping_normalizes_names() {
        assert_eq!(domain_for("WISC-V", "Block Design"), Some(Domain::VisualSpatial));
        assert_eq!(domain_for("WISC-V", "block design"), Some(Domain::VisualSpatial));
        assert_eq!(domain_for("WIAT-IV", "Word Reading"), Some(Domain::Reading));
        assert_eq!(domain_for("BASC-3", "Attention Problems"), Some(Domain::Attention));
        assert_eq!(domain_for("WISC-V", "Underwater Basket Weaving"), None);
    }

    #[test]
    fn test_scaled_to_standard_transform() {
        assert!((scaled_to_standard(10.0) - 100.0).abs() < 1e-9);
        assert!((scaled_to_standard(7.0) - 85.0).abs() < 1e-9);
        assert!((scaled_to_standard(13.0) - 115.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_from_standard() {
        assert!((percentile_from_standard(100.0) - 50.0).abs() < 1.0);
        assert!(percentile_from_standard(70.0) <= 3.0);
        assert!(percentile_from_standard(130.0) >= 97.0);
    }

    #[test]
    fn test_weighted_domain_mean_prefers_confident_records() {
        let records = vec![
            record("WIAT-IV", "Word Reading", Some(80.0), 0.9),
            record("WIAT-IV", "Reading Comprehension", Some(100.0), 0.1),
        ];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        let reading = profile
            .domain_scores
            .iter()
            .find(|d| d.domain == Domain::Reading)
            .unwrap();
        // Weighted mean: (80*0.9 + 100*0.1) / 1.0 = 82
        assert!((reading.score - 82.0).abs() < 1e-9);
    }

    #[test]
    fn test_needs_ordered_most_severe_first() {
        let records = vec![
            record("WIAT-IV", "Word Reading", Some(85.0), 0.9),
            record("WIAT-IV", "Numerical Operations", Some(68.0), 0.9),
            record("WIAT-IV", "Spelling", Some(75.0), 0.9),
        ];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        assert_eq!(
            profile.needs,
            vec![Domain::Math, Domain::Writing, Domain::Reading]
        );
        assert!(!profile.strengths_only);
    }

    #[test]
    fn test_strengths_ordered_strongest_first() {
        let records = vec![
            record("WISC-V", "Similarities", Some(118.0), 0.9),
            record("WISC-V", "Matrix Reasoning", Some(132.0), 0.9),
            record("WIAT-IV", "Word Reading", Some(95.0), 0.9),
        ];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        assert_eq!(
            profile.strengths,
            vec![Domain::FluidReasoning, Domain::VerbalComprehension]
        );
    }

    #[test]
    fn test_behavioral_needs_and_composite_inversion() {
        let records = vec![
            behavioral_record("Attention Problems", 72.0, 0.9),
            behavioral_record("Anxiety", 63.0, 0.9),
            behavioral_record("Social Skills", 48.0, 0.9),
        ];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        // Attention (T 72, clinically significant) is more severe than
        // Anxiety (T 63, at-risk); Social (T 48) is typical.
        assert_eq!(profile.needs, vec![Domain::Attention, Domain::Emotional]);
        // Mean T = 61, inverted composite = (80-61)/40*100 = 47.5
        let behavioral = profile.behavioral_composite.unwrap();
        assert!((behavioral - 47.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_domain_is_absent_not_zero() {
        let records = vec![record("WIAT-IV", "Word Reading", Some(90.0), 0.9)];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        assert!(profile.cognitive_composite.is_none());
        assert!(profile.behavioral_composite.is_none());
        assert!(profile.academic_composite.is_some());
    }

    #[test]
    fn test_unmapped_scores_reported_and_ignored() {
        let records = vec![
            record("WIAT-IV", "Word Reading", Some(90.0), 0.9),
            record("Custom", "Juggling Accuracy", Some(140.0), 0.9),
        ];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        assert_eq!(profile.unmapped_scores.len(), 1);
        assert_eq!(profile.unmapped_scores[0].subtest_name, "Juggling Accuracy");
        assert_eq!(profile.domain_scores.len(), 1);
    }

    #[test]
    fn test_grade_equivalent_offset() {
        // Academic mean 70 => offset (100-70)/15 = 2.0 => grade 5 reads as 3.0
        let records = vec![record("WIAT-IV", "Word Reading", Some(70.0), 0.9)];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        assert_eq!(profile.grade_equivalent, "3.0");
    }

    #[test]
    fn test_grade_equivalent_floors_at_zero() {
        let records = vec![record("WIAT-IV", "Word Reading", Some(55.0), 0.9)];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(1))
            .unwrap();
        assert_eq!(profile.grade_equivalent, "0.0");
    }

    #[test]
    fn test_low_confidence_triggers_manual_review() {
        let records = vec![record("WIAT-IV", "Word Reading", Some(90.0), 0.4)];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        assert!(profile.confidence_floor < 0.60);
        assert!(profile.requires_manual_review);
        assert_eq!(profile.status_label(), "requires_manual_review");
    }

    #[test]
    fn test_no_needs_flags_strengths_only() {
        let records = vec![record("WIAT-IV", "Word Reading", Some(112.0), 0.9)];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        assert!(profile.needs.is_empty());
        assert!(profile.strengths_only);
    }

    #[test]
    fn test_needs_traceable_to_low_records() {
        // Invariant: every need traces to at least one record with
        // classification at or below Low Average or behavioral T >= 65.
        let records = vec![
            record("WIAT-IV", "Word Reading", Some(72.0), 0.9),
            behavioral_record("Attention Problems", 68.0, 0.9),
        ];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        for need in &profile.needs {
            let traceable = records.iter().any(|r| {
                domain_for(&r.test_name, &r.subtest_name) == Some(*need)
                    && (r
                        .standard_score
                        .map(|s| ScoreClassification::from_standard_score(s).indicates_need())
                        .unwrap_or(false)
                        || r.t_score.map(|t| t >= 65.0).unwrap_or(false))
            });
            assert!(traceable, "need {:?} has no supporting record", need);
        }
    }

    #[test]
    fn test_learning_profile_capped_at_500_chars() {
        let records = vec![
            record("WIAT-IV", "Word Reading", Some(72.0), 0.9),
            record("WIAT-IV", "Numerical Operations", Some(75.0), 0.9),
            record("WISC-V", "Digit Span", Some(78.0), 0.9),
        ];
        let profile = engine()
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap();
        assert!(profile.learning_profile.len() <= 500);
        assert!(!profile.learning_profile.is_empty());
    }
}
