//! Assessment Documents and Extracted Scores
//!
//! An AssessmentDocument tracks one uploaded psychoeducational report through
//! the extraction state machine. ExtractedScoreSet holds the structured score
//! records recovered from it, with per-field confidences.

use chrono::{DateTime, NaiveDate, Utc};
use edplan_types::{DocumentId, EdPlanError, Result, StudentId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of supported assessment instruments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssessmentType {
    #[serde(rename = "WISC-V")]
    WiscV,
    #[serde(rename = "WIAT-IV")]
    WiatIv,
    #[serde(rename = "WJ-IV")]
    WjIv,
    #[serde(rename = "BASC-3")]
    Basc3,
    #[serde(rename = "CONNERS-3")]
    Conners3,
    #[serde(rename = "KTEA-3")]
    Ktea3,
    #[serde(rename = "DAS-II")]
    DasIi,
    #[serde(rename = "BRIEF-2")]
    Brief2,
    Other,
}

impl AssessmentType {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "WISC-V" => Ok(AssessmentType::WiscV),
            "WIAT-IV" => Ok(AssessmentType::WiatIv),
            "WJ-IV" => Ok(AssessmentType::WjIv),
            "BASC-3" => Ok(AssessmentType::Basc3),
            "CONNERS-3" => Ok(AssessmentType::Conners3),
            "KTEA-3" => Ok(AssessmentType::Ktea3),
            "DAS-II" => Ok(AssessmentType::DasIi),
            "BRIEF-2" => Ok(AssessmentType::Brief2),
            "OTHER" => Ok(AssessmentType::Other),
            other => Err(EdPlanError::validation(
                "assessment_type",
                format!("Unknown assessment type '{}'", other),
            )),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AssessmentType::WiscV => "WISC-V",
            AssessmentType::WiatIv => "WIAT-IV",
            AssessmentType::WjIv => "WJ-IV",
            AssessmentType::Basc3 => "BASC-3",
            AssessmentType::Conners3 => "CONNERS-3",
            AssessmentType::Ktea3 => "KTEA-3",
            AssessmentType::DasIi => "DAS-II",
            AssessmentType::Brief2 => "BRIEF-2",
            AssessmentType::Other => "Other",
        }
    }

    /// Behavioral instruments report T-scores instead of standard scores
    pub fn is_behavioral(&self) -> bool {
        matches!(
            self,
            AssessmentType::Basc3 | AssessmentType::Conners3 | AssessmentType::Brief2
        )
    }
}

/// Extraction state machine for an assessment document.
/// pending -> extracting -> (extracted | failed) -> quantified.
/// No backward transitions except an explicit administrative reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Extracting,
    Extracted,
    Quantified,
    Failed,
}

impl ProcessingStatus {
    pub fn can_transition(&self, to: ProcessingStatus) -> bool {
        matches!(
            (self, to),
            (ProcessingStatus::Pending, ProcessingStatus::Extracting)
                | (ProcessingStatus::Extracting, ProcessingStatus::Extracted)
                | (ProcessingStatus::Extracting, ProcessingStatus::Failed)
                | (ProcessingStatus::Extracted, ProcessingStatus::Quantified)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Extracting => "extracting",
            ProcessingStatus::Extracted => "extracted",
            ProcessingStatus::Quantified => "quantified",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Extracted | ProcessingStatus::Quantified | ProcessingStatus::Failed
        )
    }
}

/// Closed classification vocabulary for norm-referenced scores, ordered from
/// most severe to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ScoreClassification {
    #[serde(rename = "Very Low")]
    VeryLow,
    #[serde(rename = "Low")]
    Low,
    #[serde(rename = "Low Average")]
    LowAverage,
    #[serde(rename = "Average")]
    Average,
    #[serde(rename = "High Average")]
    HighAverage,
    #[serde(rename = "High")]
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl ScoreClassification {
    /// Band a standard score (mean 100, SD 15)
    pub fn from_standard_score(score: f64) -> Self {
        if score < 70.0 {
            ScoreClassification::VeryLow
        } else if score < 80.0 {
            ScoreClassification::Low
        } else if score < 90.0 {
            ScoreClassification::LowAverage
        } else if score < 110.0 {
            ScoreClassification::Average
        } else if score < 120.0 {
            ScoreClassification::HighAverage
        } else if score < 130.0 {
            ScoreClassification::High
        } else {
            ScoreClassification::VeryHigh
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScoreClassification::VeryLow => "Very Low",
            ScoreClassification::Low => "Low",
            ScoreClassification::LowAverage => "Low Average",
            ScoreClassification::Average => "Average",
            ScoreClassification::HighAverage => "High Average",
            ScoreClassification::High => "High",
            ScoreClassification::VeryHigh => "Very High",
        }
    }

    /// Needs are classifications at or below Low Average
    pub fn indicates_need(&self) -> bool {
        *self <= ScoreClassification::LowAverage
    }

    /// Strengths are classifications at or above High Average
    pub fn indicates_strength(&self) -> bool {
        *self >= ScoreClassification::HighAverage
    }
}

/// Bands for behavioral T-scores (mean 50, SD 10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BehavioralClassification {
    Typical,
    #[serde(rename = "At-Risk")]
    AtRisk,
    #[serde(rename = "Clinically Significant")]
    ClinicallySignificant,
}

impl BehavioralClassification {
    pub fn from_t_score(t_score: f64) -> Self {
        if t_score >= 70.0 {
            BehavioralClassification::ClinicallySignificant
        } else if t_score >= 60.0 {
            BehavioralClassification::AtRisk
        } else {
            BehavioralClassification::Typical
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BehavioralClassification::Typical => "Typical",
            BehavioralClassification::AtRisk => "At-Risk",
            BehavioralClassification::ClinicallySignificant => "Clinically Significant",
        }
    }

    pub fn indicates_need(&self) -> bool {
        !matches!(self, BehavioralClassification::Typical)
    }
}

/// One recovered score with per-field confidence and provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub test_name: String,
    pub subtest_name: String,
    pub standard_score: Option<f64>,
    pub scaled_score: Option<f64>,
    /// Behavioral instruments report T-scores (mean 50, SD 10)
    pub t_score: Option<f64>,
    pub percentile_rank: Option<f64>,
    pub confidence_interval_low: Option<f64>,
    pub confidence_interval_high: Option<f64>,
    pub classification: Option<ScoreClassification>,
    /// Effective confidence: min(parser confidence, schema confidence)
    pub confidence: f64,
    /// Where in the source document the score was read from
    pub source_text_span: String,
    /// Required whenever no numeric score value was recovered
    pub extraction_flag: Option<String>,
}

impl ScoreRecord {
    pub fn has_numeric_score(&self) -> bool {
        self.standard_score.is_some() || self.scaled_score.is_some() || self.t_score.is_some()
    }

    /// Enforce the record-level invariants: percentile in [0, 100], a
    /// confidence in [0, 1], and an extraction flag on any record missing all
    /// numeric score fields.
    pub fn validate(&self) -> Result<()> {
        if let Some(percentile) = self.percentile_rank {
            if !(0.0..=100.0).contains(&percentile) {
                return Err(EdPlanError::validation(
                    "percentile_rank",
                    format!(
                        "Percentile {} out of range for {}/{}",
                        percentile, self.test_name, self.subtest_name
                    ),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(EdPlanError::validation(
                "confidence",
                format!("Confidence {} out of range", self.confidence),
            ));
        }
        if !self.has_numeric_score() && self.extraction_flag.is_none() {
            return Err(EdPlanError::validation(
                "extraction_flag",
                format!(
                    "Record {}/{} has no numeric score and no extraction flag",
                    self.test_name, self.subtest_name
                ),
            ));
        }
        Ok(())
    }
}

/// Ordered set of score records extracted from one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedScoreSet {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub records: Vec<ScoreRecord>,
    pub created_at: DateTime<Utc>,
}

impl ExtractedScoreSet {
    pub fn new(document_id: DocumentId, records: Vec<ScoreRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            records,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for record in &self.records {
            record.validate()?;
        }
        Ok(())
    }

    /// Minimum per-field confidence across all records
    pub fn confidence_floor(&self) -> f64 {
        self.records
            .iter()
            .map(|r| r.confidence)
            .fold(f64::INFINITY, f64::min)
            .min(1.0)
    }
}

/// Map a raw confidence to the 0.76-0.98 display range used in reports.
/// Storage always retains the raw value.
pub fn display_confidence(raw: f64) -> f64 {
    let clamped = raw.clamp(0.0, 1.0);
    0.76 + clamped * (0.98 - 0.76)
}

/// Assessment document entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentDocument {
    pub id: DocumentId,
    pub student_id: StudentId,
    pub file_name: String,
    /// Opaque object-storage URI; the pipeline only holds the reference
    pub storage_uri: String,
    pub assessment_type: AssessmentType,
    pub assessor_name: String,
    pub assessment_date: NaiveDate,
    pub processing_status: ProcessingStatus,
    /// Raw overall confidence in [0, 1]; display remapping happens at the edge
    pub overall_confidence: Option<f64>,
    pub manual_review_required: bool,
    pub extraction_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AssessmentDocument {
    pub fn new(
        student_id: StudentId,
        file_name: String,
        storage_uri: String,
        assessment_type: AssessmentType,
        assessor_name: String,
        assessment_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            file_name,
            storage_uri,
            assessment_type,
            assessor_name,
            assessment_date,
            processing_status: ProcessingStatus::Pending,
            overall_confidence: None,
            manual_review_required: false,
            extraction_notes: None,
            created_at: Utc::now(),
        }
    }

    /// Apply a forward status transition, rejecting anything the state
    /// machine does not allow.
    pub fn transition(&mut self, to: ProcessingStatus) -> Result<()> {
        if !self.processing_status.can_transition(to) {
            return Err(EdPlanError::IllegalTransition {
                from: self.processing_status.label().to_string(),
                to: to.label().to_string(),
            });
        }
        self.processing_status = to;
        Ok(())
    }

    /// Administrative reset back to pending; clears extraction outputs
    pub fn reset(&mut self) {
        self.processing_status = ProcessingStatus::Pending;
        self.overall_confidence = None;
        self.manual_review_required = false;
        self.extraction_notes = None;
    }
}

/// Repository trait for assessment documents and their score sets
#[async_trait::async_trait]
pub trait AssessmentRepository: Send + Sync {
    async fn insert(&self, document: AssessmentDocument) -> Result<DocumentId>;
    async fn get(&self, id: DocumentId) -> Result<Option<AssessmentDocument>>;
    async fn update(&self, document: &AssessmentDocument) -> Result<()>;
    async fn list_by_student(&self, student_id: StudentId) -> Result<Vec<AssessmentDocument>>;
    async fn save_score_set(&self, score_set: ExtractedScoreSet) -> Result<Uuid>;
    async fn get_score_set(&self, document_id: DocumentId) -> Result<Option<ExtractedScoreSet>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(standard: Option<f64>, flag: Option<&str>) -> ScoreRecord {
        ScoreRecord {
            test_name: "WISC-V".to_string(),
            subtest_name: "Similarities".to_string(),
            standard_score: standard,
            scaled_score: None,
            t_score: None,
            percentile_rank: None,
            confidence_interval_low: None,
            confidence_interval_high: None,
            classification: None,
            confidence: 0.9,
            source_text_span: "Similarities 12".to_string(),
            extraction_flag: flag.map(String::from),
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(ProcessingStatus::Pending.can_transition(ProcessingStatus::Extracting));
        assert!(ProcessingStatus::Extracting.can_transition(ProcessingStatus::Extracted));
        assert!(ProcessingStatus::Extracting.can_transition(ProcessingStatus::Failed));
        assert!(ProcessingStatus::Extracted.can_transition(ProcessingStatus::Quantified));
        // No backward or skipping transitions
        assert!(!ProcessingStatus::Extracted.can_transition(ProcessingStatus::Pending));
        assert!(!ProcessingStatus::Pending.can_transition(ProcessingStatus::Extracted));
        assert!(!ProcessingStatus::Failed.can_transition(ProcessingStatus::Extracting));
    }

    #[test]
    fn test_standard_score_bands() {
        assert_eq!(
            ScoreClassification::from_standard_score(65.0),
            ScoreClassification::VeryLow
        );
        assert_eq!(
            ScoreClassification::from_standard_score(70.0),
            ScoreClassification::Low
        );
        assert_eq!(
            ScoreClassification::from_standard_score(85.0),
            ScoreClassification::LowAverage
        );
        assert_eq!(
            ScoreClassification::from_standard_score(100.0),
            ScoreClassification::Average
        );
        assert_eq!(
            ScoreClassification::from_standard_score(115.0),
            ScoreClassification::HighAverage
        );
        assert_eq!(
            ScoreClassification::from_standard_score(125.0),
            ScoreClassification::High
        );
        assert_eq!(
            ScoreClassification::from_standard_score(130.0),
            ScoreClassification::VeryHigh
        );
    }

    #[test]
    fn test_behavioral_bands() {
        assert_eq!(
            BehavioralClassification::from_t_score(55.0),
            BehavioralClassification::Typical
        );
        assert_eq!(
            BehavioralClassification::from_t_score(60.0),
            BehavioralClassification::AtRisk
        );
        assert_eq!(
            BehavioralClassification::from_t_score(70.0),
            BehavioralClassification::ClinicallySignificant
        );
    }

    #[test]
    fn test_missing_score_requires_flag() {
        assert!(record(Some(102.0), None).validate().is_ok());
        assert!(record(None, None).validate().is_err());
        assert!(record(None, Some("illegible cell")).validate().is_ok());
    }

    #[test]
    fn test_percentile_range_enforced() {
        let mut r = record(Some(102.0), None);
        r.percentile_rank = Some(55.0);
        assert!(r.validate().is_ok());
        r.percentile_rank = Some(101.0);
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_display_confidence_remap() {
        assert!((display_confidence(0.0) - 0.76).abs() < 1e-9);
        assert!((display_confidence(1.0) - 0.98).abs() < 1e-9);
        assert!((display_confidence(0.5) - 0.87).abs() < 1e-9);
        // Raw values outside [0, 1] are clamped before remapping
        assert!((display_confidence(1.7) - 0.98).abs() < 1e-9);
    }

    #[test]
    fn test_document_transition_guard() {
        let mut doc = AssessmentDocument::new(
            Uuid::new_v4(),
            "report.pdf".to_string(),
            "file:///tmp/report.pdf".to_string(),
            AssessmentType::WiscV,
            "Dr. Example".to_string(),
            chrono::NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(),
        );
        assert!(doc.transition(ProcessingStatus::Extracting).is_ok());
        assert!(doc.transition(ProcessingStatus::Extracted).is_ok());
        assert!(doc.transition(ProcessingStatus::Extracting).is_err());
        doc.reset();
        assert_eq!(doc.processing_status, ProcessingStatus::Pending);
    }
}
