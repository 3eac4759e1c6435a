//! IEP Templates
//!
//! Templates declare the sections an IEP contains and, per section, the
//! fields the generator must produce. Templates are immutable once
//! published; editing produces a new version and deactivates the old one.

use crate::students::{DisabilityCategory, GradeBand};
use chrono::{DateTime, Utc};
use edplan_types::{EdPlanError, Result, TemplateId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared type of a generated field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    StringList,
    Number,
    Boolean,
    Object,
}

/// One required field in a section's output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Dotted path within the section object, e.g. "goals" or "summary.text"
    pub path: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(path: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            path: path.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(path: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            path: path.into(),
            field_type,
            required: false,
        }
    }
}

/// Specification for one template section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSpec {
    pub section_key: String,
    pub human_title: String,
    pub required_fields: Vec<FieldSpec>,
    /// Prompting guidance shown to the generator and used for retrieval
    pub guidance_text: String,
    pub max_length_chars: Option<usize>,
}

/// An IEP template keyed by disability category and grade band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IepTemplate {
    pub id: TemplateId,
    pub name: String,
    pub disability_category: DisabilityCategory,
    pub grade_band: GradeBand,
    pub version: u32,
    pub active: bool,
    pub sections: Vec<SectionSpec>,
    pub created_at: DateTime<Utc>,
}

impl IepTemplate {
    pub fn new(
        name: String,
        disability_category: DisabilityCategory,
        grade_band: GradeBand,
        sections: Vec<SectionSpec>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            disability_category,
            grade_band,
            version: 1,
            active: true,
            sections,
            created_at: Utc::now(),
        }
    }

    pub fn section_keys(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.section_key.clone()).collect()
    }

    pub fn section(&self, key: &str) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.section_key == key)
    }

    /// Templates never mutate in place: produce the successor version with
    /// replacement sections. The repository deactivates the old version when
    /// the new one is published.
    pub fn new_version(&self, sections: Vec<SectionSpec>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            disability_category: self.disability_category,
            grade_band: self.grade_band,
            version: self.version + 1,
            active: true,
            sections,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sections.is_empty() {
            return Err(EdPlanError::validation(
                "sections",
                "Template must declare at least one section",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for section in &self.sections {
            if section.section_key.is_empty() {
                return Err(EdPlanError::validation(
                    "section_key",
                    "Section key cannot be empty",
                ));
            }
            if !seen.insert(section.section_key.clone()) {
                return Err(EdPlanError::validation(
                    "section_key",
                    format!("Duplicate section key '{}'", section.section_key),
                ));
            }
        }
        Ok(())
    }
}

/// Filter for template listing
#[derive(Debug, Clone, Default)]
pub struct TemplateFilter {
    pub disability_category: Option<DisabilityCategory>,
    pub grade_band: Option<GradeBand>,
    pub active_only: bool,
}

/// Repository trait for templates
#[async_trait::async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn insert(&self, template: IepTemplate) -> Result<TemplateId>;
    async fn get(&self, id: TemplateId) -> Result<Option<IepTemplate>>;
    async fn list(&self, filter: &TemplateFilter) -> Result<Vec<IepTemplate>>;
    /// Publish a successor: inserts the new version and deactivates the old
    async fn publish_new_version(
        &self,
        old_id: TemplateId,
        new_template: IepTemplate,
    ) -> Result<TemplateId>;
}

/// Starter template used in tests and for demo seeding: the standard
/// four-section plan for a specific learning disability.
pub fn starter_template(
    disability_category: DisabilityCategory,
    grade_band: GradeBand,
) -> IepTemplate {
    let sections = vec![
        SectionSpec {
            section_key: "present_levels".to_string(),
            human_title: "Present Levels of Academic Achievement and Functional Performance"
                .to_string(),
            required_fields: vec![
                FieldSpec::required("academic_performance", FieldType::String),
                FieldSpec::required("functional_performance", FieldType::String),
                FieldSpec::required("impact_of_disability", FieldType::String),
                FieldSpec::optional("parent_input", FieldType::String),
            ],
            guidance_text: "Summarize current academic achievement and functional performance \
                            using the quantified assessment data, naming standard scores and \
                            percentiles for each assessed domain."
                .to_string(),
            max_length_chars: Some(4000),
        },
        SectionSpec {
            section_key: "annual_goals".to_string(),
            human_title: "Measurable Annual Goals".to_string(),
            required_fields: vec![
                FieldSpec::required("goals", FieldType::StringList),
                FieldSpec::required("progress_measurement", FieldType::String),
            ],
            guidance_text: "Write measurable annual goals addressing each priority need, with \
                            baseline, target criteria, and measurement method tied to \
                            grade-level academic frameworks."
                .to_string(),
            max_length_chars: Some(3000),
        },
        SectionSpec {
            section_key: "accommodations".to_string(),
            human_title: "Accommodations and Modifications".to_string(),
            required_fields: vec![
                FieldSpec::required("classroom_accommodations", FieldType::StringList),
                FieldSpec::required("testing_accommodations", FieldType::StringList),
            ],
            guidance_text: "List classroom and testing accommodations matched to the student's \
                            documented needs and supported by the assessment findings."
                .to_string(),
            max_length_chars: Some(2000),
        },
        SectionSpec {
            section_key: "services".to_string(),
            human_title: "Special Education and Related Services".to_string(),
            required_fields: vec![
                FieldSpec::required("services", FieldType::StringList),
                FieldSpec::required("service_minutes_per_week", FieldType::Number),
                FieldSpec::required("setting", FieldType::String),
            ],
            guidance_text: "Specify the special education and related services, weekly minutes, \
                            and instructional setting."
                .to_string(),
            max_length_chars: Some(2000),
        },
    ];
    IepTemplate::new(
        format!("{} {} Standard Plan", disability_category.code(), grade_band.label()),
        disability_category,
        grade_band,
        sections,
    )
}
