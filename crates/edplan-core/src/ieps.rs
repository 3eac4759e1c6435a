//! IEP Entity and Versioning Model
//!
//! Every IEP for a student carries a monotonic version; parent_version_id
//! links form a tree rooted at version 1. The "active IEP" is always derived
//! as the latest active version, never stored as a back-pointer.

use crate::templates::IepTemplate;
use chrono::{DateTime, NaiveDate, Utc};
use edplan_types::{EdPlanError, Id, IepId, Result, StudentId, TemplateId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// IEP lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IepStatus {
    Draft,
    Active,
    Archived,
}

impl IepStatus {
    /// draft -> active on approval; active -> archived on supersession.
    /// Nothing transitions back to draft; an administrative action creates a
    /// new version instead.
    pub fn can_transition(&self, to: IepStatus) -> bool {
        matches!(
            (self, to),
            (IepStatus::Draft, IepStatus::Active) | (IepStatus::Active, IepStatus::Archived)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            IepStatus::Draft => "draft",
            IepStatus::Active => "active",
            IepStatus::Archived => "archived",
        }
    }
}

/// A versioned, structured IEP document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iep {
    pub id: IepId,
    pub student_id: StudentId,
    pub template_id: TemplateId,
    pub template_version: u32,
    /// e.g. "2025-2026"
    pub academic_year: String,
    pub status: IepStatus,
    /// Structured JSON keyed by section_key; keys always equal the
    /// template's section keys
    pub content: Map<String, Value>,
    pub meeting_date: NaiveDate,
    pub effective_date: NaiveDate,
    pub review_date: NaiveDate,
    /// Monotonic per student, starting at 1
    pub version: u32,
    pub parent_version_id: Option<IepId>,
    pub created_by: Id,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Id>,
}

impl Iep {
    #[allow(clippy::too_many_arguments)]
    pub fn new_draft(
        student_id: StudentId,
        template: &IepTemplate,
        academic_year: String,
        content: Map<String, Value>,
        meeting_date: NaiveDate,
        effective_date: NaiveDate,
        review_date: NaiveDate,
        version: u32,
        parent_version_id: Option<IepId>,
        created_by: Id,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            template_id: template.id,
            template_version: template.version,
            academic_year,
            status: IepStatus::Draft,
            content,
            meeting_date,
            effective_date,
            review_date,
            version,
            parent_version_id,
            created_by,
            created_at: Utc::now(),
            approved_at: None,
            approved_by: None,
        }
    }

    /// Verify the content keys equal the template's section keys. Rejected
    /// IEPs must never reach the store.
    pub fn validate_against_template(&self, template: &IepTemplate) -> Result<()> {
        let mut content_keys: Vec<&str> = self.content.keys().map(|k| k.as_str()).collect();
        content_keys.sort_unstable();
        let mut template_keys: Vec<String> = template.section_keys();
        template_keys.sort_unstable();
        let template_keys: Vec<&str> = template_keys.iter().map(|k| k.as_str()).collect();

        if content_keys != template_keys {
            return Err(EdPlanError::TemplateMismatch(format!(
                "content keys {:?} do not match template sections {:?}",
                content_keys, template_keys
            )));
        }
        Ok(())
    }

    /// Approve the draft: draft -> active with approval metadata
    pub fn approve(&mut self, approver_id: Id) -> Result<()> {
        if !self.status.can_transition(IepStatus::Active) {
            return Err(EdPlanError::IllegalTransition {
                from: self.status.label().to_string(),
                to: IepStatus::Active.label().to_string(),
            });
        }
        self.status = IepStatus::Active;
        self.approved_at = Some(Utc::now());
        self.approved_by = Some(approver_id);
        Ok(())
    }

    /// Archive an active IEP (supersession or administrative action)
    pub fn archive(&mut self) -> Result<()> {
        if !self.status.can_transition(IepStatus::Archived) {
            return Err(EdPlanError::IllegalTransition {
                from: self.status.label().to_string(),
                to: IepStatus::Archived.label().to_string(),
            });
        }
        self.status = IepStatus::Archived;
        Ok(())
    }
}

/// Repository trait for IEPs.
///
/// `insert` assumes the caller holds the student's version lock; the
/// repository itself only checks the (student_id, version) uniqueness
/// invariant.
#[async_trait::async_trait]
pub trait IepRepository: Send + Sync {
    async fn insert(&self, iep: Iep) -> Result<IepId>;
    async fn get(&self, id: IepId) -> Result<Option<Iep>>;
    async fn update(&self, iep: &Iep) -> Result<()>;
    async fn list_by_student(&self, student_id: StudentId) -> Result<Vec<Iep>>;
    /// Highest version currently stored for the student, if any
    async fn max_version(&self, student_id: StudentId) -> Result<Option<u32>>;
    /// The student's latest IEP by version, regardless of status
    async fn latest(&self, student_id: StudentId) -> Result<Option<Iep>>;
    /// Derived view: the latest IEP with status active for the student
    async fn active_iep(&self, student_id: StudentId) -> Result<Option<Iep>>;
}
