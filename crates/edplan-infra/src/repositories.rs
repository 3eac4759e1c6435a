//! In-Memory Repository Implementations
//!
//! Concrete implementations of the core repository traits using in-memory
//! storage, plus the per-student advisory lock registry that serializes
//! version assignment.

use edplan_core::*;
use edplan_types::{CorrelationId, DocumentId, EdPlanError, IepId, Result, StudentId, TemplateId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// In-memory implementation of StudentRepository
pub struct InMemoryStudentRepository {
    students: Arc<RwLock<HashMap<StudentId, Student>>>,
}

impl InMemoryStudentRepository {
    pub fn new() -> Self {
        Self {
            students: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStudentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StudentRepository for InMemoryStudentRepository {
    async fn insert(&self, student: Student) -> Result<StudentId> {
        let id = student.id;
        let mut students = self
            .students
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        students.insert(id, student);
        Ok(id)
    }

    async fn get(&self, id: StudentId) -> Result<Option<Student>> {
        let students = self
            .students
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(students.get(&id).cloned())
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Student>> {
        let students = self
            .students
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(students
            .values()
            .find(|s| s.external_id == external_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Student>> {
        let students = self
            .students
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        let mut result: Vec<Student> = students.values().cloned().collect();
        result.sort_by(|a, b| a.last_name.cmp(&b.last_name));
        Ok(result)
    }
}

/// In-memory implementation of AssessmentRepository
pub struct InMemoryAssessmentRepository {
    documents: Arc<RwLock<HashMap<DocumentId, AssessmentDocument>>>,
    score_sets: Arc<RwLock<HashMap<DocumentId, ExtractedScoreSet>>>,
}

impl InMemoryAssessmentRepository {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            score_sets: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryAssessmentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AssessmentRepository for InMemoryAssessmentRepository {
    async fn insert(&self, document: AssessmentDocument) -> Result<DocumentId> {
        let id = document.id;
        let mut documents = self
            .documents
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        documents.insert(id, document);
        Ok(id)
    }

    async fn get(&self, id: DocumentId) -> Result<Option<AssessmentDocument>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(documents.get(&id).cloned())
    }

    async fn update(&self, document: &AssessmentDocument) -> Result<()> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        if !documents.contains_key(&document.id) {
            return Err(EdPlanError::NotFound(format!(
                "Assessment document {}",
                document.id
            )));
        }
        documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn list_by_student(&self, student_id: StudentId) -> Result<Vec<AssessmentDocument>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        let mut result: Vec<AssessmentDocument> = documents
            .values()
            .filter(|d| d.student_id == student_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn save_score_set(&self, score_set: ExtractedScoreSet) -> Result<Uuid> {
        score_set.validate()?;
        let id = score_set.id;
        let mut score_sets = self
            .score_sets
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        score_sets.insert(score_set.document_id, score_set);
        Ok(id)
    }

    async fn get_score_set(&self, document_id: DocumentId) -> Result<Option<ExtractedScoreSet>> {
        let score_sets = self
            .score_sets
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(score_sets.get(&document_id).cloned())
    }
}

/// In-memory implementation of TemplateRepository
pub struct InMemoryTemplateRepository {
    templates: Arc<RwLock<HashMap<TemplateId, IepTemplate>>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self {
            templates: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn insert(&self, template: IepTemplate) -> Result<TemplateId> {
        template.validate()?;
        let id = template.id;
        let mut templates = self
            .templates
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        templates.insert(id, template);
        Ok(id)
    }

    async fn get(&self, id: TemplateId) -> Result<Option<IepTemplate>> {
        let templates = self
            .templates
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(templates.get(&id).cloned())
    }

    async fn list(&self, filter: &TemplateFilter) -> Result<Vec<IepTemplate>> {
        let templates = self
            .templates
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        let mut result: Vec<IepTemplate> = templates
            .values()
            .filter(|t| {
                filter
                    .disability_category
                    .map_or(true, |c| t.disability_category == c)
                    && filter.grade_band.map_or(true, |b| t.grade_band == b)
                    && (!filter.active_only || t.active)
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name).then(b.version.cmp(&a.version)));
        Ok(result)
    }

    async fn publish_new_version(
        &self,
        old_id: TemplateId,
        new_template: IepTemplate,
    ) -> Result<TemplateId> {
        new_template.validate()?;
        let new_id = new_template.id;
        let mut templates = self
            .templates
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        let old = templates
            .get_mut(&old_id)
            .ok_or_else(|| EdPlanError::NotFound(format!("Template {}", old_id)))?;
        old.active = false;
        templates.insert(new_id, new_template);
        Ok(new_id)
    }
}

/// In-memory implementation of IepRepository. Enforces the
/// (student_id, version) uniqueness invariant; version assignment itself is
/// serialized by the caller through the lock registry.
pub struct InMemoryIepRepository {
    ieps: Arc<RwLock<HashMap<IepId, Iep>>>,
}

impl InMemoryIepRepository {
    pub fn new() -> Self {
        Self {
            ieps: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryIepRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IepRepository for InMemoryIepRepository {
    async fn insert(&self, iep: Iep) -> Result<IepId> {
        let id = iep.id;
        let mut ieps = self
            .ieps
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        let collision = ieps
            .values()
            .any(|existing| existing.student_id == iep.student_id && existing.version == iep.version);
        if collision {
            return Err(EdPlanError::Conflict(format!(
                "IEP version {} already exists for student {}",
                iep.version, iep.student_id
            )));
        }
        ieps.insert(id, iep);
        Ok(id)
    }

    async fn get(&self, id: IepId) -> Result<Option<Iep>> {
        let ieps = self
            .ieps
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(ieps.get(&id).cloned())
    }

    async fn update(&self, iep: &Iep) -> Result<()> {
        let mut ieps = self
            .ieps
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        if !ieps.contains_key(&iep.id) {
            return Err(EdPlanError::NotFound(format!("IEP {}", iep.id)));
        }
        ieps.insert(iep.id, iep.clone());
        Ok(())
    }

    async fn list_by_student(&self, student_id: StudentId) -> Result<Vec<Iep>> {
        let ieps = self
            .ieps
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        let mut result: Vec<Iep> = ieps
            .values()
            .filter(|i| i.student_id == student_id)
            .cloned()
            .collect();
        result.sort_by_key(|i| i.version);
        Ok(result)
    }

    async fn max_version(&self, student_id: StudentId) -> Result<Option<u32>> {
        let ieps = self
            .ieps
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(ieps
            .values()
            .filter(|i| i.student_id == student_id)
            .map(|i| i.version)
            .max())
    }

    async fn latest(&self, student_id: StudentId) -> Result<Option<Iep>> {
        let ieps = self
            .ieps
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(ieps
            .values()
            .filter(|i| i.student_id == student_id)
            .max_by_key(|i| i.version)
            .cloned())
    }

    async fn active_iep(&self, student_id: StudentId) -> Result<Option<Iep>> {
        let ieps = self
            .ieps
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(ieps
            .values()
            .filter(|i| i.student_id == student_id && i.status == IepStatus::Active)
            .max_by_key(|i| i.version)
            .cloned())
    }
}

/// In-memory implementation of ProfileRepository
pub struct InMemoryProfileRepository {
    profiles: Arc<RwLock<HashMap<Uuid, QuantifiedProfile>>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self {
            profiles: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryProfileRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn insert(&self, profile: QuantifiedProfile) -> Result<Uuid> {
        let id = profile.id;
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        profiles.insert(id, profile);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<QuantifiedProfile>> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(profiles.get(&id).cloned())
    }

    async fn find_by_document(&self, document_id: DocumentId) -> Result<Option<QuantifiedProfile>> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(profiles
            .values()
            .filter(|p| p.document_ids.contains(&document_id))
            .max_by_key(|p| p.created_at)
            .cloned())
    }
}

/// In-memory append-only trace repository
pub struct InMemoryTraceRepository {
    traces: Arc<RwLock<Vec<GenerationTrace>>>,
}

impl InMemoryTraceRepository {
    pub fn new() -> Self {
        Self {
            traces: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryTraceRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TraceRepository for InMemoryTraceRepository {
    async fn append(&self, trace: GenerationTrace) -> Result<()> {
        let mut traces = self
            .traces
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        traces.push(trace);
        Ok(())
    }

    async fn list_by_correlation(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Vec<GenerationTrace>> {
        let traces = self
            .traces
            .read()
            .map_err(|_| EdPlanError::LockError("Failed to acquire read lock".to_string()))?;
        Ok(traces
            .iter()
            .filter(|t| &t.correlation_id == correlation_id)
            .cloned()
            .collect())
    }
}

/// Per-student advisory locks serializing IEP version assignment.
///
/// Locks are created on first use and held as owned guards across the
/// read-max-version / insert window. Acquisition times out with a Conflict
/// so a stuck writer cannot wedge every subsequent request for the student.
pub struct StudentLockRegistry {
    locks: Arc<RwLock<HashMap<StudentId, Arc<Mutex<()>>>>>,
}

impl StudentLockRegistry {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn lock_for(&self, student_id: StudentId) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .write()
            .map_err(|_| EdPlanError::LockError("Failed to acquire write lock".to_string()))?;
        Ok(locks
            .entry(student_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Acquire the student's version lock, failing with Conflict after the
    /// configured timeout.
    pub async fn acquire(
        &self,
        student_id: StudentId,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>> {
        let lock = self.lock_for(student_id)?;
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                EdPlanError::Conflict(format!(
                    "Timed out acquiring version lock for student {}",
                    student_id
                ))
            })
    }
}

impl Default for StudentLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
