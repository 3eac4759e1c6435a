//! Pipeline Orchestrator
//!
//! Drives the full assessment-to-IEP pipeline: extraction, quantification,
//! per-section generation, flattening, and the versioned write under the
//! per-student lock. Every stage emits a correlation-id-tagged trace record.
//! Extraction and quantification commit before any LLM call; section outputs
//! accumulate in memory and are written once at the end.

use crate::extraction::{DocumentExtractor, ExtractionOutcome};
use crate::generation::{GeneratorSettings, SectionGenerator, SectionOutput};
use crate::prompts::{PlanningContext, PromptBuilder, SectionPrompt};
use edplan_core::{
    chunk_text, AssessmentDocument, AssessmentRepository, AssessmentType, ChatModel,
    ChunkMetadata, DocumentStore, Embedder, Flattener, GenerationTrace, Iep, IepRepository,
    IepTemplate, OcrProvider, PipelineStage, ProcessingStatus, ProfileRepository,
    QuantificationEngine, QuantifiedProfile, ScoreRecord, SourceType, Student, StudentRepository,
    TemplateRepository, TraceOutcome, TraceRepository, VectorChunk, VectorIndex,
};
use edplan_infra::{RetryPolicy, StudentLockRegistry};
use edplan_types::{
    CorrelationId, DocumentId, EdPlanConfig, EdPlanError, IepId, Principal, Result, StudentId,
    TemplateId,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Process-scoped handles for every external collaborator. Constructed once
/// at startup and passed explicitly; there are no module-level instances.
pub struct PipelineContext {
    pub config: EdPlanConfig,
    pub students: Arc<dyn StudentRepository>,
    pub assessments: Arc<dyn AssessmentRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub ieps: Arc<dyn IepRepository>,
    pub traces: Arc<dyn TraceRepository>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub document_store: Arc<dyn DocumentStore>,
    pub ocr: Arc<dyn OcrProvider>,
    pub chat_model: Arc<dyn ChatModel>,
    pub locks: Arc<StudentLockRegistry>,
}

/// Ingress request for uploading an assessment document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAssessmentRequest {
    pub student_id: StudentId,
    pub file_name: String,
    pub storage_uri: String,
    pub assessment_type: String,
    pub assessor_name: String,
    pub assessment_date: chrono::NaiveDate,
}

/// Ingress request for generating an IEP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateIepRequest {
    pub student_id: StudentId,
    pub template_id: TemplateId,
    pub academic_year: String,
    #[serde(default)]
    pub assessment_document_ids: Vec<DocumentId>,
    pub meeting_date: chrono::NaiveDate,
    pub effective_date: chrono::NaiveDate,
    pub review_date: chrono::NaiveDate,
}

/// Result of extract_and_quantify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub profile_id: Uuid,
    /// Confidence remapped to the 0.76-0.98 display range
    pub confidence: f64,
    pub manual_review_required: bool,
}

/// Result of generate_iep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedIep {
    pub iep_id: IepId,
    pub version: u32,
    pub status: String,
}

/// The pipeline orchestrator
pub struct PipelineOrchestrator {
    ctx: Arc<PipelineContext>,
    extractor: DocumentExtractor,
    engine: QuantificationEngine,
    prompt_builder: PromptBuilder,
    generator: SectionGenerator,
    flattener: Flattener,
}

impl PipelineOrchestrator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let retry = RetryPolicy::new(
            ctx.config.extraction.retry_max_attempts,
            ctx.config.extraction.retry_backoff_base_seconds,
        );
        let extractor = DocumentExtractor::new(
            ctx.document_store.clone(),
            ctx.ocr.clone(),
            retry,
            ctx.config.quantification.confidence_floor_for_draft_only,
        );
        let engine = QuantificationEngine::new(
            ctx.config.quantification.confidence_floor_for_draft_only,
        );
        let prompt_builder = PromptBuilder::new(
            ctx.embedder.clone(),
            ctx.vector_index.clone(),
            ctx.config.vector.top_k,
        );
        let generator = SectionGenerator::new(
            ctx.chat_model.clone(),
            GeneratorSettings {
                model_id: ctx.config.llm.model_id.clone(),
                temperature: ctx.config.llm.temperature,
                max_output_tokens: ctx.config.llm.max_output_tokens,
            },
        );
        let flattener = Flattener::new(ctx.config.flattener.max_depth);
        Self {
            ctx,
            extractor,
            engine,
            prompt_builder,
            generator,
            flattener,
        }
    }

    async fn record(&self, trace: GenerationTrace) {
        if let Err(e) = self.ctx.traces.append(trace).await {
            error!(error = %e, "failed to append generation trace");
        }
    }

    /// Register an uploaded assessment document, status pending
    pub async fn upload_assessment(
        &self,
        request: UploadAssessmentRequest,
    ) -> Result<AssessmentDocument> {
        let assessment_type = AssessmentType::parse(&request.assessment_type)?;
        self.ctx
            .students
            .get(request.student_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("Student {}", request.student_id)))?;
        if request.storage_uri.trim().is_empty() {
            return Err(EdPlanError::validation(
                "storage_uri",
                "storage_uri cannot be empty",
            ));
        }

        let document = AssessmentDocument::new(
            request.student_id,
            request.file_name,
            request.storage_uri,
            assessment_type,
            request.assessor_name,
            request.assessment_date,
        );
        self.ctx.assessments.insert(document.clone()).await?;
        info!(document_id = %document.id, "assessment document registered");
        Ok(document)
    }

    /// Run extraction for one document: status transitions, score-set
    /// persistence, and the extraction trace.
    async fn extract_document(
        &self,
        mut document: AssessmentDocument,
        correlation: &CorrelationId,
    ) -> Result<(AssessmentDocument, ExtractionOutcome)> {
        document.transition(ProcessingStatus::Extracting)?;
        self.ctx.assessments.update(&document).await?;

        let started = Instant::now();
        match self.extractor.extract(&document).await {
            Ok(outcome) => {
                document.transition(ProcessingStatus::Extracted)?;
                document.overall_confidence = Some(outcome.overall_confidence);
                document.manual_review_required = outcome.manual_review_required;
                self.ctx.assessments.update(&document).await?;
                self.ctx
                    .assessments
                    .save_score_set(outcome.score_set.clone())
                    .await?;

                let output_bytes = serde_json::to_vec(&outcome.score_set)?.len();
                self.record(
                    GenerationTrace::new(
                        correlation.clone(),
                        PipelineStage::Extraction,
                        if outcome.retried {
                            TraceOutcome::Retried
                        } else {
                            TraceOutcome::Ok
                        },
                        started.elapsed().as_millis().max(1) as u64,
                    )
                    .with_sizes(outcome.document_bytes, output_bytes),
                )
                .await;
                Ok((document, outcome))
            }
            Err(e) => {
                // Permanent extraction failure is terminal for the document
                if document
                    .processing_status
                    .can_transition(ProcessingStatus::Failed)
                {
                    document.transition(ProcessingStatus::Failed)?;
                    document.extraction_notes = Some(e.to_string());
                    self.ctx.assessments.update(&document).await?;
                }
                self.record(
                    GenerationTrace::new(
                        correlation.clone(),
                        PipelineStage::Extraction,
                        TraceOutcome::Failed,
                        started.elapsed().as_millis().max(1) as u64,
                    )
                    .with_error_kind(e.code()),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Extract one document and derive its quantified profile
    pub async fn extract_and_quantify(
        &self,
        document_id: DocumentId,
        correlation: &CorrelationId,
    ) -> Result<ProfileSummary> {
        let document = self
            .ctx
            .assessments
            .get(document_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("Assessment document {}", document_id)))?;
        let student = self
            .ctx
            .students
            .get(document.student_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("Student {}", document.student_id)))?;

        let (mut document, outcome) = self.extract_document(document, correlation).await?;

        let started = Instant::now();
        let profile = self.quantify_records(
            &student,
            vec![document_id],
            &outcome.score_set.records,
            correlation,
            started,
        )
        .await?;

        document.transition(ProcessingStatus::Quantified)?;
        self.ctx.assessments.update(&document).await?;

        // Assessment excerpts become searchable eventually; IEP creation and
        // extraction never wait on the index.
        self.spawn_excerpt_indexing(&document, &outcome.report_text, correlation);

        Ok(ProfileSummary {
            profile_id: profile.id,
            confidence: edplan_core::display_confidence(outcome.overall_confidence),
            manual_review_required: outcome.manual_review_required,
        })
    }

    async fn quantify_records(
        &self,
        student: &Student,
        document_ids: Vec<DocumentId>,
        records: &[ScoreRecord],
        correlation: &CorrelationId,
        started: Instant,
    ) -> Result<QuantifiedProfile> {
        let profile =
            self.engine
                .quantify(student.id, document_ids, records, student.grade)?;
        self.ctx.profiles.insert(profile.clone()).await?;

        let mut trace = GenerationTrace::new(
            correlation.clone(),
            PipelineStage::Quantification,
            TraceOutcome::Ok,
            started.elapsed().as_millis().max(1) as u64,
        )
        .with_sizes(
            serde_json::to_vec(records)?.len(),
            serde_json::to_vec(&profile)?.len(),
        );
        if profile.requires_manual_review {
            trace = trace.with_note("requires_manual_review");
        }
        self.record(trace).await;
        Ok(profile)
    }

    /// Generate a complete IEP draft for a student
    pub async fn generate_iep(
        &self,
        request: GenerateIepRequest,
        principal: &Principal,
        correlation: &CorrelationId,
    ) -> Result<GeneratedIep> {
        if !principal.role.can_create_draft() {
            return Err(EdPlanError::Forbidden(
                "role may not create IEP drafts".to_string(),
            ));
        }

        let deadline = Duration::from_secs(self.ctx.config.pipeline.deadline_seconds);
        let started = Instant::now();
        match tokio::time::timeout(
            deadline,
            self.generate_iep_inner(&request, principal, correlation),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                // Partial sections are discarded; extraction results committed
                // earlier in the run remain valid for reuse.
                self.record(
                    GenerationTrace::new(
                        correlation.clone(),
                        PipelineStage::Generation,
                        TraceOutcome::Failed,
                        started.elapsed().as_millis().max(1) as u64,
                    )
                    .with_error_kind("deadline_exceeded"),
                )
                .await;
                Err(EdPlanError::DeadlineExceeded {
                    stage: "generation".to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    async fn generate_iep_inner(
        &self,
        request: &GenerateIepRequest,
        principal: &Principal,
        correlation: &CorrelationId,
    ) -> Result<GeneratedIep> {
        let student = self
            .ctx
            .students
            .get(request.student_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("Student {}", request.student_id)))?;
        let template = self
            .ctx
            .templates
            .get(request.template_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("Template {}", request.template_id)))?;

        // Phase 1: extraction + quantification, committed before any LLM call
        let mut combined_records = Vec::new();
        for document_id in &request.assessment_document_ids {
            let document = self.ctx.assessments.get(*document_id).await?.ok_or_else(|| {
                EdPlanError::NotFound(format!("Assessment document {}", document_id))
            })?;
            if document.student_id != request.student_id {
                return Err(EdPlanError::validation(
                    "assessment_document_ids",
                    format!("document {} belongs to a different student", document_id),
                ));
            }
            match self.ctx.assessments.get_score_set(*document_id).await? {
                Some(score_set) => combined_records.extend(score_set.records),
                None => {
                    if document.processing_status == ProcessingStatus::Failed {
                        return Err(EdPlanError::validation(
                            "assessment_document_ids",
                            format!(
                                "document {} failed extraction; administrative reset required",
                                document_id
                            ),
                        ));
                    }
                    let (_, outcome) = self.extract_document(document, correlation).await?;
                    combined_records.extend(outcome.score_set.records);
                }
            }
        }

        let profile = self
            .quantify_records(
                &student,
                request.assessment_document_ids.clone(),
                &combined_records,
                correlation,
                Instant::now(),
            )
            .await?;

        // Phase 2: per-section generation, accumulated in memory.
        // The previous head is captured here: two concurrent runs for the
        // same student both link their parent to the same head, which the
        // audit trail makes discoverable.
        let prior = self.ctx.ieps.latest(request.student_id).await?;
        let parent_version_id = prior.as_ref().map(|iep| iep.id);
        let context = PlanningContext {
            academic_year: request.academic_year.clone(),
            meeting_date: request.meeting_date,
            effective_date: request.effective_date,
            review_date: request.review_date,
            prior_iep_summary: prior.as_ref().map(summarize_prior_iep),
        };

        let parallelism = self.ctx.config.llm.max_section_parallelism.clamp(1, 4);
        let mut section_futures: Vec<
            std::pin::Pin<Box<dyn std::future::Future<Output = Result<SectionOutput>> + Send + '_>>,
        > = Vec::with_capacity(template.sections.len());
        for section in template.sections.iter() {
            let student = &student;
            let template = &template;
            let profile = &profile;
            let context = &context;
            section_futures.push(Box::pin(async move {
                self.run_section(section, template, student, profile, context, correlation)
                    .await
            }));
        }
        let outputs: Vec<SectionOutput> = stream::iter(section_futures)
            .buffered(parallelism)
            .try_collect()
            .await?;

        // Section ordering in the final content follows the template even
        // when generation fans out.
        let mut content = Map::new();
        for output in outputs {
            content.insert(output.section_key.clone(), output.content);
        }

        // Phase 3: flatten
        let flatten_started = Instant::now();
        let (content, stats) = self.flattener.flatten_iep(&content, &template);
        self.record(
            GenerationTrace::new(
                correlation.clone(),
                PipelineStage::Flattening,
                TraceOutcome::Ok,
                flatten_started.elapsed().as_millis().max(1) as u64,
            )
            .with_sizes(stats.input_bytes, stats.output_bytes)
            .with_note(format!(
                "fields_flattened={} duplicates_removed={} max_depth_seen={}",
                stats.fields_flattened, stats.duplicate_keys_removed, stats.max_depth_seen
            )),
        )
        .await;

        // Phase 4: versioned write under the per-student lock
        let persist_started = Instant::now();
        let iep = self
            .persist_draft(
                request,
                principal,
                &template,
                content,
                parent_version_id,
                correlation,
            )
            .await?;
        let mut persist_trace = GenerationTrace::new(
            correlation.clone(),
            PipelineStage::Persistence,
            TraceOutcome::Ok,
            persist_started.elapsed().as_millis().max(1) as u64,
        )
        .with_sizes(0, serde_json::to_vec(&iep.content)?.len());
        if profile.requires_manual_review {
            // Low-confidence profiles still generate, but the draft is
            // annotated so approval workflows can route it for review.
            persist_trace = persist_trace.with_note("requires_manual_review");
        }
        self.record(persist_trace).await;

        // Phase 5: post-commit indexing, fire and forget
        self.spawn_iep_indexing(&iep, &template, correlation);

        info!(
            iep_id = %iep.id,
            version = iep.version,
            correlation_id = %correlation,
            "IEP draft generated"
        );
        Ok(GeneratedIep {
            iep_id: iep.id,
            version: iep.version,
            status: iep.status.label().to_string(),
        })
    }

    async fn run_section(
        &self,
        section: &edplan_core::SectionSpec,
        template: &IepTemplate,
        student: &Student,
        profile: &QuantifiedProfile,
        context: &PlanningContext,
        correlation: &CorrelationId,
    ) -> Result<SectionOutput> {
        let assembly_started = Instant::now();
        let prompt: SectionPrompt = self
            .prompt_builder
            .build(section, template, student, profile, context)
            .await?;
        self.record(
            GenerationTrace::new(
                correlation.clone(),
                PipelineStage::PromptAssembly,
                TraceOutcome::Ok,
                assembly_started.elapsed().as_millis().max(1) as u64,
            )
            .with_section(&section.section_key)
            .with_sizes(0, prompt.text.len())
            .with_hashes(Some(prompt.prompt_hash.clone()), None)
            .with_note(format!("exemplars={}", prompt.exemplar_chunk_ids.len())),
        )
        .await;

        let generation_started = Instant::now();
        match self.generator.generate_section(&prompt, section).await {
            Ok(output) => {
                let mut trace = GenerationTrace::new(
                    correlation.clone(),
                    PipelineStage::Generation,
                    if output.retried {
                        TraceOutcome::Retried
                    } else {
                        TraceOutcome::Ok
                    },
                    generation_started.elapsed().as_millis().max(1) as u64,
                )
                .with_section(&section.section_key)
                .with_sizes(prompt.text.len(), output.content.to_string().len())
                .with_model(&output.model_id)
                .with_hashes(
                    Some(prompt.prompt_hash.clone()),
                    Some(output.response_hash.clone()),
                );
                if !output.warnings.is_empty() {
                    trace = trace.with_note(output.warnings.join("; "));
                }
                self.record(trace).await;
                Ok(output)
            }
            Err(e) => {
                self.record(
                    GenerationTrace::new(
                        correlation.clone(),
                        PipelineStage::Generation,
                        TraceOutcome::Failed,
                        generation_started.elapsed().as_millis().max(1) as u64,
                    )
                    .with_section(&section.section_key)
                    .with_model(&self.ctx.config.llm.model_id)
                    .with_hashes(Some(prompt.prompt_hash.clone()), None)
                    .with_error_kind(e.code()),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Acquire the student's version lock, assign the next version, validate
    /// content keys, and insert the draft row.
    async fn persist_draft(
        &self,
        request: &GenerateIepRequest,
        principal: &Principal,
        template: &IepTemplate,
        content: Map<String, Value>,
        parent_version_id: Option<IepId>,
        correlation: &CorrelationId,
    ) -> Result<Iep> {
        let lock_timeout =
            Duration::from_secs(self.ctx.config.versioning.lock_timeout_seconds);
        let _guard = self
            .ctx
            .locks
            .acquire(request.student_id, lock_timeout)
            .await?;

        let max_version = self.ctx.ieps.max_version(request.student_id).await?;
        let version = max_version.map_or(1, |v| v + 1);

        let iep = Iep::new_draft(
            request.student_id,
            template,
            request.academic_year.clone(),
            content,
            request.meeting_date,
            request.effective_date,
            request.review_date,
            version,
            parent_version_id,
            principal.user_id,
        );
        if let Err(e) = iep.validate_against_template(template) {
            self.record(
                GenerationTrace::new(
                    correlation.clone(),
                    PipelineStage::Persistence,
                    TraceOutcome::Failed,
                    1,
                )
                .with_error_kind(e.code()),
            )
            .await;
            return Err(e);
        }
        self.ctx.ieps.insert(iep.clone()).await?;
        Ok(iep)
    }

    fn spawn_iep_indexing(
        &self,
        iep: &Iep,
        template: &IepTemplate,
        correlation: &CorrelationId,
    ) {
        let ctx = self.ctx.clone();
        let iep = iep.clone();
        let template = template.clone();
        let correlation = correlation.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = index_iep_sections(&ctx, &iep, &template).await;
            let trace = match outcome {
                Ok(count) => GenerationTrace::new(
                    correlation.clone(),
                    PipelineStage::Indexing,
                    TraceOutcome::Ok,
                    started.elapsed().as_millis().max(1) as u64,
                )
                .with_note(format!("chunks={}", count)),
                Err(e) => {
                    // Index failures never roll back the IEP
                    warn!(error = %e, iep_id = %iep.id, "post-commit indexing failed");
                    GenerationTrace::new(
                        correlation.clone(),
                        PipelineStage::Indexing,
                        TraceOutcome::Failed,
                        started.elapsed().as_millis().max(1) as u64,
                    )
                    .with_error_kind(e.code())
                }
            };
            if let Err(e) = ctx.traces.append(trace).await {
                error!(error = %e, "failed to append indexing trace");
            }
        });
    }

    fn spawn_excerpt_indexing(
        &self,
        document: &AssessmentDocument,
        report_text: &str,
        correlation: &CorrelationId,
    ) {
        if report_text.trim().is_empty() {
            return;
        }
        let ctx = self.ctx.clone();
        let document_id = document.id;
        let report_text = report_text.to_string();
        let correlation = correlation.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = index_assessment_excerpts(&ctx, document_id, &report_text).await;
            let trace = match result {
                Ok(count) => GenerationTrace::new(
                    correlation,
                    PipelineStage::Indexing,
                    TraceOutcome::Ok,
                    started.elapsed().as_millis().max(1) as u64,
                )
                .with_note(format!("chunks={}", count)),
                Err(e) => {
                    warn!(error = %e, document_id = %document_id, "excerpt indexing failed");
                    GenerationTrace::new(
                        correlation,
                        PipelineStage::Indexing,
                        TraceOutcome::Failed,
                        started.elapsed().as_millis().max(1) as u64,
                    )
                    .with_error_kind(e.code())
                }
            };
            if let Err(e) = ctx.traces.append(trace).await {
                error!(error = %e, "failed to append indexing trace");
            }
        });
    }

    /// Approve a draft: draft -> active, superseding any prior active IEP
    pub async fn approve_iep(&self, iep_id: IepId, principal: &Principal) -> Result<Iep> {
        if !principal.role.can_approve() {
            return Err(EdPlanError::Forbidden(
                "role may not approve IEPs".to_string(),
            ));
        }
        let mut iep = self
            .ctx
            .ieps
            .get(iep_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("IEP {}", iep_id)))?;
        let prior_active = self.ctx.ieps.active_iep(iep.student_id).await?;

        iep.approve(principal.user_id)?;
        self.ctx.ieps.update(&iep).await?;

        if let Some(mut prior) = prior_active {
            if prior.id != iep.id {
                prior.archive()?;
                self.ctx.ieps.update(&prior).await?;
            }
        }
        Ok(iep)
    }

    /// Administrative archive of an active IEP
    pub async fn archive_iep(&self, iep_id: IepId, principal: &Principal) -> Result<Iep> {
        if !principal.role.can_administer() {
            return Err(EdPlanError::Forbidden(
                "role may not archive IEPs".to_string(),
            ));
        }
        let mut iep = self
            .ctx
            .ieps
            .get(iep_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("IEP {}", iep_id)))?;
        iep.archive()?;
        self.ctx.ieps.update(&iep).await?;
        Ok(iep)
    }

    /// Administrative reset of an assessment document back to pending
    pub async fn reset_assessment(
        &self,
        document_id: DocumentId,
        principal: &Principal,
    ) -> Result<AssessmentDocument> {
        if !principal.role.can_administer() {
            return Err(EdPlanError::Forbidden(
                "role may not reset assessments".to_string(),
            ));
        }
        let mut document = self
            .ctx
            .assessments
            .get(document_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("Assessment document {}", document_id)))?;
        document.reset();
        self.ctx.assessments.update(&document).await?;
        Ok(document)
    }

    pub async fn get_iep(&self, iep_id: IepId) -> Result<Iep> {
        self.ctx
            .ieps
            .get(iep_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("IEP {}", iep_id)))
    }

    pub async fn list_ieps(&self, student_id: StudentId) -> Result<Vec<Iep>> {
        self.ctx
            .students
            .get(student_id)
            .await?
            .ok_or_else(|| EdPlanError::NotFound(format!("Student {}", student_id)))?;
        self.ctx.ieps.list_by_student(student_id).await
    }

    pub async fn traces_for(&self, correlation: &CorrelationId) -> Result<Vec<GenerationTrace>> {
        self.ctx.traces.list_by_correlation(correlation).await
    }
}

fn summarize_prior_iep(iep: &Iep) -> String {
    format!(
        "Previous IEP: version {} for academic year {}, status {}, sections: {}.",
        iep.version,
        iep.academic_year,
        iep.status.label(),
        iep.content.keys().cloned().collect::<Vec<_>>().join(", ")
    )
}

/// Collect the human-readable strings in a section's content
fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if !s.trim().is_empty() {
                out.push(s.clone());
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, out)),
        Value::Object(object) => object.values().for_each(|item| collect_text(item, out)),
        _ => {}
    }
}

async fn index_iep_sections(
    ctx: &Arc<PipelineContext>,
    iep: &Iep,
    template: &IepTemplate,
) -> Result<usize> {
    let mut count = 0;
    for (section_key, value) in &iep.content {
        let mut texts = Vec::new();
        collect_text(value, &mut texts);
        let section_text = texts.join("\n");
        if section_text.trim().is_empty() {
            continue;
        }
        let chunks = chunk_text(
            &section_text,
            ctx.config.vector.chunk_size_chars,
            ctx.config.vector.chunk_overlap_chars,
        );
        for (i, chunk) in chunks.into_iter().enumerate() {
            let embedding = ctx.embedder.embed(&chunk).await?;
            ctx.vector_index
                .upsert(VectorChunk {
                    chunk_id: format!("iep:{}:{}:{}", iep.id, section_key, i),
                    text: chunk,
                    embedding,
                    metadata: ChunkMetadata {
                        source_type: SourceType::IepSection,
                        disability_category: Some(template.disability_category),
                        grade_band: Some(template.grade_band),
                        section_key: Some(section_key.clone()),
                        source_id: iep.id.to_string(),
                    },
                })
                .await?;
            count += 1;
        }
    }
    Ok(count)
}

async fn index_assessment_excerpts(
    ctx: &Arc<PipelineContext>,
    document_id: DocumentId,
    report_text: &str,
) -> Result<usize> {
    let chunks = chunk_text(
        report_text,
        ctx.config.vector.chunk_size_chars,
        ctx.config.vector.chunk_overlap_chars,
    );
    let mut count = 0;
    for (i, chunk) in chunks.into_iter().enumerate() {
        let embedding = ctx.embedder.embed(&chunk).await?;
        ctx.vector_index
            .upsert(VectorChunk {
                chunk_id: format!("assessment:{}:{}", document_id, i),
                text: chunk,
                embedding,
                metadata: ChunkMetadata {
                    source_type: SourceType::AssessmentExcerpt,
                    disability_category: None,
                    grade_band: None,
                    section_key: None,
                    source_id: document_id.to_string(),
                },
            })
            .await?;
        count += 1;
    }
    Ok(count)
}
