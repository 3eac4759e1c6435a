//! End-to-end pipeline tests with scripted providers: the OCR parser, the
//! chat model, and object storage are all substituted so every scenario is
//! deterministic.

use chrono::NaiveDate;
use edplan_core::{
    starter_template, AssessmentRepository, ChatModel, ChatRequest, ChatResponse,
    DisabilityCategory, DocumentStore, Embedder, Grade, GradeBand, IepRepository, IepStatus,
    OcrDocument, OcrEntity, OcrHints, OcrProvider, OcrTextBlock, PipelineStage, ProcessingStatus,
    ProfileRepository, Student, StudentRepository, TemplateRepository, TraceOutcome, VectorIndex,
};
use edplan_infra::{
    HashEmbedder, InMemoryAssessmentRepository, InMemoryIepRepository, InMemoryProfileRepository,
    InMemoryStudentRepository, InMemoryTemplateRepository, InMemoryTraceRepository,
    InMemoryVectorIndex, StudentLockRegistry,
};
use edplan_pipeline::{
    GenerateIepRequest, GeneratedIep, PipelineContext, PipelineOrchestrator,
    UploadAssessmentRequest,
};
use edplan_types::{
    CorrelationId, EdPlanConfig, EdPlanError, Principal, Result, Role, StudentId, TemplateId,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct StaticStore;

#[async_trait::async_trait]
impl DocumentStore for StaticStore {
    async fn fetch(&self, _uri: &str) -> Result<Vec<u8>> {
        Ok(b"%PDF-1.7 scripted assessment".to_vec())
    }
}

struct StaticOcr {
    document: OcrDocument,
}

#[async_trait::async_trait]
impl OcrProvider for StaticOcr {
    async fn parse(&self, _bytes: &[u8], _hints: &OcrHints) -> Result<OcrDocument> {
        Ok(self.document.clone())
    }
}

/// How the scripted chat model behaves
enum ChatBehavior {
    /// Valid JSON for whichever section the prompt asks for
    SectionAware,
    /// First call returns fenced JSON with trailing prose, then SectionAware
    FencedOnce,
    /// Always returns an empty object
    AlwaysEmptyObject,
    /// Sleeps before answering, to drive the pipeline past its deadline
    Sleepy(Duration),
}

struct ScriptedChat {
    behavior: ChatBehavior,
    calls: AtomicU32,
}

impl ScriptedChat {
    fn new(behavior: ChatBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
        })
    }
}

fn section_response(prompt: &str) -> String {
    if prompt.contains("(present_levels)") {
        r#"{"academic_performance": "Word reading at standard score 74, 4th percentile.",
            "functional_performance": "Attends and participates with support.",
            "impact_of_disability": "Reading difficulty limits access to grade-level text."}"#
            .to_string()
    } else if prompt.contains("(annual_goals)") {
        r#"{"goals": ["Improve decoding accuracy from 70% to 90% by annual review."],
            "progress_measurement": "Curriculum-based measurement probes, biweekly."}"#
            .to_string()
    } else if prompt.contains("(accommodations)") {
        r#"{"classroom_accommodations": ["Preferential seating", "Chunked assignments"],
            "testing_accommodations": ["Extended time (1.5x)"]}"#
            .to_string()
    } else if prompt.contains("(services)") {
        r#"{"services": ["Specialized reading instruction"],
            "service_minutes_per_week": 150,
            "setting": "Resource room"}"#
            .to_string()
    } else {
        "{}".to_string()
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        // Yield so concurrent pipelines interleave the way real network
        // calls would.
        tokio::task::yield_now().await;
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = &request.messages.last().expect("prompt message").content;

        let content = match &self.behavior {
            ChatBehavior::SectionAware => section_response(prompt),
            ChatBehavior::FencedOnce => {
                if call == 0 {
                    format!(
                        "```json\n{}\n```\nLet me know if you need anything else!",
                        section_response(prompt)
                    )
                } else {
                    section_response(prompt)
                }
            }
            ChatBehavior::AlwaysEmptyObject => "{}".to_string(),
            ChatBehavior::Sleepy(delay) => {
                tokio::time::sleep(*delay).await;
                section_response(prompt)
            }
        };

        Ok(ChatResponse {
            content,
            model_id: request.model_id.clone(),
            total_tokens: None,
        })
    }
}

fn wisc_entities() -> Vec<OcrEntity> {
    let scores = [
        ("Verbal Comprehension Index (VCI) 92", 0.95),
        ("Visual Spatial Index (VSI) 88", 0.94),
        ("Fluid Reasoning Index (FRI) 90", 0.96),
        ("Working Memory Index (WMI) 78", 0.93),
        ("Processing Speed Index (PSI) 82", 0.92),
    ];
    scores
        .iter()
        .map(|(text, confidence)| OcrEntity {
            entity_type: "subtest_score".to_string(),
            mention_text: text.to_string(),
            confidence: *confidence,
        })
        .collect()
}

fn wisc_document() -> OcrDocument {
    OcrDocument {
        entities: wisc_entities(),
        text_blocks: vec![OcrTextBlock {
            text: "The student was administered the full cognitive battery. Working memory \
                   and processing speed emerged as relative weaknesses."
                .to_string(),
            confidence: 0.9,
        }],
        ..Default::default()
    }
}

struct Harness {
    ctx: Arc<PipelineContext>,
    orchestrator: PipelineOrchestrator,
    student_id: StudentId,
    template_id: TemplateId,
    teacher: Principal,
    coordinator: Principal,
}

async fn harness(chat: Arc<dyn ChatModel>, ocr: OcrDocument, config: EdPlanConfig) -> Harness {
    let students = Arc::new(InMemoryStudentRepository::new());
    let templates = Arc::new(InMemoryTemplateRepository::new());

    let mut student = Student::new(
        "S-1001".to_string(),
        "Jordan".to_string(),
        "Rivera".to_string(),
        NaiveDate::from_ymd_opt(2015, 3, 12).unwrap(),
        Grade(5),
        "Unified District".to_string(),
        "Lincoln Elementary".to_string(),
    );
    student.disability_codes.push(DisabilityCategory::Sld);
    let student_id = students.insert(student).await.unwrap();

    let template = starter_template(DisabilityCategory::Sld, GradeBand::Elementary35);
    let template_id = templates.insert(template).await.unwrap();

    let embedding_dim = config.vector.embedding_dim;
    let ctx = Arc::new(PipelineContext {
        config,
        students,
        assessments: Arc::new(InMemoryAssessmentRepository::new()),
        profiles: Arc::new(InMemoryProfileRepository::new()),
        templates,
        ieps: Arc::new(InMemoryIepRepository::new()),
        traces: Arc::new(InMemoryTraceRepository::new()),
        vector_index: Arc::new(InMemoryVectorIndex::new()),
        embedder: Arc::new(HashEmbedder::new(embedding_dim)),
        document_store: Arc::new(StaticStore),
        ocr: Arc::new(StaticOcr { document: ocr }),
        chat_model: chat,
        locks: Arc::new(StudentLockRegistry::new()),
    });
    let orchestrator = PipelineOrchestrator::new(ctx.clone());

    Harness {
        ctx,
        orchestrator,
        student_id,
        template_id,
        teacher: Principal::new(Uuid::new_v4(), Role::Teacher),
        coordinator: Principal::new(Uuid::new_v4(), Role::Coordinator),
    }
}

fn fast_config() -> EdPlanConfig {
    let mut config = EdPlanConfig::default();
    config.extraction.retry_backoff_base_seconds = 0.001;
    config
}

impl Harness {
    async fn upload_wisc(&self) -> Uuid {
        self.orchestrator
            .upload_assessment(UploadAssessmentRequest {
                student_id: self.student_id,
                file_name: "wisc-v-report.pdf".to_string(),
                storage_uri: "file:///reports/wisc-v-report.pdf".to_string(),
                assessment_type: "WISC-V".to_string(),
                assessor_name: "Dr. Example".to_string(),
                assessment_date: NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(),
            })
            .await
            .unwrap()
            .id
    }

    fn generate_request(&self, document_ids: Vec<Uuid>) -> GenerateIepRequest {
        GenerateIepRequest {
            student_id: self.student_id,
            template_id: self.template_id,
            academic_year: "2025-2026".to_string(),
            assessment_document_ids: document_ids,
            meeting_date: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            effective_date: NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(),
            review_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        }
    }

    async fn generate(&self, document_ids: Vec<Uuid>) -> Result<GeneratedIep> {
        self.orchestrator
            .generate_iep(
                self.generate_request(document_ids),
                &self.teacher,
                &CorrelationId::new(),
            )
            .await
    }
}

// Scenario A: happy path from upload through versioned draft
#[tokio::test]
async fn test_happy_path_end_to_end() {
    let h = harness(
        ScriptedChat::new(ChatBehavior::SectionAware),
        wisc_document(),
        fast_config(),
    )
    .await;
    let correlation = CorrelationId::new();

    let document_id = h.upload_wisc().await;
    let uploaded = h.ctx.assessments.get(document_id).await.unwrap().unwrap();
    assert_eq!(uploaded.processing_status, ProcessingStatus::Pending);

    let summary = h
        .orchestrator
        .extract_and_quantify(document_id, &correlation)
        .await
        .unwrap();
    assert!(!summary.manual_review_required);
    // Reported confidence uses the display remap range
    assert!((0.76..=0.98).contains(&summary.confidence));

    let document = h.ctx.assessments.get(document_id).await.unwrap().unwrap();
    assert_eq!(document.processing_status, ProcessingStatus::Quantified);
    // Storage retains the raw value, not the display remap
    assert!(document.overall_confidence.unwrap() > 0.9);

    let profile = h
        .ctx
        .profiles
        .get(summary.profile_id)
        .await
        .unwrap()
        .unwrap();
    assert!(profile.cognitive_composite.is_some());
    assert!(profile.needs.contains(&edplan_core::Domain::WorkingMemory));

    let generated = h.generate(vec![document_id]).await.unwrap();
    assert_eq!(generated.version, 1);
    assert_eq!(generated.status, "draft");

    let iep = h.orchestrator.get_iep(generated.iep_id).await.unwrap();
    let template = h.ctx.templates.get(h.template_id).await.unwrap().unwrap();
    let mut content_keys: Vec<&str> = iep.content.keys().map(|k| k.as_str()).collect();
    content_keys.sort_unstable();
    let mut template_keys = template.section_keys();
    template_keys.sort_unstable();
    assert_eq!(
        content_keys,
        template_keys.iter().map(|k| k.as_str()).collect::<Vec<_>>()
    );
    for (_, section) in &iep.content {
        assert!(section.is_object());
    }
}

// Every ok trace has a positive duration, and generation traces carry the
// prompt hash
#[tokio::test]
async fn test_trace_invariants_on_success() {
    let h = harness(
        ScriptedChat::new(ChatBehavior::SectionAware),
        wisc_document(),
        fast_config(),
    )
    .await;
    let correlation = CorrelationId::new();

    let document_id = h.upload_wisc().await;
    h.orchestrator
        .extract_and_quantify(document_id, &correlation)
        .await
        .unwrap();
    h.orchestrator
        .generate_iep(
            h.generate_request(vec![document_id]),
            &h.teacher,
            &correlation,
        )
        .await
        .unwrap();

    let traces = h.orchestrator.traces_for(&correlation).await.unwrap();
    assert!(!traces.is_empty());
    for trace in &traces {
        if trace.outcome == TraceOutcome::Ok {
            assert!(trace.duration_ms > 0, "stage {:?}", trace.stage);
        }
        if trace.stage == PipelineStage::Generation {
            assert!(trace.prompt_hash.is_some());
        }
    }
    // One generation trace per template section
    let generation_traces = traces
        .iter()
        .filter(|t| t.stage == PipelineStage::Generation)
        .count();
    assert_eq!(generation_traces, 4);
}

// Scenario B: one illegible field drops the confidence floor and forces
// manual review downstream
#[tokio::test]
async fn test_partial_extraction_flags_manual_review() {
    let mut ocr = wisc_document();
    ocr.entities[4] = OcrEntity {
        entity_type: "subtest_score".to_string(),
        mention_text: "Processing Speed Index (PSI) 82".to_string(),
        confidence: 0.4,
    };
    let h = harness(
        ScriptedChat::new(ChatBehavior::SectionAware),
        ocr,
        fast_config(),
    )
    .await;
    let correlation = CorrelationId::new();

    let document_id = h.upload_wisc().await;
    let summary = h
        .orchestrator
        .extract_and_quantify(document_id, &correlation)
        .await
        .unwrap();
    assert!(summary.manual_review_required);

    let profile = h
        .ctx
        .profiles
        .get(summary.profile_id)
        .await
        .unwrap()
        .unwrap();
    assert!(profile.confidence_floor < 0.60);
    assert!(profile.requires_manual_review);

    let traces = h.orchestrator.traces_for(&correlation).await.unwrap();
    assert!(traces
        .iter()
        .any(|t| t.note.as_deref() == Some("requires_manual_review")));

    // Generation still proceeds, and the result stays a draft
    let generated = h.generate(vec![document_id]).await.unwrap();
    assert_eq!(generated.status, "draft");
}

// Scenario C: fenced response is repaired and the section trace records the
// recovery
#[tokio::test]
async fn test_fenced_json_is_repaired() {
    let h = harness(
        ScriptedChat::new(ChatBehavior::FencedOnce),
        wisc_document(),
        fast_config(),
    )
    .await;
    let correlation = CorrelationId::new();

    let document_id = h.upload_wisc().await;
    h.orchestrator
        .generate_iep(
            h.generate_request(vec![document_id]),
            &h.teacher,
            &correlation,
        )
        .await
        .unwrap();

    let traces = h.orchestrator.traces_for(&correlation).await.unwrap();
    let retried = traces
        .iter()
        .filter(|t| t.stage == PipelineStage::Generation)
        .filter(|t| t.outcome == TraceOutcome::Retried)
        .count();
    assert_eq!(retried, 1);
}

// Scenario D: persistent schema violation fails the pipeline and leaves no
// IEP row
#[tokio::test]
async fn test_persistent_schema_violation_fails_without_iep_row() {
    let h = harness(
        ScriptedChat::new(ChatBehavior::AlwaysEmptyObject),
        wisc_document(),
        fast_config(),
    )
    .await;
    let correlation = CorrelationId::new();

    let document_id = h.upload_wisc().await;
    let result = h
        .orchestrator
        .generate_iep(
            h.generate_request(vec![document_id]),
            &h.teacher,
            &correlation,
        )
        .await;

    assert!(matches!(
        result,
        Err(EdPlanError::GenerationFailed { .. })
    ));
    assert!(h
        .orchestrator
        .list_ieps(h.student_id)
        .await
        .unwrap()
        .is_empty());

    let traces = h.orchestrator.traces_for(&correlation).await.unwrap();
    assert!(traces
        .iter()
        .any(|t| t.stage == PipelineStage::Generation && t.outcome == TraceOutcome::Failed));
}

// Scenario E: concurrent generation for the same student yields adjacent
// versions sharing the same parent head
#[tokio::test]
async fn test_concurrent_generation_same_student() {
    let h = harness(
        ScriptedChat::new(ChatBehavior::SectionAware),
        wisc_document(),
        fast_config(),
    )
    .await;

    let document_id = h.upload_wisc().await;
    let first = h.generate(vec![document_id]).await.unwrap();
    assert_eq!(first.version, 1);

    let (a, b) = tokio::join!(
        h.generate(vec![document_id]),
        h.generate(vec![document_id])
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let mut versions = vec![a.version, b.version];
    versions.sort_unstable();
    assert_eq!(versions, vec![2, 3]);

    let iep_a = h.orchestrator.get_iep(a.iep_id).await.unwrap();
    let iep_b = h.orchestrator.get_iep(b.iep_id).await.unwrap();
    assert_eq!(iep_a.parent_version_id, Some(first.iep_id));
    assert_eq!(iep_b.parent_version_id, Some(first.iep_id));

    // Versions stay unique and contiguous: max(version) == count
    let all = h.orchestrator.list_ieps(h.student_id).await.unwrap();
    let versions: Vec<u32> = all.iter().map(|i| i.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

// Scenario F: the deadline cancels generation but preserves extraction work
#[tokio::test(start_paused = true)]
async fn test_deadline_exceeded_preserves_extraction() {
    let mut config = fast_config();
    config.pipeline.deadline_seconds = 300;
    let h = harness(
        ScriptedChat::new(ChatBehavior::Sleepy(Duration::from_secs(360))),
        wisc_document(),
        config,
    )
    .await;
    let correlation = CorrelationId::new();

    let document_id = h.upload_wisc().await;
    let result = h
        .orchestrator
        .generate_iep(
            h.generate_request(vec![document_id]),
            &h.teacher,
            &correlation,
        )
        .await;

    assert!(matches!(result, Err(EdPlanError::DeadlineExceeded { .. })));
    assert!(h
        .orchestrator
        .list_ieps(h.student_id)
        .await
        .unwrap()
        .is_empty());

    // The score set extracted before the LLM call survives for reuse
    let score_set = h.ctx.assessments.get_score_set(document_id).await.unwrap();
    assert!(score_set.is_some());

    // A rerun with a healthy model can reuse it without re-extracting
    let document = h.ctx.assessments.get(document_id).await.unwrap().unwrap();
    assert_eq!(document.processing_status, ProcessingStatus::Extracted);
}

// Approval flow: draft -> active, supersession archives the prior active IEP
#[tokio::test]
async fn test_approval_and_supersession() {
    let h = harness(
        ScriptedChat::new(ChatBehavior::SectionAware),
        wisc_document(),
        fast_config(),
    )
    .await;

    let document_id = h.upload_wisc().await;
    let first = h.generate(vec![document_id]).await.unwrap();
    let second = h.generate(vec![document_id]).await.unwrap();

    // Teachers cannot approve
    let denied = h
        .orchestrator
        .approve_iep(first.iep_id, &h.teacher)
        .await;
    assert!(matches!(denied, Err(EdPlanError::Forbidden(_))));

    let approved = h
        .orchestrator
        .approve_iep(first.iep_id, &h.coordinator)
        .await
        .unwrap();
    assert_eq!(approved.status, IepStatus::Active);
    assert!(approved.approved_at.is_some());
    assert_eq!(approved.approved_by, Some(h.coordinator.user_id));

    // Approving the newer draft supersedes the first
    h.orchestrator
        .approve_iep(second.iep_id, &h.coordinator)
        .await
        .unwrap();
    let superseded = h.orchestrator.get_iep(first.iep_id).await.unwrap();
    assert_eq!(superseded.status, IepStatus::Archived);

    let active = h.ctx.ieps.active_iep(h.student_id).await.unwrap().unwrap();
    assert_eq!(active.id, second.iep_id);

    // No active IEP exists without approval metadata
    assert!(active.approved_at.is_some() && active.approved_by.is_some());
}

// Exemplars from an approved IEP inform the next generation
#[tokio::test]
async fn test_generated_iep_is_indexed_for_retrieval() {
    let h = harness(
        ScriptedChat::new(ChatBehavior::SectionAware),
        wisc_document(),
        fast_config(),
    )
    .await;

    let document_id = h.upload_wisc().await;
    h.generate(vec![document_id]).await.unwrap();

    // Post-commit indexing is fire-and-forget; give the spawned task a turn
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let embedding = h
        .ctx
        .embedder
        .embed("decoding accuracy annual goals")
        .await
        .unwrap();
    let hits = h
        .ctx
        .vector_index
        .search(
            &embedding,
            3,
            &edplan_core::SearchFilter {
                source_type: Some(edplan_core::SourceType::IepSection),
                section_key: Some("annual_goals".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!hits.is_empty());
}
