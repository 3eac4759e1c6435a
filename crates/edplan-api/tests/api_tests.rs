//! Router-level tests: requests go through the full axum stack with
//! scripted providers behind the orchestrator.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use edplan_api::{router, AppState};
use edplan_core::{
    starter_template, ChatModel, ChatRequest, ChatResponse, DisabilityCategory, DocumentStore,
    Grade, GradeBand, OcrDocument, OcrEntity, OcrHints, OcrProvider, Student, StudentRepository,
    TemplateRepository,
};
use edplan_infra::{
    HashEmbedder, InMemoryAssessmentRepository, InMemoryIepRepository, InMemoryProfileRepository,
    InMemoryStudentRepository, InMemoryTemplateRepository, InMemoryTraceRepository,
    InMemoryVectorIndex, StudentLockRegistry,
};
use edplan_pipeline::{PipelineContext, PipelineOrchestrator};
use edplan_types::{EdPlanConfig, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct StaticStore;

#[async_trait::async_trait]
impl DocumentStore for StaticStore {
    async fn fetch(&self, _uri: &str) -> Result<Vec<u8>> {
        Ok(b"%PDF-1.7".to_vec())
    }
}

struct StaticOcr;

#[async_trait::async_trait]
impl OcrProvider for StaticOcr {
    async fn parse(&self, _bytes: &[u8], _hints: &OcrHints) -> Result<OcrDocument> {
        let scores = [
            "Verbal Comprehension Index (VCI) 92",
            "Visual Spatial Index (VSI) 88",
            "Fluid Reasoning Index (FRI) 90",
            "Working Memory Index (WMI) 78",
            "Processing Speed Index (PSI) 82",
        ];
        Ok(OcrDocument {
            entities: scores
                .iter()
                .map(|text| OcrEntity {
                    entity_type: "subtest_score".to_string(),
                    mention_text: text.to_string(),
                    confidence: 0.95,
                })
                .collect(),
            ..Default::default()
        })
    }
}

struct SectionChat;

#[async_trait::async_trait]
impl ChatModel for SectionChat {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let prompt = &request.messages.last().unwrap().content;
        let content = if prompt.contains("(present_levels)") {
            r#"{"academic_performance": "a", "functional_performance": "b", "impact_of_disability": "c"}"#
        } else if prompt.contains("(annual_goals)") {
            r#"{"goals": ["g1"], "progress_measurement": "m"}"#
        } else if prompt.contains("(accommodations)") {
            r#"{"classroom_accommodations": ["c1"], "testing_accommodations": ["t1"]}"#
        } else {
            r#"{"services": ["s1"], "service_minutes_per_week": 120, "setting": "resource room"}"#
        };
        Ok(ChatResponse {
            content: content.to_string(),
            model_id: request.model_id.clone(),
            total_tokens: None,
        })
    }
}

struct TestApp {
    app: axum::Router,
    student_id: Uuid,
    template_id: Uuid,
}

async fn test_app() -> TestApp {
    let students = Arc::new(InMemoryStudentRepository::new());
    let templates = Arc::new(InMemoryTemplateRepository::new());

    let mut student = Student::new(
        "S-42".to_string(),
        "Sam".to_string(),
        "Okafor".to_string(),
        NaiveDate::from_ymd_opt(2014, 8, 20).unwrap(),
        Grade(5),
        "Unified District".to_string(),
        "Lincoln Elementary".to_string(),
    );
    student.disability_codes.push(DisabilityCategory::Sld);
    let student_id = students.insert(student).await.unwrap();
    let template_id = templates
        .insert(starter_template(
            DisabilityCategory::Sld,
            GradeBand::Elementary35,
        ))
        .await
        .unwrap();

    let config = EdPlanConfig::default();
    let embedding_dim = config.vector.embedding_dim;
    let context = Arc::new(PipelineContext {
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
        ocr: Arc::new(StaticOcr),
        chat_model: Arc::new(SectionChat),
        locks: Arc::new(StudentLockRegistry::new()),
    });
    let state = AppState {
        orchestrator: Arc::new(PipelineOrchestrator::new(context)),
    };

    TestApp {
        app: router(state),
        student_id,
        template_id,
    }
}

fn authed(request: Request<Body>, role: &str) -> Request<Body> {
    let (mut parts, body) = request.into_parts();
    parts.headers.insert(
        "x-user-id",
        Uuid::new_v4().to_string().parse().unwrap(),
    );
    parts.headers.insert("x-user-role", role.parse().unwrap());
    Request::from_parts(parts, body)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn upload_body(student_id: Uuid) -> String {
    json!({
        "student_id": student_id,
        "file_name": "wisc.pdf",
        "storage_uri": "file:///reports/wisc.pdf",
        "assessment_type": "WISC-V",
        "assessor_name": "Dr. Example",
        "assessment_date": "2025-09-15"
    })
    .to_string()
}

#[tokio::test]
async fn test_health_is_open() {
    let test = test_app().await;
    let response = test
        .app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_principal_is_unauthorized() {
    let test = test_app().await;
    let request = Request::post("/assessments")
        .header("content-type", "application/json")
        .body(Body::from(upload_body(test.student_id)))
        .unwrap();
    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn test_upload_extract_generate_flow() {
    let test = test_app().await;

    // Upload
    let request = authed(
        Request::post("/assessments")
            .header("content-type", "application/json")
            .body(Body::from(upload_body(test.student_id)))
            .unwrap(),
        "teacher",
    );
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["processing_status"], "pending");
    assert!(body["_metadata"]["correlation_id"].is_string());
    let document_id = body["data"]["id"].as_str().unwrap().to_string();

    // Extract and quantify
    let request = authed(
        Request::post(format!("/assessments/{}/extract", document_id))
            .body(Body::empty())
            .unwrap(),
        "teacher",
    );
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let confidence = body["data"]["confidence"].as_f64().unwrap();
    assert!((0.76..=0.98).contains(&confidence));

    // Generate
    let generate = json!({
        "student_id": test.student_id,
        "template_id": test.template_id,
        "academic_year": "2025-2026",
        "assessment_document_ids": [document_id],
        "meeting_date": "2025-10-01",
        "effective_date": "2025-10-15",
        "review_date": "2026-10-01"
    });
    let request = authed(
        Request::post("/ieps/generate")
            .header("content-type", "application/json")
            .body(Body::from(generate.to_string()))
            .unwrap(),
        "teacher",
    );
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["version"], 1);
    assert_eq!(body["data"]["status"], "draft");
    let iep_id = body["data"]["iep_id"].as_str().unwrap().to_string();

    // Fetch it back
    let request = authed(
        Request::get(format!("/ieps/{}", iep_id))
            .body(Body::empty())
            .unwrap(),
        "teacher",
    );
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["data"]["content"]["annual_goals"].is_object());

    // Teachers cannot approve; coordinators can
    let request = authed(
        Request::post(format!("/ieps/{}/approve", iep_id))
            .body(Body::empty())
            .unwrap(),
        "teacher",
    );
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let request = authed(
        Request::post(format!("/ieps/{}/approve", iep_id))
            .body(Body::empty())
            .unwrap(),
        "coordinator",
    );
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "active");

    // List for the student
    let request = authed(
        Request::get(format!("/students/{}/ieps", test.student_id))
            .body(Body::empty())
            .unwrap(),
        "teacher",
    );
    let response = test.app.oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_iep_is_not_found() {
    let test = test_app().await;
    let request = authed(
        Request::get(format!("/ieps/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap(),
        "teacher",
    );
    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_unknown_assessment_type_is_validation_error() {
    let test = test_app().await;
    let mut payload: Value = serde_json::from_str(&upload_body(test.student_id)).unwrap();
    payload["assessment_type"] = json!("MYSTERY-9");
    let request = authed(
        Request::post("/assessments")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
        "teacher",
    );
    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
}
