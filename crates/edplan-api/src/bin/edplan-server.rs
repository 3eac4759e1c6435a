//! EdPlan API server binary
//!
//! Constructs every process-scoped handle at startup (configuration,
//! repositories, provider clients, the version-lock registry) and serves the
//! ingress router. Nothing here is a module-level singleton; the context
//! object owns it all.

use edplan_api::{router, AppState};
use edplan_core::{starter_template, DisabilityCategory, Embedder, GradeBand, TemplateRepository};
use edplan_infra::{
    DatabaseManager, DocumentFetcher, FormParserClient, HashEmbedder, HttpChatModel,
    InMemoryAssessmentRepository, InMemoryIepRepository, InMemoryProfileRepository,
    InMemoryStudentRepository, InMemoryTemplateRepository, InMemoryTraceRepository,
    InMemoryVectorIndex, RemoteEmbedder, RetryPolicy, StudentLockRegistry,
};
use edplan_pipeline::{PipelineContext, PipelineOrchestrator};
use edplan_types::EdPlanConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EdPlanConfig::from_env()?;
    config.validate()?;

    if !config.database.url.is_empty() {
        let database = DatabaseManager::new(&config.database.url).await?;
        database.initialize_schema().await?;
        database.health_check().await?;
        info!(url = %config.database.url, "relational schema ready");
    }

    let embedder: Arc<dyn Embedder> = match &config.vector.embedding_endpoint {
        Some(endpoint) => Arc::new(RemoteEmbedder::new(
            endpoint.clone(),
            config.vector.embedding_dim,
            config.extraction.request_timeout_seconds,
        )),
        None => Arc::new(HashEmbedder::new(config.vector.embedding_dim)),
    };

    let retry = RetryPolicy::new(
        config.extraction.retry_max_attempts,
        config.extraction.retry_backoff_base_seconds,
    );
    let templates = Arc::new(InMemoryTemplateRepository::new());
    seed_templates(templates.as_ref()).await?;

    let bind = format!("{}:{}", config.api.host, config.api.port);
    let context = Arc::new(PipelineContext {
        students: Arc::new(InMemoryStudentRepository::new()),
        assessments: Arc::new(InMemoryAssessmentRepository::new()),
        profiles: Arc::new(InMemoryProfileRepository::new()),
        templates,
        ieps: Arc::new(InMemoryIepRepository::new()),
        traces: Arc::new(InMemoryTraceRepository::new()),
        vector_index: Arc::new(InMemoryVectorIndex::new()),
        embedder,
        document_store: Arc::new(DocumentFetcher::new(
            config.extraction.request_timeout_seconds,
            retry,
        )),
        ocr: Arc::new(FormParserClient::new(
            config.extraction.ocr_endpoint.clone(),
            config.extraction.request_timeout_seconds,
        )),
        chat_model: Arc::new(HttpChatModel::new(
            config.llm.endpoint.clone(),
            config.llm.api_key.clone(),
            config.llm.max_concurrent_requests,
            config.llm.requests_per_minute,
            config.llm.request_timeout_seconds,
        )),
        locks: Arc::new(StudentLockRegistry::new()),
        config,
    });

    let state = AppState {
        orchestrator: Arc::new(PipelineOrchestrator::new(context)),
    };

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(address = %bind, "edplan server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Seed one starter template per disability category and grade band so a
/// fresh instance can generate immediately.
async fn seed_templates(templates: &InMemoryTemplateRepository) -> anyhow::Result<()> {
    let categories = [
        DisabilityCategory::Sld,
        DisabilityCategory::Ohi,
        DisabilityCategory::Aut,
        DisabilityCategory::Sli,
        DisabilityCategory::Ed,
        DisabilityCategory::Id,
        DisabilityCategory::Md,
    ];
    let bands = [
        GradeBand::K2,
        GradeBand::Elementary35,
        GradeBand::Middle68,
        GradeBand::High912,
    ];
    for category in categories {
        for band in bands {
            templates
                .insert(starter_template(category, band))
                .await
                .map_err(|e| anyhow::anyhow!("template seed failed: {}", e))?;
        }
    }
    Ok(())
}
