//! Database Infrastructure
//!
//! Connection management and schema initialization for the relational store.

use edplan_types::{EdPlanError, Result};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Database connection manager
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Create a new database manager with SQLite
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| EdPlanError::DatabaseError(format!("Failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }

    /// Create a new in-memory database for testing
    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Create a new file-based database
    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let database_url = format!("sqlite:{}", path.as_ref().display());
        Self::new(&database_url).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the relational schema
    pub async fn initialize_schema(&self) -> Result<()> {
        self.create_table(
            "students",
            r#"
            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                date_of_birth TEXT NOT NULL,
                grade INTEGER NOT NULL,
                school_district TEXT NOT NULL,
                school_name TEXT NOT NULL,
                disability_codes TEXT NOT NULL,
                enrollment_date TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .await?;

        self.create_table(
            "assessment_documents",
            r#"
            CREATE TABLE IF NOT EXISTS assessment_documents (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                storage_uri TEXT NOT NULL,
                assessment_type TEXT NOT NULL,
                assessor_name TEXT NOT NULL,
                assessment_date TEXT NOT NULL,
                processing_status TEXT NOT NULL,
                overall_confidence REAL,
                manual_review_required INTEGER NOT NULL DEFAULT 0,
                extraction_notes TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (student_id) REFERENCES students (id)
            )
            "#,
        )
        .await?;

        self.create_table(
            "extracted_score_sets",
            r#"
            CREATE TABLE IF NOT EXISTS extracted_score_sets (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL UNIQUE,
                records TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES assessment_documents (id)
            )
            "#,
        )
        .await?;

        self.create_table(
            "quantified_profiles",
            r#"
            CREATE TABLE IF NOT EXISTS quantified_profiles (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                document_ids TEXT NOT NULL,
                cognitive_composite REAL,
                academic_composite REAL,
                behavioral_composite REAL,
                domain_scores TEXT NOT NULL,
                grade_equivalent TEXT NOT NULL,
                strengths TEXT NOT NULL,
                needs TEXT NOT NULL,
                learning_profile TEXT NOT NULL,
                confidence_floor REAL NOT NULL,
                requires_manual_review INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (student_id) REFERENCES students (id)
            )
            "#,
        )
        .await?;

        self.create_table(
            "iep_templates",
            r#"
            CREATE TABLE IF NOT EXISTS iep_templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                disability_category TEXT NOT NULL,
                grade_band TEXT NOT NULL,
                version INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                sections TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .await?;

        self.create_table(
            "ieps",
            r#"
            CREATE TABLE IF NOT EXISTS ieps (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                template_id TEXT NOT NULL,
                template_version INTEGER NOT NULL,
                academic_year TEXT NOT NULL,
                status TEXT NOT NULL,
                content TEXT NOT NULL,
                meeting_date TEXT NOT NULL,
                effective_date TEXT NOT NULL,
                review_date TEXT NOT NULL,
                version INTEGER NOT NULL,
                parent_version_id TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                approved_at TEXT,
                approved_by TEXT,
                UNIQUE (student_id, version),
                FOREIGN KEY (student_id) REFERENCES students (id),
                FOREIGN KEY (template_id) REFERENCES iep_templates (id)
            )
            "#,
        )
        .await?;

        self.create_table(
            "generation_traces",
            r#"
            CREATE TABLE IF NOT EXISTS generation_traces (
                id TEXT PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                section_key TEXT,
                duration_ms INTEGER NOT NULL,
                input_size_bytes INTEGER NOT NULL,
                output_size_bytes INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                error_kind TEXT,
                model_id TEXT,
                prompt_hash TEXT,
                response_hash TEXT,
                note TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .await?;

        Ok(())
    }

    async fn create_table(&self, name: &str, ddl: &str) -> Result<()> {
        sqlx::query(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                EdPlanError::DatabaseError(format!("Failed to create {} table: {}", name, e))
            })?;
        Ok(())
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<bool> {
        let result = sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EdPlanError::DatabaseError(format!("Health check failed: {}", e)))?;

        let value: i32 = result.get(0);
        Ok(value == 1)
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}
