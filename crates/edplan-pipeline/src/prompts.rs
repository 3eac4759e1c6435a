//! RAG Prompt Builder
//!
//! Assembles one deterministic prompt per template section from fixed,
//! ordered slots: role instruction, section requirements, student profile,
//! quantified assessment, planning context, historical context, retrieved
//! exemplars, the critical constraints block, and the output format
//! instruction. The prompt hash and exemplar chunk ids are recorded on the
//! generation trace.

use edplan_core::{
    Embedder, FieldType, IepTemplate, QuantifiedProfile, SearchFilter, SectionSpec, SourceType,
    Student, VectorIndex,
};
use edplan_types::Result;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Constraints inserted verbatim into every prompt
pub const CRITICAL_CONSTRAINTS: &[&str] = &[
    "Do not invent demographic facts beyond the provided student profile.",
    "Use the quantified data; do not replace numbers with prose paraphrases that lose magnitude.",
    "Connect assessment findings to instructional strategies and measurable objectives.",
    "Reference grade-level academic frameworks.",
    "Return a single JSON object matching the declared field structure; no markdown, no commentary.",
    "Escape embedded quotes.",
];

/// Planning context threaded through from the generation request
#[derive(Debug, Clone)]
pub struct PlanningContext {
    pub academic_year: String,
    pub meeting_date: chrono::NaiveDate,
    pub effective_date: chrono::NaiveDate,
    pub review_date: chrono::NaiveDate,
    /// Summary of the student's previous IEP, when one exists
    pub prior_iep_summary: Option<String>,
}

/// One assembled section prompt
#[derive(Debug, Clone)]
pub struct SectionPrompt {
    pub section_key: String,
    pub text: String,
    /// SHA-256 of the final prompt text, hex encoded
    pub prompt_hash: String,
    pub exemplar_chunk_ids: Vec<String>,
}

/// The prompt builder
pub struct PromptBuilder {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl PromptBuilder {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k,
        }
    }

    /// Build the prompt for one section
    pub async fn build(
        &self,
        section: &SectionSpec,
        template: &IepTemplate,
        student: &Student,
        profile: &QuantifiedProfile,
        context: &PlanningContext,
    ) -> Result<SectionPrompt> {
        // Compact query text: guidance + top-ranked needs + disability category
        let top_needs = profile
            .needs
            .iter()
            .take(3)
            .map(|d| d.label())
            .collect::<Vec<_>>()
            .join(", ");
        let query_text = format!(
            "{} {} {}",
            section.guidance_text,
            top_needs,
            template.disability_category.code()
        );

        let query_embedding = self.embedder.embed(&query_text).await?;
        let filter = SearchFilter {
            source_type: Some(SourceType::IepSection),
            section_key: Some(section.section_key.clone()),
            disability_category: Some(template.disability_category),
            grade_band: None,
        };
        let exemplars = self
            .index
            .search(&query_embedding, self.top_k, &filter)
            .await?;
        debug!(
            section = %section.section_key,
            exemplars = exemplars.len(),
            "retrieved exemplars"
        );

        let mut prompt = String::with_capacity(4096);

        // 1. Role instruction
        prompt.push_str(
            "You are an experienced special-education case manager drafting one section of an \
             Individualized Education Program (IEP).\n\n",
        );

        // 2. Section requirements
        prompt.push_str(&format!(
            "## Section: {} ({})\n",
            section.human_title, section.section_key
        ));
        prompt.push_str("Required fields:\n");
        for field in &section.required_fields {
            prompt.push_str(&format!(
                "- {} ({}{})\n",
                field.path,
                field_type_label(field.field_type),
                if field.required { "" } else { ", optional" }
            ));
        }
        if let Some(max) = section.max_length_chars {
            prompt.push_str(&format!("Maximum section length: {} characters.\n", max));
        }
        prompt.push_str(&format!("Guidance: {}\n\n", section.guidance_text));

        // 3. Student profile (exact fields, never paraphrased)
        prompt.push_str("## Student profile\n");
        prompt.push_str(&format!("Name: {}\n", student.full_name()));
        prompt.push_str(&format!("Grade: {}\n", student.grade));
        prompt.push_str(&format!("School: {}, {}\n", student.school_name, student.school_district));
        prompt.push_str(&format!(
            "Disability categories: {}\n",
            student
                .disability_codes
                .iter()
                .map(|c| c.code())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        prompt.push_str(&format!("Date of birth: {}\n\n", student.date_of_birth));

        // 4. Quantified assessment
        prompt.push_str("## Quantified assessment\n");
        for domain_score in &profile.domain_scores {
            let percentile = domain_score
                .percentile
                .map(|p| format!(", percentile {}", p))
                .unwrap_or_default();
            prompt.push_str(&format!(
                "- {}: {:.0} ({}{})\n",
                domain_score.domain.label(),
                domain_score.score,
                domain_score.classification,
                percentile
            ));
        }
        prompt.push_str(&format!(
            "Strengths (strongest first): {}\n",
            labels_or_none(&profile.strengths)
        ));
        prompt.push_str(&format!(
            "Priority needs (most severe first): {}\n",
            labels_or_none(&profile.needs)
        ));
        for (name, value) in [
            ("Cognitive composite", profile.cognitive_composite),
            ("Academic composite", profile.academic_composite),
            ("Behavioral composite", profile.behavioral_composite),
        ] {
            if let Some(value) = value {
                prompt.push_str(&format!("{} (0-100): {:.0}\n", name, value));
            }
        }
        prompt.push_str(&format!("Grade equivalent: {}\n", profile.grade_equivalent));
        prompt.push_str(&format!("Learning profile: {}\n\n", profile.learning_profile));

        // 5. Educational planning context
        prompt.push_str("## Planning context\n");
        prompt.push_str(&format!("Academic year: {}\n", context.academic_year));
        prompt.push_str(&format!("IEP meeting date: {}\n", context.meeting_date));
        prompt.push_str(&format!("Effective date: {}\n", context.effective_date));
        prompt.push_str(&format!("Annual review date: {}\n\n", context.review_date));

        // 6. Historical context
        prompt.push_str("## Historical context\n");
        match &context.prior_iep_summary {
            Some(summary) => prompt.push_str(&format!("{}\n\n", summary)),
            None => prompt.push_str("This is the student's first IEP in this system.\n\n"),
        }

        // 7. Similar-IEP exemplars, quoted with provenance
        prompt.push_str("## Exemplars from similar IEPs\n");
        if exemplars.is_empty() {
            prompt.push_str("(no exemplars available)\n\n");
        } else {
            for exemplar in &exemplars {
                prompt.push_str(&format!(
                    "[source {} | similarity {:.2}]\n> {}\n",
                    exemplar.metadata.source_id,
                    exemplar.score,
                    exemplar.text.replace('\n', "\n> ")
                ));
            }
            prompt.push('\n');
        }

        // 8. Critical constraints, verbatim
        prompt.push_str("## Critical constraints\n");
        for (i, constraint) in CRITICAL_CONSTRAINTS.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, constraint));
        }
        prompt.push('\n');

        // 9. Output format instruction
        prompt.push_str(
            "## Output format\nReturn only a valid JSON object with exactly these fields: ",
        );
        prompt.push_str(
            &section
                .required_fields
                .iter()
                .map(|f| format!("\"{}\"", f.path))
                .collect::<Vec<_>>()
                .join(", "),
        );
        prompt.push_str(". No markdown fences, no commentary.\n");

        let prompt_hash = hash_text(&prompt);
        Ok(SectionPrompt {
            section_key: section.section_key.clone(),
            text: prompt,
            prompt_hash,
            exemplar_chunk_ids: exemplars.into_iter().map(|e| e.chunk_id).collect(),
        })
    }
}

fn field_type_label(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "string",
        FieldType::StringList => "list of strings",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Object => "object",
    }
}

fn labels_or_none(domains: &[edplan_core::Domain]) -> String {
    if domains.is_empty() {
        "none identified".to_string()
    } else {
        domains
            .iter()
            .map(|d| d.label())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// SHA-256 hex digest of a text
pub fn hash_text(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use edplan_core::{
        starter_template, ChunkMetadata, DisabilityCategory, Grade, GradeBand,
        QuantificationEngine, ScoreRecord, VectorChunk,
    };
    use edplan_infra::{HashEmbedder, InMemoryVectorIndex};
    use uuid::Uuid;

    fn student() -> Student {
        let mut student = Student::new(
            "S-77".to_string(),
            "Avery".to_string(),
            "Chen".to_string(),
            NaiveDate::from_ymd_opt(2015, 6, 1).unwrap(),
            Grade(5),
            "Unified District".to_string(),
            "Lincoln Elementary".to_string(),
        );
        student.disability_codes.push(DisabilityCategory::Sld);
        student
    }

    fn profile() -> QuantifiedProfile {
        let records = vec![ScoreRecord {
            test_name: "WIAT-IV".to_string(),
            subtest_name: "Word Reading".to_string(),
            standard_score: Some(74.0),
            scaled_score: None,
            t_score: None,
            percentile_rank: None,
            confidence_interval_low: None,
            confidence_interval_high: None,
            classification: None,
            confidence: 0.9,
            source_text_span: "Word Reading 74".to_string(),
            extraction_flag: None,
        }];
        QuantificationEngine::new(0.60)
            .quantify(Uuid::new_v4(), vec![], &records, Grade(5))
            .unwrap()
    }

    fn context() -> PlanningContext {
        PlanningContext {
            academic_year: "2025-2026".to_string(),
            meeting_date: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            effective_date: NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(),
            review_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            prior_iep_summary: None,
        }
    }

    async fn builder_with_exemplar() -> PromptBuilder {
        let embedder = Arc::new(HashEmbedder::new(64));
        let index = Arc::new(InMemoryVectorIndex::new());
        let text = "The student will improve decoding accuracy from 70% to 90%.";
        let embedding = embedder.embed(text).await.unwrap();
        index
            .upsert(VectorChunk {
                chunk_id: "prior-goals-0".to_string(),
                text: text.to_string(),
                embedding,
                metadata: ChunkMetadata {
                    source_type: SourceType::IepSection,
                    disability_category: Some(DisabilityCategory::Sld),
                    grade_band: Some(GradeBand::Elementary35),
                    section_key: Some("annual_goals".to_string()),
                    source_id: "iep-prior".to_string(),
                },
            })
            .await
            .unwrap();
        PromptBuilder::new(embedder, index, 3)
    }

    #[tokio::test]
    async fn test_prompt_slots_appear_in_fixed_order() {
        let builder = builder_with_exemplar().await;
        let template = starter_template(DisabilityCategory::Sld, GradeBand::Elementary35);
        let section = template.section("annual_goals").unwrap();

        let prompt = builder
            .build(section, &template, &student(), &profile(), &context())
            .await
            .unwrap();

        let order = [
            "special-education case manager",
            "## Section:",
            "## Student profile",
            "## Quantified assessment",
            "## Planning context",
            "## Historical context",
            "## Exemplars from similar IEPs",
            "## Critical constraints",
            "## Output format",
        ];
        let mut last = 0;
        for marker in order {
            let position = prompt.text[last..]
                .find(marker)
                .unwrap_or_else(|| panic!("marker '{}' missing or out of order", marker));
            last += position;
        }
    }

    #[tokio::test]
    async fn test_constraints_inserted_verbatim() {
        let builder = builder_with_exemplar().await;
        let template = starter_template(DisabilityCategory::Sld, GradeBand::Elementary35);
        let section = template.section("annual_goals").unwrap();

        let prompt = builder
            .build(section, &template, &student(), &profile(), &context())
            .await
            .unwrap();

        for constraint in CRITICAL_CONSTRAINTS {
            assert!(prompt.text.contains(constraint));
        }
    }

    #[tokio::test]
    async fn test_exemplars_retrieved_for_matching_section() {
        let builder = builder_with_exemplar().await;
        let template = starter_template(DisabilityCategory::Sld, GradeBand::Elementary35);

        let goals = template.section("annual_goals").unwrap();
        let prompt = builder
            .build(goals, &template, &student(), &profile(), &context())
            .await
            .unwrap();
        assert_eq!(prompt.exemplar_chunk_ids, vec!["prior-goals-0"]);
        assert!(prompt.text.contains("decoding accuracy"));

        // A different section retrieves nothing: the filter is conjunctive
        let levels = template.section("present_levels").unwrap();
        let prompt = builder
            .build(levels, &template, &student(), &profile(), &context())
            .await
            .unwrap();
        assert!(prompt.exemplar_chunk_ids.is_empty());
        assert!(prompt.text.contains("(no exemplars available)"));
    }

    #[tokio::test]
    async fn test_prompt_hash_is_deterministic() {
        let builder = builder_with_exemplar().await;
        let template = starter_template(DisabilityCategory::Sld, GradeBand::Elementary35);
        let section = template.section("annual_goals").unwrap();
        let (student, profile, context) = (student(), profile(), context());

        let first = builder
            .build(section, &template, &student, &profile, &context)
            .await
            .unwrap();
        let second = builder
            .build(section, &template, &student, &profile, &context)
            .await
            .unwrap();

        assert_eq!(first.prompt_hash, second.prompt_hash);
        assert_eq!(first.prompt_hash, hash_text(&first.text));
        assert_eq!(first.prompt_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_quantified_numbers_survive_into_prompt() {
        let builder = builder_with_exemplar().await;
        let template = starter_template(DisabilityCategory::Sld, GradeBand::Elementary35);
        let section = template.section("present_levels").unwrap();

        let prompt = builder
            .build(section, &template, &student(), &profile(), &context())
            .await
            .unwrap();
        // The reading domain score and grade equivalent appear as numbers
        assert!(prompt.text.contains("Reading: 74"));
        assert!(prompt.text.contains("Grade equivalent: 3.3"));
    }
}
