//! LLM Section Generator
//!
//! Invokes the chat model once per section and validates the JSON response
//! against the section's declared fields. Parse failures get one bounded
//! repair round and up to two retries; schema mismatches get one corrective
//! retry with a suffix naming the offending fields. Authentication and quota
//! errors surface immediately.

use crate::prompts::{hash_text, SectionPrompt};
use edplan_core::{ChatMessage, ChatModel, ChatRequest, FieldSpec, FieldType, SectionSpec};
use edplan_types::{EdPlanError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

const PARSE_RETRIES: u32 = 2;
const SCHEMA_RETRIES: u32 = 1;

/// Generator configuration, lifted from the LLM config section
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub model_id: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// Outcome of generating one section
#[derive(Debug, Clone)]
pub struct SectionOutput {
    pub section_key: String,
    pub content: Value,
    pub model_id: String,
    pub response_hash: String,
    /// Set when any retry (parse or schema) happened
    pub retried: bool,
    /// Truncation and repair notes for the trace
    pub warnings: Vec<String>,
}

/// The per-section generator
pub struct SectionGenerator {
    model: Arc<dyn ChatModel>,
    settings: GeneratorSettings,
}

impl SectionGenerator {
    pub fn new(model: Arc<dyn ChatModel>, settings: GeneratorSettings) -> Self {
        Self { model, settings }
    }

    /// Generate and validate one section
    pub async fn generate_section(
        &self,
        prompt: &SectionPrompt,
        spec: &SectionSpec,
    ) -> Result<SectionOutput> {
        let mut prompt_text = prompt.text.clone();
        let mut parse_attempts = 0;
        let mut schema_attempts = 0;
        let mut retried = false;

        loop {
            let request = ChatRequest {
                model_id: self.settings.model_id.clone(),
                messages: vec![ChatMessage::user(prompt_text.clone())],
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
                json_mode: true,
            };
            let response = self.model.complete(&request).await?;
            let raw = response.content;

            let mut warnings = Vec::new();
            let parsed = match parse_with_repair(&raw, &mut warnings) {
                Some(value) => value,
                None => {
                    if parse_attempts < PARSE_RETRIES {
                        parse_attempts += 1;
                        retried = true;
                        warn!(
                            section = %spec.section_key,
                            attempt = parse_attempts,
                            "unparseable response, retrying"
                        );
                        continue;
                    }
                    return Err(EdPlanError::GenerationFailed {
                        section: spec.section_key.clone(),
                        reason: "response was not parseable JSON after repair and retries"
                            .to_string(),
                    });
                }
            };
            // A successful repair counts as a recovered attempt in the
            // trace, alongside genuine re-invocations.
            if !warnings.is_empty() {
                retried = true;
            }

            let problems = schema_problems(&parsed, &spec.required_fields);
            if !problems.is_empty() {
                if schema_attempts < SCHEMA_RETRIES {
                    schema_attempts += 1;
                    retried = true;
                    warn!(
                        section = %spec.section_key,
                        problems = ?problems,
                        "schema mismatch, retrying with corrective suffix"
                    );
                    prompt_text = format!(
                        "{}\n\nYour previous response was missing or mistyped these required \
                         fields: {}. Return a single JSON object with exactly the declared \
                         field structure.",
                        prompt.text,
                        problems.join("; ")
                    );
                    continue;
                }
                return Err(EdPlanError::GenerationFailed {
                    section: spec.section_key.clone(),
                    reason: format!("schema mismatch after retry: {}", problems.join("; ")),
                });
            }

            let mut content = parsed;
            warnings.extend(enforce_lengths(&mut content, spec));

            return Ok(SectionOutput {
                section_key: spec.section_key.clone(),
                content,
                model_id: response.model_id,
                response_hash: hash_text(&raw),
                retried,
                warnings,
            });
        }
    }
}

/// Parse the raw response, applying one bounded round of repairs when the
/// direct parse fails: strip markdown fences, strip leading/trailing prose,
/// and fix commonly mis-escaped quote patterns.
pub fn parse_with_repair(raw: &str, warnings: &mut Vec<String>) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value.is_object().then_some(value);
    }

    let repaired = repair_json(trimmed)?;
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) if value.is_object() => {
            warnings.push("response required JSON repair".to_string());
            Some(value)
        }
        _ => None,
    }
}

/// One round of bounded textual repairs
pub fn repair_json(raw: &str) -> Option<String> {
    let mut candidate = raw.to_string();

    // Strip markdown fences, with or without a language tag
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex");
    if let Some(captures) = fence.captures(&candidate) {
        candidate = captures.get(1)?.as_str().to_string();
    }

    // Strip leading/trailing prose around the outermost object
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if start >= end {
        return None;
    }
    candidate = candidate[start..=end].to_string();

    // Smart quotes and doubled escapes are the common corruption patterns
    candidate = candidate
        .replace('\u{201C}', "\"")
        .replace('\u{201D}', "\"")
        .replace("\\\\\"", "\\\"");

    Some(candidate)
}

/// Check the parsed object against the declared fields. A value is accepted
/// when it already has the declared type or a shape the flattener normalizes
/// to it (a single-scalar-key object for strings, single-string-key objects
/// inside string lists).
pub fn schema_problems(value: &Value, fields: &[FieldSpec]) -> Vec<String> {
    let Some(object) = value.as_object() else {
        return vec!["response is not a JSON object".to_string()];
    };

    let mut problems = Vec::new();
    for field in fields {
        if !field.required {
            continue;
        }
        match lookup_path(object, &field.path) {
            None => problems.push(format!("'{}' is missing", field.path)),
            Some(found) => {
                if !type_acceptable(found, field.field_type) {
                    problems.push(format!(
                        "'{}' should be a {}",
                        field.path,
                        type_label(field.field_type)
                    ));
                }
            }
        }
    }
    problems
}

fn type_acceptable(value: &Value, declared: FieldType) -> bool {
    match declared {
        FieldType::String => match value {
            Value::String(s) => !s.trim().is_empty(),
            Value::Object(object) => {
                object.len() == 1
                    && matches!(
                        object.values().next(),
                        Some(Value::String(_) | Value::Number(_) | Value::Bool(_))
                    )
            }
            _ => false,
        },
        FieldType::StringList => match value {
            Value::Array(items) => {
                !items.is_empty()
                    && items.iter().all(|item| match item {
                        Value::String(_) => true,
                        Value::Object(object) => {
                            object.len() == 1
                                && matches!(object.values().next(), Some(Value::String(_)))
                        }
                        _ => false,
                    })
            }
            _ => false,
        },
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Object => value.is_object(),
    }
}

fn type_label(declared: FieldType) -> &'static str {
    match declared {
        FieldType::String => "non-empty string",
        FieldType::StringList => "non-empty list of strings",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Object => "object",
    }
}

fn lookup_path<'a>(object: &'a serde_json::Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = object.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Truncate over-long free-text fields with an ellipsis marker. Returns a
/// warning per truncated field; overflow is never a failure.
fn enforce_lengths(value: &mut Value, spec: &SectionSpec) -> Vec<String> {
    let Some(max) = spec.max_length_chars else {
        return Vec::new();
    };
    let Some(object) = value.as_object_mut() else {
        return Vec::new();
    };

    let mut warnings = Vec::new();
    for field in &spec.required_fields {
        if field.field_type != FieldType::String {
            continue;
        }
        if let Some(Value::String(text)) = object.get_mut(&field.path) {
            if text.chars().count() > max {
                let truncated: String = text.chars().take(max.saturating_sub(1)).collect();
                *text = format!("{}\u{2026}", truncated);
                warnings.push(format!(
                    "field '{}' exceeded {} chars and was truncated",
                    field.path, max
                ));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use edplan_core::{starter_template, ChatResponse, DisabilityCategory, GradeBand};
    use std::sync::Mutex;

    /// Chat model returning a scripted sequence of responses
    struct ScriptedModel {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
            let mut responses = self.responses.lock().unwrap();
            let content = responses.pop().unwrap_or_default();
            Ok(ChatResponse {
                content,
                model_id: request.model_id.clone(),
                total_tokens: None,
            })
        }
    }

    fn generator(responses: Vec<&str>) -> SectionGenerator {
        SectionGenerator::new(
            Arc::new(ScriptedModel::new(responses)),
            GeneratorSettings {
                model_id: "test-model".to_string(),
                temperature: 0.5,
                max_output_tokens: 8192,
            },
        )
    }

    fn goals_spec() -> SectionSpec {
        starter_template(DisabilityCategory::Sld, GradeBand::Elementary35)
            .section("annual_goals")
            .unwrap()
            .clone()
    }

    fn goals_prompt() -> SectionPrompt {
        SectionPrompt {
            section_key: "annual_goals".to_string(),
            text: "prompt text".to_string(),
            prompt_hash: hash_text("prompt text"),
            exemplar_chunk_ids: Vec::new(),
        }
    }

    const VALID_GOALS: &str =
        r#"{"goals": ["Improve decoding to 90%."], "progress_measurement": "Biweekly CBM probes."}"#;

    #[tokio::test]
    async fn test_valid_response_passes_first_try() {
        let output = generator(vec![VALID_GOALS])
            .generate_section(&goals_prompt(), &goals_spec())
            .await
            .unwrap();
        assert!(!output.retried);
        assert_eq!(output.content["goals"][0], "Improve decoding to 90%.");
        assert_eq!(output.response_hash, hash_text(VALID_GOALS));
    }

    #[tokio::test]
    async fn test_markdown_fences_are_repaired_without_retry() {
        let fenced = format!("```json\n{}\n```\nHope this helps!", VALID_GOALS);
        let output = generator(vec![&fenced])
            .generate_section(&goals_prompt(), &goals_spec())
            .await
            .unwrap();
        // Repair recovers without a second model call but records as retried
        assert!(output.retried);
        assert!(output
            .warnings
            .iter()
            .any(|w| w.contains("JSON repair")));
        assert_eq!(output.content["goals"][0], "Improve decoding to 90%.");
    }

    #[tokio::test]
    async fn test_unparseable_then_valid_marks_retried() {
        let output = generator(vec!["not json at all", VALID_GOALS])
            .generate_section(&goals_prompt(), &goals_spec())
            .await
            .unwrap();
        assert!(output.retried);
    }

    #[tokio::test]
    async fn test_persistent_parse_failure_is_generation_failed() {
        let result = generator(vec!["garbage", "still garbage", "more garbage"])
            .generate_section(&goals_prompt(), &goals_spec())
            .await;
        assert!(matches!(
            result,
            Err(EdPlanError::GenerationFailed { ref section, .. }) if section == "annual_goals"
        ));
    }

    #[tokio::test]
    async fn test_empty_response_counts_as_parse_failure() {
        let output = generator(vec!["", VALID_GOALS])
            .generate_section(&goals_prompt(), &goals_spec())
            .await
            .unwrap();
        assert!(output.retried);
    }

    #[tokio::test]
    async fn test_schema_mismatch_gets_one_corrective_retry() {
        let output = generator(vec!["{}", VALID_GOALS])
            .generate_section(&goals_prompt(), &goals_spec())
            .await
            .unwrap();
        assert!(output.retried);
    }

    #[tokio::test]
    async fn test_persistent_schema_violation_fails() {
        let result = generator(vec!["{}", "{}"])
            .generate_section(&goals_prompt(), &goals_spec())
            .await;
        assert!(matches!(
            result,
            Err(EdPlanError::GenerationFailed { ref reason, .. }) if reason.contains("schema mismatch")
        ));
    }

    #[tokio::test]
    async fn test_flattenable_shapes_pass_schema_check() {
        let nested =
            r#"{"goals": [{"goal": "Improve decoding."}], "progress_measurement": {"text": "CBM"}}"#;
        let output = generator(vec![nested])
            .generate_section(&goals_prompt(), &goals_spec())
            .await
            .unwrap();
        assert!(!output.retried);
    }

    #[tokio::test]
    async fn test_overflow_truncates_with_ellipsis_and_warning() {
        let mut spec = goals_spec();
        spec.max_length_chars = Some(20);
        let long = r#"{"goals": ["ok"], "progress_measurement": "This measurement description is far too long to keep."}"#;
        let output = generator(vec![long])
            .generate_section(&goals_prompt(), &spec)
            .await
            .unwrap();

        let text = output.content["progress_measurement"].as_str().unwrap();
        assert_eq!(text.chars().count(), 20);
        assert!(text.ends_with('\u{2026}'));
        assert!(output.warnings.iter().any(|w| w.contains("truncated")));
    }

    #[test]
    fn test_repair_strips_prose_without_fences() {
        let raw = "Sure, here is the JSON you asked for: {\"a\": 1} Let me know!";
        let repaired = repair_json(raw).unwrap();
        assert_eq!(repaired, "{\"a\": 1}");
    }

    #[test]
    fn test_repair_fixes_smart_quotes() {
        let raw = "{\u{201C}a\u{201D}: \u{201C}b\u{201D}}";
        let repaired = repair_json(raw).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "b");
    }

    #[test]
    fn test_schema_rejects_empty_string_and_list() {
        let spec = goals_spec();
        let empty_goals: Value =
            serde_json::from_str(r#"{"goals": [], "progress_measurement": "CBM"}"#).unwrap();
        assert!(!schema_problems(&empty_goals, &spec.required_fields).is_empty());

        let blank_text: Value =
            serde_json::from_str(r#"{"goals": ["g"], "progress_measurement": "  "}"#).unwrap();
        assert!(!schema_problems(&blank_text, &spec.required_fields).is_empty());
    }
}
