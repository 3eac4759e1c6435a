//! Response Flattener
//!
//! LLM responses arrive as JSON whose shape drifts from the declared section
//! schema in a handful of known pathological ways. The flattener applies a
//! finite set of normalization rules, section by section and then at the top
//! level, and is idempotent: flatten(flatten(x)) == flatten(x).

use crate::templates::{FieldType, IepTemplate, SectionSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Statistics recorded to the generation trace after flattening
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlattenStats {
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub fields_flattened: usize,
    pub duplicate_keys_removed: usize,
    /// Paths of objects that exceeded the depth limit and were left untouched
    pub depth_flagged_paths: Vec<String>,
    pub max_depth_seen: usize,
}

/// The response flattener
pub struct Flattener {
    max_depth: usize,
}

impl Flattener {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Normalize a full IEP content map against its template. Returns the
    /// flattened content and the statistics record.
    pub fn flatten_iep(
        &self,
        content: &Map<String, Value>,
        template: &IepTemplate,
    ) -> (Map<String, Value>, FlattenStats) {
        let mut stats = FlattenStats {
            input_bytes: Value::Object(content.clone()).to_string().len(),
            ..Default::default()
        };

        // Top-level pass: deduplicate equivalent section keys first
        let deduped = dedup_keys(content.clone(), &mut stats);

        let mut result = Map::new();
        for (key, value) in deduped {
            let flattened = match template.section(&key) {
                Some(spec) => self.flatten_section_value(value, spec, &key, &mut stats),
                None => {
                    // Unknown keys get the structural rules only; the
                    // versioned writer rejects them later.
                    self.normalize(value, 1, &key, &mut stats)
                }
            };
            result.insert(key, flattened);
        }

        stats.output_bytes = Value::Object(result.clone()).to_string().len();
        (result, stats)
    }

    /// Normalize one section's output against its spec
    pub fn flatten_section(&self, value: Value, spec: &SectionSpec) -> (Value, FlattenStats) {
        let mut stats = FlattenStats {
            input_bytes: value.to_string().len(),
            ..Default::default()
        };
        let result = self.flatten_section_value(value, spec, &spec.section_key, &mut stats);
        stats.output_bytes = result.to_string().len();
        (result, stats)
    }

    fn flatten_section_value(
        &self,
        value: Value,
        spec: &SectionSpec,
        path: &str,
        stats: &mut FlattenStats,
    ) -> Value {
        // Structural rules first (dedup, depth guard), then the
        // type-directed unwrapping for declared fields.
        let value = self.normalize(value, 1, path, stats);

        let Value::Object(mut object) = value else {
            return value;
        };

        for field in &spec.required_fields {
            if let Some(slot) = lookup_path_mut(&mut object, &field.path) {
                let current = slot.take();
                *slot = flatten_field(current, field.field_type, stats);
            }
        }

        Value::Object(object)
    }

    /// Recursive structural normalization: deduplicate equivalent keys and
    /// leave over-deep objects untouched (flagged for observability).
    fn normalize(&self, value: Value, depth: usize, path: &str, stats: &mut FlattenStats) -> Value {
        stats.max_depth_seen = stats.max_depth_seen.max(depth);
        match value {
            Value::Object(object) => {
                if depth > self.max_depth {
                    stats.depth_flagged_paths.push(path.to_string());
                    return Value::Object(object);
                }
                let deduped = dedup_keys(object, stats);
                let mut result = Map::new();
                for (key, child) in deduped {
                    let child_path = format!("{}.{}", path, key);
                    result.insert(key, self.normalize(child, depth + 1, &child_path, stats));
                }
                Value::Object(result)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.normalize(item, depth, &format!("{}[{}]", path, i), stats)
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Remove keys that are case/whitespace variants of an earlier key, keeping
/// the first occurrence.
fn dedup_keys(object: Map<String, Value>, stats: &mut FlattenStats) -> Map<String, Value> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Map::new();
    for (key, value) in object {
        let normalized: String = key
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if seen.insert(normalized) {
            result.insert(key, value);
        } else {
            stats.duplicate_keys_removed += 1;
        }
    }
    result
}

/// Type-directed field rules
fn flatten_field(value: Value, declared: FieldType, stats: &mut FlattenStats) -> Value {
    match declared {
        FieldType::String => match value {
            // A string field whose value is an object with a single
            // scalar-bearing key collapses to that scalar.
            Value::Object(ref object) if object.len() == 1 => {
                let inner = object.values().next().expect("len checked above");
                match scalar_as_string(inner) {
                    Some(text) => {
                        stats.fields_flattened += 1;
                        Value::String(text)
                    }
                    None => value,
                }
            }
            other => other,
        },
        FieldType::StringList => match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        // A list of objects each carrying a single
                        // string-bearing field flattens to the strings.
                        Value::Object(ref object) if object.len() == 1 => {
                            match object.values().next() {
                                Some(Value::String(text)) => {
                                    stats.fields_flattened += 1;
                                    Value::String(text.clone())
                                }
                                _ => item,
                            }
                        }
                        other => other,
                    })
                    .collect(),
            ),
            other => other,
        },
        _ => value,
    }
}

fn scalar_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Navigate a dotted field path to the slot holding its value
fn lookup_path_mut<'a>(object: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = object.get_mut(first)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}
