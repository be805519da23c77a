//! Matrix expansion, mapping each workflow job to the job names the API reports.

use bugswarm_common::errors::*;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    static ref MATRIX_PLACEHOLDER: Regex = Regex::new(r"\$\{\{\s*matrix\.([^\s}]+)\s*\}\}").unwrap();
}

/// API names are cut to this many characters.
const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedJob {
    /// Name of the job as reported by the API.
    pub api_name: String,
    /// `name:` of the job, or its id if unnamed.
    pub base_name: String,
    /// Key of the job in the workflow file.
    pub workflow_id: String,
    /// Job config with `strategy.matrix` set to a single combination.
    pub config: Value,
}

/// Dotted paths of all leaves in `value`, `prefix` is the path of `value` itself.
fn leaf_keys(value: &Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                leaf_keys(v, &format!("{}.{}", prefix, k), out);
            }
        },
        _ => out.push(prefix.to_string()),
    }
}

fn flatten_elements(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(list) => {
            for v in list {
                flatten_elements(v, out);
            }
        },
        Value::Object(map) => {
            for v in map.values() {
                flatten_elements(v, out);
            }
        },
        Value::String(s) => out.push(s.clone()),
        Value::Null => out.push("None".to_string()),
        other => out.push(other.to_string()),
    }
}

fn is_empty_str(value: &Value) -> bool {
    value.as_str() == Some("")
}

/// Python-style `value in container`.
fn contained_in(value: &Value, container: Option<&Value>) -> bool {
    match container {
        Some(Value::Array(list)) => list.contains(value),
        Some(Value::Object(map)) => value.as_str().map_or(false, |k| map.contains_key(k)),
        Some(Value::String(s)) => value.as_str().map_or(false, |v| s.contains(v)),
        _ => false,
    }
}

/// Interpolate the matrix values of `combination` into `base_name`.
///
/// Without any placeholder in the name the values of `default_keys` are
/// appended in parentheses, like the API does.
pub fn job_api_name(base_name: &str, combination: &Map<String, Value>, default_keys: &[String], matrix: &Map<String, Value>) -> String {
    let mut interpolations = Vec::new();
    for key in default_keys {
        if let Some(value) = combination.get(key) {
            if !is_empty_str(value) {
                leaf_keys(value, key, &mut interpolations);
            }
        }
    }

    let mut add_non_defaults = false;
    for (key, value) in combination {
        if default_keys.contains(key) {
            if !contained_in(value, matrix.get(key)) {
                add_non_defaults = true;
            }
        } else if add_non_defaults && !is_empty_str(value) {
            leaf_keys(value, key, &mut interpolations);
        }
    }

    let mut name = base_name.to_string();
    if !interpolations.is_empty() && !MATRIX_PLACEHOLDER.is_match(&name) {
        let placeholders = interpolations.iter()
            .map(|k| format!("${{{{ matrix.{} }}}}", k))
            .collect::<Vec<_>>();
        name = format!("{} ({})", base_name, placeholders.join(", "));
    }

    let name = MATRIX_PLACEHOLDER.replace_all(&name, |caps: &regex::Captures| {
        let mut value = Some(Value::Object(combination.clone()));
        for key in caps[1].split('.') {
            let key = key.to_lowercase();
            value = match value {
                Some(Value::Object(mut map)) => map.remove(&key),
                _ => None,
            };
        }
        let mut values = Vec::new();
        flatten_elements(&value.unwrap_or_else(|| Value::String(String::new())), &mut values);
        values.join(", ")
    });

    let name = name.trim();
    if name.chars().count() > MAX_NAME_LEN {
        let mut truncated = name.chars().take(MAX_NAME_LEN - 3).collect::<String>();
        truncated.push_str("...");
        truncated
    } else {
        name.to_string()
    }
}

/// Dicts match if all their shared keys match, everything else by equality.
pub fn partial_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.iter().all(|(k, v)| b.get(k).map_or(true, |other| partial_match(v, other)))
        },
        _ => a == b,
    }
}

fn lowercase_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.iter()
            .map(|(k, v)| (k.to_lowercase(), lowercase_keys(v)))
            .collect()),
        Value::Array(list) => Value::Array(list.iter().map(lowercase_keys).collect()),
        other => other.clone(),
    }
}

fn as_list(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(list)) => list,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

/// All combinations of a job matrix with `include` and `exclude` applied.
pub fn build_combinations(matrix: &Map<String, Value>) -> Vec<Map<String, Value>> {
    let mut matrix = match lowercase_keys(&Value::Object(matrix.clone())) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let includes = as_list(matrix.remove("include"));
    let excludes = as_list(matrix.remove("exclude"));

    let mut combinations: Vec<Map<String, Value>> = if matrix.is_empty() {
        Vec::new()
    } else {
        let mut combinations = vec![Map::new()];
        for (key, values) in &matrix {
            let values = as_list(Some(values.clone()));
            combinations = combinations.into_iter()
                .flat_map(|combination| {
                    values.iter().map(move |v| {
                        let mut next = combination.clone();
                        next.insert(key.clone(), v.clone());
                        next
                    }).collect::<Vec<_>>()
                })
                .collect();
        }
        combinations
    };

    combinations.retain(|combination| {
        let combination = Value::Object(combination.clone());
        !excludes.iter().any(|exclude| partial_match(exclude, &combination))
    });

    let mut used = vec![false; includes.len()];
    for combination in &mut combinations {
        let original = Value::Object(combination.clone());
        for (idx, include) in includes.iter().enumerate() {
            if partial_match(include, &original) {
                if let Value::Object(include) = include {
                    for (k, v) in include {
                        combination.insert(k.clone(), v.clone());
                    }
                }
                used[idx] = true;
            }
        }
    }

    for (include, used) in includes.into_iter().zip(used) {
        if !used {
            if let Value::Object(include) = include {
                combinations.push(include);
            }
        }
    }

    combinations
}

/// Expand every job of a workflow's `jobs:` section.
///
/// Returns one group per job, largest group first. Jobs whose matrix is computed
/// by another job are skipped. Two jobs that would produce the same names can't
/// be told apart and fail the whole workflow.
pub fn expand_job_matrixes(jobs: &Map<String, Value>) -> Result<Vec<Vec<ExpandedJob>>> {
    let mut groups = Vec::new();
    let mut seen: Vec<(String, Option<Value>)> = Vec::new();

    for (workflow_id, job) in jobs {
        let base_name = match job.get("name") {
            Some(Value::String(name)) => name.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => workflow_id.clone(),
        };

        match job.pointer("/strategy/matrix") {
            Some(Value::String(_)) => {
                warn!("Matrix of job {:?} depends on the output of another job, skipping", workflow_id);
                continue;
            },
            Some(Value::Object(matrix)) => {
                let key = (base_name.clone(), Some(Value::Object(matrix.clone())));
                if seen.contains(&key) {
                    bail!("Jobs named {:?} with identical matrixes can't be told apart", base_name);
                }
                seen.push(key);

                let declared = matrix.keys()
                    .filter(|k| *k != "include" && *k != "exclude")
                    .map(|k| k.to_lowercase())
                    .collect::<Vec<_>>();
                let dynamic_keys = declared.is_empty() && matrix.contains_key("include");
                let lowered = match lowercase_keys(&Value::Object(matrix.clone())) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };

                let mut group = Vec::new();
                for combination in build_combinations(matrix) {
                    let default_keys = if dynamic_keys {
                        combination.keys().cloned().collect::<Vec<_>>()
                    } else {
                        declared.clone()
                    };
                    let api_name = job_api_name(&base_name, &combination, &default_keys, &lowered);

                    let mut config = job.clone();
                    if let Some(strategy) = config.get_mut("strategy").and_then(Value::as_object_mut) {
                        strategy.insert("matrix".to_string(), Value::Object(combination));
                    }
                    group.push(ExpandedJob {
                        api_name,
                        base_name: base_name.clone(),
                        workflow_id: workflow_id.clone(),
                        config,
                    });
                }
                groups.push(group);
            },
            _ => {
                let key = (base_name.clone(), None);
                if seen.contains(&key) {
                    bail!("Multiple jobs named {:?} can't be told apart", base_name);
                }
                seen.push(key);

                groups.push(vec![ExpandedJob {
                    api_name: job_api_name(&base_name, &Map::new(), &[], &Map::new()),
                    base_name,
                    workflow_id: workflow_id.clone(),
                    config: job.clone(),
                }]);
            },
        }
    }

    groups.sort_by(|a: &Vec<ExpandedJob>, b| b.len().cmp(&a.len()));
    Ok(groups)
}
