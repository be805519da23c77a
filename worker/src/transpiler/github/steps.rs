//! Locating the workflow step behind the failed step the API reports.
//!
//! The API's step list starts with steps the runner adds on its own (`Set up
//! job`, `Set up runner`, `Initialize containers`, `Pull <image>`, `Build
//! <action>` and `Pre <action>` steps). Those are subtracted from the reported
//! index to find the step in the workflow file.

use super::matrix::job_api_name;
use crate::errors::TranspileError;
use bugswarm_common::errors::*;
use bugswarm_common::model::ApiStep;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedStep {
    Uses(String),
    Run(String),
}

impl FailedStep {
    pub fn kind(&self) -> &'static str {
        match self {
            FailedStep::Uses(_) => "uses",
            FailedStep::Run(_) => "run",
        }
    }

    pub fn command(&self) -> &str {
        match self {
            FailedStep::Uses(s) | FailedStep::Run(s) => s,
        }
    }
}

fn step_str<'a>(step: &'a Value, key: &str) -> Option<&'a str> {
    step.get(key).and_then(Value::as_str)
}

/// Name the API shows for a workflow step.
pub fn display_name(step: &Value, matrix: &Map<String, Value>) -> Option<String> {
    if let Some(name) = step.get("name").filter(|v| !v.is_null()) {
        let name = match name {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(job_api_name(&name, matrix, &[], matrix))
    } else if let Some(uses) = step_str(step, "uses") {
        Some(format!("Run {}", uses))
    } else {
        step_str(step, "run").map(|run| format!("Run {}", run.lines().next().unwrap_or("")))
    }
}

pub fn failed_step(failed_step_index: usize, config: &Value, api_steps: &[ApiStep]) -> Result<FailedStep> {
    let steps = config.get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| TranspileError::InvalidWorkflow("job has no steps".to_string()))?;
    let api_names = api_steps.iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>();

    let failed_api_name = api_names.get(failed_step_index)
        .copied()
        .ok_or_else(|| format_err!("Failed step index {} is out of range of {} api steps",
            failed_step_index, api_names.len()))?;

    // `Set up job` is always first
    let mut index = failed_step_index as i64 - 1;

    if api_names.get(1) == Some(&"Set up runner") {
        index -= 1;
    }

    if (config.get("container").is_some() || config.get("services").is_some())
        && api_names.contains(&"Initialize containers")
    {
        index -= 1;
    }

    let docker_images = steps.iter()
        .filter_map(|s| step_str(s, "uses"))
        .filter(|uses| uses.starts_with("docker://"))
        .collect::<BTreeSet<_>>();
    index -= docker_images.len() as i64;

    let built_actions = steps.iter()
        .filter_map(|s| step_str(s, "uses"))
        .filter(|uses| api_names.contains(&format!("Build {}", uses).as_str()))
        .collect::<BTreeSet<_>>();
    index -= built_actions.len() as i64;

    let first_is_pre = steps.first()
        .and_then(|s| step_str(s, "name"))
        .map_or(false, |name| name.starts_with("Pre "));
    if first_is_pre {
        warn!("Unable to check for pre steps, the first step's name starts with 'Pre '");
    } else {
        let first_step_index = failed_step_index as i64 - index;
        if index >= 0 && (api_names.len() as i64) > first_step_index {
            for name in &api_names[first_step_index as usize..] {
                if name.starts_with("Pre ") {
                    index -= 1;
                } else {
                    break;
                }
            }
        } else {
            warn!("Unable to check for pre steps (index: {}, first index: {})", index, first_step_index);
        }
    }

    if index < 0 || index as usize >= steps.len() {
        if index < 0 || failed_api_name == "Set up job" {
            bail!("Cannot find failed step, maybe set up job step failed?");
        }
        bail!("Step index out of bounds (Unknown API step or wrong workflow file?)");
    }
    let step = &steps[index as usize];

    let matrix = config.pointer("/strategy/matrix")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let expected = display_name(step, &matrix).unwrap_or_default();
    if failed_api_name != expected && !expected.contains("${{") {
        if failed_api_name == "Set up job" {
            bail!("Cannot find failed step, maybe set up job step failed?");
        }
        bail!("Error finding step index: names differ ({:?} != {:?})", failed_api_name, expected);
    }

    if let Some(uses) = step_str(step, "uses") {
        Ok(FailedStep::Uses(uses.to_string()))
    } else if let Some(run) = step_str(step, "run") {
        Ok(FailedStep::Run(run.to_string()))
    } else {
        Err(TranspileError::InvalidWorkflow("step has neither \"uses\" key nor \"run\" key".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api(names: &[&str]) -> Vec<ApiStep> {
        names.iter()
            .enumerate()
            .map(|(i, name)| ApiStep {
                name: name.to_string(),
                number: Some(i + 1),
                conclusion: None,
            })
            .collect()
    }

    fn config() -> Value {
        json!({
            "runs-on": "ubuntu-latest",
            "strategy": {"matrix": {"java": 11}},
            "steps": [
                {"uses": "actions/checkout@v3"},
                {"name": "Set up JDK ${{ matrix.java }}", "uses": "actions/setup-java@v3"},
                {"name": "Build", "run": "mvn -B package\nmvn verify"},
            ],
        })
    }

    #[test]
    fn simple_run_step() {
        let steps = api(&["Set up job", "Run actions/checkout@v3", "Set up JDK 11", "Build", "Complete job"]);
        let step = failed_step(3, &config(), &steps).unwrap();
        assert_eq!(step, FailedStep::Run("mvn -B package\nmvn verify".to_string()));
        assert_eq!(step.kind(), "run");
    }

    #[test]
    fn interpolated_step_name() {
        let steps = api(&["Set up job", "Run actions/checkout@v3", "Set up JDK 11", "Build"]);
        let step = failed_step(2, &config(), &steps).unwrap();
        assert_eq!(step, FailedStep::Uses("actions/setup-java@v3".to_string()));
    }

    #[test]
    fn runner_and_pre_steps_are_skipped() {
        let steps = api(&[
            "Set up job", "Set up runner", "Pre Set up JDK 11",
            "Run actions/checkout@v3", "Set up JDK 11", "Build",
        ]);
        let step = failed_step(5, &config(), &steps).unwrap();
        assert_eq!(step.command(), "mvn -B package\nmvn verify");
    }

    #[test]
    fn containers_and_docker_images() {
        let config = json!({
            "container": "node:16",
            "steps": [
                {"uses": "docker://alpine:3.16"},
                {"run": "npm test"},
            ],
        });
        let steps = api(&["Set up job", "Initialize containers", "Pull alpine:3.16", "Run docker://alpine:3.16", "Run npm test"]);
        let step = failed_step(4, &config, &steps).unwrap();
        assert_eq!(step, FailedStep::Run("npm test".to_string()));
    }

    #[test]
    fn failure_in_set_up_job() {
        let steps = api(&["Set up job", "Run actions/checkout@v3"]);
        let err = failed_step(0, &config(), &steps).unwrap_err();
        assert!(err.to_string().contains("maybe set up job step failed"));
    }

    #[test]
    fn mismatching_names() {
        let steps = api(&["Set up job", "Run actions/checkout@v3", "Set up JDK 11", "Deploy"]);
        let err = failed_step(3, &config(), &steps).unwrap_err();
        assert!(err.to_string().contains("names differ"));
    }
}
