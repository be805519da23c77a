//! GitHub Actions jobs, turned into a standalone `build.sh`.

pub mod actions;
pub mod env;
pub mod event;
pub mod expressions;
pub mod matrix;
pub mod script;
pub mod steps;

use self::actions::{ActionRef, CHECKOUT_ACTION};
use self::expressions::{to_str, Contexts};
use self::script::{Header, Step};
use crate::errors::TranspileError;
use bugswarm_common::errors::*;
use bugswarm_common::model::{BuildPairRecord, Side};
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

lazy_static! {
    static ref RUNNER_IMAGE_VERSION: Regex = Regex::new(r"(Image|Environment): (\S+)").unwrap();
}

pub const DEFAULT_RUNNER: &str = "ubuntu-22.04";
pub const RUNNER_IMAGE_REPO: &str = "bugswarm/githubactionsjobrunners";
const SUPPORTED_RUNNERS: &[&str] = &["ubuntu-22.04", "ubuntu-20.04", "ubuntu-18.04"];
/// Length of the `2022-08-08T20:52:01.1234567Z ` prefix of log lines.
const TIMESTAMP_LEN: usize = 29;

/// Runner image for a `runs-on` label we have an image for.
pub fn runner_image(label: &str) -> Option<String> {
    let label = label.to_lowercase();
    if SUPPORTED_RUNNERS.contains(&label.as_str()) {
        Some(format!("{}:{}", RUNNER_IMAGE_REPO, label))
    } else {
        None
    }
}

/// The runner image label the original run reported, e.g. `ubuntu-20.04` for `ubuntu-latest`.
pub fn runner_label_from_log(log: &str) -> Option<String> {
    let mut in_group = false;
    for line in log.lines() {
        let line = match line.get(TIMESTAMP_LEN..) {
            Some(line) if !line.is_empty() => line,
            _ => continue,
        };
        if in_group {
            return RUNNER_IMAGE_VERSION.captures(line).map(|c| c[2].to_string());
        } else if line.starts_with("##[group]Runner Image") || line.starts_with("##[group]Virtual Environment") {
            in_group = true;
        }
    }
    None
}

/// Pick a supported runner label from `runs-on`, then from the original log.
pub fn runs_on(config: &Value, orig_log: Option<&str>) -> String {
    let labels = match config.get("runs-on") {
        Some(Value::String(label)) => vec![label.as_str()],
        Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
        _ => vec![],
    };
    if let Some(label) = labels.into_iter().find(|l| runner_image(l).is_some()) {
        return label.to_string();
    }

    orig_log
        .and_then(runner_label_from_log)
        .filter(|label| runner_image(label).is_some())
        .unwrap_or_else(|| DEFAULT_RUNNER.to_string())
}

/// Image of the job's `container:`, which replaces the runner image.
pub fn container_image(config: &Value) -> Option<String> {
    match config.get("container") {
        Some(Value::String(image)) if !image.is_empty() => Some(image.clone()),
        Some(Value::Object(container)) => container.get("image")
            .and_then(Value::as_str)
            .filter(|image| !image.is_empty())
            .map(String::from),
        _ => None,
    }
}

/// Everything about a job the generated files depend on.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub repo: String,
    pub job_id: u64,
    pub sha: String,
    pub base_sha: String,
    pub branch: String,
    pub base_branch: String,
    pub pr_num: Option<i64>,
    pub message: String,
    pub committed_at: Option<String>,
    /// Key of the job in the workflow file.
    pub workflow_job: String,
    pub workflow_name: String,
    pub config: Value,
}

impl JobInfo {
    pub fn new(bp: &BuildPairRecord, side: Side, job_id: u64) -> Result<JobInfo> {
        let build = bp.build(side);
        let job = build.job(job_id)?;
        let config_str = |key: &str| job.config.get(key).and_then(Value::as_str).map(String::from);

        Ok(JobInfo {
            repo: bp.repo.clone(),
            job_id,
            sha: build.trigger_sha().to_string(),
            base_sha: build.base_sha.clone(),
            branch: bp.branch.clone(),
            base_branch: bp.base_branch.clone().unwrap_or_default(),
            pr_num: if bp.is_pr() { Some(bp.pr_num) } else { None },
            message: build.message.clone(),
            committed_at: build.committed_at.clone(),
            workflow_job: config_str("id-in-workflow").unwrap_or_else(|| "build".to_string()),
            workflow_name: config_str("workflow-name").unwrap_or_else(|| "CI".to_string()),
            config: job.config.clone(),
        })
    }

    pub fn owner(&self) -> &str {
        self.repo.split('/').next().unwrap_or_default()
    }

    pub fn event_name(&self) -> &'static str {
        if self.pr_num.is_some() {
            "pull_request"
        } else {
            "push"
        }
    }

    pub fn git_ref(&self) -> String {
        match self.pr_num {
            Some(pr) => format!("refs/pull/{}/merge", pr),
            None => format!("refs/heads/{}", self.branch),
        }
    }

    pub fn ref_name(&self) -> String {
        match self.pr_num {
            Some(pr) => format!("{}/merge", pr),
            None => self.branch.clone(),
        }
    }

    pub fn base_ref(&self) -> String {
        if self.pr_num.is_some() {
            self.base_branch.clone()
        } else {
            String::new()
        }
    }

    pub fn head_ref(&self) -> String {
        if self.pr_num.is_some() {
            self.branch.clone()
        } else {
            String::new()
        }
    }

    /// Checkout of the repository inside the container.
    pub fn build_path(&self) -> String {
        format!("/home/github/build/{}", self.repo)
    }

    pub fn steps_dir(&self) -> String {
        format!("/home/github/{}/steps", self.job_id)
    }
}

/// Outcome of transpiling one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Transpiled {
    /// Image the job runs in.
    pub image: String,
    /// Supported runner label, also used to fetch the tool cache into custom containers.
    pub runs_on: String,
    /// Image from `container:`, if the job brings its own.
    pub container: Option<String>,
    pub script: String,
}

fn str_map(value: Option<&Value>) -> IndexMap<String, String> {
    value.and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), to_str(v))).collect())
        .unwrap_or_default()
}

struct Builder<'a> {
    job: &'a JobInfo,
    /// `<context>/<job_id>`, holding `actions/`, `steps/` and `event.json`.
    out_dir: PathBuf,
    repo_dir: &'a Path,
    known_shas: HashMap<String, String>,
    ctx: Contexts,
    seen_checkout: bool,
    default_shell: Option<String>,
    default_working_dir: Option<String>,
}

impl<'a> Builder<'a> {
    fn actions_dir(&self) -> PathBuf {
        self.out_dir.join("actions")
    }

    /// `K=V ` pairs for a step, runner variables first so the workflow can override them.
    fn env_str(&self, number: &str, action_repo: &str, ctx: &Contexts, env: &IndexMap<String, String>, inputs: &IndexMap<String, String>) -> Result<String> {
        let mut out = env::env_str(env::runner_env(self.job, number, action_repo)
            .iter()
            .map(|(k, v)| (*k, v)));
        out.push_str("\"${CURRENT_ENV[@]}\" ");
        for (key, value) in env {
            out.push_str(&format!("{}={} ", key, ctx.substitute(value)?));
        }
        for (key, value) in inputs {
            out.push_str(&format!("{}={} ", key, value));
        }
        Ok(out)
    }

    fn step_contexts(&self, env: &IndexMap<String, String>) -> Contexts {
        let known = env.iter()
            .map(|(k, v)| (k.clone(), self.ctx.interpolate(v)))
            .filter(|(_, v)| !v.contains("${{"))
            .collect::<IndexMap<_, _>>();
        self.ctx.with_env(&known)
    }

    fn step_name(&self, step: &Value) -> String {
        let matrix = self.ctx.get("matrix")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        steps::display_name(step, &matrix)
            .map(|name| self.ctx.interpolate(&name))
            .unwrap_or_else(|| "Run".to_string())
    }

    fn parse_steps<'b>(&'b mut self, raw: &'b [Value], prefix: Option<&'b str>, parent_env: &'b IndexMap<String, String>) -> BoxFuture<'b, Result<Vec<Step>>> {
        async move {
            let mut out = Vec::new();
            for (idx, step) in raw.iter().enumerate() {
                let number = match prefix {
                    Some(prefix) => format!("{}.{}", prefix, idx),
                    None => idx.to_string(),
                };

                let mut env = parent_env.clone();
                env.extend(str_map(step.get("env")));

                let parsed = if let Some(uses) = step.get("uses").and_then(Value::as_str) {
                    self.predefined_action(&number, step, uses, &env).await?
                } else if let Some(run) = step.get("run") {
                    Some(self.custom_command(&number, step, &to_str(run), &env)?)
                } else {
                    return Err(TranspileError::UnsupportedStep(
                        format!("step {} has neither \"uses\" key nor \"run\" key", number)).into());
                };
                out.extend(parsed);
            }
            Ok(out)
        }.boxed()
    }

    fn custom_command(&self, number: &str, step: &Value, run: &str, env: &IndexMap<String, String>) -> Result<Step> {
        debug!("Setting up custom command step #{}", number);
        let ctx = self.step_contexts(env);

        let shell = step.get("shell")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| self.default_shell.clone());
        let (ext, exec_template) = script::shell_template(shell.as_deref());

        let working_dir = match step.get("working-directory").map(to_str).or_else(|| self.default_working_dir.clone()) {
            Some(dir) => Some(ctx.substitute(&dir)?),
            None => None,
        };

        Ok(Step {
            number: number.to_string(),
            name: self.step_name(step),
            id: step.get("id").map(to_str),
            setup_cmd: None,
            run_cmd: ctx.substitute(run)?,
            envs: self.env_str(number, "", &ctx, env, &IndexMap::new())?,
            working_dir,
            filename: format!("bugswarm_{}.{}", number, ext),
            exec_template,
            condition: ctx.step_if(step.get("if"))?,
            continue_on_error: ctx.flag(step.get("continue-on-error"))?,
        })
    }

    async fn predefined_action(&mut self, number: &str, step: &Value, uses: &str, env: &IndexMap<String, String>) -> Result<Option<Step>> {
        let action = ActionRef::parse(uses, &self.job.repo)?;

        if action.repo.to_lowercase().starts_with(CHECKOUT_ACTION) {
            if !self.seen_checkout {
                let with = step.get("with");
                if with.and_then(|w| w.get("repository").or_else(|| w.get("path"))).is_some() {
                    return Err(TranspileError::UnsupportedStep(
                        format!("first checkout in step {} uses unsupported parameters repository/path", number)).into());
                }
            }
            self.seen_checkout = true;
            debug!("Skipping checkout in step #{}, the repository is set up already", number);
            return Ok(None);
        }
        if action.is_ignored() {
            debug!("Skipping ignored action {:?} in step #{}", uses, number);
            return Ok(None);
        }

        debug!("Setting up predefined action {:?} in step #{}", uses, number);
        actions::fetch(&action, &self.actions_dir(), self.repo_dir, &self.known_shas).await?;
        let metadata = actions::load_metadata(&action, &self.actions_dir()).await?;

        let ctx = self.step_contexts(env);
        let (inputs, inputs_ctx) = actions::inputs(&action, step.get("with").and_then(Value::as_object), &metadata, &ctx)?;
        let action_path = action.container_path(self.job.job_id);

        let (setup_cmd, run_cmd, filename) = match metadata.runs.using.as_str() {
            "node12" | "node16" | "node20" => {
                let main = metadata.runs.main.as_deref()
                    .ok_or_else(|| TranspileError::InvalidPredefinedAction(format!("{} has no runs.main", uses)))?;
                let setup = metadata.runs.pre.as_deref()
                    .map(|pre| expressions::quote(&format!("node {}/{}", action_path, pre)));
                let run = expressions::quote(&format!("node {}/{}", action_path, main));
                (setup, run, "bugswarm_cmd.sh".to_string())
            },
            "composite" => {
                let saved = self.ctx.clone();
                self.ctx.set("inputs", Value::Object(inputs_ctx));
                let sub_steps = self.parse_steps(&metadata.runs.steps, Some(number), env).await;
                self.ctx = saved;
                let sub_steps = sub_steps?;

                let composite = script::generate(Header::Composite, &sub_steps, &self.job.steps_dir());
                let name = format!("bugswarm_{}_composite.sh", number);
                fs::write(self.out_dir.join("steps").join(&name), composite).await?;
                let run = expressions::quote(&format!("{}/{}", self.job.steps_dir(), name));
                (None, run, format!("bugswarm_{}.sh", number))
            },
            other => {
                return Err(TranspileError::InvalidPredefinedAction(
                    format!("{} uses unsupported runtime {:?}", uses, other)).into());
            },
        };

        Ok(Some(Step {
            number: number.to_string(),
            name: self.step_name(step),
            id: step.get("id").map(to_str),
            setup_cmd,
            run_cmd,
            envs: self.env_str(number, &action.repo, &ctx, env, &inputs)?,
            working_dir: None,
            filename,
            exec_template: script::shell_template(None).1,
            condition: ctx.step_if(step.get("if"))?,
            continue_on_error: ctx.flag(step.get("continue-on-error"))?,
        }))
    }
}

fn job_contexts(job: &JobInfo, event: &Value) -> Contexts {
    let mut ctx = Contexts::new();
    ctx.set("matrix", job.config.pointer("/strategy/matrix")
        .filter(|m| m.is_object())
        .cloned()
        .unwrap_or_else(|| json!({})));
    ctx.set("github", json!({
        "action": "",
        "action_path": "",
        "actor": job.owner(),
        "api_url": "https://api.github.com",
        "base_ref": job.base_ref(),
        "event": event,
        "event_name": job.event_name(),
        "event_path": format!("{}/event.json", env::WORKFLOW_DIR),
        "graphql_url": "https://api.github.com/graphql",
        "head_ref": job.head_ref(),
        "job": job.workflow_job,
        "ref": job.git_ref(),
        "ref_name": job.ref_name(),
        "ref_type": "branch",
        "repository": job.repo,
        "repository_owner": job.owner(),
        "repositoryUrl": format!("git://github.com/{}.git", job.repo),
        "retention_days": "0",
        "run_attempt": "1",
        "run_id": "1",
        "run_number": "1",
        "server_url": "https://github.com",
        "sha": job.sha,
        "token": "DUMMY",
        "triggering_actor": job.owner(),
        "workflow": job.workflow_name,
        "workspace": job.build_path(),
    }));
    ctx.set("runner", json!({
        "arch": "X64",
        "name": "Bugswarm GitHub Actions Runner",
        "os": "Linux",
        "temp": "/tmp",
        "tool_cache": "/opt/hostedtoolcache",
    }));
    ctx.set("strategy", json!({
        "fail-fast": false,
        "job-index": 0,
        "job-total": 1,
        "max-parallel": 1,
    }));
    ctx.set("secrets", json!({}));
    ctx.set("inputs", json!({}));
    ctx
}

/// Write `build.sh`, `event.json` and the `actions/` and `steps/` trees of a job into `out_dir`.
///
/// `repo_dir` is the job's checkout, local actions are copied from there.
pub async fn transpile(job: &JobInfo, out_dir: &Path, repo_dir: &Path, orig_log: Option<&str>) -> Result<Transpiled> {
    let raw_steps = match job.config.get("steps") {
        Some(Value::Array(steps)) if !steps.is_empty() => steps,
        Some(Value::Array(_)) => return Err(TranspileError::InvalidWorkflow("job has no steps".to_string()).into()),
        _ => return Err(TranspileError::InvalidWorkflow("steps attribute is missing from config".to_string()).into()),
    };

    let runs_on = runs_on(&job.config, orig_log);
    let container = container_image(&job.config);
    let image = match &container {
        Some(image) => image.clone(),
        None => runner_image(&runs_on).unwrap_or_else(|| format!("{}:{}", RUNNER_IMAGE_REPO, DEFAULT_RUNNER)),
    };
    info!("Transpiling job {} of {} ({} steps, image {})", job.job_id, job.repo, raw_steps.len(), image);

    for dir in ["actions", "steps"] {
        fs::create_dir_all(out_dir.join(dir)).await
            .with_context(|| anyhow!("Failed to create {:?}", out_dir.join(dir)))?;
    }

    let event = event::payload(job);
    fs::write(out_dir.join("event.json"), serde_json::to_string_pretty(&event)?).await?;

    let defaults = job.config.pointer("/defaults/run");
    let mut builder = Builder {
        job,
        out_dir: out_dir.to_path_buf(),
        repo_dir,
        known_shas: orig_log.map(actions::action_shas).unwrap_or_default(),
        ctx: job_contexts(job, &event),
        seen_checkout: false,
        default_shell: defaults.and_then(|d| d.get("shell")).and_then(Value::as_str).map(String::from),
        default_working_dir: defaults.and_then(|d| d.get("working-directory")).map(to_str),
    };

    let job_env = str_map(job.config.get("env"));
    let steps = builder.parse_steps(raw_steps, None, &job_env).await?;
    debug!("Generating build script ({} of {} steps)", steps.len(), raw_steps.len());

    let build_path = job.build_path();
    let script = script::generate(Header::Job {
        job_id: job.job_id,
        build_path: &build_path,
        runs_on: Some(&runs_on),
    }, &steps, &job.steps_dir());
    fs::write(out_dir.join(super::dockerfile::SCRIPT), &script).await?;

    Ok(Transpiled {
        image,
        runs_on,
        container,
        script,
    })
}

/// The workflow job an expanded matrix entry was built from, by API name.
pub fn find_job<'a>(groups: &'a [Vec<matrix::ExpandedJob>], api_name: &str) -> Option<&'a matrix::ExpandedJob> {
    groups.iter()
        .flatten()
        .find(|job| job.api_name == api_name)
}

/// Workflow `jobs:` section of a parsed workflow file.
pub fn workflow_jobs(workflow: &str) -> Result<Map<String, Value>> {
    let workflow = serde_yaml::from_str::<Value>(workflow)
        .map_err(|err| TranspileError::InvalidWorkflow(err.to_string()))?;
    workflow.get("jobs")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| TranspileError::InvalidWorkflow("workflow has no jobs".to_string()).into())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn job_info() -> JobInfo {
        JobInfo {
            repo: "alibaba/nacos".to_string(),
            job_id: 8267344544,
            sha: "a6b1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b8c9".to_string(),
            base_sha: String::new(),
            branch: "master".to_string(),
            base_branch: String::new(),
            pr_num: None,
            message: "Fix config listener".to_string(),
            committed_at: Some("2022-09-07T08:12:33Z".to_string()),
            workflow_job: "test".to_string(),
            workflow_name: "Continuous Integration".to_string(),
            config: json!({
                "runs-on": "ubuntu-latest",
                "steps": [
                    {"uses": "actions/checkout@v3"},
                    {"uses": "actions/cache@v3", "with": {"path": "~/.m2"}},
                    {"name": "Build", "run": "mvn -B test -Dtest=${{ matrix.test }}", "env": {"MAVEN_OPTS": "-Xmx2g"}},
                ],
                "strategy": {"matrix": {"test": "ConfigTest"}},
            }),
        }
    }

    #[test]
    fn supported_runner_images() {
        assert_eq!(runner_image("ubuntu-20.04").as_deref(), Some("bugswarm/githubactionsjobrunners:ubuntu-20.04"));
        assert_eq!(runner_image("Ubuntu-22.04").as_deref(), Some("bugswarm/githubactionsjobrunners:ubuntu-22.04"));
        assert_eq!(runner_image("ubuntu-latest"), None);
        assert_eq!(runner_image("windows-2019"), None);
    }

    #[test]
    fn runner_label_from_original_log() {
        let log = "2022-09-07T08:12:33.1234567Z Current runner version: '2.296.1'\n\
                   2022-09-07T08:12:33.1234567Z ##[group]Operating System\n\
                   2022-09-07T08:12:33.1234567Z Ubuntu\n\
                   2022-09-07T08:12:33.1234567Z ##[endgroup]\n\
                   2022-09-07T08:12:33.1234567Z ##[group]Runner Image\n\
                   2022-09-07T08:12:33.1234567Z Image: ubuntu-20.04\n";
        assert_eq!(runner_label_from_log(log).as_deref(), Some("ubuntu-20.04"));

        let config = json!({"runs-on": "ubuntu-latest"});
        assert_eq!(runs_on(&config, Some(log)), "ubuntu-20.04");
        assert_eq!(runs_on(&config, None), "ubuntu-22.04");
        assert_eq!(runs_on(&json!({"runs-on": ["self-hosted", "ubuntu-18.04"]}), Some(log)), "ubuntu-18.04");
    }

    #[test]
    fn job_container() {
        assert_eq!(container_image(&json!({"container": "node:16"})).as_deref(), Some("node:16"));
        assert_eq!(container_image(&json!({"container": {"image": "python:3.9", "options": "--cpus 1"}})).as_deref(), Some("python:3.9"));
        assert_eq!(container_image(&json!({"container": ""})), None);
        assert_eq!(container_image(&json!({})), None);
    }

    #[tokio::test]
    async fn transpile_run_steps() {
        let dir = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        let job = job_info();
        let out = transpile(&job, dir.path(), repo.path(), None).await.unwrap();

        assert_eq!(out.image, "bugswarm/githubactionsjobrunners:ubuntu-22.04");
        assert_eq!(out.runs_on, "ubuntu-22.04");
        assert!(dir.path().join("event.json").is_file());
        assert!(dir.path().join("steps").is_dir());

        let script = std::fs::read_to_string(dir.path().join("build.sh")).unwrap();
        assert_eq!(script, out.script);
        assert!(script.contains("echo \"##[group]\"Build\n"));
        assert!(script.contains("printf '%s\\n' 'mvn -B test -Dtest=ConfigTest' > /home/github/8267344544/steps/bugswarm_2.sh\n"));
        assert!(script.contains("MAVEN_OPTS=-Xmx2g "));
        assert!(script.contains("GITHUB_ACTION=2 "));
        assert!(script.contains("GITHUB_WORKFLOW='Continuous Integration' "));
        // checkout and cache are not part of the script
        assert!(!script.contains("bugswarm_0"));
        assert!(!script.contains("bugswarm_1"));
    }

    #[tokio::test]
    async fn conditions_and_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_info();
        job.config = json!({
            "runs-on": "ubuntu-20.04",
            "defaults": {"run": {"shell": "bash"}},
            "steps": [
                {"id": "tests", "run": "./gradlew test", "continue-on-error": true},
                {"if": "always()", "run": "cat build/reports/*.txt", "working-directory": "server"},
                {"if": "steps.tests.outcome == 'failure'", "run": "exit 1"},
            ],
        });
        let out = transpile(&job, dir.path(), dir.path(), None).await.unwrap();
        let script = out.script;

        assert!(script.contains("echo \"20.04\"\n"));
        assert!(script.contains("bash --noprofile --norc -eo pipefail /home/github/8267344544/steps/bugswarm_0.sh"));
        assert!(script.contains("  CONTINUE_ON_ERROR=true\n"));
        assert!(script.contains("_CONTEXT_STEPS_TESTS_OUTCOME=failure"));
        assert!(script.contains("STEP_CONDITION=true\n"));
        assert!(script.contains("pushd server > /dev/null\n"));
        assert!(script.contains("_CONTEXT_STEPS_TESTS_OUTCOME:-"));
    }

    #[tokio::test]
    async fn local_composite_action() {
        let dir = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        let action_dir = repo.path().join(".github/actions/build");
        std::fs::create_dir_all(&action_dir).unwrap();
        std::fs::write(action_dir.join("action.yml"), r#"
name: Build
inputs:
  goal:
    default: verify
runs:
  using: composite
  steps:
    - run: mvn -B ${{ inputs.goal }}
      shell: bash
"#).unwrap();

        let mut job = job_info();
        job.config = json!({
            "runs-on": "ubuntu-22.04",
            "steps": [
                {"uses": "./.github/actions/build"},
            ],
        });
        let out = transpile(&job, dir.path(), repo.path(), None).await.unwrap();

        assert!(out.script.contains("printf '%s\\n' /home/github/8267344544/steps/bugswarm_0_composite.sh > /home/github/8267344544/steps/bugswarm_0.sh\n"));
        assert!(out.script.contains("INPUT_GOAL=verify "));
        let composite = std::fs::read_to_string(dir.path().join("steps/bugswarm_0_composite.sh")).unwrap();
        assert!(composite.starts_with("#!/usr/bin/env bash\n\nset -o allexport\n"));
        assert!(composite.contains("printf '%s\\n' 'mvn -B verify' > /home/github/8267344544/steps/bugswarm_0.0.sh\n"));
        assert!(dir.path().join("actions/alibaba-nacos/.github/actions/build/action.yml").is_file());
    }

    #[tokio::test]
    async fn zero_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_info();
        job.config = json!({"runs-on": "ubuntu-22.04", "steps": []});
        let err = transpile(&job, dir.path(), dir.path(), None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TranspileError>(), Some(TranspileError::InvalidWorkflow(_))));
    }

    #[tokio::test]
    async fn docker_action() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_info();
        job.config = json!({"steps": [{"uses": "docker://alpine:3.16"}]});
        let err = transpile(&job, dir.path(), dir.path(), None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TranspileError>(), Some(TranspileError::UnsupportedAction(_))));
    }

    #[tokio::test]
    async fn step_without_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_info();
        job.config = json!({"steps": [{"name": "nothing"}]});
        let err = transpile(&job, dir.path(), dir.path(), None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TranspileError>(), Some(TranspileError::UnsupportedStep(_))));
    }

    #[test]
    fn jobs_of_workflow() {
        let jobs = workflow_jobs("name: CI\non: push\njobs:\n  test:\n    runs-on: ubuntu-latest\n    steps:\n      - run: make\n").unwrap();
        assert!(jobs.contains_key("test"));
        let groups = matrix::expand_job_matrixes(&jobs).unwrap();
        assert_eq!(find_job(&groups, "test").map(|j| j.workflow_id.as_str()), Some("test"));
        assert!(workflow_jobs("name: CI\n").is_err());
    }
}
