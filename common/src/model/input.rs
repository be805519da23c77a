use crate::errors::*;
use crate::model::MatchHistory;
use crate::CiService;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// A fail-pass build pair as emitted by the pair finder and filter.
///
/// Unknown keys are carried through untouched so the annotated result json
/// keeps everything the upstream stages wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPairRecord {
    pub repo: String,
    #[serde(default = "default_ci_service")]
    pub ci_service: CiService,
    #[serde(default)]
    pub repo_mined_version: Option<String>,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default = "default_pr_num")]
    pub pr_num: i64,
    #[serde(default)]
    pub merged_at: Option<String>,
    #[serde(default)]
    pub is_error_pass: bool,
    pub failed_build: BuildRecord,
    pub passed_build: BuildRecord,
    pub jobpairs: Vec<JobPairRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#match: Option<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_ci_service() -> CiService {
    CiService::Github
}

fn default_pr_num() -> i64 {
    -1
}

impl BuildPairRecord {
    pub fn is_pr(&self) -> bool {
        self.pr_num != -1
    }

    pub fn build(&self, side: Side) -> &BuildRecord {
        match side {
            Side::Failed => &self.failed_build,
            Side::Passed => &self.passed_build,
        }
    }

    /// Checks the structural invariants a build pair must hold before it is reproduced.
    pub fn validate(&self) -> Result<()> {
        if self.repo.matches('/').count() != 1 {
            bail!("Invalid repository name: {:?}", self.repo);
        }
        if self.failed_build.build_id >= self.passed_build.build_id {
            bail!("Failed build {} does not precede passed build {} in {}",
                self.failed_build.build_id, self.passed_build.build_id, self.repo);
        }
        if self.failed_build.jobs.is_empty() || self.passed_build.jobs.is_empty() {
            bail!("Build pair {}/{}-{} has a build without jobs",
                self.repo, self.failed_build.build_id, self.passed_build.build_id);
        }
        for jp in &self.jobpairs {
            self.failed_build.job(jp.failed_job.job_id)
                .with_context(|| anyhow!("Failed job of job pair missing from failed build in {}", self.repo))?;
            self.passed_build.job(jp.passed_job.job_id)
                .with_context(|| anyhow!("Passed job of job pair missing from passed build in {}", self.repo))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub build_id: u64,
    #[serde(default)]
    pub base_sha: String,
    pub head_sha: String,
    #[serde(default)]
    pub travis_merge_sha: Option<String>,
    #[serde(default)]
    pub resettable: bool,
    #[serde(default)]
    pub github_archived: bool,
    #[serde(default)]
    pub committed_at: Option<String>,
    #[serde(default)]
    pub message: String,
    pub jobs: Vec<JobRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BuildRecord {
    pub fn job(&self, job_id: u64) -> Result<&JobRecord> {
        self.jobs.iter()
            .find(|j| j.job_id == job_id)
            .ok_or_else(|| format_err!("Job {} not found in build {}", job_id, self.build_id))
    }

    /// The commit the job should be reset to.
    pub fn trigger_sha(&self) -> &str {
        match &self.travis_merge_sha {
            Some(sha) if !sha.is_empty() => sha,
            _ => &self.head_sha,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: u64,
    #[serde(default)]
    pub build_job: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ApiStep>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobRecord {
    /// Normalized language label of the job.
    pub fn language(&self) -> String {
        let lang = self.language.to_lowercase();
        match lang.as_str() {
            "node_js" | "node" | "typescript" => "javascript".to_string(),
            _ => lang,
        }
    }

    /// Travis reports `build.build.job` for some jobs; collapse it to `build.job`.
    pub fn build_job(&self) -> String {
        let parts = self.build_job.split('.').collect::<Vec<_>>();
        if parts.len() == 3 {
            format!("{}.{}", parts[0], parts[2])
        } else {
            self.build_job.clone()
        }
    }
}

/// A step as reported by the CI provider's API for a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPairRecord {
    pub failed_job: JobPairJob,
    pub passed_job: JobPairJob,
    #[serde(default)]
    pub is_filtered: bool,
    #[serde(default)]
    pub filtered_reason: Option<String>,
    #[serde(default = "default_build_system")]
    pub build_system: String,
    #[serde(default)]
    pub failed_step_kind: Option<String>,
    #[serde(default)]
    pub failed_step_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_history: Option<MatchHistory>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_build_system() -> String {
    "NA".to_string()
}

impl JobPairRecord {
    pub fn job(&self, side: Side) -> &JobPairJob {
        match side {
            Side::Failed => &self.failed_job,
            Side::Passed => &self.passed_job,
        }
    }

    /// Lowercased build system, `None` when the filter could not tell.
    pub fn build_system(&self) -> Option<String> {
        if self.build_system.is_empty() || self.build_system == "NA" {
            None
        } else {
            Some(self.build_system.to_lowercase())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPairJob {
    pub job_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristically_parsed_image_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_history: Option<MatchHistory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mismatch_attrs: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Failed,
    Passed,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Failed, Side::Passed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Failed => "failed",
            Side::Passed => "passed",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn read_buildpairs<P: AsRef<Path>>(path: P) -> Result<Vec<BuildPairRecord>> {
    let path = path.as_ref();
    let buf = fs::read_to_string(path)
        .with_context(|| anyhow!("Failed to read input file {:?}", path))?;
    let pairs = serde_json::from_str(&buf)
        .with_context(|| anyhow!("Failed to parse input file {:?}", path))?;
    Ok(pairs)
}

pub fn write_buildpairs<P: AsRef<Path>>(path: P, pairs: &[BuildPairRecord]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let buf = serde_json::to_string_pretty(pairs)?;
    fs::write(path, buf)
        .with_context(|| anyhow!("Failed to write {:?}", path))?;
    Ok(())
}
