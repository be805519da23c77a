use crate::errors::*;
use crate::model::{image_tag, BuildPairRecord, JobPairRecord, MatchHistory, Side};
use crate::{CiService, Classification};
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata record describing one published job pair image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub image_tag: String,
    pub repo: String,
    #[serde(default)]
    pub repo_mined_version: Option<String>,
    #[serde(default)]
    pub pr_num: i64,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub base_branch: Option<String>,
    pub lang: String,
    pub build_system: String,
    #[serde(default)]
    pub test_framework: String,
    #[serde(default)]
    pub merged_at: Option<String>,
    #[serde(default)]
    pub is_error_pass: bool,
    pub ci_service: CiService,
    pub failed_job: ArtifactJob,
    pub passed_job: ArtifactJob,
    #[serde(default)]
    pub reproduced: bool,
    #[serde(default)]
    pub r#match: u8,
    pub reproduce_successes: usize,
    pub reproduce_attempts: usize,
    pub stability: String,
    pub classification: ArtifactClassification,
    pub current_status: CurrentStatus,
    #[serde(default)]
    pub creation_time: i64,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub filtered_reason: Option<String>,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactJob {
    pub job_id: u64,
    pub build_id: u64,
    #[serde(default)]
    pub build_job: String,
    #[serde(default)]
    pub base_sha: String,
    pub trigger_sha: String,
    #[serde(default)]
    pub committed_at: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub failed_tests: String,
    #[serde(default)]
    pub num_tests_run: Value,
    #[serde(default)]
    pub num_tests_failed: Value,
    #[serde(default)]
    pub mismatch_attrs: Vec<String>,
    #[serde(default)]
    pub is_git_repo: bool,
    #[serde(default)]
    pub patches: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactClassification {
    pub code: Value,
    pub test: Value,
    pub build: Value,
    #[serde(default)]
    pub exceptions: Vec<String>,
}

impl Default for ArtifactClassification {
    fn default() -> Self {
        ArtifactClassification {
            code: Value::from("NA"),
            test: Value::from("NA"),
            build: Value::from("NA"),
            exceptions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStatus {
    pub status: Classification,
    pub time_stamp: String,
}

impl CurrentStatus {
    pub fn today(status: Classification) -> CurrentStatus {
        CurrentStatus {
            status,
            time_stamp: today(),
        }
    }
}

pub fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Successful runs, attempted runs and their `"<s>/<n>"` rendering.
pub fn stability(history: &MatchHistory) -> (usize, usize, String) {
    let successes = history.values().filter(|m| **m == 1).count();
    let attempts = history.len();
    (successes, attempts, format!("{}/{}", successes, attempts))
}

/// Reproducibility over all recorded runs, anything but a full match counts as a miss.
pub fn classify(history: &MatchHistory) -> Classification {
    if history.is_empty() {
        Classification::Broken
    } else if history.values().all(|m| *m == 1) {
        Classification::Reproducible
    } else if history.values().all(|m| *m != 1) {
        Classification::Unreproducible
    } else {
        Classification::Flaky
    }
}

/// Best match type seen over all runs.
fn match_over_runs(history: &MatchHistory) -> u8 {
    for wanted in [1, 2, 3] {
        if history.values().any(|m| *m == wanted) {
            return wanted;
        }
    }
    0
}

impl ArtifactRecord {
    pub fn from_pair(bp: &BuildPairRecord, jp: &JobPairRecord) -> Result<ArtifactRecord> {
        let image_tag = image_tag(&bp.repo, jp.failed_job.job_id)?;
        let history = jp.match_history.clone().unwrap_or_default();
        let (reproduce_successes, reproduce_attempts, stability) = stability(&history);

        let failed_job = bp.failed_build.job(jp.failed_job.job_id)?;
        let orig = jp.failed_job.orig_result.as_ref();
        let build_system = orig
            .and_then(|r| r.get("tr_build_system"))
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| jp.build_system.clone());
        let test_framework = orig
            .and_then(|r| r.get("tr_log_frameworks"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let classification = jp.classification.as_ref()
            .map(|c| serde_json::from_value(c.clone()))
            .transpose()
            .context("Invalid job pair classification")?
            .unwrap_or_default();

        let mut lang = failed_job.language();
        if let Some(first) = lang.get(..1) {
            lang = first.to_uppercase() + &lang[1..];
        }

        Ok(ArtifactRecord {
            image_tag,
            repo: bp.repo.clone(),
            repo_mined_version: bp.repo_mined_version.clone(),
            pr_num: bp.pr_num,
            branch: bp.branch.clone(),
            base_branch: bp.base_branch.clone(),
            lang,
            build_system,
            test_framework,
            merged_at: bp.merged_at.clone(),
            is_error_pass: bp.is_error_pass,
            ci_service: bp.ci_service,
            failed_job: ArtifactJob::from_pair(bp, jp, Side::Failed)?,
            passed_job: ArtifactJob::from_pair(bp, jp, Side::Passed)?,
            reproduced: reproduce_attempts >= 2,
            r#match: match_over_runs(&history),
            reproduce_successes,
            reproduce_attempts,
            stability,
            classification,
            current_status: CurrentStatus::today(classify(&history)),
            creation_time: Utc::now().timestamp(),
            cached: false,
            filtered_reason: jp.filtered_reason.clone(),
            metrics: Map::new(),
        })
    }
}

impl ArtifactJob {
    fn from_pair(bp: &BuildPairRecord, jp: &JobPairRecord, side: Side) -> Result<ArtifactJob> {
        let build = bp.build(side);
        let pair_job = jp.job(side);
        let job = build.job(pair_job.job_id)?;
        let orig = pair_job.orig_result.as_ref();
        let attr = |key: &str| orig.and_then(|r| r.get(key)).cloned().unwrap_or(Value::from(""));

        let mut patches = Map::new();
        patches.insert("remove-ppa".to_string(), Value::from(today()));

        Ok(ArtifactJob {
            job_id: job.job_id,
            build_id: build.build_id,
            build_job: job.build_job(),
            base_sha: build.base_sha.clone(),
            trigger_sha: build.trigger_sha().to_string(),
            committed_at: build.committed_at.clone(),
            message: build.message.clone(),
            config: job.config.clone(),
            failed_tests: attr("tr_log_tests_failed").as_str().unwrap_or("").to_string(),
            num_tests_run: attr("tr_log_num_tests_run"),
            num_tests_failed: attr("tr_log_num_tests_failed"),
            mismatch_attrs: pair_job.mismatch_attrs.clone().unwrap_or_default(),
            is_git_repo: build.resettable,
            patches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(runs: &[u8]) -> MatchHistory {
        runs.iter().enumerate().map(|(i, m)| (i as u32 + 1, *m)).collect()
    }

    #[test]
    fn classify_reproducible() {
        assert_eq!(classify(&history(&[1, 1, 1])), Classification::Reproducible);
    }

    #[test]
    fn classify_unreproducible() {
        assert_eq!(classify(&history(&[0, 2, 3])), Classification::Unreproducible);
    }

    #[test]
    fn classify_flaky() {
        let h = history(&[1, 0, 1, 1, 0]);
        assert_eq!(classify(&h), Classification::Flaky);
        assert_eq!(stability(&h), (3, 5, "3/5".to_string()));
    }

    #[test]
    fn classify_never_run() {
        assert_eq!(classify(&MatchHistory::new()), Classification::Broken);
    }

    #[test]
    fn best_match_type() {
        assert_eq!(match_over_runs(&history(&[0, 3, 2])), 2);
        assert_eq!(match_over_runs(&history(&[0, 0])), 0);
    }

    #[test]
    fn today_is_iso_date() {
        let d = today();
        assert!(NaiveDate::parse_from_str(&d, "%Y-%m-%d").is_ok());
    }
}
