use bugswarm_analyzer::AnalyzedLog;
use bugswarm_common::model::{BuildPairRecord, MatchHistory};
use serde_json::{json, Value};

pub const TTL_REPO: &str = "alibaba/transmittable-thread-local";
pub const TTL_FAILED_JOB: u64 = 8267344544;
pub const TTL_PASSED_JOB: u64 = 8267344708;

pub const NACOS_REPO: &str = "alibaba/nacos";

pub fn history(runs: &[u8]) -> MatchHistory {
    runs.iter()
        .enumerate()
        .map(|(i, m)| (i as u32 + 1, *m))
        .collect()
}

/// A GitHub build pair with one job pair per `(failed, passed)` job id.
pub fn buildpair(repo: &str, failed_build: u64, jobs: &[(u64, u64)]) -> BuildPairRecord {
    let jobs_of = |ids: Vec<u64>| ids.into_iter()
        .map(|id| json!({
            "job_id": id,
            "build_job": format!("{}.1", failed_build),
            "language": "java",
            "config": {"runs-on": "ubuntu-latest", "steps": [{"run": "mvn test"}]},
        }))
        .collect::<Vec<_>>();
    serde_json::from_value(json!({
        "repo": repo,
        "ci_service": "github",
        "branch": "master",
        "failed_build": {"build_id": failed_build, "head_sha": "a1", "message": "break", "jobs": jobs_of(jobs.iter().map(|j| j.0).collect())},
        "passed_build": {"build_id": failed_build + 1, "head_sha": "b2", "message": "fix", "jobs": jobs_of(jobs.iter().map(|j| j.1).collect())},
        "jobpairs": jobs.iter().map(|(f, p)| json!({
            "failed_job": {"job_id": f},
            "passed_job": {"job_id": p},
            "build_system": "Maven",
        })).collect::<Vec<_>>(),
    })).unwrap()
}

/// Single job pair of `repo` that already went through `runs`.
pub fn buildpair_with_history(repo: &str, failed_build: u64, failed_job: u64, runs: &[u8]) -> BuildPairRecord {
    let mut bp = buildpair(repo, failed_build, &[(failed_job, failed_job + 1000)]);
    bp.jobpairs[0].match_history = Some(history(runs));
    bp
}

pub fn analyzed(attrs: Value) -> AnalyzedLog {
    serde_json::from_value(attrs).unwrap()
}
