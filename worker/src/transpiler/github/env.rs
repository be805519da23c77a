use super::JobInfo;
use indexmap::IndexMap;
use std::borrow::Cow;

pub const WORKFLOW_DIR: &str = "/home/github/workflow";

/// Variables the hosted runner sets for every step.
pub fn runner_env(job: &JobInfo, step_number: &str, action_repo: &str) -> IndexMap<&'static str, String> {
    let owner = job.repo.split('/').next().unwrap_or_default();
    let mut env = IndexMap::new();
    env.insert("CI", "true".to_string());
    env.insert("GITHUB_TOKEN", "DUMMY".to_string());
    env.insert("GITHUB_ACTION", step_number.to_string());
    env.insert("GITHUB_ACTION_PATH", String::new());
    env.insert("GITHUB_ACTION_REPOSITORY", action_repo.to_string());
    env.insert("GITHUB_ACTIONS", "true".to_string());
    env.insert("GITHUB_ACTOR", owner.to_string());
    env.insert("GITHUB_API_URL", "https://api.github.com".to_string());
    env.insert("GITHUB_BASE_REF", job.base_ref());
    env.insert("GITHUB_ENV", format!("{}/envs.txt", WORKFLOW_DIR));
    env.insert("GITHUB_EVENT_NAME", job.event_name().to_string());
    env.insert("GITHUB_EVENT_PATH", format!("{}/event.json", WORKFLOW_DIR));
    env.insert("GITHUB_GRAPHQL_URL", "https://api.github.com/graphql".to_string());
    env.insert("GITHUB_HEAD_REF", job.head_ref());
    env.insert("GITHUB_JOB", job.workflow_job.clone());
    env.insert("GITHUB_PATH", format!("{}/paths.txt", WORKFLOW_DIR));
    env.insert("GITHUB_REF", job.git_ref());
    env.insert("GITHUB_REF_NAME", job.ref_name());
    env.insert("GITHUB_REF_TYPE", "branch".to_string());
    env.insert("GITHUB_REPOSITORY", job.repo.clone());
    env.insert("GITHUB_REPOSITORY_OWNER", owner.to_string());
    env.insert("GITHUB_RETENTION_DAYS", "0".to_string());
    env.insert("GITHUB_RUN_ATTEMPT", "1".to_string());
    env.insert("GITHUB_RUN_ID", "1".to_string());
    env.insert("GITHUB_RUN_NUMBER", "1".to_string());
    env.insert("GITHUB_SERVER_URL", "https://github.com".to_string());
    env.insert("GITHUB_SHA", job.sha.clone());
    env.insert("GITHUB_STEP_SUMMARY", String::new());
    env.insert("GITHUB_WORKFLOW", job.workflow_name.clone());
    env.insert("RUNNER_ARCH", "X64".to_string());
    env.insert("RUNNER_NAME", "Bugswarm GitHub Actions Runner".to_string());
    env.insert("RUNNER_OS", "Linux".to_string());
    env.insert("RUNNER_TEMP", "/tmp".to_string());
    env.insert("RUNNER_TOOL_CACHE", "/opt/hostedtoolcache".to_string());
    env.insert("RUNNER_DEBUG", "1".to_string());
    env
}

/// `K=<quoted value> ` pairs for `env`.
pub fn env_str<'a, K, I>(vars: I) -> String
    where K: AsRef<str> + 'a,
          I: IntoIterator<Item=(K, &'a String)>,
{
    vars.into_iter()
        .map(|(k, v)| format!("{}={} ", k.as_ref(), shell_escape::unix::escape(Cow::Borrowed(v.as_str()))))
        .collect()
}
