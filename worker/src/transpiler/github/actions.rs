//! Predefined actions, `uses:` steps that run someone else's code.

use super::expressions::Contexts;
use crate::errors::TranspileError;
use crate::git;
use bugswarm_common::config::CLONE_RETRIES;
use bugswarm_common::errors::*;
use bugswarm_common::http;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

lazy_static! {
    static ref DOWNLOAD_ACTION: Regex = Regex::new(r"Download action repository '([^']+)' \(SHA:([0-9a-fA-F]{40})\)").unwrap();
}

/// Actions that have no effect on the outcome of a build and are skipped.
pub const IGNORED_ACTIONS: &[&str] = &[
    "codecov/codecov-action",
    "actions/upload-artifact",
    "actions/download-artifact",
    "actions/cache",
    "gradle/wrapper-validation-action",
    "styfle/cancel-workflow-action",
    "github/codeql-action/init",
    "peaceiris/actions-gh-pages",
    "s0/git-publish-subdir-action",
];

pub const CHECKOUT_ACTION: &str = "actions/checkout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    /// `owner/name` of the repository holding the action.
    pub repo: String,
    /// Branch, tag or commit, empty for local actions.
    pub git_ref: String,
    /// Directory of `action.yml` inside the repository.
    pub path: String,
    /// Name of the directory the repository is stored in.
    pub dir: String,
    pub local: bool,
}

impl ActionRef {
    pub fn parse(uses: &str, job_repo: &str) -> Result<ActionRef> {
        let (repo_path, git_ref) = match uses.split_once('@') {
            Some((path, git_ref)) => (path, git_ref),
            None => (uses, ""),
        };

        if repo_path.starts_with("docker") {
            return Err(TranspileError::UnsupportedAction(uses.to_string()).into());
        }

        let parts = repo_path.split('/').collect::<Vec<_>>();
        let (repo, path, local) = if repo_path.starts_with('.') {
            (job_repo.to_string(), repo_path.to_string(), true)
        } else if parts.len() == 2 && !git_ref.is_empty() {
            (repo_path.trim_matches('/').to_string(), String::new(), false)
        } else if parts.len() > 2 && !git_ref.is_empty() {
            (parts[..2].join("/"), parts[2..].join("/").trim_matches('/').to_string(), false)
        } else {
            return Err(TranspileError::UnsupportedAction(uses.to_string()).into());
        };

        let dir = if git_ref.is_empty() {
            repo.replace('/', "-")
        } else {
            format!("{}@{}", repo.replace('/', "-"), git_ref)
        };

        Ok(ActionRef {
            repo,
            git_ref: git_ref.to_string(),
            path,
            dir,
            local,
        })
    }

    /// Location of `action.yml`'s directory inside the job container.
    pub fn container_path(&self, job_id: u64) -> String {
        let base = format!("/home/github/{}/actions/{}", job_id, self.dir);
        match self.path.trim_start_matches("./").trim_matches('/') {
            "" | "." => base,
            path => format!("{}/{}", base, path),
        }
    }

    pub fn local_path(&self, actions_dir: &Path) -> PathBuf {
        let path = self.path.trim_start_matches("./").trim_matches('/');
        let dir = actions_dir.join(&self.dir);
        if path.is_empty() || path == "." {
            dir
        } else {
            dir.join(path)
        }
    }

    pub fn is_setup_action(&self) -> bool {
        self.repo.starts_with("actions/setup-")
    }

    pub fn is_ignored(&self) -> bool {
        let repo = self.repo.to_lowercase();
        IGNORED_ACTIONS.contains(&repo.as_str())
            || IGNORED_ACTIONS.iter().any(|ignored| {
                format!("{}/{}", repo, self.path.to_lowercase()).trim_end_matches('/') == *ignored
            })
    }
}

/// The commits the original run resolved each action to, by `owner/repo@ref`.
pub fn action_shas(orig_log: &str) -> HashMap<String, String> {
    DOWNLOAD_ACTION.captures_iter(orig_log)
        .map(|c| (c[1].to_string(), c[2].to_lowercase()))
        .collect()
}

async fn clone_at(action: &ActionRef, dest: &Path, sha: Option<&str>) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest).await?;
    }
    let url = git::github_url(&action.repo);
    let dest_str = dest.to_string_lossy();
    if let Some(sha) = sha {
        git::git(None, ["clone", "-q", &url, &dest_str]).await?;
        git::git(Some(dest), ["checkout", "-q", sha]).await?;
    } else {
        git::git(None, ["clone", "-q", "--depth", "1", "--branch", &action.git_ref, &url, &dest_str]).await?;
    }
    Ok(())
}

/// Download an action into `actions_dir`, unless it's already there.
///
/// Local actions are copied from `job_repo_dir`. Others are pinned to the
/// commit the original run used when it is known.
pub async fn fetch(action: &ActionRef, actions_dir: &Path, job_repo_dir: &Path, known_shas: &HashMap<String, String>) -> Result<()> {
    let dest = actions_dir.join(&action.dir);
    if dest.is_dir() {
        debug!("Action {:?} is already downloaded", action.dir);
        return Ok(());
    }

    if action.local {
        debug!("Copying local action from {:?}", job_repo_dir);
        fs::create_dir_all(&dest).await?;
        let out = tokio::process::Command::new("cp")
            .arg("-a")
            .arg(job_repo_dir.join("."))
            .arg(&dest)
            .output()
            .await
            .context("Failed to spawn cp")?;
        if !out.status.success() {
            return Err(TranspileError::ActionFetchError(format!("failed to copy local action {:?}: {}",
                action.path, String::from_utf8_lossy(&out.stderr).trim())).into());
        }
        return Ok(());
    }

    let key = format!("{}@{}", action.repo, action.git_ref);
    let sha = if git::is_sha(&action.git_ref) {
        Some(action.git_ref.clone())
    } else {
        known_shas.get(&key).cloned()
    };

    if let Some(sha) = &sha {
        debug!("Resetting action {} to {}", key, sha);
        let pinned = http::with_retries(CLONE_RETRIES - 1, Duration::from_secs(1), || clone_at(action, &dest, Some(sha.as_str()))).await;
        match pinned {
            Ok(()) => return Ok(()),
            Err(err) if git::is_sha(&action.git_ref) => {
                return Err(TranspileError::ActionFetchError(format!("{}: {:#}", key, err)).into());
            },
            Err(err) => warn!("Failed to reset action {} to {}, using latest {}: {:#}", key, sha, action.git_ref, err),
        }
    }

    http::with_retries(CLONE_RETRIES - 1, Duration::from_secs(1), || clone_at(action, &dest, None))
        .await
        .map_err(|err| TranspileError::ActionFetchError(format!("{}: {:#}", key, err)))?;
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionMetadata {
    #[serde(default)]
    pub name: Option<String>,
    pub runs: Runs,
    #[serde(default)]
    pub inputs: IndexMap<String, ActionInput>,
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Runs {
    pub using: String,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub pre: Option<String>,
    #[serde(default)]
    pub steps: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionInput {
    #[serde(default)]
    pub default: Option<Value>,
}

pub async fn load_metadata(action: &ActionRef, actions_dir: &Path) -> Result<ActionMetadata> {
    let dir = action.local_path(actions_dir);
    for name in ["action.yml", "action.yaml"] {
        let path = dir.join(name);
        if path.is_file() {
            let buf = fs::read_to_string(&path)
                .await
                .with_context(|| anyhow!("Failed to read {:?}", path))?;
            let metadata = serde_yaml::from_str(&buf)
                .map_err(|err| TranspileError::InvalidPredefinedAction(format!("{:?}: {}", path, err)))?;
            return Ok(metadata);
        }
    }
    Err(TranspileError::InvalidPredefinedAction(format!("{} does not contain action.y(a)ml", action.dir)).into())
}

fn input_var(key: &str) -> String {
    format!("INPUT_{}", key.to_uppercase().replace(' ', "_"))
}

/// Inputs of an action step, both as `INPUT_*` shell words and as the `inputs` context.
pub fn inputs(action: &ActionRef, with: Option<&Map<String, Value>>, metadata: &ActionMetadata, ctx: &Contexts)
    -> Result<(IndexMap<String, String>, Map<String, Value>)>
{
    let mut vars = IndexMap::new();
    let mut context = Map::new();
    let mut add = |vars: &mut IndexMap<String, String>, key: &str, var: String, raw: &Value| -> Result<()> {
        let text = super::expressions::to_str(raw);
        vars.insert(var, ctx.substitute(&text)?);
        context.insert(key.to_string(), Value::String(ctx.interpolate(&text)));
        Ok(())
    };

    if let Some(with) = with {
        for (key, value) in with {
            if action.is_setup_action() && matches!(key.as_str(), "cache" | "token" | "overwrite-settings") {
                continue;
            }
            if action.repo == CHECKOUT_ACTION && key == "ref" {
                continue;
            }
            add(&mut vars, key, input_var(key), value)?;
        }
    }

    if action.repo == "actions/setup-java" {
        add(&mut vars, "overwrite-settings", "INPUT_OVERWRITE-SETTINGS".to_string(), &Value::String("False".to_string()))?;
    }
    if action.is_setup_action() {
        add(&mut vars, "token", "INPUT_TOKEN".to_string(), &Value::String(String::new()))?;
    }

    for (key, input) in &metadata.inputs {
        let var = input_var(key);
        if vars.contains_key(&var) {
            continue;
        }
        if let Some(default) = &input.default {
            add(&mut vars, key, var, default)?;
        }
    }

    Ok((vars, context))
}
