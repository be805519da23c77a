//! Getting the source of a job into its workspace.
//!
//! Every repository is cloned once per host into `project_repos` and tarred.
//! Jobs unpack that tarball into their own workspace and reset it to their
//! trigger commit. Commits that can't be reset to anymore are downloaded from
//! the GitHub archive instead.

use crate::config::TaskPaths;
use crate::errors::{Category, WrapErrors};
use crate::git::{self, git};
use crate::transpiler::Job;
use bugswarm_common::config::CLONE_RETRIES;
use bugswarm_common::errors::*;
use bugswarm_common::http::{self, with_retries};
use flate2::read::GzDecoder;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::File;
use std::hash::Hash;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time;

const POLL_INTERVAL: u64 = 3;
const RETRY_DELAY: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Done,
    Failed,
}

/// What has been set up so far, shared by all workers of a task.
#[derive(Debug, Default)]
pub struct SetupStates {
    repos: Mutex<HashMap<String, State>>,
    jobs: Mutex<HashMap<u64, State>>,
}

impl SetupStates {
    pub fn new() -> SetupStates {
        SetupStates::default()
    }

    /// Repositories that could not be cloned, their jobs are skipped.
    pub fn failed_repos(&self) -> Vec<String> {
        let repos = self.repos.lock().unwrap_or_else(|e| e.into_inner());
        let mut failed = repos.iter()
            .filter(|(_, state)| **state == State::Failed)
            .map(|(repo, _)| repo.clone())
            .collect::<Vec<_>>();
        failed.sort();
        failed
    }
}

/// Returns true if the caller has to do the work, waits if somebody else is doing it.
async fn claim<K: Eq + Hash + Clone>(map: &Mutex<HashMap<K, State>>, key: &K, what: &str) -> Result<bool> {
    loop {
        {
            let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
            match map.get(key) {
                None => {
                    map.insert(key.clone(), State::Pending);
                    return Ok(true);
                },
                Some(State::Done) => return Ok(false),
                Some(State::Failed) => bail!("Previously failed to set up {}, skipping", what),
                Some(State::Pending) => (),
            }
        }
        debug!("Waiting for another worker to set up {}", what);
        time::sleep(Duration::from_secs(POLL_INTERVAL)).await;
    }
}

fn finish<K: Eq + Hash>(map: &Mutex<HashMap<K, State>>, key: K, ok: bool) {
    let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
    map.insert(key, if ok { State::Done } else { State::Failed });
}

/// Put the source of `job` into its workspace and return the checkout.
pub async fn setup(paths: &TaskPaths, states: &SetupStates, job: &Job<'_>) -> Result<PathBuf> {
    let repo = &job.bp.repo;
    let job_id = job.job_id();

    if claim(&states.repos, repo, repo).await? {
        let res = clone_project(paths, repo).await;
        finish(&states.repos, repo.clone(), res.is_ok());
        res.wrap_errors(Category::SetupError, "clone")?;
    }

    let checkout = paths.job_repo(job_id, repo);
    if claim(&states.jobs, &job_id, &format!("workspace of job {}", job_id)).await? {
        let res = setup_workspace(paths, job).await;
        finish(&states.jobs, job_id, res.is_ok());
        res.wrap_errors(Category::SetupError, "setup_repo")?;
    } else {
        debug!("Job {} is already set up", job_id);
    }
    Ok(checkout)
}

async fn clone_project(paths: &TaskPaths, repo: &str) -> Result<()> {
    let dest = paths.project_repo(repo);
    if !dest.join(".git").exists() {
        info!("Cloning {:?} into {:?}", repo, dest);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let url = git::github_url(repo);
        with_retries(CLONE_RETRIES - 1, Duration::from_secs(RETRY_DELAY), || async {
            if dest.exists() {
                fs::remove_dir_all(&dest).await?;
            }
            git(None, [OsStr::new("clone"), OsStr::new(&url), dest.as_os_str()]).await
        }).await
            .with_context(|| anyhow!("Failed to clone {:?}", repo))?;
        git(Some(&dest), ["config", "user.name", "BugSwarm"]).await?;
        git(Some(&dest), ["config", "user.email", "dev.bugswarm@gmail.com"]).await?;
    }

    tar(&dest, repo, &paths.project_tar(repo)).await
}

async fn setup_workspace(paths: &TaskPaths, job: &Job<'_>) -> Result<()> {
    let build = job.bp.build(job.side);
    let job_id = job.job_id();
    let workspace = paths.workspace_job(job_id);
    if workspace.exists() {
        fs::remove_dir_all(&workspace).await
            .with_context(|| anyhow!("Failed to clean workspace {:?}", workspace))?;
    }
    fs::create_dir_all(&workspace).await?;

    if build.resettable {
        untar(&paths.project_tar(&job.bp.repo), &workspace).await
            .context("Failed to copy repository into workspace")?;
        reset(&paths.job_repo(job_id, &job.bp.repo), job).await
    } else if build.github_archived {
        let sha = if job.bp.is_pr() { build.trigger_sha() } else { &build.head_sha };
        download_archive(paths, &job.bp.repo, sha, &paths.job_repo(job_id, &job.bp.repo)).await
    } else {
        bail!("Job {} is neither resettable nor archived on GitHub", job_id)
    }
}

/// Reset a copied checkout to the commit the job ran on.
pub async fn reset(dir: &Path, job: &Job<'_>) -> Result<()> {
    let build = job.bp.build(job.side);
    let (head, base) = (build.head_sha.as_str(), build.base_sha.as_str());
    let dir = Some(dir);

    if job.bp.is_pr() {
        let merge_sha = build.trigger_sha();
        info!("Resetting to merge sha {}", merge_sha);
        let merged = async {
            git(dir, ["fetch", "origin", merge_sha]).await?;
            git(dir, ["reset", "--hard", merge_sha]).await
        }.await;
        if let Err(err) = merged {
            info!("Cannot reset to merge sha ({:#}), merging head {} into base {}", err, head, base);
            git(dir, ["fetch", "origin", head]).await?;
            git(dir, ["fetch", "origin", base]).await?;
            git(dir, ["reset", "--hard", base]).await?;
            git(dir, ["merge", head]).await?;
        }
    } else {
        info!("Resetting to head sha {}", head);
        git(dir, ["fetch", "origin", head]).await?;
        git(dir, ["reset", "--hard", head]).await?;
    }

    git(dir, ["submodule", "update", "--init"]).await?;
    Ok(())
}

/// Download `<repo>@<sha>` from the GitHub archive into `dest`.
///
/// The history of the project clone is copied over so the result is still a git checkout.
pub async fn download_archive(paths: &TaskPaths, repo: &str, sha: &str, dest: &Path) -> Result<()> {
    let name = repo.split('/').nth(1)
        .ok_or_else(|| format_err!("Invalid repository name: {:?}", repo))?;
    let archives = paths.archives().join(repo);
    let tarball = archives.join(format!("{}.tar.gz", sha));
    let unpacked = archives.join(format!("{}-{}", name, sha));
    fs::create_dir_all(&archives).await?;

    let url = format!("https://github.com/{}/archive/{}.tar.gz", repo, sha);
    let client = http::client(&Default::default())?;
    with_retries(CLONE_RETRIES, Duration::from_secs(RETRY_DELAY), || async {
        if !tarball.exists() {
            if let Err(err) = fetch(&client, &url, &tarball).await {
                fs::remove_file(&tarball).await.ok();
                return Err(err);
            }
        }
        let res = unpack_gz(&tarball, &archives).await;
        if res.is_err() {
            fs::remove_file(&tarball).await.ok();
        }
        res
    }).await
        .with_context(|| anyhow!("Failed to download {:?}", url))?;

    copy_dir(&unpacked, dest).await?;
    copy_dir(&paths.project_repo(repo).join(".git"), &dest.join(".git")).await?;
    Ok(())
}

async fn fetch(client: &http::Client, url: &str, target: &Path) -> Result<()> {
    info!("Downloading {:?} to {:?}", url, target);
    let mut stream = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes_stream();

    let mut f = fs::File::create(target)
        .await
        .context("Failed to create output file")?;

    let mut bytes = 0;
    while let Some(item) = stream.next().await {
        let item = item?;
        f.write_all(&item).await?;
        bytes += item.len();
    }
    f.flush().await?;
    info!("Downloaded {} bytes", bytes);
    Ok(())
}

async fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).await?;
    let mut src = src.as_os_str().to_owned();
    src.push("/.");
    let out = tokio::process::Command::new("cp")
        .arg("-a")
        .arg(&src)
        .arg(dst)
        .output()
        .await
        .context("Failed to spawn cp")?;
    if !out.status.success() {
        bail!("Failed to copy {:?} to {:?}: {}", src, dst, String::from_utf8_lossy(&out.stderr).trim());
    }
    Ok(())
}

/// Archive `src` as `<arcname>/...` into `dest`.
pub async fn tar(src: &Path, arcname: &str, dest: &Path) -> Result<()> {
    let src = src.to_path_buf();
    let arcname = arcname.to_string();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = dest.with_extension("tar.tmp");
        let file = File::create(&tmp)
            .with_context(|| anyhow!("Failed to create {:?}", tmp))?;
        let mut builder = tar::Builder::new(file);
        builder.follow_symlinks(false);
        builder.append_dir_all(&arcname, &src)
            .with_context(|| anyhow!("Failed to archive {:?}", src))?;
        builder.into_inner()?;
        std::fs::rename(&tmp, &dest)?;
        debug!("Archived {:?} into {:?}", src, dest);
        Ok(())
    }).await?
}

pub async fn untar(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive)
            .with_context(|| anyhow!("Failed to open {:?}", archive))?;
        let mut archive = tar::Archive::new(BufReader::new(file));
        archive.set_preserve_permissions(true);
        archive.unpack(&dest)?;
        Ok(())
    }).await?
}

async fn unpack_gz(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive)
            .with_context(|| anyhow!("Failed to open {:?}", archive))?;
        let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        archive.unpack(&dest)?;
        Ok(())
    }).await?
}
