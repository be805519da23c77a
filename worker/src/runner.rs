//! Builds the image of a single job and runs it once.

use crate::config::TaskPaths;
use crate::docker::{Docker, RunOptions};
use crate::errors::{Category, ReproduceError, WrapErrors};
use crate::repo;
use crate::transpiler::{self, dockerfile, Job};
use bugswarm_common::config::DockerConfig;
use bugswarm_common::errors::*;
use bugswarm_common::CiService;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;

/// Lines that show the log is docker noise and not the output of the build.
const BAD_LOG_LINES: &[&str] = &[
    "\"docker logs\" requires exactly 1 argument.",
    "port is already allocated.",
];

/// Exit code of `docker run` when the daemon couldn't start the container.
const DOCKER_RUN_FAILED: i32 = 125;
/// 128 + SIGKILL, usually the kernel's oom killer.
const KILLED: i32 = 137;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub log: PathBuf,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl RunResult {
    /// Whether the log can be compared with the original at all.
    pub fn is_reproduced(&self) -> bool {
        !self.timed_out
    }
}

pub struct Runner<'a> {
    pub docker: &'a dyn Docker,
    pub paths: &'a TaskPaths,
    pub config: &'a DockerConfig,
    pub keep: bool,
}

impl Runner<'_> {
    /// Image the job is built into, removed again unless `--keep` is set.
    pub fn image_tag(&self, job_id: u64) -> String {
        format!("job_id:{}", job_id)
    }

    pub fn container_name(&self, job_id: u64) -> String {
        format!("{}-{}", self.paths.task, job_id)
    }

    fn run_options(&self, job_id: u64) -> RunOptions {
        RunOptions {
            name: Some(self.container_name(job_id)),
            cpu_shares: Some(self.config.cpu_shares()),
            memory: Some(self.config.memory().to_string()),
            ..Default::default()
        }
    }

    /// Reproduce `job` from the checkout at `repo_dir`.
    ///
    /// The container and, unless `keep` is set, the image and the job workspace
    /// are gone afterwards, no matter if the attempt succeeded.
    pub async fn reproduce(&self, job: &Job<'_>, repo_dir: &Path) -> Result<RunResult> {
        let job_id = job.job_id();
        let start = Instant::now();
        info!("Reproducing job {} of {:?}", job_id, job.bp.repo);

        let res = self.build_and_run(job, repo_dir).await;
        self.cleanup(job_id).await;

        if let Ok(res) = &res {
            info!("Done reproducing job {} after {}s (exit={:?}, timed_out={})",
                job_id, start.elapsed().as_secs(), res.exit_code, res.timed_out);
        }
        res
    }

    async fn build_and_run(&self, job: &Job<'_>, repo_dir: &Path) -> Result<RunResult> {
        let job_id = job.job_id();
        let context = self.paths.job_output(job_id);

        // actions are pinned to the versions the original run resolved
        let orig_log = match job.ci_service() {
            CiService::Github => fs::read_to_string(self.paths.orig_log(job_id)).await.ok(),
            CiService::Travis => None,
        };
        let generated = transpiler::transpile(job, &context, repo_dir, orig_log.as_deref()).await
            .wrap_errors(Category::TranspileError, "transpile")?;

        repo::tar(repo_dir, &job.bp.repo, &context.join(dockerfile::REPO_TAR)).await
            .wrap_errors(Category::SetupError, "tar_repo")?;

        if !self.docker.image_exists(&generated.base_image).await.unwrap_or(false) {
            self.docker.pull(&generated.base_image).await
                .wrap_errors(Category::ImageBuildError, "pull")?;
        }

        let tag = self.image_tag(job_id);
        self.docker.build(&context, &context.join(dockerfile::DOCKERFILE), &tag).await
            .wrap_errors(Category::ImageBuildError, "build")?;

        // leftover of an interrupted attempt
        let name = self.container_name(job_id);
        if self.docker.containers(&name).await.unwrap_or_default().contains(&name) {
            self.docker.rm(&name).await
                .wrap_errors(Category::RunError, "run")?;
        }

        let timeout = Duration::from_secs(self.config.container_timeout());
        let output = self.docker.run_attached(&tag, &self.run_options(job_id), timeout).await
            .wrap_errors(Category::RunError, "run")?;

        let log = self.paths.reproduced_log(job_id);
        fs::write(&log, &output.log).await
            .with_context(|| anyhow!("Failed to write {:?}", log))
            .wrap_errors(Category::LogCopyError, "copy_log")?;

        if output.exit.timed_out {
            warn!("Job {} timed out after {}s", job_id, timeout.as_secs());
            return Ok(RunResult {
                log,
                exit_code: None,
                timed_out: true,
            });
        }

        check_exit(output.exit.code)?;
        check_log(&output.log)?;

        Ok(RunResult {
            log,
            exit_code: output.exit.code,
            timed_out: false,
        })
    }

    async fn cleanup(&self, job_id: u64) {
        let name = self.container_name(job_id);
        if let Err(err) = self.docker.rm(&name).await {
            debug!("Failed to remove container {:?}: {:#}", name, err);
        }

        if self.keep {
            return;
        }

        let tag = self.image_tag(job_id);
        if let Err(err) = self.docker.rmi(&tag).await {
            warn!("Failed to remove image {:?}: {:#}", tag, err);
        }

        let workspace = self.paths.workspace_job(job_id);
        if let Err(err) = fs::remove_dir_all(&workspace).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean workspace {:?}: {:#}", workspace, err);
            }
        }
    }
}

/// Container exits that aren't the build failing.
fn check_exit(code: Option<i32>) -> Result<()> {
    let msg = match code {
        None => "Container was terminated by a signal".to_string(),
        Some(DOCKER_RUN_FAILED) => "Docker failed to start the container".to_string(),
        Some(KILLED) => "Container was killed, most likely out of memory".to_string(),
        Some(_) => return Ok(()),
    };
    Err(ReproduceError::new(Category::RunError, msg).in_stage("run").into())
}

fn check_log(log: &[u8]) -> Result<()> {
    let log = String::from_utf8_lossy(log);
    if log.lines().any(|line| BAD_LOG_LINES.iter().any(|bad| line.contains(bad))) {
        return Err(ReproduceError::new(Category::LogCopyError, "Bad log").in_stage("copy_log").into());
    }
    Ok(())
}
