//! Build context of the image that holds both jobs of a pair.

use crate::compare;
use crate::config::TaskPaths;
use crate::errors::{Category, ReproduceError, WrapErrors};
use crate::repo::{self, SetupStates};
use crate::transpiler::{self, dockerfile, Job};
use bugswarm_common::api::MetadataStore;
use bugswarm_common::errors::*;
use bugswarm_common::model::{self, BuildPairRecord, JobPairRecord, Side};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairContext {
    pub dir: PathBuf,
    pub image_tag: String,
    pub base_image: String,
}

impl PairContext {
    pub fn dockerfile(&self) -> PathBuf {
        self.dir.join(dockerfile::DOCKERFILE)
    }
}

/// Point a build script at the checkout of its side.
pub fn relocate_script(script: &str, build_dir: &str, side_dir: &str) -> String {
    script.replace(build_dir, side_dir)
}

async fn relocate_dir(dir: &Path, build_dir: &str, side_dir: &str) -> Result<()> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(text) = fs::read_to_string(&path).await {
                if text.contains(build_dir) {
                    fs::write(&path, relocate_script(&text, build_dir, side_dir)).await?;
                }
            }
        }
    }
    Ok(())
}

/// Write the pair build context into `output/tasks/<task>/<image_tag>/`.
pub async fn prepare(paths: &TaskPaths, states: &SetupStates, store: Option<&dyn MetadataStore>, bp: &BuildPairRecord, jp: &JobPairRecord) -> Result<PairContext> {
    let image_tag = model::image_tag(&bp.repo, jp.failed_job.job_id)?;
    let dir = paths.pair_output(&image_tag);
    info!("Preparing image {:?} in {:?}", image_tag, dir);

    let mut generated = Vec::new();
    for side in Side::BOTH {
        let job = Job::new(bp, jp, side);
        let job_id = job.job_id();

        let orig_log = match store {
            Some(store) => compare::original_log(store, paths, job_id).await,
            None => Ok(paths.orig_log(job_id)),
        }.wrap_errors(Category::SetupError, "download_log")?;
        if !orig_log.exists() {
            return Err(ReproduceError::new(Category::SetupError, format!("Original log of job {} is missing", job_id))
                .in_stage("download_log")
                .into());
        }
        fs::create_dir_all(&dir).await?;
        fs::copy(&orig_log, dir.join(format!("{}-orig.log", job_id))).await?;

        let repo_dir = repo::setup(paths, states, &job).await?;

        let side_context = dir.join(side.as_str());
        let orig_text = fs::read_to_string(&orig_log).await.ok();
        let gen = transpiler::transpile(&job, &side_context, &repo_dir, orig_text.as_deref()).await
            .wrap_errors(Category::TranspileError, "transpile")?;

        let arcname = format!("{}/{}", side, bp.repo);
        repo::tar(&repo_dir, &arcname, &dir.join(dockerfile::pair_tar(side))).await
            .wrap_errors(Category::SetupError, "tar_repo")?;

        let build_dir = transpiler::build_dir(bp.ci_service, &bp.repo);
        let side_dir = format!("{}/{}/{}", transpiler::build_root(bp.ci_service), side, bp.repo);
        fs::write(dir.join(dockerfile::pair_script(side)), relocate_script(&gen.script, &build_dir, &side_dir)).await?;
        relocate_dir(&side_context.join("steps"), &build_dir, &side_dir).await?;

        generated.push(gen);
    }

    let (failed, passed) = (&generated[0], &generated[1]);
    if failed.base_image != passed.base_image {
        return Err(ReproduceError::new(Category::ImageBuildError,
            format!("The failed job and the passed job use different images: {:?} and {:?}", failed.base_image, passed.base_image))
            .in_stage("package")
            .into());
    }

    let pair = dockerfile::PairImage {
        ci: bp.ci_service,
        image: &failed.base_image,
        runs_on: failed.runs_on.as_deref(),
        custom_container: failed.custom_container,
        failed_job_id: jp.failed_job.job_id,
        passed_job_id: jp.passed_job.job_id,
    };
    let context = PairContext {
        dir,
        image_tag,
        base_image: failed.base_image.clone(),
    };
    fs::write(context.dockerfile(), pair.dockerfile()).await
        .context("Failed to write pair Dockerfile")?;
    Ok(context)
}

/// Drop the job checkouts of a pair once its context is written.
pub async fn clean_workspaces(paths: &TaskPaths, jp: &JobPairRecord) {
    for side in Side::BOTH {
        let dir = paths.workspace_job(jp.job(side).job_id);
        if let Err(err) = fs::remove_dir_all(&dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean workspace {:?}: {:#}", dir, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocate() {
        let script = "export GITHUB_WORKSPACE=/home/github/build/alibaba/nacos\ncd ${GITHUB_WORKSPACE}\n";
        let script = relocate_script(script, "/home/github/build/alibaba/nacos", "/home/github/build/failed/alibaba/nacos");
        assert_eq!(script, "export GITHUB_WORKSPACE=/home/github/build/failed/alibaba/nacos\ncd ${GITHUB_WORKSPACE}\n");
    }

    #[tokio::test]
    async fn relocate_step_scripts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("bugswarm_0.sh"), "cd /home/travis/build/a/b\n").unwrap();
        std::fs::write(dir.path().join("nested/bugswarm_0.0.sh"), "ls /home/travis/build/a/b/src\n").unwrap();
        relocate_dir(dir.path(), "/home/travis/build/a/b", "/home/travis/build/passed/a/b").await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("bugswarm_0.sh")).unwrap(), "cd /home/travis/build/passed/a/b\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("nested/bugswarm_0.0.sh")).unwrap(), "ls /home/travis/build/passed/a/b/src\n");

        relocate_dir(&dir.path().join("missing"), "a", "b").await.unwrap();
    }
}
