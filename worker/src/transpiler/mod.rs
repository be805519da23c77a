//! Turns a job into a docker build context: a build script, the Dockerfile
//! and whatever else the script needs at runtime.

pub mod dockerfile;
pub mod github;
pub mod travis;

use crate::errors::TranspileError;
use bugswarm_common::errors::*;
use bugswarm_common::model::{BuildPairRecord, JobPairRecord, JobRecord, Side};
use bugswarm_common::CiService;
use std::path::Path;
use tokio::fs;

/// One side of a job pair.
#[derive(Debug, Clone, Copy)]
pub struct Job<'a> {
    pub bp: &'a BuildPairRecord,
    pub jp: &'a JobPairRecord,
    pub side: Side,
}

impl<'a> Job<'a> {
    pub fn new(bp: &'a BuildPairRecord, jp: &'a JobPairRecord, side: Side) -> Job<'a> {
        Job { bp, jp, side }
    }

    pub fn job_id(&self) -> u64 {
        self.jp.job(self.side).job_id
    }

    pub fn record(&self) -> Result<&'a JobRecord> {
        self.bp.build(self.side).job(self.job_id())
    }

    pub fn ci_service(&self) -> CiService {
        self.bp.ci_service
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    /// Image the job image is layered on.
    pub base_image: String,
    /// Runner label of GitHub jobs.
    pub runs_on: Option<String>,
    pub custom_container: bool,
    pub script: String,
    pub dockerfile: String,
}

/// Home of the CI user inside the job image.
pub fn user(ci: CiService) -> &'static str {
    match ci {
        CiService::Travis => "travis",
        CiService::Github => "github",
    }
}

pub fn build_root(ci: CiService) -> &'static str {
    match ci {
        CiService::Travis => travis::BUILD_ROOT,
        CiService::Github => "/home/github/build",
    }
}

/// Where the repository of a job lives inside its container.
pub fn build_dir(ci: CiService, repo: &str) -> String {
    format!("{}/{}", build_root(ci), repo)
}

/// Write the build context of `job` into `context`.
///
/// The repository tarball isn't part of this, see [`crate::repo::tar`].
pub async fn transpile(job: &Job<'_>, context: &Path, repo_dir: &Path, orig_log: Option<&str>) -> Result<Generated> {
    fs::create_dir_all(context).await
        .with_context(|| anyhow!("Failed to create build context {:?}", context))?;

    let job_id = job.job_id();
    let generated = match job.ci_service() {
        CiService::Github => {
            let info = github::JobInfo::new(job.bp, job.side, job_id)?;
            let transpiled = github::transpile(&info, context, repo_dir, orig_log).await?;
            let dockerfile = dockerfile::github(job_id, &transpiled.image, &transpiled.runs_on, transpiled.container.is_some());
            Generated {
                base_image: transpiled.image,
                runs_on: Some(transpiled.runs_on),
                custom_container: transpiled.container.is_some(),
                script: transpiled.script,
                dockerfile,
            }
        },
        CiService::Travis => {
            let record = job.record()?;
            let build_system = job.jp.build_system();
            let script = travis::build_script(&job.bp.repo, record, build_system.as_deref())
                .map_err(|err| TranspileError::InvalidWorkflow(format!("{:#}", err)))?;
            fs::write(context.join(dockerfile::SCRIPT), &script).await?;
            let base_image = travis::base_image(record, job.jp.job(job.side));
            let dockerfile = dockerfile::travis(&base_image);
            Generated {
                base_image,
                runs_on: None,
                custom_container: false,
                script,
                dockerfile,
            }
        },
    };

    fs::write(context.join(dockerfile::DOCKERFILE), &generated.dockerfile).await
        .context("Failed to write Dockerfile")?;
    debug!("Wrote build context of job {} to {:?}", job_id, context);
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugswarm_common::model::read_buildpairs;
    use std::fs;

    const TRAVIS_PAIR: &str = r#"[{
        "repo": "square/okhttp",
        "ci_service": "travis",
        "branch": "master",
        "failed_build": {
            "build_id": 100, "head_sha": "aaa", "travis_merge_sha": "ccc", "message": "break",
            "jobs": [{"job_id": 1001, "build_job": "100.1", "language": "java",
                      "config": {"language": "java", "script": "mvn test"}}]
        },
        "passed_build": {
            "build_id": 101, "head_sha": "bbb", "message": "fix",
            "jobs": [{"job_id": 1011, "build_job": "101.1", "language": "java",
                      "config": {"language": "java", "script": "mvn test"}}]
        },
        "jobpairs": [{
            "failed_job": {"job_id": 1001, "heuristically_parsed_image_tag": "travisci/ci-garnet:packer-1512502276-986baf0"},
            "passed_job": {"job_id": 1011},
            "build_system": "Maven"
        }]
    }]"#;

    #[tokio::test]
    async fn travis_build_context() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.json");
        fs::write(&input, TRAVIS_PAIR).unwrap();
        let pairs = read_buildpairs(&input).unwrap();
        let bp = &pairs[0];
        let job = Job::new(bp, &bp.jobpairs[0], Side::Failed);
        assert_eq!(job.job_id(), 1001);

        let context = dir.path().join("1001");
        let generated = transpile(&job, &context, dir.path(), None).await.unwrap();
        assert_eq!(generated.base_image, "travisci/ci-garnet:packer-1512502276-986baf0");
        assert!(generated.script.contains("cd /home/travis/build/square/okhttp\n"));

        let dockerfile = fs::read_to_string(context.join("Dockerfile")).unwrap();
        assert_eq!(dockerfile, generated.dockerfile);
        assert!(context.join("build.sh").exists());

        let job = Job::new(bp, &bp.jobpairs[0], Side::Passed);
        let generated = transpile(&job, &dir.path().join("1011"), dir.path(), None).await.unwrap();
        assert_eq!(generated.base_image, "quay.io/travisci/travis-jvm:latest");
    }

    #[test]
    fn container_paths() {
        assert_eq!(build_dir(CiService::Github, "alibaba/nacos"), "/home/github/build/alibaba/nacos");
        assert_eq!(build_dir(CiService::Travis, "square/okhttp"), "/home/travis/build/square/okhttp");
        assert_eq!(user(CiService::Travis), "travis");
    }
}
