//! What the cacher and the packager need to know about an image tag.

use bugswarm_common::api::MetadataStore;
use bugswarm_common::errors::*;
use bugswarm_common::model::{self, ArtifactRecord, BuildPairRecord, JobPairRecord, Side};
use bugswarm_common::CiService;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairMeta {
    pub image_tag: String,
    pub repo: String,
    pub ci_service: CiService,
    pub language: String,
    pub build_system: Option<String>,
    pub failed_job_id: u64,
    pub passed_job_id: u64,
}

fn known_build_system(build_system: &str) -> Option<String> {
    if build_system.is_empty() || build_system == "NA" {
        None
    } else {
        Some(build_system.to_lowercase())
    }
}

impl PairMeta {
    pub fn from_pair(bp: &BuildPairRecord, jp: &JobPairRecord) -> Result<PairMeta> {
        let image_tag = model::image_tag(&bp.repo, jp.failed_job.job_id)?;
        let failed_job = bp.failed_build.job(jp.failed_job.job_id)?;
        // the analyzer's guess from the original log beats the filter's
        let build_system = jp.failed_job.orig_result.as_ref()
            .and_then(|r| r.get("tr_build_system"))
            .and_then(Value::as_str)
            .and_then(known_build_system)
            .or_else(|| jp.build_system());
        Ok(PairMeta {
            image_tag,
            repo: bp.repo.clone(),
            ci_service: bp.ci_service,
            language: failed_job.language().to_lowercase(),
            build_system,
            failed_job_id: jp.failed_job.job_id,
            passed_job_id: jp.passed_job.job_id,
        })
    }

    pub fn from_artifact(artifact: &ArtifactRecord) -> PairMeta {
        PairMeta {
            image_tag: artifact.image_tag.clone(),
            repo: artifact.repo.clone(),
            ci_service: artifact.ci_service,
            language: artifact.lang.to_lowercase(),
            build_system: known_build_system(&artifact.build_system),
            failed_job_id: artifact.failed_job.job_id,
            passed_job_id: artifact.passed_job.job_id,
        }
    }

    pub fn job_id(&self, side: Side) -> u64 {
        match side {
            Side::Failed => self.failed_job_id,
            Side::Passed => self.passed_job_id,
        }
    }
}

/// Index the job pairs of a reproducer result file by image tag.
pub fn from_task_json<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, PairMeta>> {
    let path = path.as_ref();
    let buildpairs = model::read_buildpairs(path)
        .with_context(|| anyhow!("Failed to read task json {:?}", path))?;
    let mut metas = BTreeMap::new();
    for bp in &buildpairs {
        for jp in &bp.jobpairs {
            let meta = PairMeta::from_pair(bp, jp)?;
            metas.insert(meta.image_tag.clone(), meta);
        }
    }
    debug!("Loaded {} image tags from {:?}", metas.len(), path);
    Ok(metas)
}

/// Look the image tag up in the task json, or ask the metadata store.
pub async fn lookup(metas: &BTreeMap<String, PairMeta>, store: Option<&dyn MetadataStore>, image_tag: &str) -> Result<PairMeta> {
    if let Some(meta) = metas.get(image_tag) {
        return Ok(meta.clone());
    }
    let store = store.context("No task json entry and no metadata store to ask")?;
    let artifact = store.find_artifact(image_tag).await?
        .ok_or_else(|| anyhow!("Unable to get artifact data of {:?}", image_tag))?;
    Ok(PairMeta::from_artifact(&artifact))
}

/// Newline separated image tags, blank lines and `#` comments are skipped.
pub fn read_image_tags<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| anyhow!("Failed to read image tags from {:?}", path))?;
    Ok(parse_image_tags(&text))
}

pub fn parse_image_tags(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

pub fn check_task_name(task: &str) -> Result<()> {
    let re = Regex::new(r"^[\w-]+$")?;
    if !re.is_match(task) {
        bail!("Invalid task name: {:?}", task);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_JSON: &str = r#"[{
        "repo": "alibaba/transmittable-thread-local",
        "ci_service": "github",
        "failed_build": {
            "build_id": 10, "head_sha": "aaa", "message": "",
            "jobs": [{"job_id": 8267344544, "build_job": "10.1", "language": "Java", "config": {}}]
        },
        "passed_build": {
            "build_id": 11, "head_sha": "bbb", "message": "",
            "jobs": [{"job_id": 8267344708, "build_job": "11.1", "language": "Java", "config": {}}]
        },
        "jobpairs": [{
            "failed_job": {"job_id": 8267344544, "orig_result": {"tr_build_system": "Maven"}},
            "passed_job": {"job_id": 8267344708},
            "build_system": "NA",
            "match_history": {"1": 1, "2": 1, "3": 1}
        }]
    }]"#;

    #[test]
    fn index_task_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        fs::write(&path, RESULT_JSON).unwrap();

        let metas = from_task_json(&path).unwrap();
        let meta = &metas["alibaba-transmittable-thread-local-8267344544"];
        assert_eq!(meta.repo, "alibaba/transmittable-thread-local");
        assert_eq!(meta.language, "java");
        assert_eq!(meta.build_system.as_deref(), Some("maven"));
        assert_eq!(meta.job_id(Side::Passed), 8267344708);
        assert_eq!(meta.ci_service, CiService::Github);
    }

    #[test]
    fn image_tags_file() {
        let tags = parse_image_tags("# cached on tuesday\nalibaba-nacos-1\n\n  Netflix-spectator-8295325184 \n");
        assert_eq!(tags, vec!["alibaba-nacos-1", "Netflix-spectator-8295325184"]);
    }

    #[test]
    fn task_names() {
        assert!(check_task_name("nacos-2024_01").is_ok());
        assert!(check_task_name("../etc").is_err());
        assert!(check_task_name("").is_err());
    }
}
