//! Build, push and register the pair images prepared by `reproducer --package-mode`.

use crate::output::CsvOutput;
use bugswarm_common::api::MetadataStore;
use bugswarm_common::config::ConfigFile;
use bugswarm_common::errors::*;
use bugswarm_common::model::{self, ArtifactRecord, BuildPairRecord, JobPairRecord};
use bugswarm_common::Classification;
use bugswarm_worker::config::TaskPaths;
use bugswarm_worker::docker::Docker;
use bugswarm_worker::errors::{self as reproduce_errors, Category, ReproduceError, WrapErrors};
use bugswarm_worker::package::{self, PairContext};
use bugswarm_worker::repo::SetupStates;
use bugswarm_worker::transpiler::dockerfile;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub no_push: bool,
    pub push_flaky: bool,
    pub workers: usize,
    /// Limit packaging to these image tags.
    pub image_tags: Option<BTreeSet<String>>,
}

/// What happened to an image, the status column of the csv.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Built, pushed (or pushing was disabled) and registered.
    Succeed,
    /// Built and registered, but not pushed.
    Flaky,
    /// Nothing was built.
    Skipped(Classification),
}

impl Outcome {
    pub fn status(&self) -> String {
        match self {
            Outcome::Succeed => "succeed".to_string(),
            Outcome::Flaky => "flaky".to_string(),
            Outcome::Skipped(classification) => classification.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packaged {
    pub outcome: Outcome,
    pub original_size: Option<u64>,
    pub final_layer_size: Option<u64>,
}

/// Job pairs of a result json that are candidates for packaging.
pub fn select_pairs<'a>(buildpairs: &'a [BuildPairRecord], image_tags: Option<&BTreeSet<String>>) -> Result<Vec<(String, &'a BuildPairRecord, &'a JobPairRecord)>> {
    let mut pairs = Vec::new();
    for bp in buildpairs {
        for jp in &bp.jobpairs {
            if jp.is_filtered {
                continue;
            }
            let image_tag = model::image_tag(&bp.repo, jp.failed_job.job_id)?;
            if let Some(tags) = image_tags {
                if !tags.contains(&image_tag) {
                    continue;
                }
            }
            pairs.push((image_tag, bp, jp));
        }
    }
    Ok(pairs)
}

pub struct Packager {
    docker: Arc<dyn Docker>,
    store: Option<Arc<dyn MetadataStore>>,
    paths: TaskPaths,
    repo: String,
    states: SetupStates,
    output: CsvOutput,
    opts: Options,
}

impl Packager {
    pub fn new(docker: Arc<dyn Docker>, store: Option<Arc<dyn MetadataStore>>, config: &ConfigFile, task: &str, opts: Options) -> Result<Packager> {
        let paths = TaskPaths::new(config, task)?;
        let output = CsvOutput::new(paths.csv())?;
        Ok(Packager {
            docker,
            store,
            paths,
            repo: config.registry.repo().to_string(),
            states: SetupStates::new(),
            output,
            opts,
        })
    }

    pub fn paths(&self) -> &TaskPaths {
        &self.paths
    }

    pub fn output(&self) -> &CsvOutput {
        &self.output
    }

    /// Package every selected pair of `buildpairs`, returns the ones that failed.
    pub async fn run(&self, buildpairs: &[BuildPairRecord]) -> Result<BTreeMap<String, ReproduceError>> {
        let pairs = select_pairs(buildpairs, self.opts.image_tags.as_ref())?;
        if let Some(tags) = &self.opts.image_tags {
            for tag in tags {
                if !pairs.iter().any(|(t, _, _)| t == tag) {
                    warn!("Image tag {:?} is not part of the result json, skipping", tag);
                }
            }
        }
        info!("Packaging {} images", pairs.len());

        let results = stream::iter(pairs)
            .map(|(tag, bp, jp)| async move {
                let result = self.process(&tag, bp, jp).await;
                (tag, result)
            })
            .buffer_unordered(self.opts.workers.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut failed = BTreeMap::new();
        for (tag, result) in results {
            if let Err(err) = result {
                failed.insert(tag, reproduce_errors::reproduce_error(&err));
            }
        }
        Ok(failed)
    }

    /// Package one pair and write its csv line.
    pub async fn process(&self, image_tag: &str, bp: &BuildPairRecord, jp: &JobPairRecord) -> Result<Packaged> {
        let result = self.package(image_tag, bp, jp).await;
        let size = |s: Option<u64>| s.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        match &result {
            Ok(packaged) => {
                let status = packaged.outcome.status();
                info!("{:?}: {}", image_tag, status);
                self.output.write(image_tag, &[
                    size(packaged.original_size).as_str(),
                    status.as_str(),
                    size(packaged.final_layer_size).as_str(),
                ])?;
            },
            Err(err) => {
                let err = reproduce_errors::reproduce_error(err).to_string();
                error!("Failed to package {:?}: {}", image_tag, err);
                self.output.write(image_tag, &["-", err.as_str(), "-"])?;
            },
        }
        result
    }

    async fn context(&self, image_tag: &str, bp: &BuildPairRecord, jp: &JobPairRecord) -> Result<PairContext> {
        let dir = self.paths.pair_output(image_tag);
        if dir.join(dockerfile::DOCKERFILE).exists() {
            debug!("Using prepared build context {:?}", dir);
            return Ok(PairContext {
                dir,
                image_tag: image_tag.to_string(),
                base_image: String::new(),
            });
        }
        info!("No build context for {:?} yet, preparing it", image_tag);
        self.paths.create_dirs()?;
        let context = package::prepare(&self.paths, &self.states, self.store.as_deref(), bp, jp).await?;
        package::clean_workspaces(&self.paths, jp).await;
        Ok(context)
    }

    async fn package(&self, image_tag: &str, bp: &BuildPairRecord, jp: &JobPairRecord) -> Result<Packaged> {
        let history = jp.match_history.clone().unwrap_or_default();
        let classification = model::classify(&history);
        let (_, _, stability) = model::stability(&history);
        info!("{:?} is {} ({})", image_tag, classification, stability);

        if !matches!(classification, Classification::Reproducible | Classification::Flaky) {
            return Ok(Packaged {
                outcome: Outcome::Skipped(classification),
                original_size: None,
                final_layer_size: None,
            });
        }

        let context = self.context(image_tag, bp, jp).await?;
        let tag = format!("{}:{}", self.repo, image_tag);
        self.docker.build(&context.dir, &context.dockerfile(), &tag).await
            .wrap_errors(Category::ImageBuildError, "build")?;
        let original_size = self.docker.image_size(&tag).await
            .wrap_errors(Category::ImageBuildError, "size")?;
        let final_layer_size = self.docker.top_layer_size(&tag).await
            .wrap_errors(Category::ImageBuildError, "size")?;

        let outcome = if !classification.is_publishable(self.opts.push_flaky) {
            info!("Not pushing flaky image {:?}", tag);
            Outcome::Flaky
        } else if self.opts.no_push {
            info!("Not pushing {:?}", tag);
            Outcome::Succeed
        } else {
            self.docker.push(&tag).await
                .wrap_errors(Category::PushError, "push")?;
            Outcome::Succeed
        };

        if let Some(store) = &self.store {
            register(&**store, image_tag, bp, jp).await
                .wrap_errors(Category::PushError, "insert_artifact")?;
        } else {
            warn!("No metadata store configured, {:?} is not registered", image_tag);
        }

        Ok(Packaged {
            outcome,
            original_size: Some(original_size),
            final_layer_size: Some(final_layer_size),
        })
    }
}

/// Insert the artifact of a pair, or bring the status of a known one up to date.
pub async fn register(store: &dyn MetadataStore, image_tag: &str, bp: &BuildPairRecord, jp: &JobPairRecord) -> Result<()> {
    if store.find_artifact(image_tag).await?.is_some() {
        let history = jp.match_history.clone().unwrap_or_default();
        let (successes, _, stability) = model::stability(&history);
        info!("Updating artifact {:?}", image_tag);
        store.set_current_status(image_tag, model::classify(&history), &model::today()).await?;
        store.set_reproduce_successes(image_tag, successes).await?;
        store.set_stability(image_tag, &stability).await?;
    } else {
        info!("Inserting artifact {:?}", image_tag);
        let artifact = ArtifactRecord::from_pair(bp, jp)?;
        store.insert_artifact(&artifact).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_JSON: &str = r#"[{
        "repo": "alibaba/nacos",
        "failed_build": {"build_id": 1, "head_sha": "a", "jobs": [{"job_id": 11, "language": "java", "config": {}}, {"job_id": 12, "language": "java", "config": {}}]},
        "passed_build": {"build_id": 2, "head_sha": "b", "jobs": [{"job_id": 21, "language": "java", "config": {}}, {"job_id": 22, "language": "java", "config": {}}]},
        "jobpairs": [
            {"failed_job": {"job_id": 11}, "passed_job": {"job_id": 21}, "match_history": {"1": 1}},
            {"failed_job": {"job_id": 12}, "passed_job": {"job_id": 22}, "is_filtered": true}
        ]
    }]"#;

    #[test]
    fn select_unfiltered_pairs() {
        let buildpairs: Vec<BuildPairRecord> = serde_json::from_str(RESULT_JSON).unwrap();
        let pairs = select_pairs(&buildpairs, None).unwrap();
        assert_eq!(pairs.iter().map(|(t, _, _)| t.as_str()).collect::<Vec<_>>(), vec!["alibaba-nacos-11"]);

        let only = BTreeSet::from(["alibaba-nacos-99".to_string()]);
        assert!(select_pairs(&buildpairs, Some(&only)).unwrap().is_empty());
    }

    #[test]
    fn outcome_status() {
        assert_eq!(Outcome::Succeed.status(), "succeed");
        assert_eq!(Outcome::Flaky.status(), "flaky");
        assert_eq!(Outcome::Skipped(Classification::Unreproducible).status(), "unreproducible");
    }
}
