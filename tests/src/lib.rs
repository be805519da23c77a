#![cfg(test)]

use crate::assertions::{assert_no_leftovers, csv_rows};
use crate::data::*;
use crate::fixtures::*;
use crate::setup::*;
use bugswarm_analyzer::compare_attributes;
use bugswarm_common::model::{self, ArtifactRecord, Side};
use bugswarm_common::{CiService, Classification};
use bugswarm_tools::cacher::{self, Cacher};
use bugswarm_tools::meta::PairMeta;
use bugswarm_tools::packager::{self, Packager};
use bugswarm_worker::compare;
use bugswarm_worker::config::TaskPaths;
use bugswarm_worker::disk::{DiskExhausted, Guardian};
use bugswarm_worker::dispatcher::{self, Dispatcher};
use bugswarm_worker::errors::{self as reproduce_errors, Category, TranspileError};
use bugswarm_worker::pair_center::{Counters, PairCenter, WorkItem};
use bugswarm_worker::transpiler::{self, Job};
use rstest::rstest;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

mod api;
mod assertions;
mod data;
pub(crate) mod fixtures;
pub mod setup;

#[test]
fn flaky_pair_over_five_runs() {
    let center = PairCenter::new(vec![buildpair(TTL_REPO, 100, &[(TTL_FAILED_JOB, TTL_PASSED_JOB)])], true).unwrap();
    for (run, matched) in [true, false, true, true, false].into_iter().enumerate() {
        record_run(&center, run as u32 + 1, matched);
    }

    assert_eq!(center.match_history(0, 0), history(&[1, 0, 1, 1, 0]));
    assert_eq!(center.classification(0, 0), Classification::Flaky);

    let annotated = center.annotated();
    let bp = &annotated[0];
    let artifact = ArtifactRecord::from_pair(bp, &bp.jobpairs[0]).unwrap();
    assert_eq!(artifact.image_tag, "alibaba-transmittable-thread-local-8267344544");
    assert_eq!(artifact.current_status.status, Classification::Flaky);
    assert_eq!(artifact.stability, "3/5");
    assert_eq!(artifact.reproduce_successes, 3);
    assert_eq!(artifact.reproduce_attempts, 5);
}

#[test]
fn classification_follows_match_history() {
    assert_eq!(model::classify(&history(&[1, 1, 1])), Classification::Reproducible);
    assert_eq!(model::classify(&history(&[0, 0, 0])), Classification::Unreproducible);
    assert_eq!(model::classify(&history(&[1, 2, 1])), Classification::Flaky);
    assert_eq!(model::classify(&history(&[])), Classification::Broken);
}

#[test]
fn python_parameterized_tests_match() {
    let original = analyzed(json!({
        "tr_log_lan": "python",
        "tr_log_status": "broken",
        "tr_log_num_tests_failed": 1,
        "tr_log_tests_failed": "Test.t((1, {'b': 2, 'a': 1}))",
    }));
    let reproduced = analyzed(json!({
        "tr_log_lan": "python",
        "tr_log_status": "broken",
        "tr_log_num_tests_failed": 1,
        "tr_log_tests_failed": "Test.t((1, {'a': 1, 'b': 2}))",
    }));
    let (matched, mismatches) = compare_attributes(&reproduced, &original, false);
    assert!(matched);
    assert!(mismatches.is_empty());
}

#[test]
fn unreproducible_failed_tests() {
    let original = analyzed(json!({
        "tr_log_lan": "java",
        "tr_log_status": "broken",
        "tr_log_num_tests_failed": 1,
        "tr_log_tests_failed": "X#y",
    }));
    let reproduced = analyzed(json!({
        "tr_log_lan": "java",
        "tr_log_status": "broken",
        "tr_log_num_tests_failed": 1,
        "tr_log_tests_failed": "X#z",
    }));
    let (matched, mismatches) = compare_attributes(&reproduced, &original, false);
    assert!(!matched);
    assert_eq!(mismatches.iter().map(|m| m.attr.as_str()).collect::<Vec<_>>(), vec!["tr_log_tests_failed"]);
}

#[test]
fn unknown_status_on_both_sides_is_no_mismatch() {
    let original = analyzed(json!({"tr_log_lan": "java", "tr_log_status": "unknown"}));
    let reproduced = analyzed(json!({"tr_log_lan": "java", "tr_log_status": "unknown"}));
    assert!(compare_attributes(&reproduced, &original, false).0);
}

#[tokio::test]
async fn zero_steps_fail_at_transpile() {
    let dir = tempfile::tempdir().unwrap();
    let mut bp = buildpair(NACOS_REPO, 200, &[(2001, 2002)]);
    bp.failed_build.jobs[0].config = json!({"runs-on": "ubuntu-latest", "steps": []});
    let job = Job::new(&bp, &bp.jobpairs[0], Side::Failed);

    let err = transpiler::transpile(&job, &dir.path().join("context"), &dir.path().join("repo"), None).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<TranspileError>(), Some(TranspileError::InvalidWorkflow(_))));
    assert_eq!(reproduce_errors::reproduce_error(&err).category, Category::TranspileError);
}

#[rstest]
#[tokio::test]
pub async fn original_log_is_downloaded_once(workspace: Workspace) {
    let paths = TaskPaths::new(&workspace.config, "nacos").unwrap();
    let store = FakeStore::default().with_log(2001, "[ERROR] Tests run: 3, Failures: 1\n");

    let path = compare::original_log(&store, &paths, 2001).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[ERROR] Tests run: 3, Failures: 1\n");

    let empty = FakeStore::default();
    assert_eq!(compare::original_log(&empty, &paths, 2001).await.unwrap(), path);
    assert!(compare::original_log(&empty, &paths, 2002).await.is_err());
}

const FAILED_MAVEN_LOG: &str = "2022-09-07T08:12:33.0000000Z ##[group]Run mvn -B test\n\
2022-09-07T08:12:34.0000000Z [INFO] Tests run: 3, Failures: 1, Errors: 0, Skipped: 0\n\
2022-09-07T08:12:35.0000000Z ##[endgroup]\n\
2022-09-07T08:12:36.0000000Z ##[error]Process completed with exit code 1.\n";

const PASSING_MAVEN_LOG: &str = "2022-09-07T09:40:02.0000000Z ##[group]Run mvn -B test\n\
2022-09-07T09:40:03.0000000Z [INFO] Tests run: 3, Failures: 0, Errors: 0, Skipped: 0\n\
2022-09-07T09:40:04.0000000Z ##[endgroup]\n";

#[rstest]
#[tokio::test]
pub async fn mismatched_job_counts_as_reproduce_error(workspace: Workspace) {
    let paths = TaskPaths::new(&workspace.config, "ttl").unwrap();
    paths.create_dirs().unwrap();
    for (path, log) in [
        (paths.orig_log(TTL_FAILED_JOB), FAILED_MAVEN_LOG),
        (paths.reproduced_log(TTL_FAILED_JOB), PASSING_MAVEN_LOG),
        (paths.orig_log(TTL_PASSED_JOB), PASSING_MAVEN_LOG),
        (paths.reproduced_log(TTL_PASSED_JOB), PASSING_MAVEN_LOG),
    ] {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, log).unwrap();
    }

    let center = Arc::new(PairCenter::new(vec![buildpair(TTL_REPO, 100, &[(TTL_FAILED_JOB, TTL_PASSED_JOB)])], true).unwrap());
    let docker = Arc::new(FakeDocker::new(workspace.dir.path()));
    let pool = Dispatcher::new(center.clone(),
                               paths,
                               Arc::new(workspace.config.clone()),
                               docker.clone(),
                               None,
                               dispatcher::Options::default(),
                               Arc::new(AtomicBool::new(false)));

    for side in Side::BOTH {
        let item = WorkItem { buildpair: 0, jobpair: 0, side: Some(side) };
        pool.shared().process_item(0, &item).await.unwrap();
    }

    let failed = center.outcome(TTL_FAILED_JOB).unwrap();
    assert!(!failed.matched);
    assert!(failed.mismatches.iter().any(|m| m.attr == "tr_log_status"));
    assert!(center.outcome(TTL_PASSED_JOB).unwrap().matched);
    assert_eq!(Counters::get(&center.counters.reproduce_err), 1);
    assert_eq!(Counters::get(&center.counters.already_reproduced), 2);
    assert!(pool.shared().error_reasons().is_empty());
    assert!(docker.calls("run").is_empty());
}

fn packaging_input() -> Vec<model::BuildPairRecord> {
    vec![
        buildpair_with_history(TTL_REPO, 100, TTL_FAILED_JOB, &[1, 1, 1]),
        buildpair_with_history(NACOS_REPO, 200, 2001, &[1, 0, 1, 1, 0]),
        buildpair_with_history(NACOS_REPO, 300, 3001, &[0, 0, 0]),
    ]
}

#[rstest]
#[tokio::test]
pub async fn flaky_pairs_are_registered_but_not_pushed(workspace: Workspace, store: FakeStore) {
    let buildpairs = packaging_input();
    let paths = TaskPaths::new(&workspace.config, "ttl").unwrap();
    prepare_contexts(&paths, &buildpairs);

    let docker = Arc::new(FakeDocker::new(workspace.dir.path()));
    let store = Arc::new(store);
    let opts = packager::Options {
        workers: 1,
        ..Default::default()
    };
    let packager = Packager::new(docker.clone(), Some(store.clone()), &workspace.config, "ttl", opts).unwrap();
    let failed = packager.run(&buildpairs).await.unwrap();
    assert!(failed.is_empty());

    let rows = csv_rows(packager.output());
    assert_eq!(rows["alibaba-transmittable-thread-local-8267344544"], vec!["2147483648", "succeed", "314572800"]);
    assert_eq!(rows["alibaba-nacos-2001"], vec!["2147483648", "flaky", "314572800"]);
    assert_eq!(rows["alibaba-nacos-3001"], vec!["-", "unreproducible", "-"]);

    assert_eq!(docker.calls("push"), vec!["bugswarm/images:alibaba-transmittable-thread-local-8267344544"]);
    assert!(!docker.calls("build").contains(&"bugswarm/images:alibaba-nacos-3001".to_string()));

    assert_eq!(store.inserted(), vec!["alibaba-transmittable-thread-local-8267344544", "alibaba-nacos-2001"]);
    let flaky = store.artifact("alibaba-nacos-2001").unwrap();
    assert_eq!(flaky.current_status.status, Classification::Flaky);
    assert_eq!(flaky.stability, "3/5");
}

#[rstest]
#[tokio::test]
pub async fn packaged_counts_agree(workspace: Workspace, store: FakeStore) {
    let buildpairs = packaging_input();
    let paths = TaskPaths::new(&workspace.config, "ttl").unwrap();
    prepare_contexts(&paths, &buildpairs);

    let docker = Arc::new(FakeDocker::new(workspace.dir.path()));
    let store = Arc::new(store);
    let opts = packager::Options {
        workers: 2,
        push_flaky: true,
        ..Default::default()
    };
    let packager = Packager::new(docker.clone(), Some(store.clone()), &workspace.config, "ttl", opts).unwrap();
    assert!(packager.run(&buildpairs).await.unwrap().is_empty());

    let succeeded = csv_rows(packager.output())
        .values()
        .filter(|row| row[1] == "succeed")
        .count();
    let registered = store.inserted()
        .iter()
        .filter(|tag| {
            let status = store.artifact(tag).unwrap().current_status.status;
            matches!(status, Classification::Reproducible | Classification::Flaky)
        })
        .count();
    assert_eq!(succeeded, 2);
    assert_eq!(docker.calls("push").len(), succeeded);
    assert_eq!(registered, succeeded);
}

#[rstest]
#[tokio::test]
pub async fn known_artifacts_are_updated(workspace: Workspace) {
    let buildpairs = vec![buildpair_with_history(NACOS_REPO, 200, 2001, &[1, 1])];
    let paths = TaskPaths::new(&workspace.config, "nacos").unwrap();
    prepare_contexts(&paths, &buildpairs);

    let known = ArtifactRecord::from_pair(&buildpairs[0], &buildpairs[0].jobpairs[0]).unwrap();
    let store = Arc::new(FakeStore::default().with_artifact(known));
    let docker = Arc::new(FakeDocker::new(workspace.dir.path()));
    let opts = packager::Options {
        workers: 1,
        no_push: true,
        ..Default::default()
    };
    let packager = Packager::new(docker.clone(), Some(store.clone()), &workspace.config, "nacos", opts).unwrap();
    assert!(packager.run(&buildpairs).await.unwrap().is_empty());

    assert!(docker.calls("push").is_empty());
    assert!(store.inserted().is_empty());
    let patches = store.patches("alibaba-nacos-2001");
    assert_eq!(patches.len(), 3);
    assert_eq!(patches[0]["current_status"]["status"], "Reproducible");
    assert_eq!(patches[1], json!({"reproduce_successes": 2}));
    assert_eq!(patches[2], json!({"stability": "2/2"}));
}

fn pair_meta(image_tag: &str, ci_service: CiService, failed_job_id: u64) -> PairMeta {
    PairMeta {
        image_tag: image_tag.to_string(),
        repo: image_tag.rsplit_once('-').unwrap().0.replacen('-', "/", 1),
        ci_service,
        language: "java".to_string(),
        build_system: Some("maven".to_string()),
        failed_job_id,
        passed_job_id: failed_job_id + 1,
    }
}

#[rstest]
#[tokio::test]
pub async fn cacher_reports_every_failure(workspace: Workspace) {
    let mut metas = BTreeMap::new();
    metas.insert("square-okhttp-1001".to_string(), pair_meta("square-okhttp-1001", CiService::Travis, 1001));
    metas.insert("alibaba-nacos-2001".to_string(), pair_meta("alibaba-nacos-2001", CiService::Github, 2001));

    let docker = Arc::new(FakeDocker::new(workspace.dir.path())
        .unpullable("bugswarm/images:alibaba-nacos-2001"));
    let opts = cacher::Options {
        workers: 2,
        src_repo: "bugswarm/images".to_string(),
        dst_repo: "bugswarm/cached-images".to_string(),
        ..Default::default()
    };
    let config = Arc::new(workspace.config.clone());
    let cacher = Cacher::new(docker.clone(), None, config, "nacos-cache", metas, opts).unwrap();

    let tags = ["square-okhttp-1001", "alibaba-nacos-2001", "alibaba-nacos-3001"]
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>();
    let failed = cacher.run(&tags).await;
    assert_eq!(failed.len(), 3);
    assert!(failed.values().all(|err| err.category == Category::CacheError));
    assert_eq!(failed["alibaba-nacos-2001"].stage.as_deref(), Some("pull"));

    let rows = csv_rows(cacher.output());
    assert_eq!(rows.len(), 3);
    assert!(rows["square-okhttp-1001"][0].starts_with("CacheError in metadata"));
    assert!(rows["alibaba-nacos-2001"][0].starts_with("CacheError in pull"));
    assert!(rows["alibaba-nacos-3001"][0].starts_with("CacheError in metadata"));
    assert!(rows.values().all(|row| row[1] == "-" && row[2] == "-"));

    assert!(docker.calls("push").is_empty());
    assert_no_leftovers(&docker, &cacher::workdir(&workspace.config, "nacos-cache"));
}

#[rstest]
#[tokio::test]
pub async fn disk_above_floor_is_left_alone(mut workspace: Workspace) {
    workspace.config.docker.disk_floor_gib = Some(0);
    let paths = TaskPaths::new(&workspace.config, "disk").unwrap();
    paths.create_dirs().unwrap();
    let center = PairCenter::new(vec![buildpair(NACOS_REPO, 200, &[(2001, 2002)])], true).unwrap();

    let docker = FakeDocker::new(workspace.dir.path()).with_containers(&["disk-2001"]);
    let guardian = Guardian::new(&docker, &paths, &workspace.config.docker).await;
    guardian.ensure(&center).await.unwrap();

    assert!(docker.calls("prune_images").is_empty());
    assert_eq!(docker.alive(), vec!["disk-2001"]);
}

#[rstest]
#[tokio::test]
pub async fn disk_exhaustion_names_the_filesystem(mut workspace: Workspace) {
    workspace.config.docker.disk_floor_gib = Some(1 << 33);
    let paths = TaskPaths::new(&workspace.config, "disk").unwrap();
    paths.create_dirs().unwrap();
    let center = PairCenter::new(vec![buildpair(NACOS_REPO, 200, &[(2001, 2002)])], true).unwrap();
    center.record_job(2001, None);
    std::fs::create_dir_all(paths.workspace_job(2001)).unwrap();
    std::fs::create_dir_all(paths.workspace_job(2002)).unwrap();

    let docker = FakeDocker::new(workspace.dir.path()).with_containers(&["disk-2001", "other-task-7"]);
    let guardian = Guardian::new(&docker, &paths, &workspace.config.docker).await;
    let err = guardian.ensure(&center).await.unwrap_err();

    let err = err.downcast_ref::<DiskExhausted>().unwrap();
    assert_eq!(err.name, "workspace");
    assert!(err.to_string().contains("workspace"));

    assert_eq!(docker.calls("prune_images").len(), 1);
    assert_eq!(docker.alive(), vec!["other-task-7"]);
    assert!(!paths.workspace_job(2001).exists());
    assert!(paths.workspace_job(2002).exists());
}
