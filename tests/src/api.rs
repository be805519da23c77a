use crate::data::*;
use crate::fixtures::*;
use crate::setup::prepare_contexts;
use bugswarm_common::api::{Client, MetadataStore};
use bugswarm_tools::packager::{self, Packager};
use bugswarm_worker::config::TaskPaths;
use mockito::Matcher;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;

#[rstest]
#[tokio::test]
pub async fn packager_inserts_new_artifacts(workspace: Workspace) {
    let mut server = mockito::Server::new_async().await;
    let find = server.mock("GET", "/artifacts/alibaba-nacos-2001")
        .with_status(404)
        .create_async()
        .await;
    let insert = server.mock("POST", "/artifacts")
        .match_body(Matcher::PartialJson(json!({
            "image_tag": "alibaba-nacos-2001",
            "repo": "alibaba/nacos",
            "lang": "Java",
            "stability": "2/2",
            "current_status": {"status": "Reproducible"},
        })))
        .with_status(201)
        .create_async()
        .await;

    let buildpairs = vec![buildpair_with_history(NACOS_REPO, 200, 2001, &[1, 1])];
    let paths = TaskPaths::new(&workspace.config, "nacos").unwrap();
    prepare_contexts(&paths, &buildpairs);

    let mut client = Client::new(&workspace.config, Some(server.url())).unwrap();
    client.auth_token("secret");
    let store: Arc<dyn MetadataStore> = Arc::new(client);
    let docker = Arc::new(FakeDocker::new(workspace.dir.path()));
    let opts = packager::Options {
        workers: 1,
        no_push: true,
        ..Default::default()
    };
    let packager = Packager::new(docker, Some(store), &workspace.config, "nacos", opts).unwrap();
    assert!(packager.run(&buildpairs).await.unwrap().is_empty());

    find.assert_async().await;
    insert.assert_async().await;
}

#[rstest]
#[tokio::test]
pub async fn rejected_insert_is_a_push_error(workspace: Workspace) {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/artifacts/alibaba-nacos-2001")
        .with_status(404)
        .create_async()
        .await;
    server.mock("POST", "/artifacts")
        .with_status(422)
        .create_async()
        .await;

    let buildpairs = vec![buildpair_with_history(NACOS_REPO, 200, 2001, &[1, 1])];
    let paths = TaskPaths::new(&workspace.config, "nacos").unwrap();
    prepare_contexts(&paths, &buildpairs);

    let mut client = Client::new(&workspace.config, Some(server.url())).unwrap();
    client.auth_token("secret");
    let store: Arc<dyn MetadataStore> = Arc::new(client);
    let docker = Arc::new(FakeDocker::new(workspace.dir.path()));
    let opts = packager::Options {
        workers: 1,
        ..Default::default()
    };
    let packager = Packager::new(docker.clone(), Some(store), &workspace.config, "nacos", opts).unwrap();
    let failed = packager.run(&buildpairs).await.unwrap();

    let err = &failed["alibaba-nacos-2001"];
    assert_eq!(err.to_string().split(':').next(), Some("PushError in insert_artifact"));
    assert_eq!(docker.calls("push"), vec!["bugswarm/images:alibaba-nacos-2001"]);

    let rows = crate::assertions::csv_rows(packager.output());
    assert_eq!(rows["alibaba-nacos-2001"][0], "-");
    assert!(rows["alibaba-nacos-2001"][1].starts_with("PushError in insert_artifact"));
}

#[rstest]
#[tokio::test]
pub async fn download_build_log(workspace: Workspace) {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", "/logs/8267344544")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"build_log": "[INFO] BUILD FAILURE\n"}"#)
        .create_async()
        .await;

    let client = Client::new(&workspace.config, Some(format!("{}/", server.url()))).unwrap();
    let log = client.get_build_log(TTL_FAILED_JOB).await.unwrap();
    assert_eq!(log, "[INFO] BUILD FAILURE\n");
    mock.assert_async().await;
}
