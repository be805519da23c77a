use crate::config::ConfigFile;
use crate::errors::*;
use crate::http::{self, RequestBuilder};
use crate::model::ArtifactRecord;
use crate::{auth, Classification};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::time::Duration;

pub const ARTIFACTS_RESOURCE: &str = "artifacts";
pub const LOGS_RESOURCE: &str = "logs";

/// The subset of the metadata store used by the pipeline.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_artifact(&self, image_tag: &str) -> Result<Option<ArtifactRecord>>;
    async fn insert_artifact(&self, artifact: &ArtifactRecord) -> Result<()>;
    async fn patch_artifact(&self, image_tag: &str, delta: Value) -> Result<()>;
    async fn get_build_log(&self, job_id: u64) -> Result<String>;

    async fn set_current_status(&self, image_tag: &str, status: Classification, date: &str) -> Result<()> {
        chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .context("Incorrect date format, should be YYYY-MM-DD")?;
        self.patch_artifact(image_tag, json!({
            "current_status": {
                "status": status.to_string(),
                "time_stamp": date,
            }
        })).await
    }

    async fn set_reproduce_successes(&self, image_tag: &str, successes: usize) -> Result<()> {
        self.patch_artifact(image_tag, json!({ "reproduce_successes": successes })).await
    }

    async fn set_stability(&self, image_tag: &str, stability: &str) -> Result<()> {
        self.patch_artifact(image_tag, json!({ "stability": stability })).await
    }
}

#[derive(Debug, Deserialize)]
struct Etag {
    #[serde(rename = "_etag")]
    etag: String,
}

#[derive(Debug, Deserialize)]
struct BuildLog {
    build_log: String,
}

pub struct Client {
    endpoint: String,
    client: http::Client,
    token: Option<String>,
    retries: u32,
    backoff: Duration,
}

impl Client {
    pub fn new(config: &ConfigFile, endpoint: Option<String>) -> Result<Client> {
        let endpoint = endpoint.unwrap_or_else(|| config.metadata.endpoint().to_string());
        let endpoint = endpoint.trim_end_matches('/').to_string();
        debug!("setting metadata store endpoint to {:?}", endpoint);
        let client = http::client(&config.http)?;
        Ok(Client {
            endpoint,
            client,
            token: None,
            retries: config.http.retries(),
            backoff: Duration::from_secs(1),
        })
    }

    pub fn with_auth_token(&mut self, config: &ConfigFile) -> Result<&mut Self> {
        let token = auth::find_token(&config.auth)
            .context("Failed to load metadata store token")?;
        Ok(self.auth_token(token))
    }

    pub fn auth_token<I: Into<String>>(&mut self, token: I) -> &mut Self {
        self.token = Some(token.into());
        self
    }

    pub fn backoff(&mut self, backoff: Duration) -> &mut Self {
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    fn authenticate(&self, req: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            req.basic_auth(token, Some(""))
        } else {
            req
        }
    }

    pub fn get(&self, path: Cow<'static, str>) -> RequestBuilder {
        self.authenticate(self.client.get(self.url(&path)))
    }

    pub fn post(&self, path: Cow<'static, str>) -> RequestBuilder {
        self.authenticate(self.client.post(self.url(&path)))
    }

    pub fn patch(&self, path: Cow<'static, str>) -> RequestBuilder {
        self.authenticate(self.client.patch(self.url(&path)))
    }

    fn require_token(&self) -> Result<()> {
        if self.token.is_none() {
            bail!("A metadata store token is required to modify artifacts");
        }
        Ok(())
    }

    async fn fetch_etag(&self, path: &str) -> Result<String> {
        let etag = self.get(Cow::Owned(path.to_string()))
            .send()
            .await?
            .error_for_status()?
            .json::<Etag>()
            .await?;
        Ok(etag.etag)
    }
}

#[async_trait]
impl MetadataStore for Client {
    async fn find_artifact(&self, image_tag: &str) -> Result<Option<ArtifactRecord>> {
        let path = &format!("{}/{}", ARTIFACTS_RESOURCE, image_tag);
        http::with_retries(self.retries, self.backoff, || async move {
            let resp = self.get(Cow::Owned(path.clone()))
                .send()
                .await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let artifact = resp
                .error_for_status()?
                .json()
                .await?;
            Ok(Some(artifact))
        }).await
    }

    async fn insert_artifact(&self, artifact: &ArtifactRecord) -> Result<()> {
        self.require_token()?;
        http::with_retries(self.retries, self.backoff, || async move {
            self.post(Cow::Borrowed(ARTIFACTS_RESOURCE))
                .json(artifact)
                .send()
                .await?
                .error_for_status()
                .with_context(|| anyhow!("Failed to insert artifact {:?}", artifact.image_tag))?;
            Ok(())
        }).await
    }

    async fn patch_artifact(&self, image_tag: &str, delta: Value) -> Result<()> {
        if image_tag.is_empty() {
            bail!("Can't patch an artifact without image tag");
        }
        self.require_token()?;
        let path = &format!("{}/{}", ARTIFACTS_RESOURCE, image_tag);
        let delta = &delta;
        http::with_retries(self.retries, self.backoff, || async move {
            let etag = self.fetch_etag(path).await?;
            self.patch(Cow::Owned(path.clone()))
                .header("If-Match", etag)
                .json(delta)
                .send()
                .await?
                .error_for_status()
                .with_context(|| anyhow!("Failed to patch artifact {:?}", image_tag))?;
            Ok(())
        }).await
    }

    async fn get_build_log(&self, job_id: u64) -> Result<String> {
        let path = &format!("{}/{}", LOGS_RESOURCE, job_id);
        http::with_retries(self.retries, self.backoff, || async move {
            let log = self.get(Cow::Owned(path.clone()))
                .send()
                .await?
                .error_for_status()?
                .json::<BuildLog>()
                .await?;
            Ok(log.build_log)
        }).await
    }
}
