use async_trait::async_trait;
use bugswarm_common::api::MetadataStore;
use bugswarm_common::errors::*;
use bugswarm_common::model::ArtifactRecord;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory metadata store.
#[derive(Debug, Default)]
pub struct FakeStore {
    artifacts: Mutex<BTreeMap<String, ArtifactRecord>>,
    inserted: Mutex<Vec<String>>,
    patches: Mutex<Vec<(String, Value)>>,
    logs: BTreeMap<u64, String>,
}

impl FakeStore {
    pub fn with_log(mut self, job_id: u64, log: &str) -> FakeStore {
        self.logs.insert(job_id, log.to_string());
        self
    }

    pub fn with_artifact(self, artifact: ArtifactRecord) -> FakeStore {
        self.artifacts.lock().unwrap().insert(artifact.image_tag.clone(), artifact);
        self
    }

    pub fn artifact(&self, image_tag: &str) -> Option<ArtifactRecord> {
        self.artifacts.lock().unwrap().get(image_tag).cloned()
    }

    /// Image tags of every inserted artifact, in order.
    pub fn inserted(&self) -> Vec<String> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn patches(&self, image_tag: &str) -> Vec<Value> {
        self.patches.lock().unwrap()
            .iter()
            .filter(|(tag, _)| tag == image_tag)
            .map(|(_, delta)| delta.clone())
            .collect()
    }
}

#[async_trait]
impl MetadataStore for FakeStore {
    async fn find_artifact(&self, image_tag: &str) -> Result<Option<ArtifactRecord>> {
        Ok(self.artifact(image_tag))
    }

    async fn insert_artifact(&self, artifact: &ArtifactRecord) -> Result<()> {
        let mut artifacts = self.artifacts.lock().unwrap();
        if artifacts.contains_key(&artifact.image_tag) {
            bail!("Artifact {:?} already exists", artifact.image_tag);
        }
        artifacts.insert(artifact.image_tag.clone(), artifact.clone());
        self.inserted.lock().unwrap().push(artifact.image_tag.clone());
        Ok(())
    }

    async fn patch_artifact(&self, image_tag: &str, delta: Value) -> Result<()> {
        if !self.artifacts.lock().unwrap().contains_key(image_tag) {
            bail!("Artifact {:?} not found", image_tag);
        }
        self.patches.lock().unwrap().push((image_tag.to_string(), delta));
        Ok(())
    }

    async fn get_build_log(&self, job_id: u64) -> Result<String> {
        self.logs.get(&job_id)
            .cloned()
            .ok_or_else(|| anyhow!("No log for job {}", job_id))
    }
}
