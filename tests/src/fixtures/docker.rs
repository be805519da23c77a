use async_trait::async_trait;
use bugswarm_common::errors::*;
use bugswarm_worker::docker::{Docker, ExecOptions, ExecOutput, RunOptions, RunOutput};
use bugswarm_worker::proc::Exit;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Keeps track of images and containers instead of talking to a docker daemon.
#[derive(Debug, Default)]
pub struct FakeDocker {
    calls: Mutex<Vec<(String, String)>>,
    images: Mutex<BTreeSet<String>>,
    containers: Mutex<BTreeSet<String>>,
    unpullable: BTreeSet<String>,
    image_size: u64,
    layer_size: u64,
    root: PathBuf,
}

impl FakeDocker {
    pub fn new<P: Into<PathBuf>>(root: P) -> FakeDocker {
        FakeDocker {
            image_size: 2 * 1024 * 1024 * 1024,
            layer_size: 300 * 1024 * 1024,
            root: root.into(),
            ..Default::default()
        }
    }

    /// Make pulling `image` fail like a missing tag in the registry.
    pub fn unpullable(mut self, image: &str) -> FakeDocker {
        self.unpullable.insert(image.to_string());
        self
    }

    pub fn with_containers(self, names: &[&str]) -> FakeDocker {
        self.containers.lock().unwrap().extend(names.iter().map(|n| n.to_string()));
        self
    }

    fn record(&self, verb: &str, arg: &str) {
        self.calls.lock().unwrap().push((verb.to_string(), arg.to_string()));
    }

    /// Arguments of every call of `verb`, in order.
    pub fn calls(&self, verb: &str) -> Vec<String> {
        self.calls.lock().unwrap()
            .iter()
            .filter(|(v, _)| v == verb)
            .map(|(_, arg)| arg.clone())
            .collect()
    }

    pub fn alive(&self) -> Vec<String> {
        self.containers.lock().unwrap().iter().cloned().collect()
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.images.lock().unwrap().contains(image)
    }
}

#[async_trait]
impl Docker for FakeDocker {
    async fn pull(&self, image: &str) -> Result<()> {
        self.record("pull", image);
        if self.unpullable.contains(image) {
            bail!("Error response from daemon: manifest for {} not found", image);
        }
        self.images.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn build(&self, _context: &Path, _dockerfile: &Path, tag: &str) -> Result<String> {
        self.record("build", tag);
        self.images.lock().unwrap().insert(tag.to_string());
        Ok(format!("sha256:{}", tag.len()))
    }

    async fn run(&self, image: &str, opts: &RunOptions) -> Result<String> {
        self.record("run", image);
        let name = opts.name.clone().unwrap_or_else(|| format!("{}-container", image));
        self.containers.lock().unwrap().insert(name.clone());
        Ok(name)
    }

    async fn run_attached(&self, image: &str, opts: &RunOptions, _timeout: Duration) -> Result<RunOutput> {
        self.record("run_attached", image);
        if let Some(name) = &opts.name {
            self.containers.lock().unwrap().insert(name.clone());
        }
        Ok(RunOutput {
            exit: Exit {
                success: true,
                code: Some(0),
                timed_out: false,
            },
            log: Vec::new(),
        })
    }

    async fn exec(&self, container: &str, cmd: &[String], _opts: &ExecOptions) -> Result<ExecOutput> {
        self.record("exec", &format!("{}: {}", container, cmd.join(" ")));
        Ok(ExecOutput {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn cp(&self, src: &str, dst: &str) -> Result<()> {
        self.record("cp", &format!("{} {}", src, dst));
        Ok(())
    }

    async fn commit(&self, container: &str, tag: &str, _changes: &[String]) -> Result<String> {
        self.record("commit", &format!("{} {}", container, tag));
        self.images.lock().unwrap().insert(tag.to_string());
        Ok(format!("sha256:{}", tag.len()))
    }

    async fn tag(&self, image: &str, tag: &str) -> Result<()> {
        self.record("tag", &format!("{} {}", image, tag));
        self.images.lock().unwrap().insert(tag.to_string());
        Ok(())
    }

    async fn push(&self, tag: &str) -> Result<()> {
        self.record("push", tag);
        if !self.has_image(tag) {
            bail!("An image does not exist locally with the tag: {}", tag);
        }
        Ok(())
    }

    async fn rm(&self, container: &str) -> Result<()> {
        self.record("rm", container);
        self.containers.lock().unwrap().remove(container);
        Ok(())
    }

    async fn rmi(&self, image: &str) -> Result<()> {
        self.record("rmi", image);
        self.images.lock().unwrap().remove(image);
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.has_image(image))
    }

    async fn image_size(&self, _image: &str) -> Result<u64> {
        Ok(self.image_size)
    }

    async fn top_layer_size(&self, _image: &str) -> Result<u64> {
        Ok(self.layer_size)
    }

    async fn containers(&self, filter: &str) -> Result<Vec<String>> {
        Ok(self.containers.lock().unwrap()
            .iter()
            .filter(|c| c.contains(filter))
            .cloned()
            .collect())
    }

    async fn prune_images(&self) -> Result<()> {
        self.record("prune_images", "");
        Ok(())
    }

    async fn disconnect(&self, container: &str) -> Result<()> {
        self.record("disconnect", container);
        Ok(())
    }

    async fn root_dir(&self) -> Result<PathBuf> {
        Ok(self.root.clone())
    }
}
