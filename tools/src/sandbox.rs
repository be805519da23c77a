use bugswarm_common::config::ConfigFile;
use bugswarm_common::errors::*;
use bugswarm_worker::docker::{Docker, ExecOptions, ExecOutput, RunOptions};
use bugswarm_worker::errors::{Category, ReproduceError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time;

pub const OFFLINE_HOSTNAME: &str = "bugswarmdummy";

/// Exit code and combined output of a build script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRun {
    pub code: i32,
    pub log: String,
}

/// The containers of one image tag.
///
/// Every container is named `<task>-<image_tag>-<tags>` and removed again by
/// [`Sandbox::cleanup`] unless the containers are kept for debugging.
pub struct Sandbox {
    docker: Arc<dyn Docker>,
    task: String,
    image_tag: String,
    workdir: PathBuf,
    cpu_shares: u32,
    memory: String,
    timeout: Duration,
    keep_containers: bool,
    containers: Mutex<Vec<String>>,
}

impl Sandbox {
    pub fn new(docker: Arc<dyn Docker>, config: &ConfigFile, task: &str, image_tag: &str, workdir: PathBuf, keep_containers: bool) -> Sandbox {
        Sandbox {
            docker,
            task: task.to_string(),
            image_tag: image_tag.to_string(),
            workdir,
            cpu_shares: config.docker.cpu_shares(),
            memory: config.docker.memory().to_string(),
            timeout: Duration::from_secs(config.docker.container_timeout()),
            keep_containers,
            containers: Mutex::new(Vec::new()),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn docker(&self) -> &dyn Docker {
        &*self.docker
    }

    pub fn container_name(&self, tags: &[&str]) -> String {
        let mut name = format!("{}-{}", self.task, self.image_tag);
        for tag in tags {
            name.push('-');
            name.push_str(tag);
        }
        name
    }

    /// Start a detached container that idles until it is removed.
    pub async fn create(&self, image: &str, tags: &[&str], offline: bool) -> Result<String> {
        let name = self.container_name(tags);
        if self.docker.containers(&name).await.unwrap_or_default().contains(&name) {
            debug!("Removing leftover container {:?}", name);
            self.docker.rm(&name).await?;
        }

        let mut opts = RunOptions {
            name: Some(name.clone()),
            cpu_shares: Some(self.cpu_shares),
            memory: Some(self.memory.clone()),
            command: vec!["sleep infinity".to_string()],
            ..Default::default()
        };
        if offline {
            opts.network = Some("none".to_string());
            opts.hostname = Some(OFFLINE_HOSTNAME.to_string());
            opts.add_hosts = vec![format!("{}:127.0.0.1", OFFLINE_HOSTNAME)];
        }

        info!("Starting container {:?} from {:?}", name, image);
        self.docker.run(image, &opts).await?;
        self.containers.lock().unwrap_or_else(|e| e.into_inner()).push(name.clone());
        Ok(name)
    }

    pub async fn try_exec(&self, container: &str, cmd: &str) -> Result<ExecOutput> {
        debug!("[{}] {}", container, cmd);
        let cmd = bash(cmd);
        self.docker.exec(container, &cmd, &ExecOptions::default()).await
    }

    pub async fn exec(&self, container: &str, cmd: &str) -> Result<ExecOutput> {
        let output = self.try_exec(container, cmd).await?;
        output.check(&bash(cmd))
    }

    pub async fn cp_in(&self, container: &str, src: &Path, dst: &str) -> Result<()> {
        let src = src.to_str()
            .context("Path contains invalid characters")?;
        self.docker.cp(src, &format!("{}:{}", container, dst)).await
    }

    pub async fn cp_out(&self, container: &str, src: &str, dst: &Path) -> Result<()> {
        let dst = dst.to_str()
            .context("Path contains invalid characters")?;
        self.docker.cp(&format!("{}:{}", container, src), dst).await
    }

    /// Run `run_<side>.sh` of the image, a timeout is a [`Category::CacheError`].
    pub async fn run_build_script(&self, container: &str, side: &str, env: Vec<(String, String)>) -> Result<ScriptRun> {
        let cmd = bash(&format!("bash /usr/local/bin/run_{}.sh 2>&1", side));
        let opts = ExecOptions {
            env,
            ..Default::default()
        };
        info!("Running build script of the {} job in {:?}", side, container);
        let output = time::timeout(self.timeout, self.docker.exec(container, &cmd, &opts)).await
            .map_err(|_| ReproduceError::new(Category::CacheError,
                format!("Build script of the {} job timed out after {}s", side, self.timeout.as_secs()))
                .in_stage("timeout"))??;
        Ok(ScriptRun {
            code: output.code,
            log: output.stdout,
        })
    }

    pub async fn remove(&self, container: &str) {
        if self.keep_containers {
            info!("Keeping container {:?}", container);
            return;
        }
        if let Err(err) = self.docker.rm(container).await {
            warn!("Failed to remove container {:?}: {:#}", container, err);
        }
        self.containers.lock().unwrap_or_else(|e| e.into_inner()).retain(|c| c != container);
    }

    /// Remove every container that is still around.
    pub async fn cleanup(&self) {
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for container in containers {
            self.remove(&container).await;
        }
    }
}

fn bash(cmd: &str) -> Vec<String> {
    vec!["bash".to_string(), "-c".to_string(), cmd.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_in_bash() {
        assert_eq!(bash("ls ~ && true"), vec!["bash", "-c", "ls ~ && true"]);
    }
}
