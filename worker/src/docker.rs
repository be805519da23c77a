//! The small docker verb set everything else is written against.
//!
//! `DockerCli` drives the docker client binary. Every failing verb raises a
//! [`DockerError`] that keeps the full stdout and stderr of the client.

use crate::proc::{self, Exit};
use async_trait::async_trait;
use bugswarm_common::errors::*;
use bugswarm_common::utils::parse_docker_size;
use std::error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerError {
    pub verb: String,
    pub args: Vec<String>,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "docker {} failed (exit={:?}): {}", self.verb, self.code, self.stderr.trim())
    }
}

impl error::Error for DockerError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub name: Option<String>,
    pub cpu_shares: Option<u32>,
    pub memory: Option<String>,
    pub network: Option<String>,
    pub hostname: Option<String>,
    pub add_hosts: Vec<String>,
    pub env: Vec<(String, String)>,
    pub user: Option<String>,
    pub entrypoint: Option<String>,
    pub command: Vec<String>,
    pub tty: bool,
}

impl RunOptions {
    fn args(&self, image: &str, detach: bool) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if detach {
            args.push("-d".to_string());
        }
        if self.tty {
            args.push("-t".to_string());
        }
        if let Some(name) = &self.name {
            args.extend(["--name".to_string(), name.clone()]);
        }
        if let Some(shares) = self.cpu_shares {
            args.extend(["--cpu-shares".to_string(), shares.to_string()]);
        }
        if let Some(memory) = &self.memory {
            args.extend(["--memory".to_string(), memory.clone()]);
        }
        if let Some(network) = &self.network {
            args.extend(["--network".to_string(), network.clone()]);
        }
        if let Some(hostname) = &self.hostname {
            args.extend(["--hostname".to_string(), hostname.clone()]);
        }
        for host in &self.add_hosts {
            args.extend(["--add-host".to_string(), host.clone()]);
        }
        for (key, value) in &self.env {
            args.extend(["-e".to_string(), format!("{}={}", key, value)]);
        }
        if let Some(user) = &self.user {
            args.extend(["--user".to_string(), user.clone()]);
        }
        if let Some(entrypoint) = &self.entrypoint {
            args.extend(["--entrypoint".to_string(), entrypoint.clone()]);
        }
        args.push(image.to_string());
        args.extend(self.command.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Turn a non-zero exit into a [`DockerError`].
    pub fn check(self, cmd: &[String]) -> Result<ExecOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(DockerError {
                verb: "exec".to_string(),
                args: cmd.to_vec(),
                code: Some(self.code),
                stdout: self.stdout,
                stderr: self.stderr,
            }.into())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit: Exit,
    pub log: Vec<u8>,
}

#[async_trait]
pub trait Docker: Send + Sync {
    async fn pull(&self, image: &str) -> Result<()>;

    /// Build `dockerfile` with `context`, returns the image id.
    async fn build(&self, context: &Path, dockerfile: &Path, tag: &str) -> Result<String>;

    /// Start a detached container, returns the container id.
    async fn run(&self, image: &str, opts: &RunOptions) -> Result<String>;

    /// Run a container in the foreground and capture everything it prints.
    ///
    /// A non-zero exit is not an error, only failing to run the container is.
    async fn run_attached(&self, image: &str, opts: &RunOptions, timeout: Duration) -> Result<RunOutput>;

    async fn exec(&self, container: &str, cmd: &[String], opts: &ExecOptions) -> Result<ExecOutput>;

    /// `docker cp`, either side may be `<container>:<path>`.
    async fn cp(&self, src: &str, dst: &str) -> Result<()>;

    async fn commit(&self, container: &str, tag: &str, changes: &[String]) -> Result<String>;

    async fn tag(&self, image: &str, tag: &str) -> Result<()>;

    async fn push(&self, tag: &str) -> Result<()>;

    async fn rm(&self, container: &str) -> Result<()>;

    async fn rmi(&self, image: &str) -> Result<()>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn image_size(&self, image: &str) -> Result<u64>;

    /// Size of the most recent layer of `image`.
    async fn top_layer_size(&self, image: &str) -> Result<u64>;

    /// Names of all containers, running or not, whose name contains `filter`.
    async fn containers(&self, filter: &str) -> Result<Vec<String>>;

    /// Remove dangling images.
    async fn prune_images(&self) -> Result<()>;

    /// Take a running container off the default bridge network.
    async fn disconnect(&self, container: &str) -> Result<()>;

    /// Directory the storage driver keeps its data in.
    async fn root_dir(&self) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: PathBuf,
}

impl Default for DockerCli {
    fn default() -> DockerCli {
        DockerCli {
            bin: PathBuf::from("docker"),
        }
    }
}

impl DockerCli {
    pub fn new<P: Into<PathBuf>>(bin: P) -> DockerCli {
        DockerCli {
            bin: bin.into(),
        }
    }

    async fn output(&self, args: &[String], stdin: Option<&[u8]>) -> Result<ExecOutput> {
        debug!("Running docker {:?}", args);
        let mut child = Command::new(&self.bin)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| anyhow!("Failed to execute {:?}", self.bin))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
        }

        let output = child.wait_with_output().await?;
        Ok(ExecOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn docker(&self, args: Vec<String>) -> Result<String> {
        let output = self.output(&args, None).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(DockerError {
                verb: args.first().cloned().unwrap_or_default(),
                args,
                code: Some(output.code),
                stdout: output.stdout,
                stderr: output.stderr,
            }.into())
        }
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl Docker for DockerCli {
    async fn pull(&self, image: &str) -> Result<()> {
        info!("Pulling {:?}", image);
        self.docker(strings(["pull", image])).await?;
        Ok(())
    }

    async fn build(&self, context: &Path, dockerfile: &Path, tag: &str) -> Result<String> {
        info!("Building image {:?} from {:?}", tag, dockerfile);
        let context = context.to_str()
            .ok_or_else(|| format_err!("Build context contains invalid characters"))?;
        let dockerfile = dockerfile.to_str()
            .ok_or_else(|| format_err!("Dockerfile path contains invalid characters"))?;
        self.docker(strings(["build", "-q", "-f", dockerfile, "-t", tag, context])).await?;
        let id = self.docker(strings(["image", "inspect", "--format", "{{.Id}}", tag])).await?;
        Ok(id.trim().to_string())
    }

    async fn run(&self, image: &str, opts: &RunOptions) -> Result<String> {
        let id = self.docker(opts.args(image, true)).await?;
        Ok(id.trim().to_string())
    }

    async fn run_attached(&self, image: &str, opts: &RunOptions, timeout: Duration) -> Result<RunOutput> {
        let mut log = Vec::new();
        let exit = proc::run(&self.bin, opts.args(image, false), proc::Options {
            timeout,
            ..Default::default()
        }, &mut log).await?;
        Ok(RunOutput { exit, log })
    }

    async fn exec(&self, container: &str, cmd: &[String], opts: &ExecOptions) -> Result<ExecOutput> {
        let mut args = vec!["exec".to_string()];
        if opts.stdin.is_some() {
            args.push("-i".to_string());
        }
        if let Some(user) = &opts.user {
            args.extend(["--user".to_string(), user.clone()]);
        }
        if let Some(workdir) = &opts.workdir {
            args.extend(["--workdir".to_string(), workdir.clone()]);
        }
        for (key, value) in &opts.env {
            args.extend(["-e".to_string(), format!("{}={}", key, value)]);
        }
        args.push(container.to_string());
        args.extend(cmd.iter().cloned());
        self.output(&args, opts.stdin.as_deref()).await
    }

    async fn cp(&self, src: &str, dst: &str) -> Result<()> {
        self.docker(strings(["cp", src, dst])).await?;
        Ok(())
    }

    async fn commit(&self, container: &str, tag: &str, changes: &[String]) -> Result<String> {
        let mut args = vec!["commit".to_string()];
        for change in changes {
            args.extend(["--change".to_string(), change.clone()]);
        }
        args.extend([container.to_string(), tag.to_string()]);
        let id = self.docker(args).await?;
        Ok(id.trim().to_string())
    }

    async fn tag(&self, image: &str, tag: &str) -> Result<()> {
        self.docker(strings(["tag", image, tag])).await?;
        Ok(())
    }

    async fn push(&self, tag: &str) -> Result<()> {
        info!("Pushing {:?}", tag);
        self.docker(strings(["push", tag])).await?;
        Ok(())
    }

    async fn rm(&self, container: &str) -> Result<()> {
        self.docker(strings(["rm", "-f", container])).await?;
        Ok(())
    }

    async fn rmi(&self, image: &str) -> Result<()> {
        self.docker(strings(["rmi", "-f", image])).await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.output(&strings(["image", "inspect", image]), None).await?;
        Ok(output.success())
    }

    async fn image_size(&self, image: &str) -> Result<u64> {
        let size = self.docker(strings(["image", "inspect", "--format", "{{.Size}}", image])).await?;
        let size = size.trim().parse::<u64>()
            .with_context(|| anyhow!("Invalid image size for {:?}: {:?}", image, size))?;
        Ok(size)
    }

    async fn top_layer_size(&self, image: &str) -> Result<u64> {
        let history = self.docker(strings(["history", "--format", "{{.Size}}", image])).await?;
        let top = history.lines()
            .next()
            .ok_or_else(|| format_err!("Image {:?} has no layers", image))?;
        parse_docker_size(top)
    }

    async fn containers(&self, filter: &str) -> Result<Vec<String>> {
        let filter = format!("name={}", filter);
        let out = self.docker(strings(["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])).await?;
        Ok(out.lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn prune_images(&self) -> Result<()> {
        self.docker(strings(["image", "prune", "-f"])).await?;
        Ok(())
    }

    async fn disconnect(&self, container: &str) -> Result<()> {
        self.docker(strings(["network", "disconnect", "bridge", container])).await?;
        Ok(())
    }

    async fn root_dir(&self) -> Result<PathBuf> {
        let root = self.docker(strings(["info", "--format", "{{.DockerRootDir}}"])).await?;
        Ok(PathBuf::from(root.trim()))
    }
}
