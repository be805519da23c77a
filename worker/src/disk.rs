//! Free space floors for the workspace and docker's storage.

use crate::config::TaskPaths;
use crate::docker::Docker;
use crate::pair_center::PairCenter;
use bugswarm_common::config::DockerConfig;
use bugswarm_common::errors::*;
use bugswarm_common::model::Side;
use bugswarm_common::utils::bytes_to_human;
use nix::sys::statvfs::statvfs;
use std::error;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskExhausted {
    pub name: String,
    pub path: PathBuf,
    pub free: u64,
    pub floor: u64,
}

impl fmt::Display for DiskExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Still inadequate disk space on {} ({:?}) after reclamation: {} free, {} required",
            self.name, self.path, bytes_to_human(self.free), bytes_to_human(self.floor))
    }
}

impl error::Error for DiskExhausted {}

pub fn free_bytes(path: &Path) -> Result<u64> {
    let stat = statvfs(path)
        .with_context(|| anyhow!("Failed to stat filesystem of {:?}", path))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

pub struct Guardian<'a> {
    docker: &'a dyn Docker,
    paths: &'a TaskPaths,
    floor: u64,
    docker_root: PathBuf,
}

impl<'a> Guardian<'a> {
    pub async fn new(docker: &'a dyn Docker, paths: &'a TaskPaths, config: &DockerConfig) -> Guardian<'a> {
        let docker_root = match &config.root {
            Some(root) => root.clone(),
            None => match docker.root_dir().await {
                Ok(root) => root,
                Err(err) => {
                    warn!("Failed to ask docker for its root dir, assuming default: {:#}", err);
                    config.root()
                },
            },
        };
        Guardian {
            docker,
            paths,
            floor: config.disk_floor_bytes(),
            docker_root,
        }
    }

    fn filesystems(&self) -> [(&'static str, &Path); 2] {
        [
            ("workspace", self.paths.workspace_fs()),
            ("docker root", &self.docker_root),
        ]
    }

    /// Filesystems below the floor, with their free space.
    fn breached(&self) -> Vec<(&'static str, PathBuf, u64)> {
        let mut breached = Vec::new();
        for (name, path) in self.filesystems() {
            match free_bytes(path) {
                Ok(free) if free < self.floor => breached.push((name, path.to_path_buf(), free)),
                Ok(free) => debug!("{} has {} free", name, bytes_to_human(free)),
                Err(err) => warn!("Not checking free space of {}: {:#}", name, err),
            }
        }
        breached
    }

    /// Make sure both floors hold, cleaning up once if they don't.
    pub async fn ensure(&self, center: &PairCenter) -> Result<()> {
        if self.breached().is_empty() {
            return Ok(());
        }
        warn!("Inadequate disk space, removing containers, dangling images and finished workspaces");
        self.reclaim(center).await;

        if let Some((name, path, free)) = self.breached().into_iter().next() {
            let err = DiskExhausted {
                name: name.to_string(),
                path,
                free,
                floor: self.floor,
            };
            error!("{}", err);
            return Err(err.into());
        }
        Ok(())
    }

    pub async fn reclaim(&self, center: &PairCenter) {
        let prefix = format!("{}-", self.paths.task);
        match self.docker.containers(&prefix).await {
            Ok(containers) => {
                for name in containers.iter().filter(|c| c.starts_with(&prefix)) {
                    if let Err(err) = self.docker.rm(name).await {
                        warn!("Failed to remove container {:?}: {:#}", name, err);
                    }
                }
            },
            Err(err) => warn!("Failed to list containers: {:#}", err),
        }

        if let Err(err) = self.docker.prune_images().await {
            warn!("Failed to prune images: {:#}", err);
        }

        for bp in &center.buildpairs {
            for jp in &bp.jobpairs {
                for side in Side::BOTH {
                    let job_id = jp.job(side).job_id;
                    if !center.is_reproduced(job_id) {
                        continue;
                    }
                    let dir = self.paths.workspace_job(job_id);
                    if dir.exists() {
                        debug!("Removing finished workspace {:?}", dir);
                        if let Err(err) = fs::remove_dir_all(&dir).await {
                            warn!("Failed to remove {:?}: {:#}", dir, err);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempdir_has_space() {
        let dir = tempfile::tempdir().unwrap();
        assert!(free_bytes(dir.path()).unwrap() > 0);
        assert!(free_bytes(&dir.path().join("does-not-exist")).is_err());
    }

    #[test]
    fn exhausted_message() {
        let err = DiskExhausted {
            name: "docker root".to_string(),
            path: PathBuf::from("/var/lib/docker"),
            free: 0,
            floor: 50 * 1024 * 1024 * 1024,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Still inadequate disk space on docker root (\"/var/lib/docker\")"), "{}", msg);
    }
}
