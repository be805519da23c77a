//! Scripts that are copied into the build containers of the cacher.

use crate::sandbox::Sandbox;
use bugswarm_common::errors::*;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    pub name: &'static str,
    pub content: &'static str,
}

pub const GIT_WRAPPER: Asset = Asset {
    name: "git_wrapper.sh",
    content: include_str!("../assets/git_wrapper.sh"),
};

pub const WGET_WRAPPER: Asset = Asset {
    name: "wget_wrapper.sh",
    content: include_str!("../assets/wget_wrapper.sh"),
};

pub const POETRY_WRAPPER: Asset = Asset {
    name: "poetry_wrapper.sh",
    content: include_str!("../assets/poetry_wrapper.sh"),
};

pub const CACHE_SERVER: Asset = Asset {
    name: "cache_server.py",
    content: include_str!("../assets/cache_server.py"),
};

pub const CACHE_TOOLCACHE: Asset = Asset {
    name: "cache_toolcache.sh",
    content: include_str!("../assets/cache_toolcache.sh"),
};

pub const CACHE_NODE_MODULES: Asset = Asset {
    name: "cache_node_modules.sh",
    content: include_str!("../assets/cache_node_modules.sh"),
};

pub const PATCH_BUILD_TOOLS: Asset = Asset {
    name: "patch_build_tools.sh",
    content: include_str!("../assets/patch_build_tools.sh"),
};

pub const JOB_STARTED: Asset = Asset {
    name: "job_started.sh",
    content: include_str!("../assets/job_started.sh"),
};

pub const JOB_COMPLETED: Asset = Asset {
    name: "job_completed.sh",
    content: include_str!("../assets/job_completed.sh"),
};

pub const ALL: &[Asset] = &[
    GIT_WRAPPER,
    WGET_WRAPPER,
    POETRY_WRAPPER,
    CACHE_SERVER,
    CACHE_TOOLCACHE,
    CACHE_NODE_MODULES,
    PATCH_BUILD_TOOLS,
    JOB_STARTED,
    JOB_COMPLETED,
];

/// Where the hooks and the cache server live inside the image.
pub const JOB_STARTED_PATH: &str = "/usr/local/bin/bugswarm_job_started.sh";
pub const JOB_COMPLETED_PATH: &str = "/usr/local/bin/bugswarm_job_completed.sh";
pub const CACHE_SERVER_PATH: &str = "/usr/local/bin/bugswarm_cache_server.py";
pub const CACHE_TOOLCACHE_PATH: &str = "/usr/local/bin/bugswarm_cache_toolcache.sh";

/// Write `asset` into `workdir`, copy it to `dest` in the container and make it executable.
pub async fn install(sandbox: &Sandbox, container: &str, asset: &Asset, workdir: &Path, dest: &str) -> Result<()> {
    let src = workdir.join(asset.name);
    fs::write(&src, asset.content).await
        .with_context(|| anyhow!("Failed to write {:?}", src))?;
    sandbox.cp_in(container, &src, "/tmp/").await?;
    sandbox.exec(container, &format!("sudo cp /tmp/{} {} && sudo chmod 755 {}", asset.name, dest, dest)).await?;
    Ok(())
}

/// Put a wrapper in place of `bin`, the real binary is kept as `<bin>_original`.
pub async fn install_wrapper(sandbox: &Sandbox, container: &str, asset: &Asset, workdir: &Path, bin: &str) -> Result<()> {
    let check = sandbox.try_exec(container, &format!("test -f {}", bin)).await?;
    if !check.success() {
        debug!("{} is not installed in {}, skipping wrapper", bin, container);
        return Ok(());
    }
    sandbox.exec(container, &format!("test -f {bin}_original || sudo mv {bin} {bin}_original", bin = bin)).await?;
    install(sandbox, container, asset, workdir, bin).await
}
