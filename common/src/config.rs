use crate::auth::AuthConfig;
use crate::errors::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONTAINER_TIMEOUT: u64 = 7200;
pub const DISK_FLOOR_GIB: u64 = 50;
pub const WATCHER_TICK: u64 = 3;
pub const FLUSH_EVERY_TICKS: u64 = 6;
pub const CPU_SHARES: u32 = 4;
pub const MEMORY_LIMIT: &str = "16g";
pub const HTTP_TIMEOUT: u64 = 60;
pub const HTTP_RETRIES: u32 = 3;
pub const CLONE_RETRIES: u32 = 3;

pub const DEFAULT_REGISTRY_REPO: &str = "bugswarm/images";
pub const DEFAULT_CACHED_REPO: &str = "bugswarm/cached-images";
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://www.api.bugswarm.org/v1";

pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<ConfigFile> {
    let mut config = ConfigFile::default();

    if let Some(c) = load_from("/etc/bugswarm.conf")? {
        config.update(c);
    }

    if let Ok(path) = config_path() {
        if let Some(c) = load_from(path)? {
            config.update(c);
        }
    }

    if let Some(path) = path {
        let c = load_from(path)?
            .ok_or_else(|| format_err!("Failed to read config file"))?;
        config.update(c);
    }

    Ok(config)
}

fn config_path() -> Result<PathBuf> {
    let config_dir = dirs_next::config_dir()
        .ok_or_else(|| format_err!("Failed to find config dir"))?;
    Ok(config_dir.join("bugswarm.conf"))
}

fn load_from<P: AsRef<Path>>(path: P) -> Result<Option<ConfigFile>> {
    if let Ok(buf) = fs::read_to_string(path.as_ref()) {
        debug!("loading config file {:?}", path.as_ref());
        let config = toml::from_str(&buf)
            .context("Failed to load config")?;
        Ok(Some(config))
    } else {
        Ok(None)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl ConfigFile {
    pub fn update(&mut self, c: ConfigFile) {
        self.paths.update(c.paths);
        self.docker.update(c.docker);
        self.registry.update(c.registry);
        self.metadata.update(c.metadata);
        self.http.update(c.http);
        self.auth.update(c.auth);
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub intermediates: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl PathsConfig {
    pub fn update(&mut self, c: PathsConfig) {
        if c.intermediates.is_some() {
            self.intermediates = c.intermediates;
        }
        if c.output.is_some() {
            self.output = c.output;
        }
    }

    pub fn intermediates(&self) -> PathBuf {
        self.intermediates.clone().unwrap_or_else(|| PathBuf::from("intermediates"))
    }

    pub fn output(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from("output"))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    pub cpu_shares: Option<u32>,
    pub memory: Option<String>,
    pub root: Option<PathBuf>,
    pub container_timeout: Option<u64>,
    pub disk_floor_gib: Option<u64>,
}

impl DockerConfig {
    pub fn update(&mut self, c: DockerConfig) {
        if c.cpu_shares.is_some() {
            self.cpu_shares = c.cpu_shares;
        }
        if c.memory.is_some() {
            self.memory = c.memory;
        }
        if c.root.is_some() {
            self.root = c.root;
        }
        if c.container_timeout.is_some() {
            self.container_timeout = c.container_timeout;
        }
        if c.disk_floor_gib.is_some() {
            self.disk_floor_gib = c.disk_floor_gib;
        }
    }

    pub fn cpu_shares(&self) -> u32 {
        self.cpu_shares.unwrap_or(CPU_SHARES)
    }

    pub fn memory(&self) -> &str {
        self.memory.as_deref().unwrap_or(MEMORY_LIMIT)
    }

    pub fn root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| PathBuf::from("/var/lib/docker"))
    }

    pub fn container_timeout(&self) -> u64 {
        self.container_timeout.unwrap_or(CONTAINER_TIMEOUT)
    }

    pub fn disk_floor_bytes(&self) -> u64 {
        self.disk_floor_gib.unwrap_or(DISK_FLOOR_GIB) * 1024 * 1024 * 1024
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub repo: Option<String>,
    pub cached_repo: Option<String>,
    pub username: Option<String>,
}

impl RegistryConfig {
    pub fn update(&mut self, c: RegistryConfig) {
        if c.repo.is_some() {
            self.repo = c.repo;
        }
        if c.cached_repo.is_some() {
            self.cached_repo = c.cached_repo;
        }
        if c.username.is_some() {
            self.username = c.username;
        }
    }

    pub fn repo(&self) -> &str {
        self.repo.as_deref().unwrap_or(DEFAULT_REGISTRY_REPO)
    }

    pub fn cached_repo(&self) -> &str {
        self.cached_repo.as_deref().unwrap_or(DEFAULT_CACHED_REPO)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub endpoint: Option<String>,
}

impl MetadataConfig {
    pub fn update(&mut self, c: MetadataConfig) {
        if c.endpoint.is_some() {
            self.endpoint = c.endpoint;
        }
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_METADATA_ENDPOINT)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
}

impl HttpConfig {
    pub fn update(&mut self, c: HttpConfig) {
        if c.timeout.is_some() {
            self.timeout = c.timeout;
        }
        if c.retries.is_some() {
            self.retries = c.retries;
        }
    }

    pub fn timeout(&self) -> u64 {
        self.timeout.unwrap_or(HTTP_TIMEOUT)
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(HTTP_RETRIES)
    }
}
