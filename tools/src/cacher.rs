//! Freeze the dependencies of a reproducible image so both of its jobs run offline.
//!
//! Every image tag goes through three phases:
//!
//! * cache: run each job in a container with network, wrapped `git`/`wget` and
//!   local cache servers, then tar up the dependency directories
//! * pack: copy the tarballs into a clean container and commit it
//! * verify: run each job of the committed image without network
//!
//! Images that pass are pushed to the cached repository.

use crate::args::Language;
use crate::assets;
use crate::meta::{self, PairMeta};
use crate::output::CsvOutput;
use crate::sandbox::{Sandbox, ScriptRun};
use crate::scripts;
use crate::tarball;
use bugswarm_analyzer::{self as analyzer, AnalyzeOptions, Mismatch};
use bugswarm_common::api::MetadataStore;
use bugswarm_common::config::ConfigFile;
use bugswarm_common::errors::*;
use bugswarm_common::model::Side;
use bugswarm_common::utils::bytes_to_human;
use bugswarm_common::CiService;
use bugswarm_worker::compare::log_mismatches;
use bugswarm_worker::docker::Docker;
use bugswarm_worker::errors::{self as reproduce_errors, Category, ReproduceError, WrapErrors};
use bugswarm_worker::transpiler::github::script::{STEP_COMPLETED_HOOK, STEP_STARTED_HOOK};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

const HOME: &str = "/home/github";
const BUILD_ROOT: &str = "/home/github/build";
const TOOLCACHE: &str = "/opt/hostedtoolcache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Home,
    Project,
}

/// A directory whose content is carried from the cache phase into the cached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDir {
    pub name: &'static str,
    location: Location,
    path: &'static str,
}

impl CacheDir {
    /// Absolute path inside the container of `side`.
    pub fn path(&self, side: Side, repo: &str) -> String {
        match self.location {
            Location::Home => format!("{}/{}", HOME, self.path),
            Location::Project => format!("{}/{}/{}/{}", BUILD_ROOT, side, repo, self.path),
        }
    }

    pub fn tarball(&self, side: Side) -> String {
        format!("{}-{}.tgz", self.name, side)
    }
}

pub const CACHE_DIRECTORIES: &[CacheDir] = &[
    CacheDir { name: "home-m2", location: Location::Home, path: ".m2/" },
    CacheDir { name: "home-gradle", location: Location::Home, path: ".gradle/" },
    CacheDir { name: "home-ivy2", location: Location::Home, path: ".ivy2/" },
    CacheDir { name: "proj-gradle", location: Location::Project, path: ".gradle/" },
    CacheDir { name: "proj-gradle-wrapper", location: Location::Project, path: "gradle/wrapper/" },
    CacheDir { name: "proj-maven", location: Location::Project, path: ".mvn/" },
];

pub const ACTIONS_TOOLCACHE: &str = "actions-toolcache";
pub const NODE_MODULES: &str = "node-modules";
pub const CACHER: &str = "cacher";

/// Directory the wrappers and cache servers of a side write to.
pub fn cacher_dir(side: Side) -> String {
    format!("{}/{}/cacher", BUILD_ROOT, side)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub language: Option<Language>,
    pub workers: usize,
    pub no_push: bool,
    pub src_repo: String,
    pub dst_repo: String,
    pub disconnect_network_during_test: bool,
    /// Names of [`CACHE_DIRECTORIES`] (and the toolcache or node modules) that are not copied.
    pub skip_dirs: Vec<String>,
    pub no_cache_git: bool,
    pub no_cache_wget: bool,
    pub ignore_cache_error: bool,
    pub no_strict_offline_test: bool,
    pub no_separate_passed_failed: bool,
    pub keep_tmp_images: bool,
    pub keep_containers: bool,
    pub keep_tars: bool,
    pub no_remove_maven_repositories: bool,
}

impl Options {
    pub fn from_args(cache: &crate::args::Cache, config: &ConfigFile) -> Options {
        let skipped = [
            ("home-m2", cache.no_copy_home_m2),
            ("home-gradle", cache.no_copy_home_gradle),
            ("home-ivy2", cache.no_copy_home_ivy2),
            ("proj-gradle", cache.no_copy_proj_gradle),
            ("proj-gradle-wrapper", cache.no_copy_proj_gradle_wrapper),
            ("proj-maven", cache.no_copy_proj_maven),
            (ACTIONS_TOOLCACHE, cache.no_copy_actions_toolcache),
            (NODE_MODULES, cache.no_copy_node_modules),
        ];
        Options {
            language: cache.language,
            workers: cache.workers,
            no_push: cache.no_push,
            src_repo: cache.src_repo.clone().unwrap_or_else(|| config.registry.repo().to_string()),
            dst_repo: cache.dst_repo.clone().unwrap_or_else(|| config.registry.cached_repo().to_string()),
            disconnect_network_during_test: cache.disconnect_network_during_test,
            skip_dirs: skipped.iter()
                .filter(|(_, skip)| *skip)
                .map(|(name, _)| name.to_string())
                .collect(),
            no_cache_git: cache.no_cache_git,
            no_cache_wget: cache.no_cache_wget,
            ignore_cache_error: cache.ignore_cache_error,
            no_strict_offline_test: cache.no_strict_offline_test,
            no_separate_passed_failed: cache.no_separate_passed_failed,
            keep_tmp_images: cache.keep_tmp_images,
            keep_containers: cache.keep_containers,
            keep_tars: cache.keep_tars,
            no_remove_maven_repositories: cache.no_remove_maven_repositories,
        }
    }

    pub fn copies(&self, name: &str) -> bool {
        !self.skip_dirs.iter().any(|s| s == name)
    }
}

/// Sizes of a successfully cached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cached {
    pub original_size: u64,
    pub final_layer_size: u64,
}

impl Cached {
    /// Csv columns after the image tag, sizes in bytes.
    pub fn row(&self) -> [String; 3] {
        ["succeed".to_string(), self.original_size.to_string(), self.final_layer_size.to_string()]
    }
}

/// Environment of a build script run, the toolcache is captured after every step while caching.
pub fn build_env(toolcache: bool) -> Vec<(String, String)> {
    let mut env = vec![
        ("ACTIONS_RUNNER_HOOK_JOB_STARTED".to_string(), assets::JOB_STARTED_PATH.to_string()),
    ];
    if toolcache {
        env.push(("BUGSWARM_TOOLCACHE".to_string(), TOOLCACHE.to_string()));
        for hook in [STEP_STARTED_HOOK, STEP_COMPLETED_HOOK] {
            env.push((hook.to_string(), assets::CACHE_TOOLCACHE_PATH.to_string()));
        }
    }
    env
}

fn cache_error<I: Into<String>>(stage: &str, message: I) -> Error {
    ReproduceError::new(Category::CacheError, message).in_stage(stage).into()
}

/// Analyze the log of a cached run and the original log of the job and compare them.
pub fn compare_logs(meta: &PairMeta, side: Side, reproduced: &ScriptRun, original: &str) -> Result<(bool, Vec<Mismatch>)> {
    let job_id = meta.job_id(side);
    let opts = AnalyzeOptions {
        build_system: meta.build_system.clone(),
        repo: Some(meta.repo.clone()),
        language: Some(meta.language.clone()),
        ..Default::default()
    };

    let mut orig = analyzer::analyze_str(original, job_id, meta.ci_service, &opts)?;
    if side == Side::Passed && orig.status() == "broken" {
        orig.set_status("ok");
    }
    let mut cached = analyzer::analyze_str(&reproduced.log, job_id, meta.ci_service, &opts)?;
    let status = if reproduced.code == 0 { "ok" } else { "broken" };
    if cached.status() != status {
        debug!("Overriding status of the cached run of job {} with {}", job_id, status);
        cached.set_status(status);
    }

    Ok(analyzer::compare_attributes(&cached, &orig, false))
}

/// Lines of a `grep -r "Cache miss"` over the logs in `cacher_dir(side)`.
pub fn count_misses(grep_output: &str) -> Vec<String> {
    grep_output.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

pub struct Cacher {
    docker: Arc<dyn Docker>,
    store: Option<Arc<dyn MetadataStore>>,
    config: Arc<ConfigFile>,
    task: String,
    workdir: PathBuf,
    metas: BTreeMap<String, PairMeta>,
    output: CsvOutput,
    opts: Options,
}

impl Cacher {
    pub fn new(docker: Arc<dyn Docker>,
               store: Option<Arc<dyn MetadataStore>>,
               config: Arc<ConfigFile>,
               task: &str,
               metas: BTreeMap<String, PairMeta>,
               opts: Options) -> Result<Cacher> {
        meta::check_task_name(task)?;
        let output = CsvOutput::new(config.paths.output().join(format!("{}.csv", task)))?;
        let workdir = workdir(&config, task);
        Ok(Cacher {
            docker,
            store,
            config,
            task: task.to_string(),
            workdir,
            metas,
            output,
            opts,
        })
    }

    pub fn output(&self) -> &CsvOutput {
        &self.output
    }

    fn src_image(&self, image_tag: &str) -> String {
        format!("{}:{}", self.opts.src_repo, image_tag)
    }

    fn dst_image(&self, image_tag: &str) -> String {
        format!("{}:{}", self.opts.dst_repo, image_tag)
    }

    /// Cache every image tag, returns the ones that failed.
    pub async fn run(&self, image_tags: &[String]) -> BTreeMap<String, ReproduceError> {
        let workers = self.opts.workers.max(1);
        info!("Caching {} images with {} workers", image_tags.len(), workers);

        let results = stream::iter(image_tags)
            .map(|tag| async move {
                let result = self.process(tag).await;
                (tag.clone(), result)
            })
            .buffer_unordered(workers)
            .collect::<Vec<_>>()
            .await;

        let mut failed = BTreeMap::new();
        for (tag, result) in results {
            if let Err(err) = result {
                failed.insert(tag, reproduce_errors::reproduce_error(&err));
            }
        }
        info!("Cached {} of {} images", image_tags.len() - failed.len(), image_tags.len());
        failed
    }

    /// Cache one image tag and write its csv line.
    pub async fn process(&self, image_tag: &str) -> Result<Cached> {
        let workdir = self.workdir.join(image_tag);
        let sandbox = Sandbox::new(self.docker.clone(), &self.config, &self.task, image_tag, workdir.clone(), self.opts.keep_containers);

        let result = self.cache_image(&sandbox, image_tag).await;
        sandbox.cleanup().await;
        if !self.opts.keep_tars {
            if let Err(err) = fs::remove_dir_all(&workdir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {:?}: {:#}", workdir, err);
                }
            }
        }

        match &result {
            Ok(cached) => {
                info!("Cached {:?}, original size {}, final layer {}", image_tag,
                    bytes_to_human(cached.original_size), bytes_to_human(cached.final_layer_size));
                let row = cached.row();
                self.output.write(image_tag, &[row[0].as_str(), row[1].as_str(), row[2].as_str()])?;
            },
            Err(err) => {
                let err = reproduce_errors::reproduce_error(err).to_string();
                error!("Failed to cache {:?}: {}", image_tag, err);
                self.output.write(image_tag, &[err.as_str(), "-", "-"])?;
            },
        }
        result
    }

    async fn cache_image(&self, sandbox: &Sandbox, image_tag: &str) -> Result<Cached> {
        let meta = meta::lookup(&self.metas, self.store.as_deref(), image_tag).await
            .wrap_errors(Category::CacheError, "metadata")?;
        if meta.ci_service != CiService::Github {
            return Err(cache_error("metadata", format!("Caching {} images is not supported", meta.ci_service)));
        }
        let language = self.opts.language
            .or_else(|| Language::from_name(&meta.language))
            .ok_or_else(|| cache_error("metadata", format!("No cacher for language {:?}", meta.language)))?;

        fs::create_dir_all(sandbox.workdir()).await
            .with_context(|| anyhow!("Failed to create {:?}", sandbox.workdir()))?;

        let src = self.src_image(image_tag);
        if !self.docker.image_exists(&src).await.unwrap_or(false) {
            self.docker.pull(&src).await
                .wrap_errors(Category::CacheError, "pull")?;
        }
        let original_size = self.docker.image_size(&src).await
            .wrap_errors(Category::CacheError, "pull")?;

        for side in Side::BOTH {
            self.cache_side(sandbox, &meta, language, &src, side).await
                .wrap_errors(Category::CacheError, "cache_build")?;
        }

        let dst = self.dst_image(image_tag);
        self.pack(sandbox, &meta, language, &src, &dst).await
            .wrap_errors(Category::CacheError, "pack")?;

        let verified = self.verify(sandbox, &meta, language, &dst).await
            .wrap_errors(Category::CacheError, "verify");
        if let Err(err) = verified {
            if !self.opts.keep_tmp_images {
                if let Err(err) = self.docker.rmi(&dst).await {
                    warn!("Failed to remove image {:?}: {:#}", dst, err);
                }
            }
            return Err(err);
        }

        let final_layer_size = self.docker.top_layer_size(&dst).await
            .wrap_errors(Category::CacheError, "size")?;

        if self.opts.no_push {
            info!("Not pushing {:?}", dst);
        } else {
            self.docker.push(&dst).await
                .wrap_errors(Category::PushError, "push")?;
            if let Some(store) = &self.store {
                store.patch_artifact(image_tag, json!({ "cached": true })).await
                    .wrap_errors(Category::PushError, "update_artifact")?;
            }
        }

        Ok(Cached {
            original_size,
            final_layer_size,
        })
    }

    async fn install_common(&self, sandbox: &Sandbox, container: &str, language: Language) -> Result<()> {
        let workdir = sandbox.workdir();
        if !self.opts.no_cache_git {
            assets::install_wrapper(sandbox, container, &assets::GIT_WRAPPER, workdir, "/usr/bin/git").await?;
        }
        if !self.opts.no_cache_wget {
            assets::install_wrapper(sandbox, container, &assets::WGET_WRAPPER, workdir, "/usr/bin/wget").await?;
        }
        if language == Language::Python {
            assets::install_wrapper(sandbox, container, &assets::POETRY_WRAPPER, workdir, "/usr/local/bin/poetry").await?;
        }
        assets::install(sandbox, container, &assets::CACHE_SERVER, workdir, assets::CACHE_SERVER_PATH).await?;
        assets::install(sandbox, container, &assets::JOB_STARTED, workdir, assets::JOB_STARTED_PATH).await?;
        Ok(())
    }

    /// Put `lines` at the head of `run_<side>.sh` and apply `rewrite` to the rest.
    async fn patch_build_script<F>(&self, sandbox: &Sandbox, container: &str, side: Side, lines: &[String], rewrite: F) -> Result<()>
        where F: Fn(String) -> String,
    {
        let name = format!("run_{}.sh", side);
        let local = sandbox.workdir().join(&name);
        sandbox.cp_out(container, &format!("/usr/local/bin/{}", name), &local).await?;
        let script = fs::read_to_string(&local).await
            .with_context(|| anyhow!("Failed to read {:?}", local))?;
        let script = rewrite(scripts::prepend(&script, lines));
        fs::write(&local, script).await?;

        sandbox.cp_in(container, &local, &format!("/tmp/{}", name)).await?;
        sandbox.exec(container, &format!("sudo cp /tmp/{name} /usr/local/bin/{name} && sudo chmod 777 /usr/local/bin/{name}", name = name)).await?;
        Ok(())
    }

    async fn original_log(&self, sandbox: &Sandbox, container: &str, meta: &PairMeta, side: Side) -> Result<String> {
        let job_id = meta.job_id(side);
        let local = sandbox.workdir().join(format!("{}-orig.log", job_id));
        if !local.exists() {
            sandbox.cp_out(container, &format!("{}/{}-orig.log", BUILD_ROOT, job_id), &local).await?;
        }
        let log = analyzer::read_log(&local)?;
        Ok(log)
    }

    /// Run the build script of `side` and fail with `stage` if its log doesn't match the original.
    async fn run_and_compare(&self, sandbox: &Sandbox, container: &str, meta: &PairMeta, side: Side, stage: &str, strict: bool, toolcache: bool) -> Result<()> {
        let run = sandbox.run_build_script(container, side.as_str(), build_env(toolcache)).await?;
        let log_path = sandbox.workdir().join(format!("{}-{}.log", stage, side));
        fs::write(&log_path, &run.log).await?;

        let original = self.original_log(sandbox, container, meta, side).await?;
        let (matched, mismatches) = compare_logs(meta, side, &run, &original)
            .wrap_errors(Category::AnalysisError, stage)?;
        if matched {
            info!("Log of the {} job of {:?} matches the original ({})", side, meta.image_tag, stage);
            return Ok(());
        }

        info!("Log of the {} job of {:?} does not match the original, see {:?}", side, meta.image_tag, log_path);
        log_mismatches(&mismatches);
        let attrs = mismatches.iter().map(|m| m.attr.as_str()).collect::<Vec<_>>().join(" ");
        if strict || !self.opts.ignore_cache_error {
            Err(cache_error(stage, format!("Log of the {} job does not match the original: {}", side, attrs)))
        } else {
            warn!("Ignoring mismatch of the {} job: {}", side, attrs);
            Ok(())
        }
    }

    async fn cache_side(&self, sandbox: &Sandbox, meta: &PairMeta, language: Language, src: &str, side: Side) -> Result<()> {
        info!("Caching dependencies of the {} job of {:?}", side, meta.image_tag);
        let container = sandbox.create(src, &[side.as_str(), "cache"], false).await?;
        let cacher = cacher_dir(side);
        let workdir = sandbox.workdir();

        sandbox.exec(&container, &format!("mkdir -p {dir}/apt && sudo chmod -R 777 {dir}", dir = cacher)).await?;
        if language == Language::Python {
            sandbox.exec(&container, &format!("mkdir -p {}/pypi", cacher)).await?;
        }
        self.install_common(sandbox, &container, language).await?;
        assets::install(sandbox, &container, &assets::CACHE_TOOLCACHE, workdir, assets::CACHE_TOOLCACHE_PATH).await?;
        assets::install(sandbox, &container, &assets::CACHE_NODE_MODULES, workdir, "/tmp/cache_node_modules.sh").await?;
        self.patch_build_script(sandbox, &container, side, &scripts::prelude(side.as_str(), &[]), |s| s).await?;

        let toolcache = self.opts.copies(ACTIONS_TOOLCACHE);
        if toolcache {
            sandbox.exec(&container, &format!("BUGSWARM_TOOLCACHE={} bash {} snapshot", TOOLCACHE, assets::CACHE_TOOLCACHE_PATH)).await?;
        }

        self.run_and_compare(sandbox, &container, meta, side, "cache_build", false, toolcache).await?;
        if self.opts.disconnect_network_during_test {
            self.docker.disconnect(&container).await?;
            self.run_and_compare(sandbox, &container, meta, side, "cache_build_offline", false, toolcache).await?;
        }

        let mut tarballs = Vec::new();
        if toolcache {
            let tarball = format!("{}-{}.tgz", ACTIONS_TOOLCACHE, side);
            sandbox.exec(&container, &format!("BUGSWARM_TOOLCACHE={} bash {} pack /tmp/{}", TOOLCACHE, assets::CACHE_TOOLCACHE_PATH, tarball)).await?;
            tarballs.push(tarball);
        }

        for dir in CACHE_DIRECTORIES {
            if !self.opts.copies(dir.name) {
                continue;
            }
            let path = dir.path(side, &meta.repo);
            if !sandbox.try_exec(&container, &format!("test -d {}", path)).await?.success() {
                debug!("{} does not exist, skipping", path);
                continue;
            }
            if dir.name == "home-m2" && !self.opts.no_remove_maven_repositories {
                sandbox.exec(&container, &format!("find {} \\( -name _remote.repositories -o -name _maven.repositories \\) -delete", path)).await?;
            }
            let tarball = dir.tarball(side);
            sandbox.exec(&container, &format!("sudo tar -czf /tmp/{} -C / {}", tarball, path.trim_start_matches('/'))).await?;
            tarballs.push(tarball);
        }

        if self.opts.copies(NODE_MODULES) {
            let tarball = format!("{}-{}.tgz", NODE_MODULES, side);
            let repo_dir = format!("{}/{}/{}", BUILD_ROOT, side, meta.repo);
            sandbox.exec(&container, &format!("bash /tmp/cache_node_modules.sh {} /tmp/{}", repo_dir, tarball)).await?;
            if sandbox.try_exec(&container, &format!("test -f /tmp/{}", tarball)).await?.success() {
                tarballs.push(tarball);
            }
        }

        let tarball = format!("{}-{}.tgz", CACHER, side);
        sandbox.exec(&container, &format!("sudo tar -czf /tmp/{} -C / {}", tarball, cacher.trim_start_matches('/'))).await?;
        tarballs.push(tarball);

        for tarball in tarballs {
            let local = workdir.join(&tarball);
            sandbox.cp_out(&container, &format!("/tmp/{}", tarball), &local).await?;
            if tarball.starts_with(CACHER) || tarball.starts_with(ACTIONS_TOOLCACHE) {
                continue;
            }
            if tarball::is_empty(&local)? {
                debug!("{:?} is empty, skipping", tarball);
                fs::remove_file(&local).await?;
            }
        }

        sandbox.remove(&container).await;
        Ok(())
    }

    async fn pack(&self, sandbox: &Sandbox, meta: &PairMeta, language: Language, src: &str, dst: &str) -> Result<()> {
        info!("Packing dependencies of {:?} into {:?}", meta.image_tag, dst);
        let container = sandbox.create(src, &["pack"], false).await?;
        let workdir = sandbox.workdir();

        self.install_common(sandbox, &container, language).await?;
        assets::install(sandbox, &container, &assets::JOB_COMPLETED, workdir, assets::JOB_COMPLETED_PATH).await?;

        for side in Side::BOTH {
            let mut deferred = Vec::new();
            for local in tarball::side_tarballs(workdir, side.as_str())? {
                let name = local.file_name()
                    .and_then(|n| n.to_str())
                    .context("Tarball name contains invalid characters")?
                    .to_string();
                let dest = format!("{}/{}", HOME, name);
                sandbox.cp_in(&container, &local, &dest).await?;

                let eager = self.opts.no_separate_passed_failed
                    || name.starts_with(CACHER)
                    || name.starts_with(ACTIONS_TOOLCACHE);
                if eager {
                    debug!("Unpacking {:?}", name);
                    sandbox.exec(&container, &format!("sudo tar --directory / -xzf {dest} && sudo rm -f {dest}", dest = dest)).await?;
                } else {
                    deferred.push(dest);
                }
            }
            // misses of the cache phase are expected
            sandbox.exec(&container, &format!("mkdir -p {dir} && find {dir} -name '*.log' -delete && sudo chmod -R 777 {dir}", dir = cacher_dir(side))).await?;

            let build_system = meta.build_system.as_deref();
            let offline = move |script: String| match (language, build_system) {
                (Language::Java, Some("maven")) => scripts::offline_maven(&script),
                (Language::Java, Some("gradle")) => scripts::offline_gradle(&script),
                _ => script,
            };
            self.patch_build_script(sandbox, &container, side, &scripts::prelude(side.as_str(), &deferred), offline).await?;
        }

        let changes = vec![
            format!("ENV ACTIONS_RUNNER_HOOK_JOB_STARTED={}", assets::JOB_STARTED_PATH),
            format!("ENV ACTIONS_RUNNER_HOOK_JOB_COMPLETED={}", assets::JOB_COMPLETED_PATH),
            "ENV BUGSWARM_CACHER=warn".to_string(),
            "CMD []".to_string(),
        ];
        self.docker.commit(&container, dst, &changes).await?;
        sandbox.remove(&container).await;
        Ok(())
    }

    async fn verify(&self, sandbox: &Sandbox, meta: &PairMeta, language: Language, dst: &str) -> Result<()> {
        for side in Side::BOTH {
            info!("Verifying the {} job of {:?} without network", side, dst);
            let container = sandbox.create(dst, &[side.as_str(), "verify"], true).await?;

            if language == Language::Java && !self.opts.no_strict_offline_test {
                assets::install(sandbox, &container, &assets::PATCH_BUILD_TOOLS, sandbox.workdir(), "/tmp/patch_build_tools.sh").await?;
                sandbox.exec(&container, "bash /tmp/patch_build_tools.sh maven && bash /tmp/patch_build_tools.sh gradle").await?;
            }

            self.run_and_compare(sandbox, &container, meta, side, "verify", true, false).await?;

            let grep = sandbox.try_exec(&container, &format!("grep -r --include='*.log' 'Cache miss' {} || true", cacher_dir(side))).await?;
            let misses = count_misses(&grep.stdout);
            if !misses.is_empty() {
                for miss in &misses {
                    warn!("{}", miss);
                }
                return Err(cache_error("verify", format!("{} cache misses in the {} job", misses.len(), side)));
            }

            sandbox.remove(&container).await;
        }
        Ok(())
    }
}

/// Parent directory of the per image work directories.
pub fn workdir(config: &ConfigFile, task: &str) -> PathBuf {
    config.paths.intermediates().join("cacher").join(task)
}
