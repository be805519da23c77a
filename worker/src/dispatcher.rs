//! Hands the work of a task to a pool of worker threads and watches over them.
//!
//! Every worker is an OS thread with its own single threaded runtime and its
//! own queue, workers never take items from each other. A watcher on the
//! calling runtime wakes up every few seconds, restarts workers that died with
//! work left, flushes `error_reasons.json` and logs progress.

use crate::compare;
use crate::config::TaskPaths;
use crate::disk::Guardian;
use crate::docker::Docker;
use crate::errors::{reproduce_error, Category, ReproduceError, WrapErrors};
use crate::package;
use crate::pair_center::{self, Counters, JobOutcome, PairCenter, WorkItem};
use crate::repo::{self, SetupStates};
use crate::runner::Runner;
use crate::transpiler::Job;
use bugswarm_common::api::MetadataStore;
use bugswarm_common::config::{ConfigFile, FLUSH_EVERY_TICKS, WATCHER_TICK};
use bugswarm_common::errors::*;
use bugswarm_common::utils::secs_to_human;
use colored::Colorize;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub threads: usize,
    pub keep: bool,
    pub package_mode: bool,
    pub skip_check_disk: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            threads: 1,
            keep: false,
            package_mode: false,
            skip_check_disk: false,
        }
    }
}

pub type ErrorReasons = BTreeMap<u64, ReproduceError>;

/// Everything the workers of a run share.
pub struct Shared {
    pub center: Arc<PairCenter>,
    pub paths: TaskPaths,
    pub config: Arc<ConfigFile>,
    pub docker: Arc<dyn Docker>,
    pub store: Option<Arc<dyn MetadataStore>>,
    pub opts: Options,
    pub terminate: Arc<AtomicBool>,
    errors: Mutex<ErrorReasons>,
    setup: SetupStates,
    alive: AtomicUsize,
    started: Instant,
}

struct Worker {
    tid: usize,
    queue: Arc<Mutex<VecDeque<WorkItem>>>,
    handle: Option<JoinHandle<Result<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Set the terminate flag on SIGINT.
pub fn install_sigint_handler(terminate: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Caught SIGINT, cleaning up before terminating");
            terminate.store(true, Ordering::SeqCst);
        }
    });
}

pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(center: Arc<PairCenter>,
               paths: TaskPaths,
               config: Arc<ConfigFile>,
               docker: Arc<dyn Docker>,
               store: Option<Arc<dyn MetadataStore>>,
               opts: Options,
               terminate: Arc<AtomicBool>) -> Dispatcher
    {
        Dispatcher {
            shared: Arc::new(Shared {
                center,
                paths,
                config,
                docker,
                store,
                opts,
                terminate,
                errors: Mutex::new(BTreeMap::new()),
                setup: SetupStates::new(),
                alive: AtomicUsize::new(0),
                started: Instant::now(),
            }),
        }
    }

    pub fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Process everything that's left and return the errors of this run.
    pub async fn run(&self) -> Result<ErrorReasons> {
        let shared = &self.shared;
        if shared.center.total_jobs() == 0 {
            info!("No jobs to reproduce");
            return Ok(BTreeMap::new());
        }

        shared.paths.create_dirs()?;
        shared.load_error_reasons().await?;
        let guardian = Guardian::new(&*shared.docker, &shared.paths, &shared.config.docker).await;

        let mut last_remaining = None;
        loop {
            let remaining = shared.center.num_remaining(shared.opts.package_mode);
            if remaining == 0 || shared.is_terminated() {
                break;
            }
            if last_remaining == Some(remaining) {
                error!("Workers made no progress, giving up on {} remaining items", remaining);
                break;
            }
            last_remaining = Some(remaining);

            if !shared.opts.skip_check_disk {
                if let Err(err) = guardian.ensure(&shared.center).await {
                    shared.terminate.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
            self.init_threads(remaining).await?;
        }

        shared.flush_error_reasons().await?;
        info!("{}", shared.progress());
        if shared.is_terminated() {
            info!("Terminated after {}", secs_to_human(shared.started.elapsed().as_secs() as i64));
        } else {
            info!("Done after {}", secs_to_human(shared.started.elapsed().as_secs() as i64));
        }
        Ok(shared.error_reasons())
    }

    async fn init_threads(&self, remaining: usize) -> Result<()> {
        let shared = &self.shared;
        let n = shared.opts.threads.max(1).min(remaining);
        let queues = shared.center.partition(n, shared.opts.package_mode);

        let mut workers = Vec::new();
        for (tid, queue) in queues.into_iter().enumerate() {
            let queue = Arc::new(Mutex::new(queue));
            let handle = spawn(shared.clone(), tid, queue.clone())?;
            workers.push(Worker {
                tid,
                queue,
                handle: Some(handle),
            });
        }
        info!("Initialized {} threads", workers.len());
        self.watch(&mut workers).await
    }

    async fn watch(&self, workers: &mut [Worker]) -> Result<()> {
        let shared = &self.shared;
        let mut interval = time::interval(Duration::from_secs(WATCHER_TICK));
        let mut ticks = 0;
        let mut killed = false;

        loop {
            interval.tick().await;
            ticks += 1;

            if shared.is_terminated() && !killed {
                shared.kill_containers().await;
                killed = true;
            }

            if is_flush_tick(ticks) {
                if let Err(err) = shared.flush_error_reasons().await {
                    warn!("Failed to write error reasons: {:#}", err);
                }
                if shared.is_terminated() {
                    info!("{}", "Waiting for threads...".blue());
                } else {
                    info!("{}", shared.progress().yellow());
                }
            }

            let mut alive = 0;
            for worker in workers.iter_mut() {
                let finished = worker.handle.as_ref()
                    .map(|h| h.is_finished())
                    .unwrap_or(true);
                if !finished {
                    alive += 1;
                    continue;
                }

                let handle = match worker.handle.take() {
                    Some(handle) => handle,
                    None => continue,
                };
                let failed = match handle.join() {
                    Ok(Ok(())) => false,
                    Ok(Err(err)) => {
                        error!("[THREAD {}] Exited with error: {:#}", worker.tid, err);
                        true
                    },
                    Err(_) => {
                        error!("[THREAD {}] Panicked", worker.tid);
                        true
                    },
                };

                let left = lock(&worker.queue).len();
                if failed && left > 0 && !shared.is_terminated() {
                    warn!("[THREAD {}] Restarting with {} items left", worker.tid, left);
                    worker.handle = Some(spawn(shared.clone(), worker.tid, worker.queue.clone())?);
                    alive += 1;
                }
            }

            shared.alive.store(alive, Ordering::SeqCst);
            if alive == 0 {
                break;
            }
        }
        Ok(())
    }
}

/// Error reasons and progress are written every few watcher ticks, not on each one.
fn is_flush_tick(ticks: u64) -> bool {
    ticks % FLUSH_EVERY_TICKS == 0
}

fn spawn(shared: Arc<Shared>, tid: usize, queue: Arc<Mutex<VecDeque<WorkItem>>>) -> Result<JoinHandle<Result<()>>> {
    thread::Builder::new()
        .name(format!("worker-{}", tid))
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to create worker runtime")?;
            rt.block_on(shared.work(tid, &queue))
        })
        .context("Failed to spawn worker thread")
}

impl Shared {
    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub fn error_reasons(&self) -> ErrorReasons {
        lock(&self.errors).clone()
    }

    async fn load_error_reasons(&self) -> Result<()> {
        let path = self.paths.error_reasons();
        if path.exists() {
            let buf = fs::read(&path).await?;
            let previous = serde_json::from_slice::<ErrorReasons>(&buf)
                .with_context(|| anyhow!("Failed to parse {:?}", path))?;
            debug!("Loaded {} previous error reasons", previous.len());
            lock(&self.errors).extend(previous);
        }
        Ok(())
    }

    async fn flush_error_reasons(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.error_reasons())?;
        let path = self.paths.error_reasons();
        fs::write(&path, json).await
            .with_context(|| anyhow!("Failed to write {:?}", path))
    }

    pub fn progress(&self) -> String {
        let center = &self.center;
        center.update_buildpair_done_status();
        center.assign_pair_match_types();
        let counters = &center.counters;
        format!("{} alive threads, {} total jobs to reproduce, {} newly attempted, {} previously attempted, {} errors, {} remaining.",
            self.alive.load(Ordering::SeqCst),
            center.total_jobs(),
            Counters::get(&counters.newly_reproduced),
            Counters::get(&counters.already_reproduced),
            Counters::get(&counters.reproduce_err),
            center.num_remaining(self.opts.package_mode))
    }

    async fn kill_containers(&self) {
        let prefix = format!("{}-", self.paths.task);
        match self.docker.containers(&prefix).await {
            Ok(containers) => {
                for name in containers.iter().filter(|c| c.starts_with(&prefix)) {
                    info!("Killing container {:?}", name);
                    if let Err(err) = self.docker.rm(name).await {
                        warn!("Failed to remove container {:?}: {:#}", name, err);
                    }
                }
            },
            Err(err) => warn!("Failed to list containers: {:#}", err),
        }
    }

    async fn work(&self, tid: usize, queue: &Mutex<VecDeque<WorkItem>>) -> Result<()> {
        loop {
            if self.is_terminated() {
                info!("[THREAD {}] Terminating", tid);
                return Ok(());
            }
            let item = match lock(queue).pop_front() {
                Some(item) => item,
                None => break,
            };
            if let Err(err) = self.process_item(tid, &item).await {
                self.record_error(tid, &item, &err);
            }
        }
        info!("[THREAD {}] Workload complete, exiting thread", tid);
        Ok(())
    }

    /// Process one queue item, a job whose log doesn't match its original counts as an error.
    pub async fn process_item(&self, tid: usize, item: &WorkItem) -> Result<()> {
        match item.side {
            Some(side) => {
                let job = self.center.job(item, side);
                let job_id = job.job_id();
                match self.process_job(tid, &job).await {
                    Ok(outcome) => {
                        if outcome.as_ref().map(|o| !o.matched).unwrap_or(false) {
                            Counters::incr(&self.center.counters.reproduce_err);
                        }
                        self.center.record_job(job_id, outcome);
                        Ok(())
                    },
                    Err(err) => {
                        self.center.record_job(job_id, None);
                        Err(err)
                    },
                }
            },
            None => {
                let res = self.process_pair(tid, item).await;
                self.center.set_pair_reproduced(item);
                res
            },
        }
    }

    fn item_key(&self, item: &WorkItem) -> (u64, String) {
        let (bp, jp) = self.center.jobpair(item);
        match item.side {
            Some(side) => (jp.job(side).job_id, format!("{}/{}", pair_center::buildpair_name(bp), jp.job(side).job_id)),
            None => (jp.failed_job.job_id, format!("{}/{}", pair_center::buildpair_name(bp), pair_center::jobpair_name(jp))),
        }
    }

    fn record_error(&self, tid: usize, item: &WorkItem, err: &Error) {
        let reason = reproduce_error(err);
        let (job_id, name) = self.item_key(item);
        error!("{}", format!("[THREAD {}] {} {}", tid, name, reason).red());
        Counters::incr(&self.center.counters.reproduce_err);
        lock(&self.errors).insert(job_id, reason);
    }

    async fn original_log(&self, job_id: u64) -> Result<PathBuf> {
        match &self.store {
            Some(store) => compare::original_log(&**store, &self.paths, job_id).await
                .wrap_errors(Category::SetupError, "download_log"),
            None => {
                let path = self.paths.orig_log(job_id);
                if !path.exists() {
                    return Err(ReproduceError::new(Category::SetupError, format!("Original log {:?} is missing", path))
                        .in_stage("download_log")
                        .into());
                }
                Ok(path)
            },
        }
    }

    /// Reproduce a job and compare it with the original, `None` if it never finished.
    async fn process_job(&self, tid: usize, job: &Job<'_>) -> Result<Option<JobOutcome>> {
        let job_id = job.job_id();
        let counters = &self.center.counters;
        let log = self.paths.reproduced_log(job_id);

        let exit_code = if log.exists() {
            debug!("[THREAD {}] Log of job {} already exists in task", tid, job_id);
            Counters::incr(&counters.already_reproduced);
            None
        } else {
            Counters::incr(&counters.newly_reproduced);
            info!("[THREAD {}] Running job {} of {:?}", tid, job_id, job.bp.repo);

            self.original_log(job_id).await?;
            let repo_dir = repo::setup(&self.paths, &self.setup, job).await?;
            let runner = Runner {
                docker: &*self.docker,
                paths: &self.paths,
                config: &self.config.docker,
                keep: self.opts.keep,
            };
            let res = runner.reproduce(job, &repo_dir).await?;
            if !res.is_reproduced() {
                warn!("[THREAD {}] Job {} did not finish, not comparing", tid, job_id);
                return Ok(None);
            }
            res.exit_code
        };

        let orig = self.original_log(job_id).await?;
        let outcome = compare::analyze_and_compare(job, &orig, &log, exit_code)?;
        Ok(Some(outcome))
    }

    async fn process_pair(&self, tid: usize, item: &WorkItem) -> Result<()> {
        let (bp, jp) = self.center.jobpair(item);
        info!("[THREAD {}] Packaging {}/{}", tid, pair_center::buildpair_name(bp), pair_center::jobpair_name(jp));
        Counters::incr(&self.center.counters.newly_reproduced);

        let store = self.store.as_deref();
        let res = package::prepare(&self.paths, &self.setup, store, bp, jp).await;
        if !self.opts.keep {
            package::clean_workspaces(&self.paths, jp).await;
        }
        let context = res?;
        info!("[THREAD {}] Wrote build context of {:?} to {:?}", tid, context.image_tag, context.dir);
        Ok(())
    }
}

/// Failed items per category and per stage.
pub fn error_summary(errors: &ErrorReasons) -> BTreeMap<Category, BTreeMap<String, usize>> {
    let mut summary = BTreeMap::<Category, BTreeMap<String, usize>>::new();
    for reason in errors.values() {
        let stage = reason.stage.clone().unwrap_or_else(|| "-".to_string());
        *summary.entry(reason.category)
            .or_default()
            .entry(stage)
            .or_insert(0) += 1;
    }
    summary
}

pub fn show_error_summary(errors: &ErrorReasons) {
    if errors.is_empty() {
        info!("{}", "No errors".green());
        return;
    }
    info!("{:<20} {:<24} {:>6}", "category", "stage", "count");
    for (category, stages) in error_summary(errors) {
        for (stage, count) in stages {
            info!("{:<20} {:<24} {:>6}", category.to_string().red(), stage, count);
        }
    }
    info!("{} failed items", errors.len());
}
