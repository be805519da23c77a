use bugswarm_analyzer::compare_attributes;
use bugswarm_common::api::{Client, MetadataStore};
use bugswarm_common::config::{self, ConfigFile};
use bugswarm_common::errors::*;
use bugswarm_common::model::{self, Side};
use bugswarm_worker::args::{self, Args, SubCommand};
use bugswarm_worker::config::TaskPaths;
use bugswarm_worker::dispatcher::{self, Dispatcher};
use bugswarm_worker::docker::{Docker, DockerCli};
use bugswarm_worker::pair_center::PairCenter;
use bugswarm_worker::results;
use bugswarm_worker::transpiler::{self, Job};
use clap::Parser;
use env_logger::Env;
use serde_json::json;
use std::fs;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn metadata_store(config: &ConfigFile, endpoint: Option<String>) -> Result<Arc<dyn MetadataStore>> {
    let mut client = Client::new(config, endpoint)?;
    if let Err(err) = client.with_auth_token(config) {
        debug!("Continuing without metadata store token: {:#}", err);
    }
    Ok(Arc::new(client))
}

/// Run the task and return the number of items that failed.
async fn reproduce(args: &Args, config: ConfigFile) -> Result<usize> {
    let opts = &args.reproduce;
    let input = opts.input.as_ref()
        .context("Missing --input, pass a json file with build pairs")?;
    let task = opts.task.as_deref()
        .context("Missing --task")?;
    if opts.threads == 0 {
        bail!("--threads has to be at least 1");
    }

    let paths = TaskPaths::new(&config, task)?;
    let center = Arc::new(PairCenter::load(input, !opts.include_filtered)
        .with_context(|| anyhow!("Failed to load build pairs from {:?}", input))?);
    info!("Loaded {} job pairs with {} jobs", center.total_jobpairs(), center.total_jobs());

    let config = Arc::new(config);
    let docker: Arc<dyn Docker> = Arc::new(DockerCli::new("docker"));
    let store = metadata_store(&config, args.endpoint.clone())?;
    let terminate = Arc::new(AtomicBool::new(false));
    dispatcher::install_sigint_handler(terminate.clone());

    let dispatch_opts = dispatcher::Options {
        threads: opts.threads,
        keep: opts.keep,
        package_mode: opts.package_mode,
        skip_check_disk: opts.skip_check_disk,
    };

    let runs = if opts.package_mode { 1 } else { opts.runs };
    let mut failures = 0;
    for (run, run_paths) in paths.runs(runs) {
        if terminate.load(Ordering::SeqCst) {
            break;
        }
        if runs > 1 {
            info!("Starting run {}/{}", run, runs);
        }
        center.reset_run();

        let dispatcher = Dispatcher::new(center.clone(),
                                         run_paths,
                                         config.clone(),
                                         docker.clone(),
                                         Some(store.clone()),
                                         dispatch_opts,
                                         terminate.clone());
        let errors = dispatcher.run().await?;
        dispatcher::show_error_summary(&errors);
        failures += errors.len();

        if !opts.package_mode {
            results::finish_run(&center, run);
        }
    }

    if !opts.package_mode {
        results::write_result_json(&center, &paths)?;
        results::show_reproducibility(&center);
    }
    Ok(failures)
}

async fn analyze(args: &Args, config: ConfigFile, analyze: &args::Analyze) -> Result<usize> {
    let paths = TaskPaths::new(&config, &analyze.task)?;
    let center = PairCenter::load(&analyze.input, true)?;
    let store = metadata_store(&config, args.endpoint.clone())?;

    let mut failures = 0;
    for (run, run_paths) in paths.runs(analyze.runs) {
        center.reset_run();
        let (_, errors) = results::analyze_run(&center, &run_paths, Some(&*store), run).await;
        failures += errors;
    }
    results::write_result_json(&center, &paths)?;
    results::show_reproducibility(&center);
    Ok(failures)
}

async fn transpile(transpile: &args::Transpile) -> Result<()> {
    let buildpairs = model::read_buildpairs(&transpile.input)?;
    let job = buildpairs.iter()
        .flat_map(|bp| bp.jobpairs.iter().map(move |jp| (bp, jp)))
        .flat_map(|(bp, jp)| Side::BOTH.into_iter().map(move |side| Job::new(bp, jp, side)))
        .find(|job| job.job_id() == transpile.job_id)
        .ok_or_else(|| anyhow!("Job {} is not part of any job pair in {:?}", transpile.job_id, transpile.input))?;

    let orig_log = match &transpile.orig_log {
        Some(path) => Some(fs::read_to_string(path)
            .with_context(|| anyhow!("Failed to read {:?}", path))?),
        None => None,
    };
    let generated = transpiler::transpile(&job, &transpile.output, &transpile.repo_dir, orig_log.as_deref()).await?;
    info!("Wrote build context for job {} based on {:?} to {:?}", transpile.job_id, generated.base_image, transpile.output);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logging = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    env_logger::init_from_env(Env::default()
        .default_filter_or(logging));

    let config = config::load(args.config.as_ref())
        .context("Failed to load config file")?;

    let failures = match &args.subcommand {
        None => reproduce(&args, config).await?,
        Some(SubCommand::Analyze(a)) => analyze(&args, config, a).await?,
        Some(SubCommand::AnalyzeLog(a)) => {
            let log = bugswarm_analyzer::analyze(&a.log, a.opts.job_id, a.opts.ci, &a.opts.analyze_options())?;
            println!("{}", serde_json::to_string_pretty(&log.to_value())?);
            0
        },
        Some(SubCommand::Compare(c)) => {
            let opts = c.opts.analyze_options();
            let reproduced = bugswarm_analyzer::analyze(&c.reproduced, c.opts.job_id, c.opts.ci, &opts)?;
            let original = bugswarm_analyzer::analyze(&c.original, c.opts.job_id, c.opts.ci, &opts)?;
            let (matched, mismatches) = compare_attributes(&reproduced, &original, c.ignore_status);
            println!("{}", serde_json::to_string_pretty(&json!({
                "match": matched,
                "mismatched_attrs": mismatches,
            }))?);
            0
        },
        Some(SubCommand::Transpile(t)) => {
            transpile(t).await?;
            0
        },
        Some(SubCommand::Completions(completions)) => {
            args::gen_completions(completions)?;
            0
        },
    };

    if failures > 0 {
        warn!("Finished with {} failed items", failures);
        process::exit(2);
    }
    Ok(())
}
