use bugswarm_common::api::{Client, MetadataStore};
use bugswarm_common::config;
use bugswarm_common::errors::*;
use bugswarm_tools::args::{self, CacherArgs, Completions};
use bugswarm_tools::cacher::{self, Cacher};
use bugswarm_tools::meta;
use bugswarm_worker::dispatcher;
use bugswarm_worker::docker::{Docker, DockerCli};
use clap::Parser;
use env_logger::Env;
use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CacherArgs::parse();

    let logging = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    env_logger::init_from_env(Env::default()
        .default_filter_or(logging));

    if let Some(Completions::Completions(completions)) = &args.subcommand {
        return args::gen_completions::<CacherArgs>(completions, "cacher");
    }

    let config = config::load(args.config.as_ref())
        .context("Failed to load config file")?;

    let cache = &args.cache;
    let input = cache.input.as_ref()
        .context("Missing --input, pass a file with one image tag per line")?;
    let task = cache.task.as_deref()
        .context("Missing --task")?;
    let image_tags = meta::read_image_tags(input)?;

    let metas = match &cache.task_json {
        Some(path) => meta::from_task_json(path)?,
        None => BTreeMap::new(),
    };
    let mut client = Client::new(&config, args.endpoint.clone())?;
    if let Err(err) = client.with_auth_token(&config) {
        debug!("Continuing without metadata store token: {:#}", err);
    }
    let store: Arc<dyn MetadataStore> = Arc::new(client);

    let opts = cacher::Options::from_args(cache, &config);
    let docker: Arc<dyn Docker> = Arc::new(DockerCli::new("docker"));
    let cacher = Cacher::new(docker, Some(store), Arc::new(config), task, metas, opts)?;

    let failed = cacher.run(&image_tags).await;
    info!("Results were written to {:?}", cacher.output().path());
    if !failed.is_empty() {
        for (tag, err) in &failed {
            error!("{}: {}", tag, err);
        }
        let errors = failed.into_values()
            .enumerate()
            .map(|(i, err)| (i as u64, err))
            .collect();
        dispatcher::show_error_summary(&errors);
        process::exit(2);
    }
    Ok(())
}
