use bugswarm_common::api::{Client, MetadataStore};
use bugswarm_common::config;
use bugswarm_common::errors::*;
use bugswarm_common::model;
use bugswarm_tools::args::{self, Completions, PackagerArgs};
use bugswarm_tools::meta;
use bugswarm_tools::packager::{self, Packager};
use bugswarm_worker::dispatcher;
use bugswarm_worker::docker::{Docker, DockerCli};
use clap::Parser;
use env_logger::Env;
use std::collections::BTreeSet;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = PackagerArgs::parse();

    let logging = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    env_logger::init_from_env(Env::default()
        .default_filter_or(logging));

    if let Some(Completions::Completions(completions)) = &args.subcommand {
        return args::gen_completions::<PackagerArgs>(completions, "packager");
    }

    let config = config::load(args.config.as_ref())
        .context("Failed to load config file")?;

    let package = &args.package;
    let task = package.task.as_deref()
        .context("Missing --task")?;
    meta::check_task_name(task)?;

    let image_tags = match &package.image_tags {
        Some(path) => Some(meta::read_image_tags(path)?
            .into_iter()
            .collect::<BTreeSet<_>>()),
        None => None,
    };

    let mut client = Client::new(&config, args.endpoint.clone())?;
    let authenticated = client.with_auth_token(&config).map(|_| ());
    let store: Option<Arc<dyn MetadataStore>> = match authenticated {
        Ok(()) => Some(Arc::new(client)),
        Err(err) => {
            warn!("Artifacts are not registered: {:#}", err);
            None
        },
    };

    let opts = packager::Options {
        no_push: package.no_push,
        push_flaky: package.push_flaky,
        workers: package.workers,
        image_tags,
    };
    let docker: Arc<dyn Docker> = Arc::new(DockerCli::new("docker"));
    let packager = Packager::new(docker, store, &config, task, opts)?;

    let input = package.input.clone()
        .unwrap_or_else(|| packager.paths().result_json());
    let buildpairs = model::read_buildpairs(&input)
        .with_context(|| anyhow!("Failed to read result json {:?}", input))?;

    let failed = packager.run(&buildpairs).await?;
    info!("Results were written to {:?}", packager.output().path());
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
