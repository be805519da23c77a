use bugswarm_common::errors::*;
use clap::{ArgAction, CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Language {
    Java,
    Python,
}

impl Language {
    pub fn from_name(lang: &str) -> Option<Language> {
        match lang.to_lowercase().as_str() {
            "java" => Some(Language::Java),
            "python" => Some(Language::Python),
            _ => None,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "cacher", version)]
pub struct CacherArgs {
    /// Verbose logging
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    /// Configuration file path
    #[arg(short, long, global = true, env = "BUGSWARM_CONFIG")]
    pub config: Option<PathBuf>,
    /// Metadata store endpoint
    #[arg(short = 'H', long, global = true)]
    pub endpoint: Option<String>,
    #[command(flatten)]
    pub cache: Cache,
    #[command(subcommand)]
    pub subcommand: Option<Completions>,
}

#[derive(Debug, Parser)]
pub struct Cache {
    /// File with one image tag per line
    #[arg(short, long)]
    pub input: Option<PathBuf>,
    /// Name of the task, selects the output csv
    #[arg(short, long)]
    pub task: Option<String>,
    /// Reproducer result json to read pair metadata from instead of the metadata store
    #[arg(long)]
    pub task_json: Option<PathBuf>,
    /// Cache dependencies of this language instead of the one of the artifact
    #[arg(long, value_enum)]
    pub language: Option<Language>,
    /// Number of image tags processed at the same time
    #[arg(long, default_value = "4")]
    pub workers: usize,
    /// Don't push the cached image
    #[arg(long)]
    pub no_push: bool,
    /// Repository of the reproducible images
    #[arg(long)]
    pub src_repo: Option<String>,
    /// Repository the cached images are pushed to
    #[arg(long)]
    pub dst_repo: Option<String>,
    /// Run the tests of the cache phase without network
    #[arg(long)]
    pub disconnect_network_during_test: bool,

    #[arg(long)]
    pub no_copy_home_m2: bool,
    #[arg(long)]
    pub no_copy_home_gradle: bool,
    #[arg(long)]
    pub no_copy_home_ivy2: bool,
    #[arg(long)]
    pub no_copy_proj_gradle: bool,
    #[arg(long)]
    pub no_copy_proj_gradle_wrapper: bool,
    #[arg(long)]
    pub no_copy_proj_maven: bool,
    #[arg(long)]
    pub no_copy_actions_toolcache: bool,
    #[arg(long)]
    pub no_copy_node_modules: bool,

    /// Don't install the git wrapper
    #[arg(long)]
    pub no_cache_git: bool,
    /// Don't install the wget wrapper
    #[arg(long)]
    pub no_cache_wget: bool,
    /// Keep going when the log of the cache phase doesn't match the original
    #[arg(long)]
    pub ignore_cache_error: bool,
    /// Don't force every maven and gradle installation into offline mode during verification
    #[arg(long)]
    pub no_strict_offline_test: bool,
    /// Unpack the dependencies of both jobs into the image instead of at the start of each job
    #[arg(long)]
    pub no_separate_passed_failed: bool,
    /// Keep the intermediate images
    #[arg(long)]
    pub keep_tmp_images: bool,
    /// Keep the containers of all phases
    #[arg(long)]
    pub keep_containers: bool,
    /// Keep the dependency tarballs on the host
    #[arg(long)]
    pub keep_tars: bool,
    /// Keep `_remote.repositories` files in the local maven repository
    #[arg(long)]
    pub no_remove_maven_repositories: bool,
}

#[derive(Debug, Parser)]
#[command(name = "packager", version)]
pub struct PackagerArgs {
    /// Verbose logging
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    /// Configuration file path
    #[arg(short, long, global = true, env = "BUGSWARM_CONFIG")]
    pub config: Option<PathBuf>,
    /// Metadata store endpoint
    #[arg(short = 'H', long, global = true)]
    pub endpoint: Option<String>,
    #[command(flatten)]
    pub package: Package,
    #[command(subcommand)]
    pub subcommand: Option<Completions>,
}

#[derive(Debug, Parser)]
pub struct Package {
    /// Only package these image tags, one per line
    #[arg(long)]
    pub image_tags: Option<PathBuf>,
    /// Reproducer result json, defaults to the one of the task
    #[arg(short, long)]
    pub input: Option<PathBuf>,
    /// Name of the task that prepared the build contexts
    #[arg(short, long)]
    pub task: Option<String>,
    /// Don't push the images
    #[arg(long)]
    pub no_push: bool,
    /// Also push images of flaky pairs
    #[arg(long)]
    pub push_flaky: bool,
    /// Number of images built at the same time
    #[arg(long, default_value = "1")]
    pub workers: usize,
}

#[derive(Debug, Parser)]
pub enum Completions {
    /// Generate shell completions
    Completions(CompletionsShell),
}

#[derive(Debug, Parser)]
pub struct CompletionsShell {
    pub shell: Shell,
}

pub fn gen_completions<C: CommandFactory>(args: &CompletionsShell, bin: &str) -> Result<()> {
    clap_complete::generate(
        args.shell,
        &mut C::command(),
        bin,
        &mut io::stdout(),
    );
    Ok(())
}
