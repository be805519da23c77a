use bugswarm_common::errors::*;
use bugswarm_common::CiService;
use clap::{ArgAction, CommandFactory, Parser};
use clap_complete::Shell;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Verbose logging
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    /// Configuration file path
    #[arg(short, long, global = true, env = "BUGSWARM_CONFIG")]
    pub config: Option<PathBuf>,
    /// Metadata store endpoint to download original logs from
    #[arg(short = 'H', long, global = true)]
    pub endpoint: Option<String>,
    #[command(flatten)]
    pub reproduce: Reproduce,
    #[command(subcommand)]
    pub subcommand: Option<SubCommand>,
}

#[derive(Debug, Parser)]
pub struct Reproduce {
    /// JSON file with the build pairs to reproduce
    #[arg(short, long)]
    pub input: Option<PathBuf>,
    /// Name of the task, selects the output directories
    #[arg(short, long)]
    pub task: Option<String>,
    /// Number of worker threads
    #[arg(long, default_value = "1")]
    pub threads: usize,
    /// Keep job images and workspaces after reproducing
    #[arg(long)]
    pub keep: bool,
    /// Prepare one build context per job pair instead of running jobs
    #[arg(long)]
    pub package_mode: bool,
    /// Don't check for free disk space
    #[arg(long)]
    pub skip_check_disk: bool,
    /// Reproduce the whole task this many times
    #[arg(long, default_value = "1")]
    pub runs: u32,
    /// Don't skip job pairs that were filtered out upstream
    #[arg(long)]
    pub include_filtered: bool,
}

#[derive(Debug, Parser)]
pub enum SubCommand {
    /// Analyze the reproduced logs of a finished task again
    Analyze(Analyze),
    /// Analyze a single build log and print the result as json
    AnalyzeLog(AnalyzeLog),
    /// Analyze two logs of the same job and compare them
    Compare(Compare),
    /// Write the build context of a single job without running it
    Transpile(Transpile),
    /// Generate shell completions
    Completions(Completions),
}

#[derive(Debug, Parser)]
pub struct Analyze {
    #[arg(short, long)]
    pub input: PathBuf,
    #[arg(short, long)]
    pub task: String,
    /// Number of runs the task was reproduced
    #[arg(long, default_value = "1")]
    pub runs: u32,
}

#[derive(Debug, Parser)]
pub struct LogOptions {
    #[arg(long, default_value = "0")]
    pub job_id: u64,
    #[arg(long, value_enum, default_value = "github")]
    pub ci: CiService,
    #[arg(long)]
    pub build_system: Option<String>,
    #[arg(long)]
    pub language: Option<String>,
    #[arg(long)]
    pub trigger_sha: Option<String>,
    #[arg(long)]
    pub repo: Option<String>,
    /// Analyze as java no matter what the log looks like
    #[arg(long)]
    pub force_java: bool,
}

impl LogOptions {
    pub fn analyze_options(&self) -> bugswarm_analyzer::AnalyzeOptions {
        bugswarm_analyzer::AnalyzeOptions {
            build_system: self.build_system.clone(),
            trigger_sha: self.trigger_sha.clone(),
            repo: self.repo.clone(),
            language: self.language.clone(),
            force_java: self.force_java,
        }
    }
}

#[derive(Debug, Parser)]
pub struct AnalyzeLog {
    pub log: PathBuf,
    #[command(flatten)]
    pub opts: LogOptions,
}

#[derive(Debug, Parser)]
pub struct Compare {
    pub reproduced: PathBuf,
    pub original: PathBuf,
    #[command(flatten)]
    pub opts: LogOptions,
    /// Don't report a different build status as mismatch
    #[arg(long)]
    pub ignore_status: bool,
}

#[derive(Debug, Parser)]
pub struct Transpile {
    #[arg(short, long)]
    pub input: PathBuf,
    /// Job to transpile, either side of a job pair
    #[arg(long)]
    pub job_id: u64,
    /// Checkout of the repository at the job's commit
    #[arg(long)]
    pub repo_dir: PathBuf,
    /// Directory the build context is written to
    #[arg(short, long)]
    pub output: PathBuf,
    /// Original log of the job, pins actions to the versions it used
    #[arg(long)]
    pub orig_log: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct Completions {
    pub shell: Shell,
}

pub fn gen_completions(args: &Completions) -> Result<()> {
    clap_complete::generate(
        args.shell,
        &mut Args::command(),
        "reproducer",
        &mut io::stdout(),
    );
    Ok(())
}
