use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::admin::{run_clean, run_config};
use commands::eval::run_eval;
use commands::routine::run_routine;
use commands::run::run_run;

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "Plan-execute-verify question answering over tables", long_about = None)]
struct Cli {
    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer every pending item of a dataset and append the results.
    Run(RunArgs),
    /// Score result files against their ground truth.
    Eval(EvalArgs),
    /// Remove error records from a result file.
    Clean(CleanArgs),
    /// Work with routine source files.
    Routine {
        #[command(subcommand)]
        command: RoutineCmd,
    },
    /// Inspect the effective configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub(crate) struct RunArgs {
    /// Chat model (or Azure deployment) name.
    #[arg(long)]
    pub model: Option<String>,
    /// Items to process this run; -1 processes all of them.
    #[arg(long = "n-samples", allow_hyphen_values = true)]
    pub n_samples: Option<i64>,
    #[arg(long = "dataset-name")]
    pub dataset_name: Option<String>,
    #[arg(long = "split-name")]
    pub split_name: Option<String>,
    /// Directory that receives `<dataset>_output/` result files.
    #[arg(long = "output-path")]
    pub output_path: Option<PathBuf>,
    /// Read items from a local .json or .jsonl file instead of the hub.
    #[arg(long = "dataset-file")]
    pub dataset_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub(crate) struct EvalArgs {
    /// Result file to score; pair each with a --dataset-name.
    #[arg(long = "file")]
    pub files: Vec<PathBuf>,
    #[arg(long = "dataset-name")]
    pub dataset_names: Vec<String>,
    #[arg(long = "split-name")]
    pub split_name: Option<String>,
    /// Model whose default result files are scored when no --file is given.
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long = "output-path")]
    pub output_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct CleanArgs {
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum RoutineCmd {
    /// Parse a routine, print its signature, and optionally run it.
    Check(RoutineCheckArgs),
}

#[derive(Args, Debug, Clone)]
pub(crate) struct RoutineCheckArgs {
    pub file: PathBuf,
    /// Table to run against: a JSON file or inline JSON with header and rows.
    #[arg(long)]
    pub table: Option<String>,
    /// Extra parameter binding, `name=value`; repeatable.
    #[arg(long = "arg")]
    pub args: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ConfigCmd {
    /// Print the effective configuration with secrets redacted.
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tabula_observe::init_tracing(cli.verbose);
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Run(args) => run_run(&cwd, args, cli.json),
        Commands::Eval(args) => run_eval(&cwd, args, cli.json),
        Commands::Clean(args) => run_clean(args, cli.json),
        Commands::Routine { command } => run_routine(command, cli.json),
        Commands::Config { command } => run_config(&cwd, command, cli.json),
    }
}
