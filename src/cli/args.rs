use clap::Args;
use std::path::PathBuf;

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Directory holding ferry.toml and .ferry/ (default: current directory)
    #[arg(long, short = 'w', value_name = "DIR", default_value = ".")]
    pub workspace: PathBuf,

    /// Config file to use instead of <workspace>/ferry.toml
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// ARM template export to analyze
    #[arg(value_name = "TEMPLATE")]
    pub template: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Write the migration profile JSON here instead of stdout
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write the pipeline dependency graph in DOT format
    #[arg(long, value_name = "FILE")]
    pub dot: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TransformArgs {
    /// ARM template export to transform
    #[arg(value_name = "TEMPLATE")]
    pub template: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Directory that receives the transformed definitions
    #[arg(long, value_name = "DIR", default_value = "ferry-out")]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// ARM template export to deploy
    #[arg(value_name = "TEMPLATE")]
    pub template: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Transform and order everything without calling the target API
    #[arg(long)]
    pub dry_run: bool,

    /// Leave created resources in place when a deployment fails
    #[arg(long)]
    pub no_rollback: bool,

    /// Parallel create requests per phase (overrides deployment.concurrency)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Write the migration profile JSON here after the run
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Deployment log written by `ferry deploy`
    #[arg(value_name = "LOG")]
    pub log: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,
}
