pub mod args;
pub mod commands;

pub use args::{AnalyzeArgs, CommonArgs, DeployArgs, RollbackArgs, TransformArgs};
use clap::{Parser, Subcommand};
use std::path::Path;

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
MIGRATION COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "ferry")]
#[command(version = crate::VERSION)]
#[command(about = "Migrate Data Factory and Synapse pipelines to Microsoft Fabric")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: analyze an export, review the transformed definitions, deploy with --dry-run, then deploy for real."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Profile an export without touching the target",
        long_about = "Analyze parses the ARM export, translates connectors, transforms every pipeline and reports dependency order, resolution statistics and diagnostics.",
        after_help = "Example:\n    ferry analyze ./arm_template.json --output profile.json --dot graph.dot"
    )]
    Analyze(AnalyzeArgs),
    #[command(
        about = "Write transformed definitions to a directory",
        long_about = "Transform runs the full migration against a dry-run target and writes each pipeline, connection, schedule and the variable library as JSON for review.",
        after_help = "Example:\n    ferry transform ./arm_template.json --out ./fabric"
    )]
    Transform(TransformArgs),
    #[command(
        about = "Create connections, pipelines and schedules in the target workspace",
        long_about = "Deploy creates resources in dependency order with bounded parallelism. A failure rolls back everything this run created unless --no-rollback is given. The creation log is written under deployment.log_dir.",
        after_help = "Example:\n    ferry deploy ./arm_template.json --dry-run"
    )]
    Deploy(DeployArgs),
    #[command(
        about = "Delete the resources recorded in a deployment log",
        long_about = "Rollback replays a deployment log newest-first and deletes each resource. Resources already gone are treated as deleted.",
        after_help = "Example:\n    ferry rollback .ferry/deployments/deployment-<run_id>.json"
    )]
    Rollback(RollbackArgs),
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Analyze(args) => &args.common,
            Command::Transform(args) => &args.common,
            Command::Deploy(args) => &args.common,
            Command::Rollback(args) => &args.common,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.common().workspace
    }
}

pub async fn run(args: Args) -> crate::Result<()> {
    match args.command {
        Command::Analyze(analyze_args) => commands::analyze(analyze_args).await,
        Command::Transform(transform_args) => commands::transform(transform_args).await,
        Command::Deploy(deploy_args) => commands::deploy(deploy_args).await,
        Command::Rollback(rollback_args) => commands::rollback(rollback_args).await,
    }
}
