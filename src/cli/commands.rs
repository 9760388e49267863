use crate::{
    cli::args::{AnalyzeArgs, CommonArgs, DeployArgs, RollbackArgs, TransformArgs},
    core::{
        deploy::{
            CancelFlag, DeploymentLog, DeploymentOptions, DryRunClient, FabricClient,
            WorkspaceClient,
        },
        error::{DefaultErrorReporter, ErrorReporter},
        migration::{
            diagnostics::Diagnostics, report::MigrationProfile, run::MigrationReport,
            variables::build_variable_library, MigrationRun,
        },
        types::ErrorSeverity,
        ConfigLoader, ConfigValidator, MigrationConfig,
    },
    utils::serialization::{FileSerializer, FileUtils, PrettyJsonSerializer},
    Result,
};
use anyhow::{anyhow, Context};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

fn load_config(common: &CommonArgs) -> Result<MigrationConfig> {
    let config = match &common.config {
        Some(path) => ConfigLoader::load_with_env(path)?,
        None => ConfigLoader::load_from_workspace(&common.workspace)?,
    };
    ConfigValidator::validate(&config)?;
    Ok(config)
}

fn print_diagnostics(diagnostics: &Diagnostics) {
    let reporter = DefaultErrorReporter::new();
    for diagnostic in diagnostics.sorted() {
        let context = diagnostic.location.clone();
        let message = format!("{} {}", diagnostic.code, diagnostic.message);
        match diagnostic.severity {
            ErrorSeverity::Error | ErrorSeverity::Warning => {
                reporter.report_warning(&message, context)
            }
            ErrorSeverity::Info | ErrorSeverity::Debug => {
                tracing::debug!(
                    code = diagnostic.code,
                    location = ?diagnostic.location,
                    "{}",
                    diagnostic.message
                )
            }
        }
    }
}

fn print_summary(profile: &MigrationProfile) {
    for line in profile.summary_lines() {
        println!("{}", line);
    }
}

/// Keep only characters that are safe in a file name.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    FileUtils
        .save_to_file(path, value, &PrettyJsonSerializer)
        .with_context(|| format!("failed to write {}", path.display()))
}

pub async fn analyze(args: AnalyzeArgs) -> Result<()> {
    tracing::info!(template = %args.template.display(), "Analyzing export");
    let config = load_config(&args.common)?;
    let run = MigrationRun::load(&args.template, config, &args.common.workspace)?;
    let report = run.analyze().await?;

    print_diagnostics(&report.diagnostics);
    match &args.output {
        Some(path) => {
            report.profile.save(path)?;
            print_summary(&report.profile);
            println!("Profile written to {}", path.display());
        }
        None => println!("{}", report.profile.to_json()?),
    }
    if let Some(path) = &args.dot {
        std::fs::write(path, report.dependency_dot())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Dependency graph written to {}", path.display());
    }
    Ok(())
}

pub async fn transform(args: TransformArgs) -> Result<()> {
    tracing::info!(
        template = %args.template.display(),
        out = %args.out.display(),
        "Transforming export"
    );
    let config = load_config(&args.common)?;
    let run = MigrationRun::load(&args.template, config, &args.common.workspace)?;
    let report = run.analyze().await?;
    print_diagnostics(&report.diagnostics);

    let written = write_transformation(&args.out, &run, &report)?;
    print_summary(&report.profile);
    println!("Wrote {} files to {}", written, args.out.display());
    Ok(())
}

/// Lay out every transformed artifact under `out`. Returns the file count.
fn write_transformation(out: &Path, run: &MigrationRun, report: &MigrationReport) -> Result<usize> {
    let mut written = 0;

    for pipeline in &report.profile.pipelines {
        if let Some(payload) = pipeline.item_payload() {
            let path = out.join("pipelines").join(format!("{}.json", file_stem(&pipeline.name)));
            write_json(&path, &payload)?;
            written += 1;
        }
    }

    for plan in &report.profile.connections {
        let path = out.join("connections").join(format!("{}.json", file_stem(&plan.name)));
        write_json(&path, plan)?;
        written += 1;
    }

    let mut scratch = Diagnostics::new();
    if let Some(library) = build_variable_library(
        &run.config().transform.library_name,
        run.template().shared_parameters(),
        &mut scratch,
    ) {
        write_json(&out.join("variable-library.json"), &library)?;
        written += 1;
    }

    if !report.profile.schedules.is_empty() {
        write_json(&out.join("schedules.json"), &report.profile.schedules)?;
        written += 1;
    }

    report.profile.save(&out.join("profile.json"))?;
    std::fs::write(out.join("graph.dot"), report.dependency_dot())
        .with_context(|| format!("failed to write {}", out.join("graph.dot").display()))?;
    Ok(written + 2)
}

pub async fn deploy(args: DeployArgs) -> Result<()> {
    let mut config = load_config(&args.common)?;
    if args.dry_run {
        config.deployment.dry_run = true;
    }
    if args.no_rollback {
        config.deployment.rollback_on_failure = false;
    }
    if let Some(concurrency) = args.concurrency {
        config.deployment.concurrency = concurrency;
    }
    ConfigValidator::validate_for_deploy(&config)?;

    let client: Arc<dyn WorkspaceClient> = if config.deployment.dry_run {
        Arc::new(DryRunClient::new())
    } else {
        Arc::new(FabricClient::new(&config.target)?)
    };
    let options = DeploymentOptions::from_config(&config.deployment);
    let run = MigrationRun::load(&args.template, config, &args.common.workspace)?;

    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current wave");
            signal_flag.cancel();
        }
    });

    let started = Instant::now();
    let result = run.deploy(client, options, cancel).await;
    signal_task.abort();
    let report = result?;

    print_diagnostics(&report.diagnostics);
    print_summary(&report.profile);
    println!(
        "Elapsed: {}",
        humantime::format_duration(std::time::Duration::from_secs(started.elapsed().as_secs()))
    );
    if let Some(path) = &report.log_path {
        println!("Deployment log: {}", path.display());
    }
    if let Some(path) = &args.report {
        report.profile.save(path)?;
        println!("Profile written to {}", path.display());
    }
    if let Some(rollback) = &report.outcome.rollback {
        println!(
            "Rolled back {} resources ({} could not be deleted)",
            rollback.deleted.len(),
            rollback.failed.len()
        );
    }

    if report.outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow!(
            "Deployment ended with status {:?}: {}",
            report.outcome.status,
            report.outcome.failure.as_deref().unwrap_or("unknown failure")
        ))
    }
}

pub async fn rollback(args: RollbackArgs) -> Result<()> {
    tracing::info!(log = %args.log.display(), "Rolling back deployment");
    let log = DeploymentLog::load(&args.log)?;

    let client: Arc<dyn WorkspaceClient> = if log.dry_run {
        Arc::new(DryRunClient::new())
    } else {
        let config = load_config(&args.common)?;
        Arc::new(FabricClient::new(&config.target)?)
    };

    let report = log.rollback(client.as_ref()).await;
    println!("Deleted {} of {} resources", report.deleted.len(), log.len());
    for failure in &report.failed {
        eprintln!(
            "  could not delete {} '{}' ({}): {}",
            failure.record.kind,
            failure.record.source_name,
            failure.record.target_id,
            failure.reason
        );
    }
    if report.is_clean() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} resources could not be deleted",
            report.failed.len()
        ))
    }
}
