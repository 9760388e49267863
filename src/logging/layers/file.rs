use crate::logging::config::LoggingConfig;
use crate::Result;
use anyhow::{anyhow, Context};
use dirs_next::home_dir;
use std::fs::{create_dir_all, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self as tracing_fmt, format, writer::BoxMakeWriter};
use tracing_subscriber::registry::LookupSpan;

const LOG_FILE_NAME: &str = "ferry.log";

/// Layer type produced by the file sink builder. One JSON object per line.
pub type FileFmtLayer<S> =
    tracing_fmt::Layer<S, format::JsonFields, format::Format<format::Json>, BoxMakeWriter>;

/// Layer stack that already wraps the provided subscriber.
pub type FileLayerStack<S> = tracing_subscriber::layer::Layered<FileFmtLayer<S>, S>;

/// Location of the run log for a workspace.
///
/// `log_dir` may be absolute, start with `~/`, or be relative to the
/// workspace. A relative directory must stay inside the workspace.
pub fn log_file_path(config: &LoggingConfig, workspace: &Path) -> Result<PathBuf> {
    let directory = match &config.log_dir {
        None => workspace.join(".ferry").join("logs"),
        Some(custom) if custom.is_absolute() => custom.clone(),
        Some(custom) => match custom.strip_prefix("~") {
            Ok(rest) => home_dir()
                .ok_or_else(|| anyhow!("$HOME directory unavailable for logging.log_dir"))?
                .join(rest),
            Err(_) => {
                let relative = normalize(custom);
                if relative.starts_with("..") {
                    return Err(anyhow!(
                        "logging.log_dir {} resolves outside workspace {}",
                        custom.display(),
                        workspace.display()
                    ));
                }
                workspace.join(relative)
            }
        },
    };
    Ok(directory.join(LOG_FILE_NAME))
}

/// Lexical `..` folding; the directory may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Build the file layer. Disabled sinks discard everything and hold no guard.
pub fn file_layer<S>(
    log_file: &Path,
    enabled: bool,
) -> Result<(FileFmtLayer<S>, Option<WorkerGuard>)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if !enabled {
        return Ok((make_layer(BoxMakeWriter::new(io::sink)), None));
    }

    if let Some(directory) = log_file.parent() {
        create_dir_all(directory)
            .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let writer = BoxMakeWriter::new(move || non_blocking.clone());
    Ok((make_layer(writer), Some(guard)))
}

fn make_layer<S>(writer: BoxMakeWriter) -> FileFmtLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_fmt::layer()
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_target(false)
        .with_writer(writer)
}
