use crate::cli::Command;
use std::env;

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Someone running ferry from a terminal.
    Interactive,
    /// CI jobs and release pipelines; console logging stays off unless configured.
    Automation,
}

impl ExecutionContext {
    /// Returns `true` when console sinks should be disabled.
    pub fn disables_console(self) -> bool {
        matches!(self, ExecutionContext::Automation)
    }
}

/// Derive the active execution context from a parsed CLI command plus overrides.
pub fn detect_context(command: &Command) -> ExecutionContext {
    if automation_override_enabled() {
        return ExecutionContext::Automation;
    }

    match command {
        Command::Analyze(_) | Command::Transform(_) | Command::Deploy(_) | Command::Rollback(_) => {
            ExecutionContext::Interactive
        }
    }
}

fn automation_override_enabled() -> bool {
    env::var("FERRY_AUTOMATION")
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}
