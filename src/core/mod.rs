pub mod config;
pub mod deploy;
pub mod error;
pub mod migration;
pub mod types;

pub use config::{ConfigLoader, ConfigValidator, MigrationConfig};
pub use deploy::{
    CancelFlag, DeploymentLog, DeploymentOptions, DeploymentOrchestrator, DeploymentOutcome,
    DeploymentStatus, DryRunClient, FabricClient, WorkspaceClient,
};
pub use error::{AppError, DefaultErrorReporter, ErrorReporter};
pub use migration::{MigrationProfile, MigrationReport, MigrationRun};
pub use types::*;
