//! Target-side deployment: API client, retries, the creation log and the
//! wave-ordered orchestrator.

pub mod client;
pub mod log;
pub mod orchestrator;
pub mod retry;

pub use client::{DeployError, DryRunClient, FabricClient, WorkspaceClient};
pub use log::{DeploymentLog, DeploymentRecord, RollbackReport};
pub use orchestrator::{
    CancelFlag, DeploymentInputs, DeploymentOptions, DeploymentOrchestrator, DeploymentOutcome,
    DeploymentStatus,
};
pub use retry::RetryPolicy;
