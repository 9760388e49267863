//! Export analysis and transformation: parsing, connector translation,
//! activity rules, connection resolution, dependency ordering and triggers.

pub mod activities;
pub mod connectors;
pub mod datasets;
pub mod diagnostics;
pub mod expression;
pub mod graph;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod run;
pub mod schema;
pub mod triggers;
pub mod variables;

pub use diagnostics::{Diagnostic, Diagnostics, MigrationIssue};
pub use graph::DependencyGraph;
pub use parser::{parse_template, parse_template_file, parse_template_str, ParseOutcome};
pub use pipeline::{PipelineState, PipelineTransformation, PipelineTransformer, TransformSettings};
pub use report::{MigrationProfile, MigrationSummary};
pub use resolver::{ConnectionResolver, ResolutionContext, ResolutionStats};
pub use run::{MigrationReport, MigrationRun};
pub use schema::{ComponentKind, NamingConvention, ParsedTemplate};
