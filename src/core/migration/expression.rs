#![allow(clippy::result_large_err)]

//! Rewrites `pipeline().globalParameters.NAME` references to variable-library
//! references and validates that nothing was missed.

use crate::core::error::AppError;
use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::schema::SharedParameter;
use crate::core::migration::variables::{library_variable_name, library_variable_type};
use crate::core::types::ErrorCategory;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

const LEGACY_PATTERN: &str =
    r"pipeline\(\)\s*\.\s*globalParameters\s*\.\s*([A-Za-z_][A-Za-z0-9_]*)";

/// Syntactic position of a detected reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReferenceSyntax {
    /// `@pipeline().globalParameters.X`
    Bare,
    /// `...@{pipeline().globalParameters.X}...`
    Interpolated,
    /// `@concat('a', pipeline().globalParameters.X)`
    FunctionArgument,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpressionReport {
    pub library: String,
    pub bare: usize,
    pub interpolated: usize,
    pub function_argument: usize,
    pub new_reference_count: usize,
    pub remaining_legacy_count: usize,
    pub parameters: BTreeSet<String>,
}

impl ExpressionReport {
    pub fn detected(&self) -> usize {
        self.bare + self.interpolated + self.function_argument
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_legacy_count == 0 && self.new_reference_count == self.detected()
    }

    fn record(&mut self, syntax: ReferenceSyntax, name: &str) {
        match syntax {
            ReferenceSyntax::Bare => self.bare += 1,
            ReferenceSyntax::Interpolated => self.interpolated += 1,
            ReferenceSyntax::FunctionArgument => self.function_argument += 1,
        }
        self.parameters.insert(name.to_string());
    }
}

pub struct SharedParameterRewriter {
    library: String,
    legacy: Regex,
    qualified: Regex,
}

impl SharedParameterRewriter {
    pub fn new(library: &str) -> Result<Self, AppError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    format!("invalid reference pattern for library '{}': {}", library, err),
                )
                .with_code("MIG-EXPR-000")
            })
        };
        Ok(Self {
            library: library.to_string(),
            legacy: compile(LEGACY_PATTERN)?,
            qualified: compile(&format!(
                r"pipeline\(\)\.libraryVariables\.{}_[A-Za-z_][A-Za-z0-9_]*",
                regex::escape(library)
            ))?,
        })
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    fn replacement(&self, name: &str) -> String {
        format!("pipeline().libraryVariables.{}", library_variable_name(&self.library, name))
    }

    /// Rewrite every string leaf of `tree`. Pure: the input is not touched.
    pub fn rewrite(&self, tree: &Value) -> (Value, ExpressionReport) {
        let mut report = ExpressionReport {
            library: self.library.clone(),
            ..Default::default()
        };
        let before = self.count_qualified(tree);
        let mut output = tree.clone();
        self.rewrite_value(&mut output, &mut report);
        report.new_reference_count = self.count_qualified(&output).saturating_sub(before);
        report.remaining_legacy_count = self.count_legacy(&output);
        (output, report)
    }

    /// Rewrite a pipeline's `properties`, declare the referenced library
    /// variables and record validation diagnostics.
    pub fn rewrite_pipeline(
        &self,
        properties: &mut Map<String, Value>,
        shared: &[SharedParameter],
        location: &str,
        diagnostics: &mut Diagnostics,
    ) -> ExpressionReport {
        let (rewritten, report) = self.rewrite(&Value::Object(properties.clone()));
        if let Value::Object(map) = rewritten {
            *properties = map;
        }

        for name in &report.parameters {
            if !shared.iter().any(|p| &p.name == name) {
                diagnostics.at(
                    location,
                    MigrationIssue::UnknownSharedParameter { name: name.clone() },
                );
            }
        }

        if !report.is_complete() {
            diagnostics.at(
                location,
                MigrationIssue::TransformationIncomplete {
                    detected: report.detected(),
                    rewritten: report.new_reference_count,
                    remaining: report.remaining_legacy_count,
                },
            );
        }

        if !report.parameters.is_empty() {
            let declarations = properties
                .entry("libraryVariables".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(declarations) = declarations {
                for name in &report.parameters {
                    let declared = shared
                        .iter()
                        .find(|p| &p.name == name)
                        .map(|p| p.declared_type.as_str())
                        .unwrap_or("String");
                    let variable = library_variable_name(&self.library, name);
                    declarations.insert(
                        variable.clone(),
                        json!({
                            "libraryName": self.library,
                            "variableName": variable,
                            "type": library_variable_type(declared).0,
                        }),
                    );
                }
            }
        }

        tracing::debug!(
            location,
            detected = report.detected(),
            rewritten = report.new_reference_count,
            "Rewrote shared-parameter references"
        );
        report
    }

    fn rewrite_value(&self, value: &mut Value, report: &mut ExpressionReport) {
        match value {
            Value::String(text) => {
                if self.legacy.is_match(text) {
                    *text = self.rewrite_string(text, report);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.rewrite_value(item, report);
                }
            }
            Value::Object(map) => {
                for child in map.values_mut() {
                    self.rewrite_value(child, report);
                }
            }
            _ => {}
        }
    }

    fn rewrite_string(&self, text: &str, report: &mut ExpressionReport) -> String {
        for caps in self.legacy.captures_iter(text) {
            if let Some(whole) = caps.get(0) {
                report.record(classify(text, whole.start(), whole.end()), &caps[1]);
            }
        }
        self.legacy
            .replace_all(text, |caps: &Captures| self.replacement(&caps[1]))
            .into_owned()
    }

    fn count_legacy(&self, tree: &Value) -> usize {
        count_matches(tree, &self.legacy)
    }

    fn count_qualified(&self, tree: &Value) -> usize {
        count_matches(tree, &self.qualified)
    }
}

fn count_matches(tree: &Value, pattern: &Regex) -> usize {
    match tree {
        Value::String(text) => pattern.find_iter(text).count(),
        Value::Array(items) => items.iter().map(|v| count_matches(v, pattern)).sum(),
        Value::Object(map) => map.values().map(|v| count_matches(v, pattern)).sum(),
        _ => 0,
    }
}

/// Classify the match at `start..end` within `text`.
fn classify(text: &str, start: usize, end: usize) -> ReferenceSyntax {
    let before = &text[..start];
    if let Some(open) = before.rfind("@{") {
        if !before[open..].contains('}') {
            let inner_prefix = before[open + 2..].trim();
            let rest = &text[end..];
            let inner_suffix = rest.split('}').next().unwrap_or_default().trim();
            if inner_prefix.is_empty() && inner_suffix.is_empty() {
                return ReferenceSyntax::Interpolated;
            }
            return ReferenceSyntax::FunctionArgument;
        }
    }
    let trimmed_before = before.trim_start();
    if trimmed_before == "@" && text[end..].trim().is_empty() {
        ReferenceSyntax::Bare
    } else {
        ReferenceSyntax::FunctionArgument
    }
}
