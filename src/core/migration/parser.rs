#![allow(clippy::result_large_err)]

//! ARM export parser: resource classification, name-expression resolution
//! and typed payload extraction.

use crate::core::error::AppError;
use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::schema::{
    Component, ComponentKind, ComponentPayload, ConnectionDefinition, DatasetDefinition,
    NamingConvention, ParsedTemplate, PipelineDefinition, SharedParameter, TriggerDefinition,
};
use crate::core::types::ErrorCategory;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

const DATA_FACTORY_PREFIX: &str = "microsoft.datafactory/factories";
const SYNAPSE_PREFIX: &str = "microsoft.synapse/workspaces";

/// Parsed template plus everything recoverable that was reported on the way.
#[derive(Debug)]
pub struct ParseOutcome {
    pub template: ParsedTemplate,
    pub diagnostics: Diagnostics,
}

/// Leaf name extracted from a resource name expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub leaf: String,
    pub convention: Option<NamingConvention>,
}

pub fn parse_template_file(path: &Path) -> Result<ParseOutcome, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::new(
            ErrorCategory::IoError,
            format!("Failed to read template {}: {}", path.display(), e),
        )
        .with_code("MIG-PARSE-000")
    })?;
    parse_template_str(&content)
}

pub fn parse_template_str(content: &str) -> Result<ParseOutcome, AppError> {
    let document: Value = serde_json::from_str(content)
        .map_err(|e| malformed(format!("document is not valid JSON: {}", e)))?;
    parse_template(&document)
}

/// Parse an already-decoded export document.
pub fn parse_template(document: &Value) -> Result<ParseOutcome, AppError> {
    let resources = document
        .get("resources")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("document has no 'resources' array"))?;

    let mut template = ParsedTemplate::default();
    let mut diagnostics = Diagnostics::new();

    for (position, resource) in resources.iter().enumerate() {
        let resource_type = resource
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(format!("resource #{} has no 'type'", position)))?;
        let raw_name = resource
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(format!("resource #{} has no 'name'", position)))?;

        let type_convention = convention_from_type(resource_type);
        let lowered = resource_type.to_ascii_lowercase();
        let properties = resource.get("properties").cloned().unwrap_or(Value::Null);

        if lowered == DATA_FACTORY_PREFIX || lowered == SYNAPSE_PREFIX {
            collect_factory_parameters(
                &properties,
                type_convention,
                &mut template,
                &mut diagnostics,
            );
            continue;
        }

        let suffix = lowered.rsplit('/').next().unwrap_or_default();
        let Some(kind) = ComponentKind::from_type_suffix(suffix) else {
            diagnostics.at(
                raw_name,
                MigrationIssue::SkippedResource {
                    resource_type: resource_type.to_string(),
                },
            );
            continue;
        };

        let (name, name_convention) = match resolve_name_expression(raw_name) {
            Ok(resolved) => (resolved.leaf, resolved.convention),
            Err(issue) => {
                diagnostics.at(raw_name, issue);
                (raw_name.to_string(), None)
            }
        };
        let convention = name_convention.unwrap_or(type_convention);

        if kind == ComponentKind::SharedParameter {
            collect_parameter_map(&properties, convention, &mut template, &mut diagnostics);
            continue;
        }

        let payload = typed_payload(kind, &name, &properties, &mut diagnostics);
        let component = Component {
            id: format!("{}/{}", kind.as_str(), name),
            folder_path: properties
                .pointer("/folder/name")
                .and_then(Value::as_str)
                .map(str::to_string),
            name: name.clone(),
            kind,
            convention,
            raw: resource.clone(),
            payload,
        };
        if !template.insert(component) {
            diagnostics.at(
                name.clone(),
                MigrationIssue::DuplicateComponent {
                    kind: kind.to_string(),
                    name,
                },
            );
        }
    }

    tracing::info!(
        components = template.components().len(),
        shared_parameters = template.shared_parameters().len(),
        diagnostics = diagnostics.len(),
        "Parsed export template"
    );

    Ok(ParseOutcome {
        template,
        diagnostics,
    })
}

fn typed_payload(
    kind: ComponentKind,
    name: &str,
    properties: &Value,
    diagnostics: &mut Diagnostics,
) -> ComponentPayload {
    let parsed = match kind {
        ComponentKind::Pipeline => {
            decode::<PipelineDefinition>(properties).map(ComponentPayload::Pipeline)
        }
        ComponentKind::Dataset => {
            decode::<DatasetDefinition>(properties).map(ComponentPayload::Dataset)
        }
        ComponentKind::Connection => {
            decode::<ConnectionDefinition>(properties).map(ComponentPayload::Connection)
        }
        ComponentKind::Trigger => {
            decode::<TriggerDefinition>(properties).map(ComponentPayload::Trigger)
        }
        ComponentKind::SharedParameter => return ComponentPayload::Opaque(properties.clone()),
    };
    parsed.unwrap_or_else(|err| {
        diagnostics.at(
            name,
            MigrationIssue::UnreadableDefinition {
                kind: kind.to_string(),
                name: name.to_string(),
                reason: err.to_string(),
            },
        );
        ComponentPayload::Opaque(properties.clone())
    })
}

fn decode<T: DeserializeOwned>(properties: &Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(properties.clone())
}

/// Factory resources carry `properties.globalParameters`.
fn collect_factory_parameters(
    properties: &Value,
    convention: NamingConvention,
    template: &mut ParsedTemplate,
    diagnostics: &mut Diagnostics,
) {
    if let Some(params) = properties.get("globalParameters") {
        collect_parameter_map(params, convention, template, diagnostics);
    }
}

/// `{NAME: {type, defaultValue | value}}` → SharedParameter components.
fn collect_parameter_map(
    params: &Value,
    convention: NamingConvention,
    template: &mut ParsedTemplate,
    diagnostics: &mut Diagnostics,
) {
    let Some(map) = params.as_object() else {
        return;
    };
    for (name, spec) in map {
        let parameter = shared_parameter(name, spec, diagnostics);
        let component = Component {
            id: format!("{}/{}", ComponentKind::SharedParameter.as_str(), name),
            name: name.clone(),
            kind: ComponentKind::SharedParameter,
            folder_path: None,
            convention,
            raw: spec.clone(),
            payload: ComponentPayload::SharedParameter(parameter),
        };
        if !template.insert(component) {
            diagnostics.at(
                name.clone(),
                MigrationIssue::DuplicateComponent {
                    kind: ComponentKind::SharedParameter.to_string(),
                    name: name.clone(),
                },
            );
        }
    }
}

fn shared_parameter(name: &str, spec: &Value, diagnostics: &mut Diagnostics) -> SharedParameter {
    let declared_type = spec
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("String")
        .to_string();
    let default_value = match (spec.get("defaultValue"), spec.get("value")) {
        (Some(value), _) => value.clone(),
        (None, Some(value)) => {
            diagnostics.at(
                format!("globalParameters/{}", name),
                MigrationIssue::DeprecatedField {
                    field: "value".to_string(),
                    replacement: "defaultValue".to_string(),
                },
            );
            value.clone()
        }
        (None, None) => Value::Null,
    };
    SharedParameter {
        name: name.to_string(),
        declared_type,
        default_value,
    }
}

fn convention_from_type(resource_type: &str) -> NamingConvention {
    let lowered = resource_type.to_ascii_lowercase();
    if lowered.starts_with(DATA_FACTORY_PREFIX) {
        NamingConvention::DataFactory
    } else if lowered.starts_with(SYNAPSE_PREFIX) {
        NamingConvention::Synapse
    } else {
        NamingConvention::Plain
    }
}

fn malformed(reason: impl Into<String>) -> AppError {
    let issue = MigrationIssue::MalformedDocument {
        reason: reason.into(),
    };
    AppError::new(ErrorCategory::ParseError, issue.to_string()).with_code(issue.code())
}

/// Resolve a resource name (plain or `[...]` template expression) to its leaf.
///
/// Supported functions are `concat`, `parameters` and `variables`; the
/// factory/workspace root parameters identify the naming convention.
pub fn resolve_name_expression(raw: &str) -> Result<ResolvedName, MigrationIssue> {
    let trimmed = raw.trim();
    let is_expression =
        trimmed.starts_with('[') && trimmed.ends_with(']') && !trimmed.starts_with("[[");
    if !is_expression {
        return Ok(ResolvedName {
            leaf: leaf_of(trimmed),
            convention: None,
        });
    }

    let body = &trimmed[1..trimmed.len() - 1];
    let mut parser = NameExpressionParser::new(body);
    let mut convention = None;
    let evaluated = parser
        .expression(&mut convention)
        .and_then(|value| parser.finish().map(|_| value))
        .map_err(|reason| MigrationIssue::UnresolvableNameExpression {
            expression: raw.to_string(),
            reason,
        })?;

    Ok(ResolvedName {
        leaf: leaf_of(&evaluated),
        convention,
    })
}

fn leaf_of(path: &str) -> String {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

/// Recursive-descent evaluator for the small name-expression grammar.
struct NameExpressionParser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
}

impl<'a> NameExpressionParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn finish(&mut self) -> Result<(), String> {
        self.skip_ws();
        match self.chars.next() {
            None => Ok(()),
            Some((idx, _)) => Err(format!("unexpected input at offset {}", idx)),
        }
    }

    fn expression(&mut self, convention: &mut Option<NamingConvention>) -> Result<String, String> {
        self.skip_ws();
        match self.chars.peek() {
            Some((_, '\'')) => self.string_literal(),
            Some((_, c)) if c.is_ascii_alphabetic() => self.call(convention),
            Some((idx, c)) => Err(format!("unexpected '{}' at offset {}", c, idx)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn string_literal(&mut self) -> Result<String, String> {
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\'')) => {
                    if matches!(self.chars.peek(), Some((_, '\''))) {
                        self.chars.next();
                        out.push('\'');
                    } else {
                        return Ok(out);
                    }
                }
                Some((_, c)) => out.push(c),
                None => return Err("unterminated string literal".to_string()),
            }
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.chars.peek().map(|(idx, _)| *idx).unwrap_or(self.source.len());
        let mut end = start;
        while let Some((idx, c)) = self.chars.peek().copied() {
            if c.is_ascii_alphanumeric() || c == '_' {
                end = idx + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        self.source[start..end].to_string()
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_ws();
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            Some((idx, c)) => Err(format!(
                "expected '{}' but found '{}' at offset {}",
                expected, c, idx
            )),
            None => Err(format!("expected '{}' but reached end", expected)),
        }
    }

    fn call(&mut self, convention: &mut Option<NamingConvention>) -> Result<String, String> {
        let function = self.identifier();
        self.expect('(')?;
        let mut args = Vec::new();
        self.skip_ws();
        if matches!(self.chars.peek(), Some((_, ')'))) {
            self.chars.next();
        } else {
            loop {
                args.push(self.expression(convention)?);
                self.skip_ws();
                match self.chars.next() {
                    Some((_, ',')) => continue,
                    Some((_, ')')) => break,
                    Some((idx, c)) => return Err(format!("unexpected '{}' at offset {}", c, idx)),
                    None => return Err("unterminated function call".to_string()),
                }
            }
        }

        match function.to_ascii_lowercase().as_str() {
            "concat" => Ok(args.concat()),
            "parameters" | "variables" => {
                let [name] = args.as_slice() else {
                    return Err(format!("{}() expects exactly one argument", function));
                };
                let root = root_convention(name);
                if root.is_some() && convention.is_none() {
                    *convention = root;
                }
                Ok(format!("{{{}}}", name))
            }
            other => Err(format!("unsupported function '{}'", other)),
        }
    }
}

fn root_convention(name: &str) -> Option<NamingConvention> {
    match name {
        "factoryName" | "factoryId" => Some(NamingConvention::DataFactory),
        "workspaceName" | "workspaceId" => Some(NamingConvention::Synapse),
        _ => None,
    }
}
