//! Inlines dataset definitions into the activities that reference them.

use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::schema::{DatasetDefinition, ParsedTemplate, Reference};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Dataset body ready to be embedded as `datasetSettings`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedDataset {
    pub dataset: String,
    pub linked_service: Option<String>,
    pub settings: Value,
}

/// How a `dataset().P` reference resolved.
#[derive(Debug, Clone, PartialEq)]
enum Binding {
    Expression(String),
    Literal(Value),
    Unbound,
}

fn whole_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@dataset\(\)\.([A-Za-z_][A-Za-z0-9_]*)$").expect("static regex")
    })
}

fn interpolated_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"@\{\s*dataset\(\)\.([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("static regex")
    })
}

fn interpolation_segment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@\{([^{}]*)\}").expect("static regex"))
}

fn inner_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"dataset\(\)\.([A-Za-z_][A-Za-z0-9_]*)").expect("static regex")
    })
}

pub struct DatasetResolver<'a> {
    template: &'a ParsedTemplate,
}

impl<'a> DatasetResolver<'a> {
    pub fn new(template: &'a ParsedTemplate) -> Self {
        Self { template }
    }

    /// Embed the referenced dataset, substituting every `dataset().P`.
    ///
    /// Expression bindings are forwarded syntactically; they are never
    /// evaluated.
    pub fn embed(
        &self,
        reference: &Reference,
        location: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<EmbeddedDataset, MigrationIssue> {
        let definition = self
            .template
            .dataset(&reference.reference_name)
            .ok_or_else(|| MigrationIssue::DatasetNotFound {
                dataset: reference.reference_name.clone(),
            })?;

        let mut substitution = Substitution {
            definition,
            bindings: &reference.parameters,
            unbound: Vec::new(),
        };

        let mut settings = Map::new();
        settings.insert(
            "annotations".to_string(),
            Value::Array(definition.annotations.clone()),
        );
        settings.insert(
            "type".to_string(),
            Value::String(definition.dataset_type.clone()),
        );
        if let Some(schema) = &definition.schema {
            settings.insert("schema".to_string(), schema.clone());
        }
        if let Some(structure) = &definition.structure {
            settings.insert("structure".to_string(), structure.clone());
        }
        let mut type_properties = definition.type_properties.clone();
        substitution.apply(&mut type_properties);
        if !type_properties.is_null() {
            settings.insert("typeProperties".to_string(), type_properties);
        }
        for (key, value) in &definition.extra {
            let mut value = value.clone();
            substitution.apply(&mut value);
            settings.entry(key.clone()).or_insert(value);
        }

        let mut unbound = std::mem::take(&mut substitution.unbound);
        unbound.sort();
        unbound.dedup();
        for parameter in unbound {
            diagnostics.at(location, MigrationIssue::UnboundDatasetParameter { parameter });
        }

        Ok(EmbeddedDataset {
            dataset: reference.reference_name.clone(),
            linked_service: definition
                .linked_service_name
                .as_ref()
                .map(|r| r.reference_name.clone()),
            settings: Value::Object(settings),
        })
    }
}

struct Substitution<'d> {
    definition: &'d DatasetDefinition,
    bindings: &'d Map<String, Value>,
    unbound: Vec<String>,
}

impl Substitution<'_> {
    fn binding(&mut self, parameter: &str) -> Binding {
        let bound = self.bindings.get(parameter).cloned().or_else(|| {
            self.definition
                .parameters
                .get(parameter)
                .and_then(|p| p.default_value.clone())
        });
        match bound {
            Some(value) => classify(value),
            None => {
                self.unbound.push(parameter.to_string());
                Binding::Unbound
            }
        }
    }

    fn apply(&mut self, value: &mut Value) {
        match value {
            Value::String(text) => {
                if let Some(replacement) = self.substitute_string(text) {
                    *value = replacement;
                }
            }
            Value::Object(map) => {
                if is_expression_object(map) {
                    if let Some(Value::String(text)) = map.get("value").cloned() {
                        if let Some(caps) = whole_reference().captures(&text) {
                            match self.binding(&caps[1]) {
                                Binding::Expression(expr) => {
                                    map.insert("value".to_string(), Value::String(expr));
                                }
                                Binding::Literal(literal) => *value = literal,
                                Binding::Unbound => {}
                            }
                            return;
                        }
                        let rewritten = self.rewrite_expression(&text);
                        map.insert("value".to_string(), Value::String(rewritten));
                        return;
                    }
                }
                for child in map.values_mut() {
                    self.apply(child);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.apply(item);
                }
            }
            _ => {}
        }
    }

    /// Returns a replacement when the string contained a dataset reference.
    fn substitute_string(&mut self, text: &str) -> Option<Value> {
        if !text.contains("dataset()") {
            return None;
        }
        if let Some(caps) = whole_reference().captures(text) {
            return match self.binding(&caps[1]) {
                Binding::Expression(expr) => Some(Value::String(expr)),
                Binding::Literal(literal) => Some(literal),
                Binding::Unbound => None,
            };
        }
        Some(Value::String(self.rewrite_expression(text)))
    }

    /// Rewrite references embedded in a larger expression or interpolation.
    fn rewrite_expression(&mut self, text: &str) -> String {
        let interpolated = interpolated_reference()
            .replace_all(text, |caps: &Captures| match self.binding(&caps[1]) {
                Binding::Expression(expr) => format!("@{{{}}}", expression_body(&expr)),
                Binding::Literal(Value::String(s)) => s,
                Binding::Literal(other) => other.to_string(),
                Binding::Unbound => caps[0].to_string(),
            })
            .into_owned();

        if !interpolated.starts_with('@') {
            return interpolation_segment()
                .replace_all(&interpolated, |caps: &Captures| {
                    format!("@{{{}}}", self.rewrite_inner(&caps[1]))
                })
                .into_owned();
        }

        self.rewrite_inner(&interpolated)
    }

    /// Substitute references that sit inside expression language.
    fn rewrite_inner(&mut self, text: &str) -> String {
        inner_reference()
            .replace_all(text, |caps: &Captures| match self.binding(&caps[1]) {
                Binding::Expression(expr) => expression_body(&expr).to_string(),
                Binding::Literal(Value::String(s)) => format!("'{}'", s.replace('\'', "''")),
                Binding::Literal(other) => other.to_string(),
                Binding::Unbound => caps[0].to_string(),
            })
            .into_owned()
    }
}

fn is_expression_object(map: &Map<String, Value>) -> bool {
    map.get("type").and_then(Value::as_str) == Some("Expression") && map.contains_key("value")
}

fn classify(value: Value) -> Binding {
    if let Value::String(s) = &value {
        if s.starts_with('@') {
            return Binding::Expression(s.clone());
        }
    }
    if let Value::Object(map) = &value {
        if is_expression_object(map) {
            if let Some(Value::String(s)) = map.get("value") {
                return Binding::Expression(if s.starts_with('@') {
                    s.clone()
                } else {
                    format!("@{}", s)
                });
            }
        }
    }
    Binding::Literal(value)
}

fn expression_body(expression: &str) -> &str {
    let body = expression.strip_prefix('@').unwrap_or(expression);
    body.strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .unwrap_or(body)
}
