//! Variable library payload built from factory shared parameters.

use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::schema::SharedParameter;
use serde_json::{json, Value};

/// Target variable type for a declared shared-parameter type.
/// The flag is set when the value has to be stored as serialized JSON.
pub fn library_variable_type(declared: &str) -> (&'static str, bool) {
    match declared.to_ascii_lowercase().as_str() {
        "string" | "securestring" => ("String", false),
        "int" | "integer" | "long" => ("Integer", false),
        "float" | "double" | "number" => ("Number", false),
        "bool" | "boolean" => ("Boolean", false),
        _ => ("String", true),
    }
}

/// Name a shared parameter carries inside the variable library.
pub fn library_variable_name(library: &str, parameter: &str) -> String {
    format!("{}_{}", library, parameter)
}

/// Build the create-item payload for the variable library.
/// Returns None when there is nothing to migrate.
pub fn build_variable_library(
    library: &str,
    parameters: &[SharedParameter],
    diagnostics: &mut Diagnostics,
) -> Option<Value> {
    if parameters.is_empty() {
        return None;
    }

    let mut variables = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        let (variable_type, coerced) = library_variable_type(&parameter.declared_type);
        let value = if coerced {
            diagnostics.at(
                format!("globalParameters/{}", parameter.name),
                MigrationIssue::CoercedVariableType {
                    name: parameter.name.clone(),
                    declared_type: parameter.declared_type.clone(),
                },
            );
            Value::String(parameter.default_value.to_string())
        } else {
            parameter.default_value.clone()
        };
        variables.push(json!({
            "name": library_variable_name(library, &parameter.name),
            "note": format!("Migrated from global parameter '{}'", parameter.name),
            "type": variable_type,
            "value": value,
        }));
    }

    Some(json!({
        "displayName": library,
        "type": "VariableLibrary",
        "description": "Shared parameters migrated from the source factory",
        "definition": {
            "variables.json": {
                "$schema": "https://developer.microsoft.com/json-schemas/fabric/item/variableLibrary/definition/variables/1.0.0/schema.json",
                "variables": variables,
            },
            "settings.json": {
                "$schema": "https://developer.microsoft.com/json-schemas/fabric/item/variableLibrary/definition/settings/1.0.0/schema.json",
                "valueSetsOrder": [],
            },
        },
    }))
}
