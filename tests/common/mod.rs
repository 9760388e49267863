#![allow(dead_code)]

use ferry::core::migration::{parse_template, ParsedTemplate};
use serde_json::Value;
use std::path::PathBuf;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture_json(name: &str) -> Value {
    let content = std::fs::read_to_string(fixture_path(name)).expect("fixture should exist");
    serde_json::from_str(&content).expect("fixture should be valid JSON")
}

pub fn fixture_template() -> ParsedTemplate {
    parse_template(&fixture_json("arm_template.json"))
        .expect("fixture should parse")
        .template
}

pub fn template_from(value: Value) -> ParsedTemplate {
    parse_template(&value).expect("template should parse").template
}
