//! Data-driven rendering tests from tests/fixtures/*.json

use poml::{render, PomlError};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct TestSuite {
    description: String,
    tests: Vec<TestCase>,
}

#[derive(Debug, Deserialize)]
struct TestCase {
    name: String,
    template: String,
    data: serde_json::Value,
    #[serde(default)]
    expected: Option<String>,
    /// Stage of the first error, e.g. `Parse` or `Evaluate`.
    #[serde(default)]
    error: Option<String>,
}

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn load_test_suite(filename: &str) -> TestSuite {
    let path = fixtures_dir().join(filename);
    let content = fs::read_to_string(&path)
        .unwrap_or_else(|_| panic!("Failed to read {}", path.display()));
    serde_json::from_str(&content).unwrap_or_else(|e| panic!("Failed to parse {filename}: {e}"))
}

fn run_test_case(case: &TestCase) {
    let result = render(&case.template, case.data.clone());

    if let Some(expected) = &case.expected {
        match result {
            Ok(output) => assert_eq!(
                &output, expected,
                "Test '{}' failed: expected {:?}, got {:?}",
                case.name, expected, output
            ),
            Err(e) => panic!(
                "Test '{}' should succeed with {:?}, but got error: {}",
                case.name, expected, e
            ),
        }
    } else if let Some(stage) = &case.error {
        match result {
            Ok(output) => panic!(
                "Test '{}' should fail in {}, but succeeded with {:?}",
                case.name, stage, output
            ),
            Err(PomlError::Diagnostic { stage: actual, .. }) => assert_eq!(
                format!("{actual:?}"),
                *stage,
                "Test '{}' failed in the wrong stage",
                case.name
            ),
            Err(e) => panic!("Test '{}' returned a non-diagnostic error: {e}", case.name),
        }
    }
}

#[test]
fn render_cases() {
    let suite = load_test_suite("render_cases.json");
    assert!(!suite.description.is_empty());
    for case in &suite.tests {
        run_test_case(case);
    }
}
