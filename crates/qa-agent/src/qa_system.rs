use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::systems::System;

pub const REQUIREMENT_STATUS: &str = "Requirement Received & Parsed";
pub const REPORT_HEADER: &str = "--- QA AUTOMATION REPORT ---";
pub const REPORT_FOOTER: &str = "----------------------------";

/// The closed set of tools offered to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum QaTool {
    RequirementStructureTool,
    GenericTestGenerator,
    ReportFormatter,
}

impl QaTool {
    pub fn description(&self) -> &'static str {
        match self {
            QaTool::RequirementStructureTool => {
                "Takes raw requirement text and confirms understanding."
            }
            QaTool::GenericTestGenerator => "Generates generic QA test cases.",
            QaTool::ReportFormatter => "Formats test cases into final report.",
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            QaTool::RequirementStructureTool => json!({
                "type": "object",
                "required": ["requirement"],
                "properties": {
                    "requirement": {
                        "type": "string",
                        "description": "The raw requirement text."
                    }
                }
            }),
            QaTool::GenericTestGenerator => json!({
                "type": "object",
                "required": ["action", "expected_outcome"],
                "properties": {
                    "action": {
                        "type": "string",
                        "description": "The user action under test, e.g. 'log in'."
                    },
                    "expected_outcome": {
                        "type": "string",
                        "description": "What the user should see when the action succeeds."
                    }
                }
            }),
            QaTool::ReportFormatter => json!({
                "type": "object",
                "required": ["test_cases"],
                "properties": {
                    "test_cases": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "The test cases to number and format."
                    }
                }
            }),
        }
    }

    pub fn as_tool(&self) -> Tool {
        Tool::new(self.as_ref(), self.description(), self.input_schema())
    }

    /// Run the tool against already-decoded JSON arguments
    pub fn invoke(&self, arguments: &Value) -> AgentResult<Content> {
        match self {
            QaTool::RequirementStructureTool => {
                let requirement = string_arg(arguments, "requirement")?;
                let summary = analyze_requirement(requirement);
                let value = serde_json::to_value(summary)
                    .map_err(|e| AgentError::Internal(e.to_string()))?;
                Ok(Content::json(value))
            }
            QaTool::GenericTestGenerator => {
                let action = string_arg(arguments, "action")?;
                let expected_outcome = string_arg(arguments, "expected_outcome")?;
                Ok(Content::json(json!(generate_test_cases(
                    action,
                    expected_outcome
                ))))
            }
            QaTool::ReportFormatter => {
                let test_cases = string_list_arg(arguments, "test_cases")?;
                Ok(Content::text(format_report(&test_cases)))
            }
        }
    }
}

/// Result of the requirement analysis tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSummary {
    pub analyzed_length: usize,
    pub status: String,
}

/// Count whitespace-delimited tokens; no linguistic analysis happens here
pub fn analyze_requirement(requirement: &str) -> RequirementSummary {
    RequirementSummary {
        analyzed_length: requirement.split_whitespace().count(),
        status: REQUIREMENT_STATUS.to_string(),
    }
}

/// The four fixed-template cases: positive, negative, boundary, security
pub fn generate_test_cases(action: &str, expected_outcome: &str) -> Vec<String> {
    vec![
        format!(
            "POSITIVE: Verify user can '{}' and see '{}'.",
            action, expected_outcome
        ),
        format!(
            "NEGATIVE: Verify '{}' with empty data does NOT show '{}'.",
            action, expected_outcome
        ),
        format!(
            "BOUNDARY: Verify '{}' with max character limit handles gracefully.",
            action
        ),
        format!(
            "SECURITY: Verify '{}' is protected against common vulnerabilities.",
            action
        ),
    ]
}

/// Number the cases as TC_001, TC_002, ... between a fixed header and footer
pub fn format_report<S: AsRef<str>>(test_cases: &[S]) -> String {
    let mut report = format!("{}\n", REPORT_HEADER);
    for (i, test_case) in test_cases.iter().enumerate() {
        report.push_str(&format!("TC_{:03}: {}\n", i + 1, test_case.as_ref()));
    }
    report.push_str(REPORT_FOOTER);
    report
}

fn string_arg<'a>(arguments: &'a Value, key: &str) -> AgentResult<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidParameters(format!("'{}' must be a string", key)))
}

fn string_list_arg(arguments: &Value, key: &str) -> AgentResult<Vec<String>> {
    let items = arguments.get(key).and_then(Value::as_array).ok_or_else(|| {
        AgentError::InvalidParameters(format!("'{}' must be a list of strings", key))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str().map(String::from).ok_or_else(|| {
                AgentError::InvalidParameters(format!("'{}' must be a list of strings", key))
            })
        })
        .collect()
}

/// The QA helpers exposed to the model as a system of tools
pub struct QaSystem {
    tools: Vec<Tool>,
}

impl Default for QaSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl QaSystem {
    pub fn new() -> Self {
        Self {
            tools: QaTool::iter().map(|tool| tool.as_tool()).collect(),
        }
    }
}

#[async_trait]
impl System for QaSystem {
    fn name(&self) -> &str {
        "qa"
    }

    fn description(&self) -> &str {
        "Deterministic helpers that analyze a QA requirement, generate test cases and format them into a report."
    }

    fn instructions(&self) -> &str {
        "Use generic_test_generator to derive test cases from the action in the user's scenario \
        and the outcome they expect. Pass the generated cases to report_formatter to produce the \
        final report. requirement_structure_tool confirms that a long requirement was received."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let tool = QaTool::from_str(&tool_call.name)
            .map_err(|_| AgentError::ToolNotFound(tool_call.name.clone()))?;
        Ok(vec![tool.invoke(&tool_call.arguments)?])
    }
}
