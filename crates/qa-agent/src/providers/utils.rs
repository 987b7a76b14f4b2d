use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::errors::AgentError;
use crate::models::content::Content;
use crate::models::message::{Message, MessageContent, ToolResponse};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Ids of tool requests the model produced but that could not be decoded.
/// These never reach the wire as calls, so their results are reported as plain text.
fn failed_request_ids(messages: &[Message]) -> HashSet<String> {
    messages
        .iter()
        .flat_map(|m| m.tool_requests())
        .filter(|request| request.tool_call.is_err())
        .map(|request| request.id.clone())
        .collect()
}

fn tool_result_text(response: &ToolResponse) -> String {
    match &response.tool_result {
        Ok(contents) => contents
            .iter()
            .map(Content::render)
            .collect::<Vec<_>>()
            .join("\n"),
        // A tool result error is shown as output so the model can interpret the error message
        Err(e) => format!("The tool call returned the following error:\n{}", e),
    }
}

fn failed_request_text(response: &ToolResponse) -> String {
    format!(
        "Tool request {} could not be run: {}",
        response.id,
        tool_result_text(response)
    )
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let failed = failed_request_ids(messages);
    let mut messages_spec = Vec::new();

    for message in messages {
        match message.role {
            Role::System | Role::User => {
                let text = message.text();
                if !text.is_empty() {
                    messages_spec.push(json!({"role": message.role, "content": text}));
                }
            }
            Role::Assistant => {
                let mut converted = json!({"role": "assistant"});
                let text = message.text();
                if !text.is_empty() {
                    converted["content"] = json!(text);
                }

                let tool_calls: Vec<Value> = message
                    .tool_requests()
                    .into_iter()
                    .filter_map(|request| {
                        let tool_call = request.tool_call.as_ref().ok()?;
                        Some(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&tool_call.name),
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }))
                    })
                    .collect();
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = json!(tool_calls);
                }

                if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
                    messages_spec.push(converted);
                }
            }
            Role::Tool => {
                for response in message.tool_responses() {
                    if failed.contains(&response.id) {
                        messages_spec.push(json!({
                            "role": "user",
                            "content": failed_request_text(response),
                        }));
                    } else {
                        messages_spec.push(json!({
                            "role": "tool",
                            "content": tool_result_text(response),
                            "tool_call_id": response.id,
                        }));
                    }
                }
            }
        }
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    ensure_unique_names(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect())
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let original = response["choices"][0]["message"].clone();
    if original.is_null() {
        return Err(anyhow!("Response contained no choices: {}", response));
    }

    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        let mut seen_ids = HashSet::new();
        for tool_call in tool_calls {
            // Compatible servers may omit or repeat ids; each request needs its own
            let id = match tool_call["id"].as_str() {
                Some(id) if !id.is_empty() && !seen_ids.contains(id) => id.to_string(),
                _ => Uuid::new_v4().to_string(),
            };
            seen_ids.insert(id.clone());
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            let tool_call = decode_tool_call(&id, &function_name, || {
                serde_json::from_str::<Value>(&arguments)
            });
            message = message.with_tool_request(id, tool_call);
        }
    }

    Ok(message)
}

/// Convert internal messages into Gemini `contents` plus the combined system instruction
pub fn messages_to_google_spec(system: &str, messages: &[Message]) -> (Option<Value>, Vec<Value>) {
    let failed = failed_request_ids(messages);
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut instructions: Vec<String> = Vec::new();
    if !system.is_empty() {
        instructions.push(system.to_string());
    }
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                let text = message.text();
                if !text.is_empty() {
                    instructions.push(text);
                }
            }
            Role::User => {
                let text = message.text();
                if !text.is_empty() {
                    contents.push(json!({"role": "user", "parts": [{"text": text}]}));
                }
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                for content in &message.content {
                    match content {
                        MessageContent::Text(text) if !text.text.is_empty() => {
                            parts.push(json!({"text": text.text}));
                        }
                        MessageContent::ToolRequest(request) => {
                            if let Ok(tool_call) = &request.tool_call {
                                names.insert(request.id.as_str(), tool_call.name.as_str());
                                parts.push(json!({
                                    "functionCall": {
                                        "name": sanitize_function_name(&tool_call.name),
                                        "args": tool_call.arguments,
                                    }
                                }));
                            }
                        }
                        _ => {}
                    }
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            }
            Role::Tool => {
                for response in message.tool_responses() {
                    let part = match names.get(response.id.as_str()) {
                        Some(name) if !failed.contains(&response.id) => json!({
                            "functionResponse": {
                                "name": sanitize_function_name(name),
                                "response": google_function_response(response),
                            }
                        }),
                        _ => json!({"text": failed_request_text(response)}),
                    };
                    push_user_part(&mut contents, part);
                }
            }
        }
    }

    let system_instruction = if instructions.is_empty() {
        None
    } else {
        Some(json!({"parts": [{"text": instructions.join("\n\n")}]}))
    };
    (system_instruction, contents)
}

/// Gemini expects every function response to be an object
fn google_function_response(response: &ToolResponse) -> Value {
    match &response.tool_result {
        Ok(contents) => {
            let values: Vec<Value> = contents.iter().map(Content::to_value).collect();
            let content = if values.len() == 1 {
                values.into_iter().next().unwrap_or(Value::Null)
            } else {
                Value::Array(values)
            };
            json!({"content": content})
        }
        Err(e) => json!({"error": e.to_string()}),
    }
}

/// Results of one turn travel together in a single user content
fn push_user_part(contents: &mut Vec<Value>, part: Value) {
    if let Some(last) = contents.last_mut() {
        let is_tool_turn = last["role"] == "user"
            && last["parts"]
                .as_array()
                .is_some_and(|parts| parts.iter().all(|p| p.get("text").is_none()));
        if is_tool_turn && part.get("functionResponse").is_some() {
            if let Some(parts) = last["parts"].as_array_mut() {
                parts.push(part);
                return;
            }
        }
    }
    contents.push(json!({"role": "user", "parts": [part]}));
}

/// Convert internal Tool format to Gemini function declarations
pub fn tools_to_google_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    ensure_unique_names(tools)?;
    if tools.is_empty() {
        return Ok(vec![]);
    }
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            })
        })
        .collect();
    Ok(vec![json!({"functionDeclarations": declarations})])
}

/// Convert a Gemini generateContent response to internal Message format
pub fn google_response_to_message(response: Value) -> Result<Message> {
    let candidate = response
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or_else(|| match response.get("promptFeedback") {
            Some(feedback) => anyhow!("Gemini returned no candidates: {}", feedback),
            None => anyhow!("Gemini returned no candidates"),
        })?;

    let mut message = Message::assistant();
    let parts = candidate["content"]["parts"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            message = message.with_text(text);
        } else if let Some(call) = part.get("functionCall") {
            // Gemini does not identify calls, so each one gets a fresh id
            let id = Uuid::new_v4().to_string();
            let name = call["name"].as_str().unwrap_or_default();
            let arguments = call.get("args").cloned().unwrap_or(json!({}));
            let tool_call = decode_tool_call(&id, name, || {
                if arguments.is_object() {
                    Ok(arguments.clone())
                } else {
                    Err(format!("expected an object, got {}", arguments))
                }
            });
            message = message.with_tool_request(id, tool_call);
        }
    }

    Ok(message)
}

pub fn google_usage(response: &Value) -> crate::providers::base::Usage {
    let metadata = &response["usageMetadata"];
    let count = |key: &str| metadata.get(key).and_then(Value::as_i64).map(|v| v as i32);
    let input_tokens = count("promptTokenCount");
    let output_tokens = count("candidatesTokenCount");
    let total_tokens = count("totalTokenCount").or(match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });
    crate::providers::base::Usage::new(input_tokens, output_tokens, total_tokens)
}

fn decode_tool_call<F, E>(
    id: &str,
    function_name: &str,
    arguments: F,
) -> Result<ToolCall, AgentError>
where
    F: FnOnce() -> Result<Value, E>,
    E: std::fmt::Display,
{
    if !is_valid_function_name(function_name) {
        return Err(AgentError::ToolNotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            function_name
        )));
    }
    arguments()
        .map(|params| ToolCall::new(function_name, params))
        .map_err(|e| {
            AgentError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                id, e
            ))
        })
}

fn ensure_unique_names(tools: &[Tool]) -> Result<()> {
    let mut tool_names = HashSet::new();
    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }
    }
    Ok(())
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Insert `value` under `key` when present
pub fn insert_optional<T: Into<Value>>(object: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        object.insert(key.to_string(), value.into());
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
