use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::{GoogleProviderConfig, GOOGLE_API_KEY_VARS};
use super::utils::{
    google_response_to_message, google_usage, insert_optional, messages_to_google_spec,
    tools_to_google_spec,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Gemini through the native generateContent endpoint
pub struct GoogleProvider {
    client: Client,
    config: GoogleProviderConfig,
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    fn generation_config(&self) -> Option<Value> {
        let mut config = Map::new();
        insert_optional(&mut config, "temperature", self.config.temperature);
        insert_optional(&mut config, "maxOutputTokens", self.config.max_tokens);
        if config.is_empty() {
            None
        } else {
            Some(Value::Object(config))
        }
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let api_key = self.config.api_key.as_deref().with_context(|| {
            format!(
                "No Gemini API key configured, set {}",
                GOOGLE_API_KEY_VARS.join(" or ")
            )
        })?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let detail = body["error"]["message"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| body.to_string());
                Err(anyhow!("Request failed: {}\n{}", status, detail))
            }
        }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let (system_instruction, contents) = messages_to_google_spec(system, messages);
        let tools_spec = tools_to_google_spec(tools)?;

        let mut payload = json!({ "contents": contents });
        if let Some(object) = payload.as_object_mut() {
            insert_optional(object, "systemInstruction", system_instruction);
            if !tools_spec.is_empty() {
                object.insert("tools".to_string(), json!(tools_spec));
            }
            insert_optional(object, "generationConfig", self.generation_config());
        }

        tracing::debug!(model = %self.config.model, contents = contents_len(&payload), "gemini request");
        let response = self.post(payload).await?;

        let usage = google_usage(&response);
        let message = google_response_to_message(response)?;
        Ok((message, usage))
    }
}

fn contents_len(payload: &Value) -> usize {
    payload["contents"].as_array().map_or(0, Vec::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qa_system::QaTool;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(host: String, api_key: Option<&str>) -> GoogleProviderConfig {
        GoogleProviderConfig {
            host,
            api_key: api_key.map(String::from),
            model: "gemini-1.5-flash".to_string(),
            temperature: Some(0.0),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn test_complete_text() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "systemInstruction": {"parts": [{"text": "You are a QA assistant."}]},
                "contents": [{"role": "user", "parts": [{"text": "user can log in"}]}],
                "generationConfig": {"temperature": 0.0}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Covered: login works."}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 4, "totalTokenCount": 13}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new(config(mock_server.uri(), Some("test-key")))?;
        let (message, usage) = provider
            .complete(
                "You are a QA assistant.",
                &[Message::user().with_text("user can log in")],
                &[],
            )
            .await?;

        assert_eq!(message.text(), "Covered: login works.");
        assert!(!message.has_tool_requests());
        assert_eq!(usage, Usage::new(Some(9), Some(4), Some(13)));
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_function_call() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(body_partial_json(json!({
                "tools": [{"functionDeclarations": [{"name": "generic_test_generator"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{
                        "functionCall": {
                            "name": "generic_test_generator",
                            "args": {"action": "login", "expected_outcome": "Success"}
                        }
                    }]}
                }]
            })))
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new(config(mock_server.uri(), Some("test-key")))?;
        let (message, usage) = provider
            .complete(
                "",
                &[Message::user().with_text("login")],
                &[QaTool::GenericTestGenerator.as_tool()],
            )
            .await?;

        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].tool_call.as_ref().unwrap().arguments,
            json!({"action": "login", "expected_outcome": "Success"})
        );
        assert_eq!(usage.total_tokens, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_error_carries_detail() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "API key not valid. Please pass a valid API key."}
            })))
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new(config(mock_server.uri(), Some("bad"))).unwrap();
        let err = provider
            .complete("", &[Message::user().with_text("login")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key not valid"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_on_request() {
        let provider = GoogleProvider::new(config("http://localhost:1".to_string(), None)).unwrap();
        let err = provider
            .complete("", &[Message::user().with_text("login")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("GOOGLE_API_KEY or GEMINI_API_KEY"));
    }
}
