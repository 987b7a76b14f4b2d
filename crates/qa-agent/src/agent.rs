use anyhow::Result;
use futures::stream::BoxStream;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::conversation::Conversation;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::{load_prompt, load_prompt_file, SYSTEM_TEMPLATE};
use crate::providers::base::Provider;
use crate::router::{route, AgentState};
use crate::systems::System;

/// Reasoning steps allowed in one reply before the loop is abandoned
pub const DEFAULT_MAX_STEPS: usize = 10;

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

impl SystemInfo {
    fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

/// Which system instruction, if any, accompanies every reasoning step
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SystemPrompt {
    /// No instruction; the model only sees the conversation and tool schemas
    Disabled,
    /// The bundled template rendered with the connected systems
    #[default]
    Builtin,
    /// A tera template on disk rendered with the connected systems
    Template(PathBuf),
}

/// Agent integrates a foundational LLM with the systems it needs to pilot
pub struct Agent {
    systems: Vec<Box<dyn System>>,
    provider: Box<dyn Provider>,
    max_steps: usize,
    system_prompt: SystemPrompt,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            systems: Vec::new(),
            provider,
            max_steps: DEFAULT_MAX_STEPS,
            system_prompt: SystemPrompt::default(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: SystemPrompt) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Add a system to the agent
    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Get all tools from all systems
    pub fn tools(&self) -> Vec<Tool> {
        self.systems
            .iter()
            .flat_map(|system| system.tools().iter().cloned())
            .collect()
    }

    /// Find the system that declares a tool with this name
    fn get_system_for_tool(&self, tool_name: &str) -> Option<&dyn System> {
        self.systems
            .iter()
            .find(|system| system.tools().iter().any(|tool| tool.name == tool_name))
            .map(|v| &**v)
    }

    /// Dispatch a single tool call to the appropriate system
    async fn dispatch_tool_call(
        &self,
        tool_call: AgentResult<ToolCall>,
    ) -> AgentResult<Vec<Content>> {
        let call = tool_call?;
        let system = self
            .get_system_for_tool(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        system.call(call).await
    }

    /// Run one requested tool and wrap its outcome in a tool message
    async fn run_tool_request(&self, request: &ToolRequest) -> Message {
        if let Ok(call) = &request.tool_call {
            tracing::debug!(id = %request.id, tool = %call.name, "executing tool");
        }
        let output = self.dispatch_tool_call(request.tool_call.clone()).await;
        if let Err(e) = &output {
            tracing::warn!(id = %request.id, error = %e, "tool call failed");
        }
        Message::tool().with_tool_response(request.id.clone(), output)
    }

    /// Render the system instruction, empty when disabled
    pub fn get_system_prompt(&self) -> AgentResult<String> {
        let mut context = HashMap::new();
        let systems_info: Vec<SystemInfo> = self
            .systems
            .iter()
            .map(|system| {
                SystemInfo::new(system.name(), system.description(), system.instructions())
            })
            .collect();
        context.insert("systems", systems_info);

        let rendered = match &self.system_prompt {
            SystemPrompt::Disabled => return Ok(String::new()),
            SystemPrompt::Builtin => load_prompt(SYSTEM_TEMPLATE, &context),
            SystemPrompt::Template(path) => load_prompt_file(path, &context),
        };
        rendered.map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// The reasoning step: exactly one new assistant message for the conversation so far
    async fn reason(&self, system_prompt: &str, messages: &[Message], tools: &[Tool]) -> Result<Message> {
        let (response, usage) = self.provider.complete(system_prompt, messages, tools).await?;
        tracing::debug!(
            tool_requests = response.tool_requests().len(),
            total_tokens = ?usage.total_tokens,
            "reasoning step complete"
        );
        Ok(response)
    }

    /// Create a stream that yields each message as it's generated by the agent.
    /// This includes both the assistant's responses and one tool message per tool call.
    ///
    /// The stream ends once the model answers without requesting a tool, or fails with
    /// [`AgentError::StepLimitExceeded`] after `max_steps` reasoning steps.
    pub async fn reply(&self, messages: &[Message]) -> Result<BoxStream<'_, Result<Message>>> {
        let mut conversation = Conversation::new();
        for message in messages {
            conversation.push(message.clone())?;
        }
        let tools = self.tools();
        let system_prompt = self.get_system_prompt()?;
        let max_steps = self.max_steps;

        Ok(Box::pin(async_stream::try_stream! {
            let mut state = AgentState::Reasoning;
            let mut steps = 0;

            loop {
                match state {
                    AgentState::Reasoning => {
                        if steps >= max_steps {
                            Err::<(), _>(AgentError::StepLimitExceeded(max_steps))?;
                        }
                        steps += 1;

                        let response = self
                            .reason(&system_prompt, conversation.messages(), &tools)
                            .await?;
                        conversation.push(response.clone())?;
                        yield response;
                    }
                    AgentState::ToolExecution => {
                        let requests: Vec<ToolRequest> = conversation
                            .pending_tool_requests()
                            .into_iter()
                            .cloned()
                            .collect();

                        // Sequential on purpose, results are appended in request order
                        for request in &requests {
                            let message = self.run_tool_request(request).await;
                            conversation.push(message.clone())?;
                            yield message;
                        }
                    }
                    AgentState::Terminal => break,
                }
                state = state.next(route(conversation.messages()));
            }
        }))
    }

    /// A single reasoning step without tool execution. Tool requests in the
    /// answer are returned as-is.
    pub async fn reply_once(&self, messages: &[Message]) -> Result<Message> {
        let mut conversation = Conversation::new();
        for message in messages {
            conversation.push(message.clone())?;
        }
        let system_prompt = self.get_system_prompt()?;
        self.reason(&system_prompt, conversation.messages(), &self.tools())
            .await
    }

    /// Bypass the model: synthesize a tool request, run it and append both
    /// messages. Returns the tool message.
    pub async fn invoke_tool(
        &self,
        conversation: &mut Conversation,
        id: &str,
        tool_call: ToolCall,
    ) -> AgentResult<Message> {
        let request = ToolRequest {
            id: id.to_string(),
            tool_call: Ok(tool_call),
        };
        conversation.push(
            Message::assistant().with_tool_request(request.id.clone(), request.tool_call.clone()),
        )?;
        let message = self.run_tool_request(&request).await;
        conversation.push(message.clone())?;
        Ok(message)
    }
}
