//! The ordered message history shared by the reasoning and tool execution steps.
//!
//! A [`Conversation`] only grows. Every append is checked against the ordering rules
//! of the loop: an optional leading system instruction, then a user message, and tool
//! results only ever answering the requests of the latest assistant message.
use std::collections::HashSet;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, ToolRequest};
use crate::models::role::Role;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation from the user's input
    pub fn from_user_text<S: Into<String>>(text: S) -> Self {
        Self {
            messages: vec![Message::user().with_text(text)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message, rejecting anything that breaks the ordering rules
    pub fn push(&mut self, message: Message) -> AgentResult<()> {
        match message.role {
            Role::System => {
                if !self.messages.is_empty() {
                    return Err(invalid("a system message may only open the conversation"));
                }
            }
            Role::User => {
                self.ensure_no_pending("a user message")?;
            }
            Role::Assistant => {
                if !self.messages.iter().any(|m| m.role == Role::User) {
                    return Err(invalid("the conversation must start with a user message"));
                }
                self.ensure_no_pending("an assistant message")?;
            }
            Role::Tool => self.check_tool_message(&message)?,
        }
        self.messages.push(message);
        Ok(())
    }

    /// Tool requests of the latest assistant message that have no result yet
    pub fn pending_tool_requests(&self) -> Vec<&ToolRequest> {
        let Some(index) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[index + 1..]
            .iter()
            .flat_map(|m| m.tool_responses())
            .map(|response| response.id.as_str())
            .collect();

        self.messages[index]
            .tool_requests()
            .into_iter()
            .filter(|request| !answered.contains(request.id.as_str()))
            .collect()
    }

    fn ensure_no_pending(&self, what: &str) -> AgentResult<()> {
        let pending = self.pending_tool_requests();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(invalid(&format!(
                "{} cannot follow unanswered tool requests ({})",
                what,
                pending
                    .iter()
                    .map(|r| r.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }

    fn check_tool_message(&self, message: &Message) -> AgentResult<()> {
        let responses = message.tool_responses();
        if responses.is_empty() {
            return Err(invalid("a tool message must carry a tool result"));
        }

        let pending: HashSet<&str> = self
            .pending_tool_requests()
            .into_iter()
            .map(|r| r.id.as_str())
            .collect();
        if pending.is_empty() {
            return Err(invalid(
                "a tool message must follow an assistant message that requested it",
            ));
        }

        for response in responses {
            if !pending.contains(response.id.as_str()) {
                return Err(invalid(&format!(
                    "tool result {} does not answer a pending request",
                    response.id
                )));
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> AgentError {
    AgentError::InvalidConversation(reason.to_string())
}
