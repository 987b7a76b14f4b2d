use strum_macros::Display;

use crate::models::message::Message;

/// Where the loop goes after a reasoning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Route {
    Tools,
    End,
}

/// States of the reasoning loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AgentState {
    Reasoning,
    ToolExecution,
    Terminal,
}

impl AgentState {
    /// Advance the state machine. `route` is only consulted when leaving `Reasoning`.
    pub fn next(self, route: Route) -> AgentState {
        match (self, route) {
            (AgentState::Reasoning, Route::Tools) => AgentState::ToolExecution,
            (AgentState::Reasoning, Route::End) => AgentState::Terminal,
            (AgentState::ToolExecution, _) => AgentState::Reasoning,
            (AgentState::Terminal, _) => AgentState::Terminal,
        }
    }
}

/// Decide the next stage from the latest message alone
pub fn route(messages: &[Message]) -> Route {
    match messages.last() {
        Some(last) if last.has_tool_requests() => Route::Tools,
        _ => Route::End,
    }
}
