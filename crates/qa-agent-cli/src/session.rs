use anyhow::Result;
use futures::StreamExt;
use qa_agent::agent::Agent;
use qa_agent::conversation::Conversation;
use qa_agent::models::message::{Message, MessageContent};
use qa_agent::models::role::Role;
use qa_agent::models::tool::ToolCall;
use qa_agent::qa_system::QaTool;
use serde_json::json;
use thiserror::Error;

use crate::prompt::{Input, Prompt};
use crate::trace_log::{TraceLabel, TraceLog};

pub const MANUAL_CALL_ID: &str = "manual_call_id";
const EMPTY_SCENARIO: &str = "Error: Scenario cannot be empty.";

/// The user stopped the run, at the prompt or while the agent was working
#[derive(Error, Debug)]
#[error("Bot stopped by user.")]
pub struct Interrupted;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Reason and run tools until the model answers in plain text
    Agent,
    /// One reasoning step, requested tools are shown but not run
    Single,
    /// No model: run the test-case generator on the given action
    ToolsOnly,
}

pub struct Session<'a> {
    agent: Agent,
    prompt: Box<dyn Prompt + 'a>,
    trace: TraceLog,
    mode: Mode,
    expected_outcome: String,
}

impl<'a> Session<'a> {
    pub fn new(
        agent: Agent,
        prompt: Box<impl Prompt + 'a>,
        trace: TraceLog,
        mode: Mode,
        expected_outcome: String,
    ) -> Self {
        Session {
            agent,
            prompt,
            trace,
            mode,
            expected_outcome,
        }
    }

    /// Run once, reading the scenario from the prompt unless one is given
    pub async fn run(&mut self, scenario: Option<String>) -> Result<()> {
        let (title, label) = match self.mode {
            Mode::ToolsOnly => ("QA Agent (Tools Only + Logging)", "Enter action to test:"),
            _ => ("QA Agent Ready", "Enter your test scenario:"),
        };

        let text = match scenario {
            Some(text) => text.trim().to_string(),
            None => {
                self.prompt.ready(title);
                match self.prompt.get_input(label)? {
                    Input::Text(text) => text,
                    Input::Interrupted => return Err(Interrupted.into()),
                }
            }
        };

        if text.is_empty() {
            // tools-only mode quietly does nothing
            if self.mode != Mode::ToolsOnly {
                self.trace.print(EMPTY_SCENARIO)?;
            }
            return Ok(());
        }

        match self.mode {
            Mode::Agent => self.run_agent(&text).await,
            Mode::Single => self.run_single(&text).await,
            Mode::ToolsOnly => self.run_tools_only(&text).await,
        }
    }

    async fn run_agent(&mut self, text: &str) -> Result<()> {
        self.trace.log(TraceLabel::InputScenario, text)?;
        let mut conversation = Conversation::from_user_text(text);

        let mut stream = self.agent.reply(conversation.messages()).await?;
        loop {
            self.prompt.show_busy();
            let next = tokio::select! {
                next = stream.next() => next,
                _ = tokio::signal::ctrl_c() => {
                    self.prompt.hide_busy();
                    return Err(Interrupted.into());
                }
            };
            self.prompt.hide_busy();

            match next {
                Some(Ok(message)) => {
                    trace_message(&mut self.trace, &message)?;
                    conversation.push(message)?;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        drop(stream);

        self.trace.print("\n FINAL OUTPUT\n")?;
        for message in conversation.messages() {
            if message.role == Role::Tool {
                for content in &message.content {
                    if let Some(observation) = content.as_tool_response_text() {
                        self.trace.log(TraceLabel::Observation, &observation)?;
                    }
                }
            }
        }
        if let Some(answer) = conversation.last().map(Message::text) {
            if !answer.is_empty() {
                self.prompt.render(&answer);
            }
        }
        Ok(())
    }

    async fn run_single(&mut self, text: &str) -> Result<()> {
        self.trace.log(TraceLabel::InputScenario, text)?;
        let conversation = Conversation::from_user_text(text);

        self.prompt.show_busy();
        let response = self.agent.reply_once(conversation.messages()).await;
        self.prompt.hide_busy();
        let response = response?;

        trace_message(&mut self.trace, &response)?;
        self.trace.print("\n FINAL OUTPUT\n")?;
        if response.has_tool_requests() {
            self.trace
                .print("Requested tools were not run in single mode.")?;
        }
        let answer = response.text();
        if !answer.is_empty() {
            self.prompt.render(&answer);
        }
        Ok(())
    }

    async fn run_tools_only(&mut self, action: &str) -> Result<()> {
        self.trace.log(TraceLabel::Input, action)?;

        let call = ToolCall::new(
            QaTool::GenericTestGenerator.as_ref(),
            json!({
                "action": action,
                "expected_outcome": self.expected_outcome,
            }),
        );
        self.trace.log(TraceLabel::Action, &describe_call(&call))?;

        let mut conversation = Conversation::from_user_text(action);
        let message = self
            .agent
            .invoke_tool(&mut conversation, MANUAL_CALL_ID, call)
            .await?;
        let output = message
            .content
            .iter()
            .filter_map(MessageContent::as_tool_response_text)
            .collect::<Vec<_>>()
            .join("\n");
        self.trace.log(TraceLabel::ToolResult, &output)?;

        let summary = format!(
            "\nFINAL OUTPUT (See {} for full history)",
            self.trace.path().display()
        );
        self.trace.print(&summary)?;
        Ok(())
    }
}

fn describe_call(call: &ToolCall) -> String {
    format!("Tool: {} | Args: {}", call.name, call.arguments)
}

/// THOUGHT for model text, ACTION for each tool it asks for
fn trace_message(trace: &mut TraceLog, message: &Message) -> Result<()> {
    if message.role != Role::Assistant {
        return Ok(());
    }
    let thought = message.text();
    if !thought.is_empty() {
        trace.log(TraceLabel::Thought, &thought)?;
    }
    for request in message.tool_requests() {
        let action = match &request.tool_call {
            Ok(call) => describe_call(call),
            Err(e) => format!("Invalid tool request {}: {}", request.id, e),
        };
        trace.log(TraceLabel::Action, &action)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_log::tests::SharedBuffer;
    use qa_agent::providers::mock::MockProvider;
    use qa_agent::qa_system::{generate_test_cases, QaSystem};
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct ScriptedPrompt {
        inputs: Arc<Mutex<VecDeque<Option<String>>>>,
        rendered: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedPrompt {
        fn with_inputs(inputs: Vec<Option<&str>>) -> Self {
            let prompt = Self::default();
            *prompt.inputs.lock().unwrap() =
                inputs.into_iter().map(|i| i.map(String::from)).collect();
            prompt
        }

        fn rendered(&self) -> Vec<String> {
            self.rendered.lock().unwrap().clone()
        }
    }

    impl Prompt for ScriptedPrompt {
        fn get_input(&mut self, _label: &str) -> Result<Input> {
            Ok(match self.inputs.lock().unwrap().pop_front().flatten() {
                Some(text) => Input::Text(text),
                None => Input::Interrupted,
            })
        }
        fn show_busy(&mut self) {}
        fn hide_busy(&mut self) {}
        fn render(&mut self, content: &str) {
            self.rendered.lock().unwrap().push(content.to_string());
        }
        fn ready(&self, _title: &str) {}
    }

    struct Harness {
        _dir: TempDir,
        log_path: std::path::PathBuf,
        console: SharedBuffer,
        prompt: ScriptedPrompt,
        provider: MockProvider,
    }

    impl Harness {
        fn new(responses: Vec<Message>, inputs: Vec<Option<&str>>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            Harness {
                log_path: dir.path().join("logs.txt"),
                _dir: dir,
                console: SharedBuffer::default(),
                prompt: ScriptedPrompt::with_inputs(inputs),
                provider: MockProvider::new(responses),
            }
        }

        fn session(&self, mode: Mode) -> Session<'static> {
            let mut agent = Agent::new(Box::new(self.provider.clone()));
            agent.add_system(Box::new(QaSystem::new()));
            let trace =
                TraceLog::with_console(&self.log_path, Box::new(self.console.clone())).unwrap();
            Session::new(
                agent,
                Box::new(self.prompt.clone()),
                trace,
                mode,
                "Success".to_string(),
            )
        }

        fn log_file(&self) -> String {
            fs::read_to_string(&self.log_path).unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_agent_mode_without_tools() {
        let harness = Harness::new(
            vec![Message::assistant().with_text("Cover valid and invalid credentials.")],
            vec![Some("user can log in")],
        );

        harness.session(Mode::Agent).run(None).await.unwrap();

        let console = harness.console.contents();
        assert!(console.contains("[INPUT SCENARIO]\nuser can log in"));
        assert!(console.contains("[THOUGHT]\nCover valid and invalid credentials."));
        assert!(console.contains("FINAL OUTPUT"));
        assert!(!console.contains("[OBSERVATION]"));
        assert_eq!(
            harness.prompt.rendered(),
            vec!["Cover valid and invalid credentials."]
        );
        assert!(harness.log_file().contains("[THOUGHT]"));
    }

    #[tokio::test]
    async fn test_agent_mode_logs_actions_and_observations() {
        let cases = generate_test_cases("login", "Success");
        let harness = Harness::new(
            vec![
                Message::assistant().with_tool_request(
                    "1",
                    Ok(ToolCall::new(
                        "generic_test_generator",
                        json!({"action": "login", "expected_outcome": "Success"}),
                    )),
                ),
                Message::assistant().with_tool_request(
                    "2",
                    Ok(ToolCall::new("report_formatter", json!({"test_cases": cases}))),
                ),
                Message::assistant().with_text("Done."),
            ],
            vec![],
        );

        harness
            .session(Mode::Agent)
            .run(Some("login".to_string()))
            .await
            .unwrap();

        let console = harness.console.contents();
        assert!(console.contains("[ACTION]\nTool: generic_test_generator | Args: "));
        assert!(console.contains("[ACTION]\nTool: report_formatter | Args: "));
        assert_eq!(console.matches("[OBSERVATION]").count(), 2);
        assert!(console.contains("TC_004: SECURITY: Verify 'login'"));
        // observations come after the heading
        let heading = console.find("FINAL OUTPUT").unwrap();
        assert!(console.find("[OBSERVATION]").unwrap() > heading);
        assert_eq!(harness.log_file().matches("[OBSERVATION]").count(), 2);
    }

    #[tokio::test]
    async fn test_empty_scenario_is_rejected() {
        let harness = Harness::new(vec![], vec![Some("")]);

        harness.session(Mode::Agent).run(None).await.unwrap();

        assert_eq!(harness.console.contents(), format!("{}\n", EMPTY_SCENARIO));
        assert!(harness.provider.requests().is_empty());
        assert_eq!(harness.log_file(), "");
    }

    #[tokio::test]
    async fn test_interrupted_prompt() {
        let harness = Harness::new(vec![], vec![None]);

        let err = harness.session(Mode::Agent).run(None).await.unwrap_err();

        assert!(err.is::<Interrupted>());
        assert_eq!(err.to_string(), "Bot stopped by user.");
    }

    #[tokio::test]
    async fn test_step_limit_surfaces_as_error() {
        let endless: Vec<Message> = (0..5)
            .map(|i| {
                Message::assistant().with_tool_request(
                    i.to_string(),
                    Ok(ToolCall::new(
                        "requirement_structure_tool",
                        json!({"requirement": "again"}),
                    )),
                )
            })
            .collect();
        let harness = Harness::new(endless, vec![]);
        let mut agent = Agent::new(Box::new(harness.provider.clone())).with_max_steps(2);
        agent.add_system(Box::new(QaSystem::new()));
        let trace = TraceLog::with_console(&harness.log_path, Box::new(harness.console.clone()))
            .unwrap();
        let mut session = Session::new(
            agent,
            Box::new(harness.prompt.clone()),
            trace,
            Mode::Agent,
            "Success".to_string(),
        );

        let err = session.run(Some("loop".to_string())).await.unwrap_err();

        assert!(err.to_string().contains("exceeded 2 steps"));
        assert_eq!(harness.provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_single_mode_does_not_run_tools() {
        let harness = Harness::new(
            vec![Message::assistant()
                .with_text("I would generate cases.")
                .with_tool_request(
                    "1",
                    Ok(ToolCall::new(
                        "generic_test_generator",
                        json!({"action": "login", "expected_outcome": "Success"}),
                    )),
                )],
            vec![],
        );

        harness
            .session(Mode::Single)
            .run(Some("login".to_string()))
            .await
            .unwrap();

        let console = harness.console.contents();
        assert!(console.contains("[THOUGHT]\nI would generate cases."));
        assert!(console.contains("[ACTION]\nTool: generic_test_generator"));
        assert!(console.contains("Requested tools were not run in single mode."));
        assert!(!console.contains("[OBSERVATION]"));
        assert_eq!(harness.provider.requests().len(), 1);
        assert_eq!(harness.prompt.rendered(), vec!["I would generate cases."]);
    }

    #[tokio::test]
    async fn test_tools_only_mode() {
        let harness = Harness::new(vec![], vec![Some("checkout")]);

        harness.session(Mode::ToolsOnly).run(None).await.unwrap();

        let console = harness.console.contents();
        assert!(console.contains("[INPUT]\ncheckout"));
        assert!(console.contains(
            "[ACTION]\nTool: generic_test_generator | Args: {\"action\":\"checkout\",\"expected_outcome\":\"Success\"}"
        ));
        assert!(console.contains("[TOOL RESULT]\n[\"POSITIVE: Verify user can 'checkout' and see 'Success'.\""));
        assert!(console.contains("FINAL OUTPUT (See "));
        assert!(harness.provider.requests().is_empty());
        assert!(harness.log_file().contains("[TOOL RESULT]"));
    }

    #[tokio::test]
    async fn test_tools_only_mode_ignores_empty_input() {
        let harness = Harness::new(vec![], vec![Some("")]);

        harness.session(Mode::ToolsOnly).run(None).await.unwrap();

        assert_eq!(harness.console.contents(), "");
        assert_eq!(harness.log_file(), "");
    }
}
