use anyhow::Result;
use futures::TryStreamExt;
use indoc::indoc;
use serde_json::json;

use qa_agent::agent::Agent;
use qa_agent::conversation::Conversation;
use qa_agent::errors::AgentError;
use qa_agent::models::message::Message;
use qa_agent::models::role::Role;
use qa_agent::models::tool::ToolCall;
use qa_agent::providers::mock::MockProvider;
use qa_agent::qa_system::{generate_test_cases, QaSystem};
use qa_agent::router::{route, Route};
use qa_agent::systems::System;

async fn run(agent: &Agent, conversation: &mut Conversation) -> Result<()> {
    let mut stream = agent.reply(conversation.messages()).await?;
    let mut produced = Vec::new();
    while let Some(message) = stream.try_next().await? {
        produced.push(message);
    }
    drop(stream);
    for message in produced {
        conversation.push(message)?;
    }
    Ok(())
}

fn agent_with(responses: Vec<Message>) -> Agent {
    let mut agent = Agent::new(Box::new(MockProvider::new(responses)));
    agent.add_system(Box::new(QaSystem::new()));
    agent
}

#[tokio::test]
async fn answer_without_tools_ends_after_one_message() -> Result<()> {
    let agent = agent_with(vec![Message::assistant().with_text("Login looks testable.")]);
    let mut conversation = Conversation::from_user_text("user can log in");

    run(&agent, &mut conversation).await?;

    assert_eq!(conversation.len(), 2);
    let last = conversation.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text(), "Login looks testable.");
    assert_eq!(route(conversation.messages()), Route::End);
    Ok(())
}

#[tokio::test]
async fn login_scenario_produces_numbered_report() -> Result<()> {
    let cases = generate_test_cases("login", "Success");
    let agent = agent_with(vec![
        Message::assistant().with_tool_request(
            "gen",
            Ok(ToolCall::new(
                "generic_test_generator",
                json!({"action": "login", "expected_outcome": "Success"}),
            )),
        ),
        Message::assistant().with_tool_request(
            "fmt",
            Ok(ToolCall::new("report_formatter", json!({ "test_cases": cases }))),
        ),
        Message::assistant().with_text("Here is your report."),
    ]);
    let mut conversation = Conversation::from_user_text("login");

    run(&agent, &mut conversation).await?;

    let observations: Vec<String> = conversation
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.content[0].as_tool_response_text())
        .collect();
    assert_eq!(observations.len(), 2);

    let generated: Vec<String> = serde_json::from_str(&observations[0])?;
    assert_eq!(generated.len(), 4);
    assert!(generated.iter().all(|case| case.contains("login")));

    assert_eq!(
        observations[1],
        indoc! {"
            --- QA AUTOMATION REPORT ---
            TC_001: POSITIVE: Verify user can 'login' and see 'Success'.
            TC_002: NEGATIVE: Verify 'login' with empty data does NOT show 'Success'.
            TC_003: BOUNDARY: Verify 'login' with max character limit handles gracefully.
            TC_004: SECURITY: Verify 'login' is protected against common vulnerabilities.
            ----------------------------"}
    );
    assert_eq!(conversation.last().unwrap().text(), "Here is your report.");
    Ok(())
}

#[tokio::test]
async fn malformed_arguments_are_reported_to_the_model() -> Result<()> {
    let provider = MockProvider::new(vec![
        Message::assistant().with_tool_request(
            "bad",
            Ok(ToolCall::new("report_formatter", json!({"test_cases": "not a list"}))),
        ),
        Message::assistant().with_text("Sorry, retrying is out of scope."),
    ]);
    let mut agent = Agent::new(Box::new(provider.clone()));
    agent.add_system(Box::new(QaSystem::new()));
    let mut conversation = Conversation::from_user_text("format these");

    run(&agent, &mut conversation).await?;

    let tool_message = &conversation.messages()[2];
    assert!(matches!(
        tool_message.tool_responses()[0].tool_result,
        Err(AgentError::InvalidParameters(_))
    ));
    // the failure was part of what the model saw next
    let second = &provider.requests()[1];
    assert_eq!(second.messages.last().unwrap().role, Role::Tool);
    Ok(())
}

#[tokio::test]
async fn qa_system_dispatches_by_tool_name() -> Result<()> {
    let system = QaSystem::new();
    let names: Vec<&str> = system.tools().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "requirement_structure_tool",
            "generic_test_generator",
            "report_formatter"
        ]
    );

    let result = system
        .call(ToolCall::new(
            "requirement_structure_tool",
            json!({"requirement": "log in as admin"}),
        ))
        .await?;
    assert_eq!(
        result[0].to_value(),
        json!({"analyzed_length": 4, "status": "Requirement Received & Parsed"})
    );

    let missing = system.call(ToolCall::new("nope", json!({}))).await;
    assert_eq!(missing, Err(AgentError::ToolNotFound("nope".into())));
    Ok(())
}
