use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod configuration;
mod prompt;
mod session;
mod trace_log;

use configuration::Settings;
use prompt::CliclackPrompt;
use qa_agent::agent::{Agent, SystemPrompt};
use qa_agent::providers::factory;
use qa_agent::qa_system::QaSystem;
use session::{Interrupted, Mode, Session};
use trace_log::TraceLog;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// How the scenario is processed
    #[arg(long, value_enum, default_value = "agent")]
    mode: Mode,

    /// Scenario to process instead of prompting for one
    #[arg(short, long)]
    scenario: Option<String>,

    /// Model to use (overrides QA_AGENT_PROVIDER__MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Reasoning steps allowed before giving up
    #[arg(long)]
    max_steps: Option<usize>,

    /// File the step trace is appended to
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Send no system instruction to the model
    #[arg(long)]
    no_system_prompt: bool,

    /// Expected outcome used by tools-only mode
    #[arg(long)]
    expected_outcome: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(model) = &self.model {
            settings.provider.set_model(model.clone());
        }
        if let Some(max_steps) = self.max_steps {
            settings.agent.max_steps = max_steps;
        }
        if let Some(log_file) = &self.log_file {
            settings.agent.log_file = log_file.clone();
        }
        if self.no_system_prompt {
            settings.agent.system_prompt = false;
        }
        if let Some(expected_outcome) = &self.expected_outcome {
            settings.agent.expected_outcome = expected_outcome.clone();
        }
    }
}

fn build_agent(settings: &Settings) -> Result<Agent> {
    let system_prompt = match (&settings.agent.system_prompt_file, settings.agent.system_prompt) {
        (_, false) => SystemPrompt::Disabled,
        (Some(path), true) => SystemPrompt::Template(path.clone()),
        (None, true) => SystemPrompt::Builtin,
    };

    let provider = factory::get_provider(settings.provider.clone().into_config())?;
    let mut agent = Agent::new(provider)
        .with_max_steps(settings.agent.max_steps)
        .with_system_prompt(system_prompt);
    agent.add_system(Box::new(QaSystem::new()));
    Ok(agent)
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::new()?;
    cli.apply(&mut settings);
    tracing::debug!(
        provider = %settings.provider.provider_type(),
        model = settings.provider.model(),
        mode = ?cli.mode,
        "starting"
    );

    let agent = build_agent(&settings)?;
    let trace = TraceLog::open(&settings.agent.log_file)?;
    let mut session = Session::new(
        agent,
        Box::new(CliclackPrompt::new()),
        trace,
        cli.mode,
        settings.agent.expected_outcome.clone(),
    );
    session.run(cli.scenario).await
}

/// The whole cause chain, so transport failures keep their reason
fn error_line(e: &anyhow::Error) -> String {
    format!("Error: {:#}", e)
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is::<Interrupted>() => {
            println!("\n{}", e);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("\n{}", error_line(&e));
            ExitCode::FAILURE
        }
    }
}
