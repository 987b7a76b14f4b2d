use config::{Config, Environment, File};
use qa_agent::agent::DEFAULT_MAX_STEPS;
use qa_agent::providers::configs::{
    GoogleProviderConfig, OpenAiProviderConfig, ProviderConfig, GOOGLE_HOST, GOOGLE_MODEL,
    OPENAI_HOST, OPENAI_MODEL,
};
use qa_agent::providers::factory::ProviderType;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

const ENV_PREFIX: &str = "QA_AGENT";

/// Optional settings file read from the working directory
const SETTINGS_FILE: &str = "qa-agent";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Google {
        #[serde(default = "default_google_host")]
        host: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_google_model")]
        model: String,
        #[serde(default = "default_temperature")]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default = "default_temperature")]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::Google { .. } => ProviderType::Google,
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderSettings::Google { model, .. } | ProviderSettings::OpenAi { model, .. } => {
                model
            }
        }
    }

    pub fn set_model(&mut self, new_model: String) {
        match self {
            ProviderSettings::Google { model, .. } | ProviderSettings::OpenAi { model, .. } => {
                *model = new_model
            }
        }
    }

    /// Convert to the library's ProviderConfig, falling back to the
    /// provider's usual environment variables for the key
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Google {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Google(GoogleProviderConfig {
                host,
                api_key: api_key.or_else(GoogleProviderConfig::api_key_from_env),
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key: api_key.or_else(OpenAiProviderConfig::api_key_from_env),
                model,
                temperature,
                max_tokens,
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_true")]
    pub system_prompt: bool,
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default = "default_expected_outcome")]
    pub expected_outcome: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            system_prompt: default_true(),
            system_prompt_file: None,
            log_file: default_log_file(),
            expected_outcome: default_expected_outcome(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentSettings,
    pub provider: ProviderSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("provider.type", ProviderType::Google.to_string())?
            .add_source(File::with_name(SETTINGS_FILE).required(false))
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            ConfigError::Other(err)
        })
    }
}

fn default_google_host() -> String {
    GOOGLE_HOST.to_string()
}

fn default_google_model() -> String {
    GOOGLE_MODEL.to_string()
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    OPENAI_MODEL.to_string()
}

fn default_temperature() -> Option<f32> {
    Some(0.0)
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_true() -> bool {
    true
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs.txt")
}

fn default_expected_outcome() -> String {
    "Success".to_string()
}
