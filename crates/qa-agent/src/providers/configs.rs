use std::env;

pub const GOOGLE_HOST: &str = "https://generativelanguage.googleapis.com";
pub const GOOGLE_MODEL: &str = "gemini-1.5-flash";
/// Accepted credential variables for Gemini, in lookup order
pub const GOOGLE_API_KEY_VARS: [&str; 2] = ["GOOGLE_API_KEY", "GEMINI_API_KEY"];

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o";
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Google(GoogleProviderConfig),
    OpenAi(OpenAiProviderConfig),
}

#[derive(Debug, Clone)]
pub struct GoogleProviderConfig {
    pub host: String,
    /// Left empty when no credential is configured; the provider reports it on first use
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl GoogleProviderConfig {
    /// First non-empty value of GOOGLE_API_KEY or GEMINI_API_KEY
    pub fn api_key_from_env() -> Option<String> {
        GOOGLE_API_KEY_VARS
            .iter()
            .filter_map(|name| env::var(name).ok())
            .find(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl OpenAiProviderConfig {
    pub fn api_key_from_env() -> Option<String> {
        env::var(OPENAI_API_KEY_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}
