use crate::error::{Error, Result};

/// LLM provider settings, resolved once from the environment.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Browser launch settings.
#[derive(Debug, Clone, Default)]
pub struct BrowserSettings {
    /// Explicit browser executable path (`CHROME_INSTANCE_PATH`). When unset,
    /// the session manager probes platform-default install locations.
    pub chrome_path: Option<String>,
    pub headless: bool,
}

/// Step budget and retry policy for the agent loop. Explicit configuration,
/// not an agent-runtime default.
#[derive(Debug, Clone)]
pub struct AgentLimits {
    /// Maximum think/act rounds per phase.
    pub max_steps: u32,
    /// Retries for transient LLM transport errors, with exponential backoff.
    pub llm_max_retries: u32,
    pub llm_retry_delay_ms: u64,
    /// Navigation retries before a page-load failure surfaces to the agent.
    pub navigation_retries: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_steps: 20,
            llm_max_retries: 3,
            llm_retry_delay_ms: 2000,
            navigation_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderSettings,
    pub browser: BrowserSettings,
    pub limits: AgentLimits,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

impl Config {
    /// Resolve configuration from the process environment. Fails before any
    /// resource acquisition when a required credential is missing.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "OPENAI_API_KEY is not set. Please add it to your environment variables."
                        .to_string(),
                )
            })?;

        let provider = ProviderSettings {
            api_key,
            api_base: lookup("OPENAI_API_BASE").unwrap_or_else(default_api_base),
            model: lookup("OPENAI_MODEL").unwrap_or_else(default_model),
            max_tokens: 4096,
            temperature: 0.7,
        };

        let browser = BrowserSettings {
            chrome_path: lookup("CHROME_INSTANCE_PATH").filter(|p| !p.is_empty()),
            headless: false,
        };

        Ok(Self {
            provider,
            browser,
            limits: AgentLimits::default(),
        })
    }
}
