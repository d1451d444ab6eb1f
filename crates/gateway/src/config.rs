//! Gateway configuration, loaded from a TOML file.
//!
//! Every section has sensible defaults; the only mandatory pieces are the
//! LLM endpoint and at least a model name. Validation runs at startup and
//! rejects configurations the core would refuse anyway.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use sw_domain::auth::{ApiKeyLocation, AuthOverride};
use sw_domain::error::Error;
use sw_domain::run::{ContextConfig, ExecutionStrategy, RunConfig};
use sw_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub state_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            state_dir: PathBuf::from("./state"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint base URL.
    pub base_url: String,
    /// Environment variable holding the API key, if the endpoint needs
    /// one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Default model for runs and for toolset splitting.
    pub model: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_tool_call_continuations: Option<u32>,
    pub parallel_tool_execution: bool,
    pub context: Option<ContextDefaults>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextDefaults {
    pub token_threshold: Option<u32>,
    pub summary_target_tokens: Option<u32>,
    pub reserved_tokens: Option<u32>,
    pub history_limit: Option<usize>,
    pub keep_recent_messages: Option<usize>,
}

/// Static authentication for a tool source, with secrets indirected
/// through the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceAuthConfig {
    None,
    Bearer {
        token_env: String,
    },
    ApiKey {
        name: String,
        location: ApiKeyLocation,
        key_env: String,
    },
}

impl SourceAuthConfig {
    /// Resolve env-indirected secrets into a concrete override.
    pub fn resolve(&self) -> Result<AuthOverride> {
        match self {
            Self::None => Ok(AuthOverride::None),
            Self::Bearer { token_env } => {
                let token = std::env::var(token_env).map_err(|_| {
                    Error::Configuration(format!("env var '{token_env}' is not set"))
                })?;
                Ok(AuthOverride::bearer(token))
            }
            Self::ApiKey {
                name,
                location,
                key_env,
            } => {
                let key = std::env::var(key_env).map_err(|_| {
                    Error::Configuration(format!("env var '{key_env}' is not set"))
                })?;
                Ok(AuthOverride::api_key(name.clone(), *location, key))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSourceConfig {
    pub id: String,
    /// Path to the OpenAPI document (JSON or YAML).
    pub spec_path: PathBuf,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub creation_strategy: sw_agents::CreationStrategy,
    #[serde(default = "default_max_tools")]
    pub max_tools_per_logical_group: usize,
    #[serde(default)]
    pub all_in_one_name: Option<String>,
    #[serde(default)]
    pub all_in_one_description: Option<String>,
    #[serde(default)]
    pub auth: Option<SourceAuthConfig>,
}

fn default_max_tools() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub run: RunDefaults,
    #[serde(default)]
    pub tool_sources: Vec<ToolSourceConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("could not read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.base_url.trim().is_empty() {
            return Err(Error::Configuration("llm.base_url must not be empty".into()));
        }
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .map_err(|e| Error::Configuration(format!("bad server.bind: {e}")))?;

        let mut seen = std::collections::HashSet::new();
        for source in &self.tool_sources {
            if !seen.insert(&source.id) {
                return Err(Error::Configuration(format!(
                    "duplicate tool source id '{}'",
                    source.id
                )));
            }
        }

        // The run defaults must produce a config the core accepts.
        self.run_config(&HashMap::new())?.validate()
    }

    /// Materialize the per-run configuration from the defaults plus
    /// request-scoped auth overrides.
    pub fn run_config(&self, auth_overrides: &HashMap<String, AuthOverride>) -> Result<RunConfig> {
        let mut config = RunConfig::new(self.llm.model.clone());
        config.system_prompt = self.run.system_prompt.clone();
        config.temperature = self.run.temperature;
        config.max_tokens = self.run.max_tokens;
        if let Some(n) = self.run.max_tool_call_continuations {
            config.max_tool_call_continuations = n;
        }
        if self.run.parallel_tool_execution {
            config.executor.strategy = ExecutionStrategy::Parallel;
        }

        let mut context = ContextConfig::default();
        if let Some(c) = &self.run.context {
            if let Some(v) = c.token_threshold {
                context.token_threshold = v;
            }
            if let Some(v) = c.summary_target_tokens {
                context.summary_target_tokens = v;
            }
            if let Some(v) = c.reserved_tokens {
                context.reserved_tokens = v;
            }
            if let Some(v) = c.history_limit {
                context.history_limit = v;
            }
            if let Some(v) = c.keep_recent_messages {
                context.keep_recent_messages = v;
            }
        }
        config.context = context;
        config.request_auth_overrides = auth_overrides.clone();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[llm]
base_url = "https://api.example.com/v1"
model = "test-model"
"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert!(config.tool_sources.is_empty());

        let run = config.run_config(&HashMap::new()).unwrap();
        assert_eq!(run.model, "test-model");
        assert_eq!(run.max_tool_call_continuations, 10);
    }

    #[test]
    fn full_config_parses() {
        let text = r#"
[server]
bind = "0.0.0.0:9000"
state_dir = "/tmp/switchboard"

[llm]
base_url = "http://localhost:11434/v1"
api_key_env = "LLM_KEY"
model = "qwen2.5"

[run]
temperature = 0.2
max_tool_call_continuations = 5
parallel_tool_execution = true

[run.context]
token_threshold = 4000
summary_target_tokens = 512
reserved_tokens = 256

[[tool_sources]]
id = "petstore"
spec_path = "specs/petstore.yaml"
creation_strategy = "by_tag"
max_tools_per_logical_group = 12

[tool_sources.auth]
type = "bearer"
token_env = "PETSTORE_TOKEN"
"#;
        let config: Config = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.tool_sources.len(), 1);
        assert_eq!(config.tool_sources[0].max_tools_per_logical_group, 12);
        assert!(matches!(
            config.tool_sources[0].auth,
            Some(SourceAuthConfig::Bearer { .. })
        ));

        let run = config.run_config(&HashMap::new()).unwrap();
        assert_eq!(run.context.token_threshold, 4000);
        assert_eq!(run.executor.strategy, ExecutionStrategy::Parallel);
    }

    #[test]
    fn bad_bind_is_rejected() {
        let text = r#"
[server]
bind = "not an address"

[llm]
base_url = "https://api.example.com/v1"
model = "m"
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_context_budget_is_rejected() {
        let text = r#"
[llm]
base_url = "https://api.example.com/v1"
model = "m"

[run.context]
token_threshold = 100
summary_target_tokens = 90
reserved_tokens = 20
"#;
        let config: Config = toml::from_str(text).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "configuration");
    }

    #[test]
    fn duplicate_source_ids_are_rejected() {
        let text = r#"
[llm]
base_url = "https://api.example.com/v1"
model = "m"

[[tool_sources]]
id = "a"
spec_path = "a.json"

[[tool_sources]]
id = "a"
spec_path = "b.json"
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_auth_env_is_a_configuration_error() {
        let auth = SourceAuthConfig::Bearer {
            token_env: "SW_TEST_DEFINITELY_UNSET".into(),
        };
        assert_eq!(auth.resolve().unwrap_err().code(), "configuration");
    }
}
