//! Shared application state passed to all API handlers.

use std::sync::Arc;

use sw_agents::{BaseAgent, InterruptHub, PlannerAgent, SourceConfig, ToolsetOrchestrator};
use sw_domain::error::Error;
use sw_domain::Result;
use sw_llm::{LlmClient, OpenAiCompatClient};
use sw_openapi::OpenApiToolProvider;
use sw_stores::{
    InMemoryMessageStore, InMemoryRunStore, InMemoryThreadStore, MessageStore, RunLog, RunStore,
    ThreadStore,
};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<dyn LlmClient>,
    pub messages: Arc<dyn MessageStore>,
    pub threads: Arc<dyn ThreadStore>,
    pub runs: Arc<dyn RunStore>,
    pub orchestrator: Arc<ToolsetOrchestrator>,
    /// The general agent, offered the union of every toolset.
    pub base_agent: Arc<BaseAgent>,
    /// The planner, offered the delegation tool only.
    pub planner: Arc<PlannerAgent>,
}

impl AppState {
    /// Build everything from config: LLM client, stores, tool sources,
    /// orchestrator, and the two agents sharing one cancellation
    /// registry.
    pub async fn build(config: Arc<Config>) -> Result<Self> {
        let api_key = match &config.llm.api_key_env {
            Some(env) => Some(std::env::var(env).map_err(|_| {
                Error::Configuration(format!("env var '{env}' is not set"))
            })?),
            None => None,
        };
        let llm: Arc<dyn LlmClient> =
            Arc::new(OpenAiCompatClient::new(config.llm.base_url.clone(), api_key));

        let messages: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let threads: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let run_log = Arc::new(RunLog::new(&config.server.state_dir));
        let runs: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::with_log(run_log));

        let orchestrator = Arc::new(ToolsetOrchestrator::new(
            Some(llm.clone()),
            config.llm.model.clone(),
        ));
        for source in &config.tool_sources {
            let spec_text = std::fs::read_to_string(&source.spec_path).map_err(|e| {
                Error::Configuration(format!(
                    "could not read spec '{}': {e}",
                    source.spec_path.display()
                ))
            })?;
            let mut provider =
                OpenApiToolProvider::from_spec_text(source.id.clone(), spec_text);
            if let Some(base_url) = &source.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(auth) = &source.auth {
                provider = provider.with_static_auth(auth.resolve()?);
            }

            orchestrator
                .register_source(&SourceConfig {
                    id: source.id.clone(),
                    provider_type: "openapi".into(),
                    provider: Arc::new(provider),
                    creation_strategy: source.creation_strategy,
                    max_tools_per_logical_group: source.max_tools_per_logical_group,
                    all_in_one_name: source.all_in_one_name.clone(),
                    all_in_one_description: source.all_in_one_description.clone(),
                })
                .await?;
        }
        tracing::info!(
            toolsets = orchestrator.list().len(),
            sources = config.tool_sources.len(),
            "toolset orchestrator ready"
        );

        let interrupts = Arc::new(InterruptHub::new());
        let base_agent = Arc::new(BaseAgent::with_interrupts(interrupts.clone()));
        let planner = Arc::new(PlannerAgent::with_interrupts(
            orchestrator.clone(),
            llm.clone(),
            messages.clone(),
            threads.clone(),
            runs.clone(),
            interrupts,
        ));

        Ok(Self {
            config,
            llm,
            messages,
            threads,
            runs,
            orchestrator,
            base_agent,
            planner,
        })
    }
}
