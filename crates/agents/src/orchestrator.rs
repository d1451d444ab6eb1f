//! Toolset orchestrator — builds named specialist toolsets from provider
//! sources and keeps oversized sets manageable by splitting them into
//! coherent logical groups (LLM-assisted, best-effort).
//!
//! Splitting never aborts partial progress: every fallback path yields a
//! usable toolset, annotated with the reason the split was skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use sw_domain::message::Message;
use sw_domain::tool::{
    sanitize_tool_name, Tool, ToolProvider, ToolSet, ToolsetMetadata,
};
use sw_domain::Result;
use sw_llm::{LlmClient, LlmRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Source configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStrategy {
    /// One toolset per source tag; falls back to `all_in_one` when the
    /// source has no tags.
    #[default]
    ByTag,
    AllInOne,
}

/// One tool source handed to the orchestrator.
#[derive(Clone)]
pub struct SourceConfig {
    pub id: String,
    pub provider_type: String,
    pub provider: Arc<dyn ToolProvider>,
    pub creation_strategy: CreationStrategy,
    pub max_tools_per_logical_group: usize,
    pub all_in_one_name: Option<String>,
    pub all_in_one_description: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolsetOrchestrator {
    /// Ordered by registration; replacements keep their slot.
    toolsets: RwLock<Vec<ToolSet>>,
    llm: Option<Arc<dyn LlmClient>>,
    split_model: String,
}

impl ToolsetOrchestrator {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, split_model: impl Into<String>) -> Self {
        Self {
            toolsets: RwLock::new(Vec::new()),
            llm,
            split_model: split_model.into(),
        }
    }

    /// Initialize one source and register its toolsets.
    pub async fn register_source(&self, cfg: &SourceConfig) -> Result<()> {
        cfg.provider.ensure_initialized().await?;

        let base_sets = self.build_sets(cfg);
        for set in base_sets {
            for split in self.maybe_split(cfg, set).await {
                self.insert(split);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ToolSet> {
        self.toolsets.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn list(&self) -> Vec<ToolSet> {
        self.toolsets.read().clone()
    }

    fn insert(&self, set: ToolSet) {
        let mut sets = self.toolsets.write();
        if let Some(existing) = sets.iter_mut().find(|s| s.id == set.id) {
            tracing::warn!(toolset_id = %set.id, "toolset id collision, replacing earlier entry");
            *existing = set;
        } else {
            sets.push(set);
        }
    }

    // ── Construction strategies ───────────────────────────────────

    fn build_sets(&self, cfg: &SourceConfig) -> Vec<ToolSet> {
        let tags = cfg.provider.tags();
        if cfg.creation_strategy == CreationStrategy::ByTag && !tags.is_empty() {
            tags.iter()
                .map(|tag| {
                    let tools = cfg.provider.tools_with_tag(tag);
                    ToolSet {
                        id: sanitize_tool_name(&format!("{}_tag_{tag}", cfg.id)),
                        name: format!("{tag} operations"),
                        description: format!(
                            "Operations for the '{tag}' area of {}",
                            cfg.provider.title().unwrap_or_else(|| cfg.id.clone())
                        ),
                        tools,
                        metadata: self.metadata(cfg, Some(tag)),
                    }
                })
                .filter(|set| !set.tools.is_empty())
                .collect()
        } else {
            vec![ToolSet {
                id: sanitize_tool_name(&cfg.id),
                name: cfg
                    .all_in_one_name
                    .clone()
                    .unwrap_or_else(|| format!("{} tools", cfg.id)),
                description: cfg.all_in_one_description.clone().unwrap_or_else(|| {
                    format!(
                        "All tools from {}",
                        cfg.provider.title().unwrap_or_else(|| cfg.id.clone())
                    )
                }),
                tools: cfg.provider.tools(),
                metadata: self.metadata(cfg, None),
            }]
        }
    }

    fn metadata(&self, cfg: &SourceConfig, tag: Option<&str>) -> ToolsetMetadata {
        ToolsetMetadata {
            source_id: cfg.id.clone(),
            provider_type: cfg.provider_type.clone(),
            api_title: cfg.provider.title(),
            original_tag: tag.map(str::to_string),
            base_url: cfg.provider.base_url(),
            logical_group: None,
            annotations: Default::default(),
        }
    }

    // ── LLM-assisted splitting ────────────────────────────────────

    /// Split an oversized toolset into logical groups, or return it
    /// unsplit with an annotation naming the fallback reason.
    async fn maybe_split(&self, cfg: &SourceConfig, set: ToolSet) -> Vec<ToolSet> {
        if set.tools.len() <= cfg.max_tools_per_logical_group {
            return vec![set];
        }

        let Some(llm) = self.llm.clone() else {
            return vec![annotate_fallback(set, "no_llm_client")];
        };

        match self.split_with_llm(cfg, &set, llm).await {
            Ok(groups) => groups,
            Err(reason) => {
                tracing::warn!(
                    toolset_id = %set.id,
                    tool_count = set.tools.len(),
                    reason,
                    "toolset split fell back to a single set"
                );
                vec![annotate_fallback(set, reason)]
            }
        }
    }

    async fn split_with_llm(
        &self,
        cfg: &SourceConfig,
        set: &ToolSet,
        llm: Arc<dyn LlmClient>,
    ) -> std::result::Result<Vec<ToolSet>, &'static str> {
        // Auxiliary tools (escape hatches, helpers) get a dedicated set;
        // only operation-backed tools are grouped by the model.
        let aux_names: HashSet<String> = cfg.provider.auxiliary_tool_names().into_iter().collect();
        let (aux, ops): (Vec<_>, Vec<_>) = set
            .tools
            .iter()
            .cloned()
            .partition(|t| aux_names.contains(&t.definition().name));

        let listing: Vec<Value> = ops
            .iter()
            .map(|t| {
                let def = t.definition();
                json!({
                    "operation_id": def.name,
                    "summary": def.description,
                })
            })
            .collect();

        let prompt = format!(
            "Group the following API operations into coherent functional \
             groups of at most {} operations each. Respond with a JSON \
             object only: keys are short group names, values are arrays of \
             operation_id strings. Every operation_id must appear in \
             exactly one group.\n\nOPERATIONS:\n{}",
            cfg.max_tools_per_logical_group,
            serde_json::to_string_pretty(&listing).unwrap_or_default()
        );

        let request = LlmRequest {
            model: self.split_model.clone(),
            messages: vec![Message::user(uuid::Uuid::new_v4(), prompt)],
            temperature: Some(0.0),
            ..LlmRequest::default()
        };

        let response = llm.generate(request).await.map_err(|e| {
            tracing::warn!(error = %e, "toolset split call failed");
            "llm_call_failure"
        })?;
        if response.content.trim().is_empty() {
            return Err("llm_empty_response");
        }

        let parsed: Value = serde_json::from_str(extract_json_object(&response.content))
            .map_err(|_| "llm_json_parse_failure")?;
        let Some(groups) = parsed.as_object() else {
            return Err("llm_bad_response_content");
        };
        if groups.is_empty() {
            return Err("llm_split_issues_or_empty");
        }

        let by_name: HashMap<String, Arc<dyn Tool>> = ops
            .iter()
            .map(|t| (t.definition().name, t.clone()))
            .collect();

        // The assignment must be a partition of the known ids.
        let mut assigned: HashSet<String> = HashSet::new();
        let mut result = Vec::new();
        for (group_name, members) in groups {
            let Some(members) = members.as_array() else {
                return Err("llm_invalid_json_structure");
            };
            let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
            for member in members {
                let Some(id) = member.as_str() else {
                    return Err("llm_invalid_json_structure");
                };
                let Some(tool) = by_name.get(id) else {
                    return Err("llm_invalid_json_structure");
                };
                if !assigned.insert(id.to_string()) {
                    return Err("llm_invalid_json_structure");
                }
                tools.push(tool.clone());
            }
            if tools.is_empty() {
                continue;
            }
            result.push(self.group_set(cfg, set, group_name, tools));
        }
        if result.is_empty() {
            return Err("llm_split_issues_or_empty");
        }

        // Anything the model forgot lands in Miscellaneous.
        let unassigned: Vec<Arc<dyn Tool>> = ops
            .iter()
            .filter(|t| !assigned.contains(&t.definition().name))
            .cloned()
            .collect();
        if !unassigned.is_empty() {
            let mut misc = self.group_set(cfg, set, "Miscellaneous", unassigned);
            misc.metadata
                .annotations
                .insert("split_note".into(), json!("llm_unassigned_misc"));
            result.push(misc);
        }

        if !aux.is_empty() {
            let mut aux_set = self.group_set(cfg, set, "auxiliary_tools", aux);
            aux_set.name = format!("{} auxiliary tools", set.name);
            result.push(aux_set);
        }

        Ok(result)
    }

    fn group_set(
        &self,
        cfg: &SourceConfig,
        parent: &ToolSet,
        group_name: &str,
        tools: Vec<Arc<dyn Tool>>,
    ) -> ToolSet {
        let mut metadata = self.metadata(cfg, parent.metadata.original_tag.as_deref());
        metadata.logical_group = Some(group_name.to_string());
        metadata
            .annotations
            .insert("llm_group_name".into(), json!(group_name));
        metadata
            .annotations
            .insert("llm_model_used".into(), json!(self.split_model));
        ToolSet {
            id: sanitize_tool_name(&format!("{}_{group_name}", parent.id)),
            name: format!("{} — {group_name}", parent.name),
            description: format!("{} ({group_name} group)", parent.description),
            tools,
            metadata,
        }
    }
}

fn annotate_fallback(mut set: ToolSet, reason: &str) -> ToolSet {
    set.metadata
        .annotations
        .insert("split_fallback_reason".into(), json!(reason));
    set
}

/// Models sometimes wrap JSON in prose or code fences; take the outermost
/// object.
fn extract_json_object(content: &str) -> &str {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &content[s..=e],
        _ => content,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers over toolsets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exposes exactly one toolset's tools (the environment of a worker run).
pub struct ToolSetProvider {
    set: ToolSet,
}

impl ToolSetProvider {
    pub fn new(set: ToolSet) -> Self {
        Self { set }
    }

    pub fn toolset(&self) -> &ToolSet {
        &self.set
    }
}

#[async_trait::async_trait]
impl ToolProvider for ToolSetProvider {
    async fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.set.tools.clone()
    }

    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.set
            .tools
            .iter()
            .find(|t| t.definition().name == name)
            .cloned()
    }
}

/// Merges several providers; on name collisions the first provider in
/// source order wins and the duplicate is reported.
pub struct AggregatedToolProvider {
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl AggregatedToolProvider {
    pub fn new(providers: Vec<Arc<dyn ToolProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait::async_trait]
impl ToolProvider for AggregatedToolProvider {
    async fn ensure_initialized(&self) -> Result<()> {
        for provider in &self.providers {
            provider.ensure_initialized().await?;
        }
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for provider in &self.providers {
            for tool in provider.tools() {
                let name = tool.definition().name;
                if seen.insert(name.clone()) {
                    out.push(tool);
                } else {
                    tracing::warn!(tool = %name, "duplicate tool name across providers, first occurrence wins");
                }
            }
        }
        out
    }

    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.providers.iter().find_map(|p| p.tool(name))
    }
}
