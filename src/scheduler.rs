use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::cache::{default_agent_definitions, detect_changes, AnalysisCache};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::fingerprint;
use crate::llm::LlmClient;
use crate::prompts::PromptProvider;
use crate::tools::ToolSet;
use crate::types::{AgentDefinition, AnalysisResult};

/// Orchestrates one end-to-end analysis pass: load the cache, rescan
/// fingerprints, decide which agents need to run, run the ones that do
/// through a bounded worker pool, and persist what changed.
pub struct Scheduler {
    config: AnalysisConfig,
    client: Arc<dyn LlmClient>,
    prompts: Arc<dyn PromptProvider>,
    agents: Vec<AgentDefinition>,
}

impl Scheduler {
    pub fn new(config: AnalysisConfig, client: Arc<dyn LlmClient>, prompts: Arc<dyn PromptProvider>) -> Self {
        Self { config, client, prompts, agents: default_agent_definitions() }
    }

    pub fn with_agents(mut self, agents: Vec<AgentDefinition>) -> Self {
        self.agents = agents;
        self
    }

    fn active_agents(&self) -> Vec<&AgentDefinition> {
        self.agents.iter().filter(|a| !self.config.is_excluded(&a.name)).collect()
    }

    async fn current_git_commit(repo_path: &Path) -> Option<String> {
        let repo_path = repo_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::process::Command::new("git")
                .args(["rev-parse", "HEAD"])
                .current_dir(&repo_path)
                .output()
                .ok()
                .filter(|o| o.status.success())
                .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        })
        .await
        .ok()
        .flatten()
    }

    async fn run_one_agent(
        definition: AgentDefinition,
        client: Arc<dyn LlmClient>,
        prompts: Arc<dyn PromptProvider>,
        tools: ToolSet,
        config: AnalysisConfig,
        repo_path: PathBuf,
        ctx: CancellationToken,
    ) -> (String, Result<String>) {
        let result = async {
            let mut vars = HashMap::new();
            vars.insert("repo_path".to_string(), repo_path.display().to_string());
            vars.insert("agent_name".to_string(), definition.name.clone());
            let system_prompt = prompts.render(&definition.prompt_name, &vars).await?;

            let agent_tools = tools.scoped(&definition.tools);
            let agent = Agent::new(
                system_prompt,
                config.model_for(&definition.name),
                config.temperature_for(&definition.name),
                config.max_tokens_for(&definition.name),
                agent_tools,
            );

            let prompt = format!("Analyze the repository at {}.", repo_path.display());
            let artifact = agent.run(&ctx, client.as_ref(), &prompt).await?;

            let docs_dir = repo_path.join(".ai").join("docs");
            std::fs::create_dir_all(&docs_dir)?;
            std::fs::write(docs_dir.join(format!("{}.md", definition.name)), &artifact)?;

            Ok(artifact)
        }
        .await;

        (definition.name, result)
    }

    /// Runs one full analysis pass. Agents whose inputs didn't change are
    /// reported successful without being re-run; agents that do run are
    /// bounded to `config.max_workers` concurrently and their results are
    /// returned in the order they were submitted.
    pub async fn run(&self, ctx: &CancellationToken) -> Result<AnalysisResult> {
        let mut cache = AnalysisCache::load(&self.config.analysis_cache_path)?;
        let (current_fingerprints, metrics) = fingerprint::scan(&self.config.repo_path, &cache.files, &[]).await?;
        info!(total = metrics.total_files, cached = metrics.cached_files, hashed = metrics.hashed_files, "fingerprint scan complete");

        let active: Vec<AgentDefinition> = self.active_agents().into_iter().cloned().collect();

        let (to_run, already_fresh): (Vec<AgentDefinition>, Vec<String>) = if self.config.force {
            (active, Vec::new())
        } else {
            let report = detect_changes(&cache, &current_fingerprints, &active);
            if !report.has_changes {
                info!("no file changes since last analysis, nothing to run");
                let successful: Vec<String> = cache
                    .agents
                    .iter()
                    .filter(|(name, status)| status.success && !self.config.is_excluded(name))
                    .map(|(name, _)| name.clone())
                    .collect();
                return Ok(AnalysisResult { successful, failed: Vec::new() });
            }
            info!(reason = %report.reason, "change report computed");
            let to_run = active.into_iter().filter(|a| report.agents_to_run.contains(&a.name)).collect();
            (to_run, report.agents_to_skip)
        };

        let tools = ToolSet::standard(self.config.repo_path.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut handles = Vec::with_capacity(to_run.len());

        for definition in to_run {
            let client = Arc::clone(&self.client);
            let prompts = Arc::clone(&self.prompts);
            let tools = tools.clone();
            let config = self.config.clone();
            let repo_path = self.config.repo_path.clone();
            let ctx = ctx.clone();
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let Some(permit) = permit else {
                    return (definition.name.clone(), Err(crate::error::AnalysisError::Cancelled));
                };

                let outcome = Self::run_one_agent(definition, client, prompts, tools, config, repo_path, ctx).await;
                drop(permit);
                outcome
            }));
        }

        let mut successful = already_fresh;
        let mut failed = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((name, Ok(_))) => successful.push(name),
                Ok((name, Err(e))) => {
                    warn!(agent = %name, error = %e, "agent run failed");
                    failed.push((name, e.to_string()));
                }
                Err(join_error) => {
                    warn!(error = %join_error, "agent task panicked");
                    failed.push(("<unknown>".to_string(), join_error.to_string()));
                }
            }
        }

        let git_commit = Self::current_git_commit(&self.config.repo_path).await;
        cache.update_after_analysis(
            &successful,
            &failed.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>(),
            current_fingerprints,
            git_commit,
        );
        cache.save(&self.config.analysis_cache_path)?;

        Ok(AnalysisResult { successful, failed })
    }
}
