use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything the scheduler needs to run an analysis pass.
///
/// This struct is consumed, never loaded: reading it from a file on disk,
/// merging profiles, or exposing a config TUI are a collaborator's concern.
/// `Default` provides conservative values so the crate is usable standalone
/// in tests without any real config source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub repo_path: PathBuf,
    pub model: String,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    /// Per-agent overrides of `model`/`default_temperature`/`default_max_tokens`.
    #[serde(default)]
    pub agent_overrides: HashMap<String, AgentOverride>,
    #[serde(default)]
    pub excluded_agents: Vec<String>,
    /// Re-run every agent regardless of the change report.
    #[serde(default)]
    pub force: bool,
    pub max_workers: usize,
    pub analysis_cache_path: PathBuf,
    pub response_cache_path: PathBuf,
    pub response_cache_capacity: usize,
    #[serde(with = "humantime_secs")]
    pub response_cache_ttl: Duration,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOverride {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_secs")]
    pub base_backoff: Duration,
    #[serde(with = "humantime_secs")]
    pub max_backoff_per_attempt: Duration,
    #[serde(with = "humantime_secs")]
    pub max_total_wait: Duration,
    #[serde(with = "humantime_secs")]
    pub request_timeout: Duration,
    /// Per-host idle-connection cap, passed straight through to `reqwest`.
    pub pool_max_idle_per_host: usize,
    /// Process-wide cap on connections in flight through the pool,
    /// independent of how many distinct provider hosts are in use.
    /// `reqwest` only exposes a per-host knob, so `ConnectionPool` enforces
    /// this one itself with an admission semaphore.
    pub global_max_idle: usize,
    #[serde(with = "humantime_secs")]
    pub pool_idle_timeout: Duration,
    #[serde(with = "humantime_secs")]
    pub tls_handshake_timeout: Duration,
    pub min_tls_version: TlsVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff_per_attempt: Duration::from_secs(30),
            max_total_wait: Duration::from_secs(120),
            request_timeout: Duration::from_secs(60),
            pool_max_idle_per_host: 8,
            global_max_idle: 32,
            pool_idle_timeout: Duration::from_secs(90),
            tls_handshake_timeout: Duration::from_secs(10),
            min_tls_version: TlsVersion::Tls12,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            model: "default-model".to_string(),
            default_temperature: 0.0,
            default_max_tokens: 4096,
            agent_overrides: HashMap::new(),
            excluded_agents: Vec::new(),
            force: false,
            max_workers: 2,
            analysis_cache_path: PathBuf::from(".ai/analysis_cache.json"),
            response_cache_path: PathBuf::from(".ai/llm_cache.json"),
            response_cache_capacity: 256,
            response_cache_ttl: Duration::from_secs(24 * 3600),
            http: HttpConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn model_for(&self, agent: &str) -> &str {
        self.agent_overrides
            .get(agent)
            .and_then(|o| o.model.as_deref())
            .unwrap_or(&self.model)
    }

    pub fn temperature_for(&self, agent: &str) -> f32 {
        self.agent_overrides
            .get(agent)
            .and_then(|o| o.temperature)
            .unwrap_or(self.default_temperature)
    }

    pub fn max_tokens_for(&self, agent: &str) -> u32 {
        self.agent_overrides
            .get(agent)
            .and_then(|o| o.max_tokens)
            .unwrap_or(self.default_max_tokens)
    }

    pub fn is_excluded(&self, agent: &str) -> bool {
        self.excluded_agents.iter().any(|a| a == agent)
    }
}

/// Serializes `Duration` as whole seconds so `AnalysisConfig` round-trips
/// through plain JSON without pulling in a humantime dependency.
mod humantime_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
