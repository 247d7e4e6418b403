use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::types::{AgentDefinition, FileFingerprint};

const SCHEMA_VERSION: u32 = 1;

/// Per-agent run status as recorded across analysis passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunStatus {
    pub last_run: DateTime<Utc>,
    pub success: bool,
}

/// Persisted record of file fingerprints and per-agent run status, enabling
/// incremental analysis. Owned exclusively by the scheduler during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisCache {
    pub version: u32,
    pub last_analysis: DateTime<Utc>,
    #[serde(default)]
    pub git_commit: Option<String>,
    #[serde(default)]
    pub files: HashMap<String, FileFingerprint>,
    #[serde(default)]
    pub agents: HashMap<String, AgentRunStatus>,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            last_analysis: DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now),
            git_commit: None,
            files: HashMap::new(),
            agents: HashMap::new(),
        }
    }
}

impl AnalysisCache {
    fn is_first_run(&self) -> bool {
        self.files.is_empty() && self.last_analysis.timestamp() == 0
    }

    /// Loads the cache from `path`. A missing file, a corrupt JSON file (the
    /// existing file is backed up with a `.backup` suffix), or a schema
    /// version mismatch all yield a fresh empty cache rather than erroring.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let parsed: Self = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "analysis cache is corrupt, backing up and starting fresh");
                let backup = path.with_extension("json.backup");
                let _ = std::fs::rename(path, &backup);
                return Ok(Self::default());
            }
        };

        if parsed.version != SCHEMA_VERSION {
            warn!(found = parsed.version, expected = SCHEMA_VERSION, "analysis cache schema version mismatch, starting fresh");
            return Ok(Self::default());
        }

        Ok(parsed)
    }

    /// Atomically writes the cache to `path` via temp-file-then-rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp_path = dir.join(format!(".{}.tmp", path.file_name().and_then(|n| n.to_str()).unwrap_or("analysis_cache")));
        let serialized = serde_json::to_vec_pretty(self)?;
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            use std::io::Write;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Stamps the last-run instant for every agent in `successful`, replaces
    /// the file map with `current_fingerprints`, and records `git_commit` if
    /// obtainable.
    pub fn update_after_analysis(
        &mut self,
        successful: &[String],
        failed: &[String],
        current_fingerprints: HashMap<String, FileFingerprint>,
        git_commit: Option<String>,
    ) {
        let now = Utc::now();
        for name in successful {
            self.agents.insert(name.clone(), AgentRunStatus { last_run: now, success: true });
        }
        for name in failed {
            self.agents.insert(name.clone(), AgentRunStatus { last_run: now, success: false });
        }
        self.files = current_fingerprints;
        self.last_analysis = now;
        if git_commit.is_some() {
            self.git_commit = git_commit;
        }
    }
}

/// The diff of current repository fingerprints against the analysis cache,
/// augmented with which agents' inputs changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeReport {
    pub first_run: bool,
    pub has_changes: bool,
    pub new_files: Vec<String>,
    pub modified_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub agents_to_run: Vec<String>,
    pub agents_to_skip: Vec<String>,
    pub reason: String,
}

fn build_glob_set(patterns: &[String]) -> globset::GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(&pattern.to_lowercase()) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

/// Computes a `ChangeReport` from the cached state and the fingerprints
/// produced by the current scan.
///
/// A first run (empty cache) marks every file new and every agent to run. On
/// subsequent runs, an agent is re-run when it has never succeeded, or when
/// any changed path matches one of its invalidation patterns; if changes
/// exist but none match any agent, every agent runs as a safety fallback.
pub fn detect_changes(cache: &AnalysisCache, current: &HashMap<String, FileFingerprint>, agents: &[AgentDefinition]) -> ChangeReport {
    if cache.is_first_run() {
        return ChangeReport {
            first_run: true,
            has_changes: !current.is_empty(),
            new_files: current.keys().cloned().collect(),
            modified_files: Vec::new(),
            deleted_files: Vec::new(),
            agents_to_run: agents.iter().map(|a| a.name.clone()).collect(),
            agents_to_skip: Vec::new(),
            reason: "first run: no prior analysis cache".to_string(),
        };
    }

    let current_paths: HashSet<&String> = current.keys().collect();
    let cached_paths: HashSet<&String> = cache.files.keys().collect();

    let mut new_files: Vec<String> = current_paths.difference(&cached_paths).map(|s| (*s).clone()).collect();
    let mut deleted_files: Vec<String> = cached_paths.difference(&current_paths).map(|s| (*s).clone()).collect();
    let mut modified_files: Vec<String> = current_paths
        .intersection(&cached_paths)
        .filter(|path| current[**path].hash != cache.files[**path].hash)
        .map(|s| (*s).clone())
        .collect();

    new_files.sort();
    modified_files.sort();
    deleted_files.sort();

    let changed: Vec<&String> = new_files.iter().chain(modified_files.iter()).chain(deleted_files.iter()).collect();
    let has_changes = !changed.is_empty();

    let mut agents_to_run = Vec::new();
    let mut agents_to_skip = Vec::new();
    let mut any_pattern_matched = false;

    for agent in agents {
        let never_succeeded = cache.agents.get(&agent.name).map(|s| !s.success).unwrap_or(true);
        let glob_set = build_glob_set(&agent.invalidation_patterns);
        let matched = changed.iter().any(|path| glob_set.is_match(path.to_lowercase()));
        if matched {
            any_pattern_matched = true;
        }
        if never_succeeded || matched {
            agents_to_run.push(agent.name.clone());
        } else {
            agents_to_skip.push(agent.name.clone());
        }
    }

    // Safety fallback: changes happened but matched no agent's patterns —
    // run everything rather than silently skip an affected agent.
    if has_changes && !any_pattern_matched && !agents_to_skip.is_empty() {
        agents_to_run = agents.iter().map(|a| a.name.clone()).collect();
        agents_to_skip.clear();
    }

    let reason = if !has_changes {
        "no file changes since last analysis".to_string()
    } else if !any_pattern_matched {
        "changes matched no agent pattern; running all agents as a safety fallback".to_string()
    } else {
        format!("{} new, {} modified, {} deleted", new_files.len(), modified_files.len(), deleted_files.len())
    };

    ChangeReport { first_run: false, has_changes, new_files, modified_files, deleted_files, agents_to_run, agents_to_skip, reason }
}

/// The default agent definitions this crate ships: structure, dependencies,
/// data flow, request flow, and API analyzers, each with its own
/// invalidation patterns.
pub fn default_agent_definitions() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            name: "structure_analyzer".to_string(),
            prompt_name: "structure".to_string(),
            invalidation_patterns: vec!["*.rs".to_string(), "*.go".to_string(), "*.py".to_string(), "*.ts".to_string(), "*.js".to_string()],
            tools: vec!["read_file".to_string(), "search_files".to_string()],
        },
        AgentDefinition {
            name: "dependency_analyzer".to_string(),
            prompt_name: "dependencies".to_string(),
            invalidation_patterns: vec![
                "cargo.toml".to_string(),
                "cargo.lock".to_string(),
                "package.json".to_string(),
                "go.mod".to_string(),
                "go.sum".to_string(),
                "requirements.txt".to_string(),
            ],
            tools: vec!["read_file".to_string(), "search_files".to_string()],
        },
        AgentDefinition {
            name: "data_flow_analyzer".to_string(),
            prompt_name: "data_flow".to_string(),
            invalidation_patterns: vec!["*.rs".to_string(), "*.go".to_string(), "*.py".to_string(), "*.ts".to_string(), "*.js".to_string()],
            tools: vec!["read_file".to_string(), "search_files".to_string()],
        },
        AgentDefinition {
            name: "request_flow_analyzer".to_string(),
            prompt_name: "request_flow".to_string(),
            invalidation_patterns: vec!["*handler*".to_string(), "*controller*".to_string(), "*route*".to_string()],
            tools: vec!["read_file".to_string(), "search_files".to_string()],
        },
        AgentDefinition {
            name: "api_analyzer".to_string(),
            prompt_name: "api".to_string(),
            invalidation_patterns: vec!["*handler*".to_string(), "*controller*".to_string(), "*route*".to_string(), "*api*".to_string()],
            tools: vec!["read_file".to_string(), "search_files".to_string()],
        },
    ]
}

pub fn default_analysis_cache_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".ai").join("analysis_cache.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(hash: &str) -> FileFingerprint {
        FileFingerprint { hash: hash.to_string(), modified: Utc::now(), size: 10 }
    }

    #[test]
    fn first_run_marks_every_file_new_and_every_agent_to_run() {
        let cache = AnalysisCache::default();
        let mut current = HashMap::new();
        current.insert("main.go".to_string(), fp("abc"));
        let agents = default_agent_definitions();

        let report = detect_changes(&cache, &current, &agents);
        assert!(report.first_run);
        assert_eq!(report.new_files, vec!["main.go".to_string()]);
        assert_eq!(report.agents_to_run.len(), agents.len());
        assert!(report.agents_to_skip.is_empty());
    }

    #[test]
    fn new_file_not_matching_a_pattern_skips_that_agent() {
        let mut cache = AnalysisCache::default();
        cache.last_analysis = Utc::now();
        cache.files.insert("main.go".to_string(), fp("abc"));
        cache.agents.insert("dependency_analyzer".to_string(), AgentRunStatus { last_run: Utc::now(), success: true });
        cache.agents.insert("structure_analyzer".to_string(), AgentRunStatus { last_run: Utc::now(), success: true });
        cache.agents.insert("data_flow_analyzer".to_string(), AgentRunStatus { last_run: Utc::now(), success: true });
        cache.agents.insert("request_flow_analyzer".to_string(), AgentRunStatus { last_run: Utc::now(), success: true });
        cache.agents.insert("api_analyzer".to_string(), AgentRunStatus { last_run: Utc::now(), success: true });

        let mut current = HashMap::new();
        current.insert("main.go".to_string(), fp("abc"));
        current.insert("utils.go".to_string(), fp("def"));

        let agents = default_agent_definitions();
        let report = detect_changes(&cache, &current, &agents);

        assert_eq!(report.new_files, vec!["utils.go".to_string()]);
        assert!(report.agents_to_skip.contains(&"dependency_analyzer".to_string()));
        assert!(report.agents_to_run.contains(&"structure_analyzer".to_string()));
    }

    #[test]
    fn no_changes_yields_empty_change_sets_and_disjoint_agent_lists() {
        let mut cache = AnalysisCache::default();
        cache.last_analysis = Utc::now();
        cache.files.insert("main.go".to_string(), fp("abc"));
        let agents = default_agent_definitions();
        for agent in &agents {
            cache.agents.insert(agent.name.clone(), AgentRunStatus { last_run: Utc::now(), success: true });
        }

        let mut current = HashMap::new();
        current.insert("main.go".to_string(), fp("abc"));

        let report = detect_changes(&cache, &current, &agents);
        assert!(!report.has_changes);
        assert!(report.new_files.is_empty());
        assert!(report.modified_files.is_empty());
        assert!(report.deleted_files.is_empty());
        let run_set: HashSet<_> = report.agents_to_run.iter().collect();
        let skip_set: HashSet<_> = report.agents_to_skip.iter().collect();
        assert!(run_set.is_disjoint(&skip_set));
    }

    #[test]
    fn modified_hash_is_reported_as_modified_not_new_or_deleted() {
        let mut cache = AnalysisCache::default();
        cache.last_analysis = Utc::now();
        cache.files.insert("main.go".to_string(), fp("old"));
        let agents = default_agent_definitions();

        let mut current = HashMap::new();
        current.insert("main.go".to_string(), fp("new"));

        let report = detect_changes(&cache, &current, &agents);
        assert_eq!(report.modified_files, vec!["main.go".to_string()]);
        assert!(report.new_files.is_empty());
        assert!(report.deleted_files.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = default_analysis_cache_path(dir.path());
        let mut cache = AnalysisCache::default();
        cache.files.insert("a.rs".to_string(), fp("abc"));
        cache.last_analysis = Utc::now();
        cache.save(&path).unwrap();

        let loaded = AnalysisCache::load(&path).unwrap();
        assert_eq!(loaded.files.get("a.rs").unwrap().hash, "abc");
    }

    #[test]
    fn corrupt_cache_file_is_backed_up_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = default_analysis_cache_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not valid json").unwrap();

        let loaded = AnalysisCache::load(&path).unwrap();
        assert!(loaded.files.is_empty());
        assert!(path.with_extension("json.backup").exists());
    }
}
