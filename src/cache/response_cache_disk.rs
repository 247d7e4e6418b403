use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

use super::response_cache::{CacheStats, CachedResponse};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    entry: CachedResponse,
    checksum: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskFile {
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    stats: CacheStats,
    entries: Vec<DiskEntry>,
}

fn entry_checksum(entry: &CachedResponse) -> String {
    let bytes = serde_json::to_vec(entry).expect("cached response is always serializable");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

/// Crash-safe JSON persistence for the response cache: a single file with a
/// schema version, per-entry checksums, and atomic temp-file-then-rename
/// writes.
pub struct ResponseCacheDisk {
    path: PathBuf,
}

impl ResponseCacheDisk {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads entries and stats from disk. A missing file yields an empty
    /// result; a JSON parse failure backs the file up with a `.backup` suffix
    /// and starts fresh; a schema version mismatch starts fresh without
    /// touching the file; a per-entry checksum mismatch drops only that
    /// entry, keeping the rest.
    pub fn load(&self) -> Result<(Vec<CachedResponse>, CacheStats)> {
        if !self.path.exists() {
            return Ok((Vec::new(), CacheStats::default()));
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let parsed: DiskFile = match serde_json::from_str(&raw) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "response cache file is corrupt, backing up and starting fresh");
                let backup = self.path.with_extension("json.backup");
                let _ = std::fs::rename(&self.path, &backup);
                return Ok((Vec::new(), CacheStats::default()));
            }
        };

        if parsed.version != SCHEMA_VERSION {
            warn!(found = parsed.version, expected = SCHEMA_VERSION, "response cache schema version mismatch, starting fresh");
            return Ok((Vec::new(), CacheStats::default()));
        }

        let mut surviving = Vec::with_capacity(parsed.entries.len());
        for disk_entry in parsed.entries {
            let expected = entry_checksum(&disk_entry.entry);
            if expected != disk_entry.checksum {
                warn!(key = %disk_entry.key, "response cache entry checksum mismatch, dropping entry");
                continue;
            }
            surviving.push(disk_entry.entry);
        }

        debug!(loaded = surviving.len(), "loaded response cache from disk");
        Ok((surviving, parsed.stats))
    }

    /// Serializes `entries`/`stats` to a temp file in the same directory,
    /// fsyncs it, then renames it over the target path.
    pub fn save(&self, entries: &[CachedResponse], stats: CacheStats, created_at: DateTime<Utc>) -> Result<()> {
        let disk_entries: Vec<DiskEntry> = entries
            .iter()
            .map(|entry| DiskEntry { key: entry.key.clone(), entry: entry.clone(), checksum: entry_checksum(entry) })
            .collect();

        let file = DiskFile { version: SCHEMA_VERSION, created_at, updated_at: Utc::now(), stats, entries: disk_entries };
        let serialized = serde_json::to_vec_pretty(&file)?;

        atomic_write(&self.path, &serialized)
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(".{}.tmp", path.file_name().and_then(|n| n.to_str()).unwrap_or("cache")));
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::response_cache::RequestSummary;
    use crate::types::CompletionResponse;
    use tempfile::tempdir;

    fn sample_entry(key: &str) -> CachedResponse {
        let now = Utc::now();
        CachedResponse {
            key: key.to_string(),
            request_summary: RequestSummary { system_prompt: "s".to_string(), message_count: 1, tool_names: vec![], temperature: 0.0 },
            response: CompletionResponse { content: "hi".to_string(), ..Default::default() },
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            size_bytes: 2,
            access_count: 0,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let disk = ResponseCacheDisk::new(dir.path().join("llm_cache.json"));
        let entries = vec![sample_entry("a"), sample_entry("b")];
        disk.save(&entries, CacheStats { hits: 3, misses: 1, evictions: 0 }, Utc::now()).unwrap();

        let (loaded, stats) = disk.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(stats.hits, 3);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let disk = ResponseCacheDisk::new(dir.path().join("missing.json"));
        let (loaded, _) = disk.load().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_json_is_backed_up_and_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm_cache.json");
        std::fs::write(&path, "{ not json").unwrap();
        let disk = ResponseCacheDisk::new(&path);
        let (loaded, _) = disk.load().unwrap();
        assert!(loaded.is_empty());
        assert!(path.with_extension("json.backup").exists());
    }

    #[test]
    fn checksum_mismatch_drops_only_that_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm_cache.json");
        let disk = ResponseCacheDisk::new(&path);
        disk.save(&[sample_entry("good"), sample_entry("bad")], CacheStats::default(), Utc::now()).unwrap();

        // Corrupt the second entry's checksum in place.
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["entries"][1]["checksum"] = serde_json::json!("0000000000000000000000000000000000000000000000000000000000000000");
        std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();

        let (loaded, _) = disk.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, "good");
    }

    #[test]
    fn version_mismatch_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm_cache.json");
        let disk = ResponseCacheDisk::new(&path);
        disk.save(&[sample_entry("a")], CacheStats::default(), Utc::now()).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["version"] = serde_json::json!(999);
        std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();

        let (loaded, _) = disk.load().unwrap();
        assert!(loaded.is_empty());
    }
}
