use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::types::FileFingerprint;

/// Directories skipped regardless of gitignore content: version-control
/// metadata, build caches, vendored dependencies, and this tool's own state
/// directory.
const DEFAULT_IGNORE_DIRS: &[&str] = &[".git", "target", "node_modules", "vendor", "dist", "build", ".ai"];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "tar", "gz", "tgz", "7z",
    "rar", "exe", "dll", "so", "dylib", "bin", "wasm", "class", "jar", "woff", "woff2", "ttf",
    "otf", "mp3", "mp4", "mov", "avi", "wav",
];

/// Hasher workers default to `min(num_cpus, 8)` per the spec's explicit hard
/// cap; this is intentionally not configurable.
fn hasher_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(8)
}

#[derive(Debug, Clone, Default)]
pub struct ScanMetrics {
    pub total_files: usize,
    pub cached_files: usize,
    pub hashed_files: usize,
}

struct WalkedFile {
    rel_path: String,
    abs_path: PathBuf,
    modified: DateTime<Utc>,
    size: u64,
}

fn is_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Phase 1: walks `repo_root`, skipping the default ignore set, gitignored
/// paths, any additional `extra_ignore_patterns`, and known-binary
/// extensions. Returns `(rel_path, mtime, size)` triples.
fn walk(repo_root: &Path, extra_ignore_patterns: &[String]) -> Result<Vec<WalkedFile>> {
    let mut builder = WalkBuilder::new(repo_root);
    builder.hidden(false).git_ignore(true).git_global(false);
    for dir in DEFAULT_IGNORE_DIRS {
        builder.filter_entry({
            let dir = dir.to_string();
            move |entry| !entry.path().components().any(|c| c.as_os_str() == dir.as_str())
        });
    }

    let extra = extra_ignore_patterns.to_vec();
    builder.filter_entry(move |entry| {
        let name = entry.file_name().to_string_lossy();
        !extra.iter().any(|pattern| name.contains(pattern.as_str()))
    });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        if !path.is_file() || is_binary(path) {
            continue;
        }
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let modified: DateTime<Utc> = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        let rel_path = path.strip_prefix(repo_root).unwrap_or(path).to_string_lossy().replace('\\', "/");

        files.push(WalkedFile { rel_path, abs_path: path.to_path_buf(), modified, size: metadata.len() });
    }

    Ok(files)
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Scans `repo_root` and returns the current fingerprint map, reusing hashes
/// from `prior` whenever a file's `(mtime, size)` is unchanged.
pub async fn scan(repo_root: &Path, prior: &HashMap<String, FileFingerprint>, extra_ignore_patterns: &[String]) -> Result<(HashMap<String, FileFingerprint>, ScanMetrics)> {
    let walked = walk(repo_root, extra_ignore_patterns)?;
    let mut metrics = ScanMetrics { total_files: walked.len(), ..Default::default() };
    let mut result = HashMap::with_capacity(walked.len());
    let mut to_hash = Vec::new();

    for file in walked {
        match prior.get(&file.rel_path) {
            Some(cached) if cached.modified == file.modified && cached.size == file.size => {
                metrics.cached_files += 1;
                result.insert(file.rel_path, cached.clone());
            }
            _ => to_hash.push(file),
        }
    }

    let semaphore = Arc::new(Semaphore::new(hasher_worker_count()));
    let mut joins = JoinSet::new();
    for file in to_hash {
        let permit = Arc::clone(&semaphore);
        joins.spawn(async move {
            let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
            let hash = hash_file(&file.abs_path).await;
            (file.rel_path, file.modified, file.size, hash)
        });
    }

    while let Some(joined) = joins.join_next().await {
        let (rel_path, modified, size, hash) = joined.map_err(|e| AnalysisError::Io(std::io::Error::other(e.to_string())))?;
        let hash = hash?;
        metrics.hashed_files += 1;
        result.insert(rel_path.clone(), FileFingerprint { hash, modified, size });
    }

    debug!(total = metrics.total_files, cached = metrics.cached_files, hashed = metrics.hashed_files, "fingerprint scan complete");
    Ok((result, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn scans_and_hashes_new_repository() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main\nfunc main(){}\n").unwrap();

        let (fingerprints, metrics) = scan(dir.path(), &HashMap::new(), &[]).await.unwrap();
        assert_eq!(metrics.total_files, 1);
        assert_eq!(metrics.hashed_files, 1);
        assert_eq!(metrics.cached_files, 0);
        assert!(fingerprints.contains_key("main.go"));
    }

    #[tokio::test]
    async fn reuses_cached_hash_when_mtime_and_size_match() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("main.go");
        std::fs::write(&file_path, "package main\nfunc main(){}\n").unwrap();

        let (first_pass, _) = scan(dir.path(), &HashMap::new(), &[]).await.unwrap();
        let (second_pass, metrics) = scan(dir.path(), &first_pass, &[]).await.unwrap();

        assert_eq!(metrics.cached_files, 1);
        assert_eq!(metrics.hashed_files, 0);
        assert_eq!(second_pass["main.go"].hash, first_pass["main.go"].hash);
    }

    #[tokio::test]
    async fn rehashes_when_size_changes() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("main.go");
        std::fs::write(&file_path, "short").unwrap();
        let (first_pass, _) = scan(dir.path(), &HashMap::new(), &[]).await.unwrap();

        // sleep to force a distinguishable mtime on filesystems with coarse resolution
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        std::fs::write(&file_path, "a longer replacement body").unwrap();
        let (second_pass, metrics) = scan(dir.path(), &first_pass, &[]).await.unwrap();

        assert_eq!(metrics.hashed_files, 1);
        assert_ne!(second_pass["main.go"].hash, first_pass["main.go"].hash);
    }

    #[tokio::test]
    async fn skips_binary_extensions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2, 3]).unwrap();
        let (fingerprints, metrics) = scan(dir.path(), &HashMap::new(), &[]).await.unwrap();
        assert_eq!(metrics.total_files, 0);
        assert!(fingerprints.is_empty());
    }

    #[tokio::test]
    async fn skips_default_ignored_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target").join("artifact.txt"), "built").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main(){}").unwrap();

        let (fingerprints, _) = scan(dir.path(), &HashMap::new(), &[]).await.unwrap();
        assert!(fingerprints.contains_key("main.rs"));
        assert!(!fingerprints.keys().any(|k| k.contains("target")));
    }
}
