pub mod analysis_cache;
pub mod response_cache;
pub mod response_cache_disk;

pub use analysis_cache::{default_agent_definitions, default_analysis_cache_path, detect_changes, AgentRunStatus, AnalysisCache, ChangeReport};
pub use response_cache::{cache_key, CacheStats, CachedResponse, RequestSummary, ResponseCache};
pub use response_cache_disk::ResponseCacheDisk;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{CompletionRequest, CompletionResponse};

/// Fronts the in-memory LRU with disk persistence: loads whatever survived
/// the last run at construction time, and can save its current contents back
/// out on demand or on a background interval.
pub struct PersistentResponseCache {
    memory: Arc<ResponseCache>,
    disk: Arc<ResponseCacheDisk>,
    created_at: chrono::DateTime<Utc>,
    saver: AsyncMutex<Option<JoinHandle<()>>>,
}

impl PersistentResponseCache {
    pub fn open(path: impl Into<std::path::PathBuf>, capacity: usize) -> Result<Self> {
        let disk = ResponseCacheDisk::new(path);
        let (entries, _stats) = disk.load()?;
        let memory = ResponseCache::new(capacity);
        memory.restore(entries);

        Ok(Self { memory: Arc::new(memory), disk: Arc::new(disk), created_at: Utc::now(), saver: AsyncMutex::new(None) })
    }

    pub fn get(&self, request: &CompletionRequest) -> Option<(String, CompletionResponse)> {
        let key = cache_key(request);
        self.memory.get(&key).map(|resp| (key, resp))
    }

    pub fn put(&self, request: &CompletionRequest, response: CompletionResponse, ttl: Duration) -> String {
        let key = cache_key(request);
        self.memory.put(key.clone(), request, response, ttl);
        key
    }

    pub fn stats(&self) -> CacheStats {
        self.memory.stats()
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let entries = self.memory.snapshot();
        debug!(entries = entries.len(), "persisting response cache to disk");
        self.disk.save(&entries, self.memory.stats(), self.created_at)
    }

    /// Starts a background task that saves every `interval`. Idempotent: a
    /// second call while a saver is already running is a no-op.
    pub async fn start_background_saver(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.saver.lock().await;
        if guard.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = this.save() {
                    warn!(error = %e, "background response cache save failed");
                }
            }
        }));
    }

    /// Stops the background saver, if running, and performs one final save.
    pub async fn stop_background_saver(&self) -> Result<()> {
        let mut guard = self.saver.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use tempfile::tempdir;

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            model: "m".to_string(),
            system_prompt: "sys".to_string(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            temperature: 0.0,
            max_tokens: 100,
        }
    }

    #[tokio::test]
    async fn survives_across_open_via_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm_cache.json");

        let cache = PersistentResponseCache::open(&path, 8).unwrap();
        let req = sample_request();
        cache.put(&req, CompletionResponse { content: "first".to_string(), ..Default::default() }, Duration::from_secs(60));
        cache.save().unwrap();

        let reopened = PersistentResponseCache::open(&path, 8).unwrap();
        let (_, resp) = reopened.get(&req).unwrap();
        assert_eq!(resp.content, "first");
    }

    #[tokio::test]
    async fn background_saver_is_idempotent_to_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm_cache.json");
        let cache = Arc::new(PersistentResponseCache::open(&path, 8).unwrap());
        cache.start_background_saver(Duration::from_secs(3600)).await;
        cache.start_background_saver(Duration::from_secs(3600)).await;
        cache.stop_background_saver().await.unwrap();
        assert!(path.exists());
    }
}
