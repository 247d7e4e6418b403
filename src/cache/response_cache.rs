use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{CompletionRequest, CompletionResponse, Role};

/// The request fields used to derive a cache key, retained alongside the
/// cached response so a collision (or a future change to key derivation) can
/// be detected by comparison rather than trusted blindly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub system_prompt: String,
    pub message_count: usize,
    pub tool_names: Vec<String>,
    pub temperature: f32,
}

impl From<&CompletionRequest> for RequestSummary {
    fn from(request: &CompletionRequest) -> Self {
        Self {
            system_prompt: request.system_prompt.clone(),
            message_count: request.messages.len(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            temperature: request.temperature,
        }
    }
}

/// One entry in the response cache: the derivation inputs (for validation),
/// the cached completion, its lifetime, and lightweight access bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub key: String,
    pub request_summary: RequestSummary,
    pub response: CompletionResponse,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size_bytes: usize,
    pub access_count: u64,
}

impl CachedResponse {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Canonical encoding of a `CompletionRequest` for cache-key derivation.
/// Deliberately excludes `model` and `max_tokens`: neither changes what the
/// assistant is being asked to produce, only how long an answer it may give.
/// Tool-call argument maps are re-keyed through a `BTreeMap` so hashing never
/// depends on `HashMap`'s randomized iteration order.
#[derive(Serialize)]
struct CanonicalMessage<'a> {
    role: Role,
    content: &'a str,
    tool_call_id: Option<&'a str>,
    tool_calls: Vec<CanonicalToolCall<'a>>,
}

#[derive(Serialize)]
struct CanonicalToolCall<'a> {
    id: &'a str,
    name: &'a str,
    arguments: BTreeMap<&'a String, &'a serde_json::Value>,
}

#[derive(Serialize)]
struct CanonicalTool<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    system_prompt: &'a str,
    messages: Vec<CanonicalMessage<'a>>,
    tools: Vec<CanonicalTool<'a>>,
    temperature: f32,
}

/// SHA-256 over the canonical encoding of `request`. Branches of a
/// conversation that differ by assistant tool-call output never collide,
/// since those outputs are part of the message stream being hashed.
pub fn cache_key(request: &CompletionRequest) -> String {
    let canonical = CanonicalRequest {
        system_prompt: &request.system_prompt,
        messages: request
            .messages
            .iter()
            .map(|m| CanonicalMessage {
                role: m.role,
                content: &m.content,
                tool_call_id: m.tool_call_id.as_deref(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|tc| CanonicalToolCall { id: &tc.id, name: &tc.name, arguments: tc.arguments.iter().collect() })
                    .collect(),
            })
            .collect(),
        tools: request
            .tools
            .iter()
            .map(|t| CanonicalTool { name: &t.name, description: &t.description, parameters: &t.parameters })
            .collect(),
        temperature: request.temperature,
    };

    let bytes = serde_json::to_vec(&canonical).expect("canonical request is always serializable");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// In-memory LRU cache of completions, bounded by entry count (not bytes).
/// Expired entries are treated as misses and purged lazily on access.
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CachedResponse>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<CompletionResponse> {
        let now = Utc::now();
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let expired = guard.peek(key).map(|e| e.is_expired(now)).unwrap_or(false);
        if expired {
            guard.pop(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match guard.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.response.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or refreshes `key`. An update to an existing key refreshes its
    /// LRU position without changing the tracked size; inserting a brand-new
    /// key at capacity evicts the current least-recently-used entry.
    pub fn put(&self, key: String, request: &CompletionRequest, response: CompletionResponse, ttl: Duration) {
        let now = Utc::now();
        let size_bytes = serde_json::to_vec(&response).map(|v| v.len()).unwrap_or(0);
        let entry = CachedResponse {
            key: key.clone(),
            request_summary: RequestSummary::from(request),
            response,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0)),
            size_bytes,
            access_count: 0,
        };

        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let will_evict = !guard.contains(&key) && guard.len() == guard.cap().get();
        guard.put(key, entry);
        if will_evict {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy of every live entry, for disk persistence.
    pub fn snapshot(&self) -> Vec<CachedResponse> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).iter().map(|(_, v)| v.clone()).collect()
    }

    /// Loads a snapshot back in, most-recently-used last (i.e. in the order
    /// given), without going through `put`'s stats bookkeeping.
    pub fn restore(&self, entries: Vec<CachedResponse>) {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries {
            guard.put(entry.key.clone(), entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, ToolDefinition};
    use serde_json::json;

    fn request(max_tokens: u32) -> CompletionRequest {
        CompletionRequest {
            model: "m".to_string(),
            system_prompt: "be helpful".to_string(),
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition { name: "read_file".to_string(), description: "d".to_string(), parameters: json!({"type":"object"}) }],
            temperature: 0.0,
            max_tokens,
        }
    }

    #[test]
    fn cache_key_ignores_max_tokens() {
        let k1 = cache_key(&request(256));
        let k2 = cache_key(&request(4096));
        assert_eq!(k1, k2);
    }

    #[test]
    fn cache_key_varies_with_messages() {
        let mut a = request(100);
        let mut b = request(100);
        b.messages.push(Message::user("more"));
        a.messages.push(Message::user("different"));
        assert_ne!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn put_then_get_returns_value() {
        let cache = ResponseCache::new(4);
        let req = request(100);
        let key = cache_key(&req);
        cache.put(key.clone(), &req, CompletionResponse { content: "hello".to_string(), ..Default::default() }, Duration::from_secs(60));
        let got = cache.get(&key).unwrap();
        assert_eq!(got.content, "hello");
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_is_recorded() {
        let cache = ResponseCache::new(4);
        assert!(cache.get("nope").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_purged() {
        let cache = ResponseCache::new(4);
        let req = request(100);
        let key = cache_key(&req);
        cache.put(key.clone(), &req, CompletionResponse::default(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let cache = ResponseCache::new(2);
        let req_a = { let mut r = request(100); r.messages[0].content = "a".to_string(); r };
        let req_b = { let mut r = request(100); r.messages[0].content = "b".to_string(); r };
        let req_c = { let mut r = request(100); r.messages[0].content = "c".to_string(); r };
        let (ka, kb, kc) = (cache_key(&req_a), cache_key(&req_b), cache_key(&req_c));

        cache.put(ka.clone(), &req_a, CompletionResponse::default(), Duration::from_secs(60));
        cache.put(kb.clone(), &req_b, CompletionResponse::default(), Duration::from_secs(60));
        // touch `a` so `b` becomes the least-recently-used entry.
        cache.get(&ka);
        cache.put(kc.clone(), &req_c, CompletionResponse::default(), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&kb).is_none());
        assert!(cache.get(&ka).is_some());
        assert!(cache.get(&kc).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn updating_existing_key_does_not_count_as_eviction() {
        let cache = ResponseCache::new(1);
        let req = request(100);
        let key = cache_key(&req);
        cache.put(key.clone(), &req, CompletionResponse { content: "v1".to_string(), ..Default::default() }, Duration::from_secs(60));
        cache.put(key.clone(), &req, CompletionResponse { content: "v2".to_string(), ..Default::default() }, Duration::from_secs(60));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&key).unwrap().content, "v2");
    }
}
