//! Prefixed, TTL'd key/value cache used by the transport core, with opportunistic
//! gzip compression above a size threshold (§3 CacheEntry, §4.3 cache write).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::OrchestrationError;

/// Envelope size above which the cache writer attempts gzip compression.
pub const COMPRESS_THRESHOLD_BYTES: usize = 30 * 1024;
/// Hard ceiling on stored entry size (KV backend limit); entries exceeding this
/// even after compression are not written, and a warning is logged.
pub const MAX_ENTRY_BYTES: usize = 65 * 1024;
/// Default TTL for a `messageRequest` cache entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// The stored form of a cache entry: either raw JSON bytes or a gzip-wrapped envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheEnvelope {
    Compressed { compressed: bool, data: Vec<u8> },
    Raw(serde_json::Value),
}

struct Entry {
    envelope: CacheEnvelope,
    expires_at: SystemTime,
}

/// Computes the deterministic cache key `[namespace, provider, md5(canonical-json(request))]`.
///
/// `serde_json` with the `preserve_order` feature off would not guarantee a
/// canonical key order; this crate enables `preserve_order`, so the caller is
/// responsible for constructing `request` with keys already in a stable order
/// (callers build it via a fixed struct, so serialization order is stable).
pub fn cache_key(namespace: &str, provider: &str, request: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(request).unwrap_or_default();
    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    format!("{namespace}:{provider}:{digest:x}")
}

/// An in-process cache store. Concurrent readers/writers; writes are last-write-wins
/// per key (§5 shared resources). A persistent (file/Redis-backed) implementation
/// can satisfy the same contract by swapping storage under this same API.
#[derive(Default)]
pub struct CacheStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up `key`, decompressing transparently if the stored envelope is gzip-wrapped.
    /// Returns `Ok(None)` on a miss or expiry (expired entries are evicted on read).
    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>, OrchestrationError> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if SystemTime::now() >= entry.expires_at {
            entries.remove(key);
            return Ok(None);
        }
        let value = match &entry.envelope {
            CacheEnvelope::Raw(value) => value.clone(),
            CacheEnvelope::Compressed { data, .. } => {
                let mut decoder = GzDecoder::new(&data[..]);
                let mut decompressed = String::new();
                decoder
                    .read_to_string(&mut decompressed)
                    .map_err(|e| OrchestrationError::Wrapped {
                        reason: format!("gzip decompress failed: {e}"),
                        provider_name: String::new(),
                        model: String::new(),
                        interaction_id: String::new(),
                        source: None,
                    })?;
                serde_json::from_str(&decompressed).map_err(|e| OrchestrationError::Wrapped {
                    reason: format!("cache envelope deserialize failed: {e}"),
                    provider_name: String::new(),
                    model: String::new(),
                    interaction_id: String::new(),
                    source: None,
                })?
            }
        };
        Ok(Some(value))
    }

    /// Stores `value` under `key` with `ttl`. Serializes, and if the serialized
    /// size exceeds [`COMPRESS_THRESHOLD_BYTES`] gzips it; if the gzipped form
    /// still exceeds [`MAX_ENTRY_BYTES`], the write is skipped and
    /// `OrchestrationError::CacheOversize` is returned (warn-only: callers must
    /// not fail the request on this error, per §4.3/§7).
    pub fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), OrchestrationError> {
        let serialized = serde_json::to_vec(value).unwrap_or_default();
        let envelope = if serialized.len() > COMPRESS_THRESHOLD_BYTES {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&serialized).ok();
            let compressed = encoder.finish().unwrap_or_default();
            if compressed.len() > MAX_ENTRY_BYTES {
                return Err(OrchestrationError::CacheOversize {
                    key: key.to_string(),
                    size: compressed.len(),
                });
            }
            CacheEnvelope::Compressed {
                compressed: true,
                data: compressed,
            }
        } else {
            CacheEnvelope::Raw(value.clone())
        };

        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                envelope,
                expires_at: SystemTime::now() + ttl,
            },
        );
        Ok(())
    }

    pub fn evict(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_deterministic() {
        let req = serde_json::json!({"model": "gpt-x", "messages": []});
        let k1 = cache_key("messageRequest", "openai", &req);
        let k2 = cache_key("messageRequest", "openai", &req);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_providers_get_different_keys() {
        let req = serde_json::json!({"model": "gpt-x"});
        assert_ne!(
            cache_key("messageRequest", "openai", &req),
            cache_key("messageRequest", "anthropic", &req)
        );
    }

    #[test]
    fn round_trips_small_uncompressed_entry() {
        let store = CacheStore::new();
        let value = serde_json::json!({"answer": "hi"});
        store.set("k", &value, Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(value));
    }

    #[test]
    fn round_trips_large_compressed_entry() {
        let store = CacheStore::new();
        let big_text = "x".repeat(COMPRESS_THRESHOLD_BYTES + 1024);
        let value = serde_json::json!({"answer": big_text});
        store.set("k", &value, Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(value));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let store = CacheStore::new();
        let value = serde_json::json!({"answer": "hi"});
        store.set("k", &value, Duration::from_millis(0)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get("k").unwrap(), None);
    }
}
