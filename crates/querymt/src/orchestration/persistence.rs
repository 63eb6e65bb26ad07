//! `PersistenceSink` (§2, §6): an interface-only collaborator for append-only
//! token-usage records, system-prompt dumps, and interaction snapshots. The core
//! does not implement storage; it only defines the contract and a minimal
//! in-memory implementation useful for tests and as a default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Role;
use super::usage::{CacheImpact, DifferentialUsage, TokenUsage};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawUsageRecord {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub thought_tokens: u64,
    pub total_tokens: u64,
    pub total_all_tokens: u64,
}

impl From<TokenUsage> for RawUsageRecord {
    fn from(u: TokenUsage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_creation_input_tokens: u.cache_creation_input_tokens,
            cache_read_input_tokens: u.cache_read_input_tokens,
            thought_tokens: u.thought_tokens,
            total_tokens: u.total_tokens,
            total_all_tokens: u.total_all_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DifferentialUsageRecord {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl From<DifferentialUsage> for DifferentialUsageRecord {
    fn from(d: DifferentialUsage) -> Self {
        Self {
            input_tokens: d.input_tokens,
            output_tokens: d.output_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheImpactRecord {
    pub potential_cost: u64,
    pub actual_cost: u64,
    pub savings_total: u64,
    pub savings_percentage: f64,
}

impl From<CacheImpact> for CacheImpactRecord {
    fn from(c: CacheImpact) -> Self {
        Self {
            potential_cost: c.potential_cost,
            actual_cost: c.actual_cost,
            savings_total: c.savings_total,
            savings_percentage: c.savings_percentage,
        }
    }
}

/// The persisted, append-only token-usage record (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub interaction_id: String,
    pub message_id: String,
    pub statement_count: u64,
    pub statement_turn_count: u64,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub role: Role,
    pub raw_usage: RawUsageRecord,
    pub differential_usage: DifferentialUsageRecord,
    pub cache_impact: CacheImpactRecord,
}

/// Append-only sink for token-usage records, system-prompt dumps, and interaction
/// snapshots. Persistence-write failures are logged and swallowed by callers —
/// they must never mask a successful LLM response (§7).
pub trait PersistenceSink: Send + Sync {
    fn append_token_usage(&self, record: &TokenUsageRecord) -> Result<(), String>;
    fn dump_system_prompt(&self, interaction_id: &str, system: &[String]) -> Result<(), String>;
    fn snapshot_interaction(&self, interaction_id: &str, snapshot: &serde_json::Value) -> Result<(), String>;
}

/// Reference implementation backed by an in-process vector. Useful for tests and
/// as a default when no external sink (e.g. a database-backed one) is wired up.
#[derive(Default)]
pub struct InMemoryPersistenceSink {
    usage_records: parking_lot::Mutex<Vec<TokenUsageRecord>>,
}

impl InMemoryPersistenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage_records(&self) -> Vec<TokenUsageRecord> {
        self.usage_records.lock().clone()
    }
}

impl PersistenceSink for InMemoryPersistenceSink {
    fn append_token_usage(&self, record: &TokenUsageRecord) -> Result<(), String> {
        self.usage_records.lock().push(record.clone());
        Ok(())
    }

    fn dump_system_prompt(&self, _interaction_id: &str, _system: &[String]) -> Result<(), String> {
        Ok(())
    }

    fn snapshot_interaction(&self, _interaction_id: &str, _snapshot: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
}
