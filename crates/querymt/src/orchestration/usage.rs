//! Token-usage accounting: triples, cache-impact and differential formulas.
//!
//! These formulas are frozen per spec — do not "fix" the cache-impact or
//! differential math even if a vendor's reported totals look partial; several
//! adapters report partial sums and the intent is implementation-defined
//! upstream of this core.

use serde::{Deserialize, Serialize};

/// A single usage snapshot. Absent fields default to 0.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub thought_tokens: u64,
    pub total_tokens: u64,
    pub total_all_tokens: u64,
}

impl TokenUsage {
    pub fn new(
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_input_tokens: u64,
        cache_read_input_tokens: u64,
        thought_tokens: u64,
    ) -> Self {
        let total_tokens = input_tokens + output_tokens;
        let total_all_tokens = total_tokens
            + cache_creation_input_tokens
            + cache_read_input_tokens
            + thought_tokens;
        Self {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens,
            cache_read_input_tokens,
            thought_tokens,
            total_tokens,
            total_all_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
        self.thought_tokens += other.thought_tokens;
        self.total_tokens += other.total_tokens;
        self.total_all_tokens += other.total_all_tokens;
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// The `{turn, statement, interaction}` triple tracked on an `Interaction`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsageTriple {
    pub turn: TokenUsage,
    pub statement: TokenUsage,
    pub interaction: TokenUsage,
}

/// Cache-impact accounting (see §4.1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheImpact {
    pub potential_cost: u64,
    pub actual_cost: u64,
    pub savings_total: u64,
    pub savings_percentage: f64,
}

impl CacheImpact {
    pub fn compute(usage: &TokenUsage) -> Self {
        let potential_cost = usage.input_tokens
            + usage.output_tokens
            + usage.cache_read_input_tokens
            + usage.cache_creation_input_tokens;
        let actual_cost = usage.cache_read_input_tokens + usage.cache_creation_input_tokens;
        let savings_total = potential_cost.saturating_sub(actual_cost);
        let savings_percentage = if potential_cost == 0 {
            0.0
        } else {
            100.0 * savings_total as f64 / potential_cost as f64
        };
        Self {
            potential_cost,
            actual_cost,
            savings_total,
            savings_percentage,
        }
    }
}

/// Differential usage: how much *new* input/output this message contributed,
/// relative to the previous assistant message's input tokens.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DifferentialUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl DifferentialUsage {
    /// `role` is the role of the message this usage snapshot belongs to.
    pub fn compute(
        role: super::message::Role,
        usage: &TokenUsage,
        previous_assistant_input_tokens: u64,
    ) -> Self {
        use super::message::Role;
        match role {
            Role::Assistant => DifferentialUsage {
                input_tokens: 0,
                output_tokens: usage.output_tokens,
            },
            Role::User => DifferentialUsage {
                input_tokens: usage
                    .input_tokens
                    .saturating_sub(previous_assistant_input_tokens),
                output_tokens: 0,
            },
        }
    }
}
