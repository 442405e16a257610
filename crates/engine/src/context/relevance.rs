//! Relevance threshold interpolation.
//!
//! One scalar per chat, the memory balance, trades recall of long-term
//! memories against working memories. As the balance moves toward 1 the
//! long-term threshold relaxes toward the lower bound while the working
//! threshold tightens toward the upper bound, and vice versa. The two
//! thresholds slide along the same line in opposite directions, so their
//! sum is constant at `lower + upper` for every balance.
//!
//! Document memories and operator-defined custom kinds use fixed minimums
//! and ignore the balance.

use engram_config::BalanceBias;
use engram_core::{Result, validate_memory_balance};

/// Maps a memory kind's balance bias and the session's memory balance to
/// the minimum relevance a search result must meet.
#[derive(Debug, Clone, Copy)]
pub struct RelevanceThresholdPolicy {
    lower: f64,
    upper: f64,
    document_min: f64,
}

impl RelevanceThresholdPolicy {
    pub fn new(lower: f64, upper: f64, document_min: f64) -> Self {
        Self {
            lower,
            upper,
            document_min,
        }
    }

    pub fn from_config(config: &engram_config::EngineConfig) -> Self {
        Self::new(
            config.relevance_lower_bound,
            config.relevance_upper_bound,
            config.document_min_relevance,
        )
    }

    /// The threshold for a kind with the given bias at the given balance.
    ///
    /// A balance outside [0, 1] is rejected before any I/O happens.
    pub fn threshold(&self, bias: &BalanceBias, balance: f64) -> Result<f64> {
        validate_memory_balance(balance)?;
        Ok(match bias {
            BalanceBias::Persistence => (self.lower - self.upper) * balance + self.upper,
            BalanceBias::Recency => (self.upper - self.lower) * balance + self.lower,
            BalanceBias::Fixed { min } => *min,
        })
    }

    /// The fixed minimum for document memories.
    pub fn document_threshold(&self) -> f64 {
        self.document_min
    }

    /// The score at which two memories count as the same memory; used by
    /// extraction dedup.
    pub fn near_duplicate_threshold(&self) -> f64 {
        self.upper
    }
}
