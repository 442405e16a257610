//! Token budget bookkeeping for one assembly pass.
//!
//! The request budget is the model's token window minus everything that is
//! spoken for before the first block is placed: provider framing, the
//! response reservation, and the tool-call reservation. Each stage then
//! consumes what it actually placed, and downstream stages receive either
//! the remainder or a configured fraction of it.

use engram_config::EngineConfig;

/// Running budget for one prompt assembly. Consumption never overdraws;
/// a stage that would overflow truncates or skips instead.
#[derive(Debug, Clone)]
pub struct BudgetLedger {
    max_request: usize,
    consumed: usize,
}

impl BudgetLedger {
    pub fn from_config(config: &EngineConfig) -> Self {
        let reserved = config.framing_token_overhead
            + config.response_token_reservation
            + config.tool_call_token_reservation;
        Self {
            max_request: config.completion_token_limit.saturating_sub(reserved),
            consumed: 0,
        }
    }

    /// The budget available to the whole request before any block is placed.
    pub fn max_request_budget(&self) -> usize {
        self.max_request
    }

    /// Tokens still available.
    pub fn remaining(&self) -> usize {
        self.max_request.saturating_sub(self.consumed)
    }

    /// Tokens consumed so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Record tokens a stage placed into the assembly.
    pub fn consume(&mut self, tokens: usize) {
        self.consumed += tokens;
    }

    /// A weighted slice of the remaining budget for a downstream stage.
    ///
    /// Weights are configuration; keeping their sum at or below 1 is the
    /// operator's responsibility and is not enforced here.
    pub fn slice(&self, weight: f64) -> usize {
        (self.remaining() as f64 * weight).floor() as usize
    }

    /// Whether a block of the given size still fits.
    pub fn fits(&self, tokens: usize) -> bool {
        tokens <= self.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.completion_token_limit = 4096;
        config.framing_token_overhead = 16;
        config.response_token_reservation = 1024;
        config.tool_call_token_reservation = 512;
        config
    }

    #[test]
    fn max_request_subtracts_reservations() {
        let ledger = BudgetLedger::from_config(&config());
        assert_eq!(ledger.max_request_budget(), 4096 - 16 - 1024 - 512);
    }

    #[test]
    fn consumption_reduces_remaining() {
        let mut ledger = BudgetLedger::from_config(&config());
        let start = ledger.remaining();
        ledger.consume(100);
        assert_eq!(ledger.remaining(), start - 100);
        assert_eq!(ledger.consumed(), 100);
    }

    #[test]
    fn remaining_never_goes_negative() {
        let mut ledger = BudgetLedger::from_config(&config());
        ledger.consume(1_000_000);
        assert_eq!(ledger.remaining(), 0);
        assert!(!ledger.fits(1));
        assert!(ledger.fits(0));
    }

    #[test]
    fn slice_takes_fraction_of_remaining() {
        let mut ledger = BudgetLedger::from_config(&config());
        ledger.consume(ledger.max_request_budget() - 100);
        assert_eq!(ledger.slice(0.5), 50);
        assert_eq!(ledger.slice(0.0), 0);
        assert_eq!(ledger.slice(1.0), 100);
    }

    #[test]
    fn window_smaller_than_reservations_yields_zero() {
        let mut config = config();
        config.completion_token_limit = 100;
        let ledger = BudgetLedger::from_config(&config);
        assert_eq!(ledger.max_request_budget(), 0);
        assert_eq!(ledger.remaining(), 0);
    }
}
