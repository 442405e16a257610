//! Token estimation.
//!
//! Uses a character-based heuristic: ~4 characters per token, rounded up.
//! This approximation is accurate within ~10% for BPE tokenizers on
//! English text, and more importantly it is deterministic, which keeps
//! every budgeting decision reproducible in tests.

use engram_core::provider::{PromptBlock, PromptRole};

/// Fixed per-message overhead for delimiters and formatting markers in the
/// provider wire format.
pub const MESSAGE_FRAMING_OVERHEAD: usize = 4;

/// Deterministic token counter shared by every budgeting stage.
///
/// All budget arithmetic in the engine goes through this one counter, on
/// rendered block text, so the numbers that gate a stage are the numbers
/// the prompt actually costs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    /// Estimate the token count for a string. 1 token ≈ 4 characters,
    /// rounded up.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() + 3) / 4
    }

    /// Estimate tokens for a role-tagged message, including the role name
    /// and framing overhead.
    pub fn count_role(&self, role: PromptRole, text: &str) -> usize {
        MESSAGE_FRAMING_OVERHEAD + self.count(role.as_str()) + self.count(text)
    }

    /// Estimate tokens for an ordered block list.
    pub fn count_blocks(&self, blocks: &[PromptBlock]) -> usize {
        blocks
            .iter()
            .map(|b| self.count_role(b.role, &b.content))
            .sum()
    }

    /// Cut text down so its estimated token count fits the budget.
    ///
    /// Keeps the head of the string, cutting on a character boundary.
    /// Returns the input unchanged when it already fits.
    pub fn truncate_to_fit(&self, text: &str, budget: usize) -> String {
        if self.count(text) <= budget {
            return text.to_string();
        }
        let max_bytes = budget.saturating_mul(4);
        let mut end = max_bytes.min(text.len());
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_costs_nothing() {
        assert_eq!(TokenCounter::new().count(""), 0);
    }

    #[test]
    fn four_chars_per_token_rounding_up() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count("test"), 1);
        assert_eq!(counter.count("hello"), 2);
        assert_eq!(counter.count(&"a".repeat(100)), 25);
    }

    #[test]
    fn role_variant_adds_framing() {
        let counter = TokenCounter::new();
        // "user" is 1 token, "test" is 1 token, plus 4 overhead.
        assert_eq!(counter.count_role(PromptRole::User, "test"), 6);
        // Role-tagged is always strictly more than the bare count.
        assert!(counter.count_role(PromptRole::System, "x") > counter.count("x"));
    }

    #[test]
    fn counting_is_stable() {
        let counter = TokenCounter::new();
        let text = "the same text every time";
        assert_eq!(counter.count(text), counter.count(text));
        assert_eq!(
            counter.count_role(PromptRole::System, text),
            counter.count_role(PromptRole::System, text)
        );
    }

    #[test]
    fn block_list_sums_roles() {
        let counter = TokenCounter::new();
        let blocks = vec![PromptBlock::system("persona"), PromptBlock::user("hi")];
        let expected = counter.count_role(PromptRole::System, "persona")
            + counter.count_role(PromptRole::User, "hi");
        assert_eq!(counter.count_blocks(&blocks), expected);
    }

    #[test]
    fn truncate_respects_budget() {
        let counter = TokenCounter::new();
        let text = "a".repeat(100);
        let cut = counter.truncate_to_fit(&text, 10);
        assert!(counter.count(&cut) <= 10);
        assert_eq!(cut.len(), 40);
    }

    #[test]
    fn truncate_keeps_fitting_text() {
        let counter = TokenCounter::new();
        assert_eq!(counter.truncate_to_fit("short", 100), "short");
    }

    #[test]
    fn truncate_lands_on_char_boundary() {
        let counter = TokenCounter::new();
        let text = "éééééééééé"; // 2 bytes per char
        let cut = counter.truncate_to_fit(text, 2);
        assert!(cut.len() <= 8);
        assert!(text.starts_with(&cut));
    }
}
