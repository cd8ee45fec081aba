//! Token budget for the conversation memory buffer
//!
//! Three limits govern one trimming call:
//! - Buffer limit: tokens the retained turns plus summary may occupy
//! - Summarizer ceiling: largest rendered summarization prompt sent in one call
//! - Depth cap: how many nested summarization levels are allowed before the
//!   oldest turns are dropped without being summarized

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBudget {
    /// Upper bound for the rendered memory buffer
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,

    /// Upper bound for a single rendered summarization prompt
    #[serde(default = "default_summarizer_limit")]
    pub summarizer_limit: usize,

    /// Maximum nested summarization levels
    #[serde(default = "default_max_depth")]
    pub max_summary_depth: usize,

    /// Smallest completion allowance granted to a summary call
    #[serde(default = "default_min_summary_tokens")]
    pub min_summary_tokens: usize,
}

fn default_buffer_limit() -> usize { 3000 }
fn default_summarizer_limit() -> usize { 3000 }
fn default_max_depth() -> usize { 3 }
fn default_min_summary_tokens() -> usize { 64 }

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            buffer_limit: default_buffer_limit(),
            summarizer_limit: default_summarizer_limit(),
            max_summary_depth: default_max_depth(),
            min_summary_tokens: default_min_summary_tokens(),
        }
    }
}

impl MemoryBudget {
    pub fn new(buffer_limit: usize, summarizer_limit: usize) -> Self {
        Self {
            buffer_limit,
            summarizer_limit,
            ..Self::default()
        }
    }

    /// Validate that the budget configuration is usable
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.buffer_limit == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "buffer_limit must be greater than zero".to_string(),
            ));
        }
        if self.summarizer_limit == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "summarizer_limit must be greater than zero".to_string(),
            ));
        }
        if self.max_summary_depth == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "max_summary_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Completion allowance left for a summary once `used` tokens are spent.
    ///
    /// Never drops below `min_summary_tokens`, so the merged buffer may exceed
    /// `limit` by that allowance plus the template wrapper of the summary turn
    /// (the count of an empty assistant turn).
    pub fn summary_allowance(&self, limit: usize, used: usize) -> usize {
        limit.saturating_sub(used).max(self.min_summary_tokens)
    }
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Budget exceeded: {used} tokens used, {max} tokens allowed")]
    BudgetExceeded { used: usize, max: usize },

    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_is_valid() {
        let budget = MemoryBudget::default();
        assert!(budget.validate().is_ok());
        assert_eq!(budget.buffer_limit, 3000);
        assert_eq!(budget.summarizer_limit, 3000);
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        assert!(MemoryBudget::new(0, 100).validate().is_err());
        assert!(MemoryBudget::new(100, 0).validate().is_err());

        let budget = MemoryBudget {
            max_summary_depth: 0,
            ..MemoryBudget::default()
        };
        assert!(budget.validate().is_err());
    }

    #[test]
    fn test_summary_allowance() {
        let budget = MemoryBudget::default();
        assert_eq!(budget.summary_allowance(3000, 1000), 2000);
        assert_eq!(budget.summary_allowance(3000, 2990), 64);
        assert_eq!(budget.summary_allowance(3000, 5000), 64);
    }
}
