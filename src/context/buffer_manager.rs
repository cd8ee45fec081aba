//! Conversation memory buffer with trim-then-summarize
//!
//! When the rendered history exceeds the buffer limit, the manager keeps the
//! longest tail of turns that fits and replaces everything older with a single
//! assistant turn holding a summary. Summaries of long prefixes are built
//! bottom-up: the prefix is split on its rendered summarization prompt and its
//! older part summarized first, so no call's prompt exceeds the summarizer
//! ceiling unless a single turn alone does.

use super::models::{Conversation, Turn};
use super::summarizer::{Summarizer, SummarizerError};
use super::token_budget::MemoryBudget;
use super::token_counter::TokenCounter;
use crate::error::Result;
use crate::metrics::METRICS;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the discarded prefix was handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummaryOutcome {
    /// Nothing was discarded
    NotNeeded,
    /// The discarded prefix was replaced by a summary turn
    Summarized,
    /// Summarization failed; the buffer holds only the retained tail
    Failed(String),
}

/// Result of one trimming call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimmedBuffer {
    /// New buffer: optional summary turn followed by the retained tail
    pub turns: Vec<Turn>,
    /// Number of leading turns of the input that were cut
    pub discarded: usize,
    /// Token count of `turns`
    pub token_count: usize,
    pub summary: SummaryOutcome,
}

impl TrimmedBuffer {
    pub fn is_within(&self, limit: usize) -> bool {
        self.token_count <= limit
    }

    /// The retained tail, without the summary turn
    pub fn retained(&self) -> &[Turn] {
        match self.summary {
            SummaryOutcome::Summarized => &self.turns[1..],
            _ => &self.turns,
        }
    }
}

/// Conversation buffer manager
pub struct ConversationBufferManager {
    counter: Arc<dyn TokenCounter>,
    summarizer: Arc<dyn Summarizer>,
    budget: MemoryBudget,
}

impl ConversationBufferManager {
    /// Create a new buffer manager
    pub fn new(
        counter: Arc<dyn TokenCounter>,
        summarizer: Arc<dyn Summarizer>,
        budget: MemoryBudget,
    ) -> Result<Self> {
        budget.validate()?;
        Ok(Self {
            counter,
            summarizer,
            budget,
        })
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn count(&self, turns: &[Turn]) -> usize {
        self.counter.count(turns)
    }

    /// Smallest cut index whose tail `turns[cut..]` fits in `limit`.
    ///
    /// Bisects between "everything" and "last turn only", recounting the tail
    /// at each step. The last turn is always kept, so the returned tail can
    /// exceed `limit` when that turn alone does. Returns the cut index and the
    /// tail's token count.
    pub fn find_cut(&self, turns: &[Turn], limit: usize) -> (usize, usize) {
        let total = self.count(turns);
        if turns.len() <= 1 || total <= limit {
            return (0, total);
        }

        let mut lo = 0;
        let mut hi = turns.len() - 1;
        let mut hi_tokens = self.count(&turns[hi..]);

        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            let tokens = self.count(&turns[mid..]);
            debug!("Trim step: cut={}, tail_tokens={}, limit={}", mid, tokens, limit);
            if tokens <= limit {
                hi = mid;
                hi_tokens = tokens;
            } else {
                lo = mid;
            }
        }

        (hi, hi_tokens)
    }

    /// Trim a conversation to the buffer limit
    pub async fn trim_conversation(&self, conversation: &Conversation) -> TrimmedBuffer {
        self.trim(conversation.turns()).await
    }

    /// Trim `history` to the buffer limit, summarizing what is cut.
    ///
    /// Input turns are never modified; the retained tail is a literal copy of
    /// the newest turns. A summarization failure is not retried: the buffer
    /// then holds only the retained tail.
    pub async fn trim(&self, history: &[Turn]) -> TrimmedBuffer {
        let limit = self.budget.buffer_limit;
        let total = self.count(history);

        if total <= limit {
            return TrimmedBuffer {
                turns: history.to_vec(),
                discarded: 0,
                token_count: total,
                summary: SummaryOutcome::NotNeeded,
            };
        }

        let (cut, tail_tokens) = self.find_cut(history, limit);
        if cut == 0 {
            warn!(
                "Single turn exceeds buffer limit: {} > {}, keeping it as-is",
                total, limit
            );
            return TrimmedBuffer {
                turns: history.to_vec(),
                discarded: 0,
                token_count: total,
                summary: SummaryOutcome::NotNeeded,
            };
        }

        METRICS.record_buffer_trim(cut);
        info!(
            "Trimming conversation: {} turns, {} tokens -> keeping last {} turns ({} tokens)",
            history.len(),
            total,
            history.len() - cut,
            tail_tokens
        );

        let retained = &history[cut..];
        let allowance = self.budget.summary_allowance(limit, tail_tokens);

        match self.summarize_bounded(&history[..cut], allowance, 1).await {
            Ok(summary) => {
                METRICS.record_summarization(true);
                let mut turns = Vec::with_capacity(retained.len() + 1);
                turns.push(Turn::assistant(summary));
                turns.extend_from_slice(retained);
                let token_count = self.count(&turns);
                debug!("Merged buffer: {} turns, {} tokens", turns.len(), token_count);

                TrimmedBuffer {
                    turns,
                    discarded: cut,
                    token_count,
                    summary: SummaryOutcome::Summarized,
                }
            }
            Err(e) => {
                METRICS.record_summarization(false);
                warn!("Summarization failed, returning trimmed buffer without summary: {}", e);
                TrimmedBuffer {
                    turns: retained.to_vec(),
                    discarded: cut,
                    token_count: tail_tokens,
                    summary: SummaryOutcome::Failed(e.to_string()),
                }
            }
        }
    }

    /// Summarize `turns` so that every call's rendered prompt fits the
    /// summarizer ceiling.
    ///
    /// If the prompt is too large, the turns are split so that the tail's
    /// prompt, plus a summary turn of half the free room, fits the ceiling.
    /// The older part is summarized one level deeper with that half as its
    /// allowance. The summary is prepended to the tail and the merged turns
    /// go through the same check again. At the depth cap the older part is
    /// dropped instead. A lone turn whose prompt exceeds the ceiling is sent
    /// as-is, since it cannot be split.
    fn summarize_bounded<'a>(
        &'a self,
        turns: &'a [Turn],
        max_tokens: usize,
        depth: usize,
    ) -> BoxFuture<'a, std::result::Result<String, SummarizerError>> {
        async move {
            let ceiling = self.budget.summarizer_limit;
            let prompt_tokens = self.prompt_tokens(turns, max_tokens)?;

            if prompt_tokens <= ceiling || turns.len() < 2 {
                if prompt_tokens > ceiling {
                    warn!(
                        "Single turn summary prompt exceeds ceiling: {} > {}",
                        prompt_tokens, ceiling
                    );
                }
                METRICS.record_summary_depth(depth);
                debug!(
                    "Summarizing {} turns directly at depth {} ({} prompt tokens)",
                    turns.len(),
                    depth,
                    prompt_tokens
                );
                return self.summarizer.summarize(turns, max_tokens).await;
            }

            if depth >= self.budget.max_summary_depth {
                let cut = self.split_for_prompt(turns, max_tokens, ceiling, false)?;
                warn!(
                    "Summary depth cap {} reached, dropping {} oldest turns unsummarized",
                    self.budget.max_summary_depth, cut
                );
                METRICS.record_summary_depth(depth);
                return self.summarizer.summarize(&turns[cut..], max_tokens).await;
            }

            let reserved = self.prompt_tokens(&[Turn::assistant("")], max_tokens)?;
            let older_allowance = (ceiling.saturating_sub(reserved) / 2).max(1);
            let tail_limit = ceiling.saturating_sub(older_allowance);
            let cut = self.split_for_prompt(turns, max_tokens, tail_limit, true)?;
            debug!(
                "Splitting {} turns at {} (depth {}, older allowance {})",
                turns.len(),
                cut,
                depth,
                older_allowance
            );

            let older_summary = self
                .summarize_bounded(&turns[..cut], older_allowance, depth + 1)
                .await?;

            let tail = &turns[cut..];
            let mut merged = Vec::with_capacity(tail.len() + 1);
            merged.push(Turn::assistant(older_summary));
            merged.extend_from_slice(tail);

            // the summary may be longer than asked for
            self.summarize_bounded(&merged, max_tokens, depth + 1).await
        }
        .boxed()
    }

    /// Token count of the rendered summarization prompt for `turns`
    fn prompt_tokens(
        &self,
        turns: &[Turn],
        max_tokens: usize,
    ) -> std::result::Result<usize, SummarizerError> {
        let prompt = self.summarizer.build_prompt(turns, max_tokens)?;
        Ok(self.count(&prompt))
    }

    /// Smallest cut in `1..len` whose tail prompt fits `limit`.
    ///
    /// With `reserve_summary`, an empty assistant turn is prepended to the tail
    /// so the summary turn's wrapper is counted too. Falls back to keeping only
    /// the last turn when nothing fits. Needs at least two turns.
    fn split_for_prompt(
        &self,
        turns: &[Turn],
        max_tokens: usize,
        limit: usize,
        reserve_summary: bool,
    ) -> std::result::Result<usize, SummarizerError> {
        let fits = |cut: usize| -> std::result::Result<bool, SummarizerError> {
            let mut candidate = Vec::with_capacity(turns.len() - cut + 1);
            if reserve_summary {
                candidate.push(Turn::assistant(""));
            }
            candidate.extend_from_slice(&turns[cut..]);
            Ok(self.prompt_tokens(&candidate, max_tokens)? <= limit)
        };

        let mut lo = 1;
        let mut hi = turns.len() - 1;
        if !fits(hi)? {
            return Ok(hi);
        }
        if fits(lo)? {
            return Ok(lo);
        }

        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if fits(mid)? {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        Ok(hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::Role;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Every turn costs `per_turn` tokens; a non-empty render adds `overhead`
    struct FlatCounter {
        per_turn: usize,
        overhead: usize,
    }

    impl TokenCounter for FlatCounter {
        fn count(&self, turns: &[Turn]) -> usize {
            if turns.is_empty() {
                0
            } else {
                turns.len() * self.per_turn + self.overhead
            }
        }
    }

    /// Prompt is the turns themselves; records the size of every call
    struct RecordingSummarizer {
        calls: Mutex<Vec<Vec<Turn>>>,
        fail: bool,
    }

    impl RecordingSummarizer {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()), fail: false }
        }

        fn failing() -> Self {
            Self { calls: Mutex::new(Vec::new()), fail: true }
        }

        fn call_sizes(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(|c| c.len()).collect()
        }
    }

    #[async_trait]
    impl Summarizer for RecordingSummarizer {
        fn build_prompt(
            &self,
            turns: &[Turn],
            _max_tokens: usize,
        ) -> std::result::Result<Vec<Turn>, SummarizerError> {
            Ok(turns.to_vec())
        }

        async fn summarize(
            &self,
            turns: &[Turn],
            _max_tokens: usize,
        ) -> std::result::Result<String, SummarizerError> {
            self.calls.lock().unwrap().push(turns.to_vec());
            if self.fail {
                return Err(SummarizerError::Template("model unavailable".to_string()));
            }
            Ok(format!("summary of {} turns", turns.len()))
        }
    }

    fn conversation(n: usize) -> Vec<Turn> {
        (1..=n)
            .map(|i| {
                if i % 2 == 1 {
                    Turn::user(format!("question {}", i))
                } else {
                    Turn::assistant(format!("answer {}", i))
                }
            })
            .collect()
    }

    fn manager(
        summarizer: Arc<RecordingSummarizer>,
        buffer_limit: usize,
        summarizer_limit: usize,
        max_depth: usize,
    ) -> ConversationBufferManager {
        let budget = MemoryBudget {
            buffer_limit,
            summarizer_limit,
            max_summary_depth: max_depth,
            min_summary_tokens: 8,
        };
        ConversationBufferManager::new(
            Arc::new(FlatCounter { per_turn: 10, overhead: 5 }),
            summarizer,
            budget,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_within_budget_is_unchanged() {
        let summarizer = Arc::new(RecordingSummarizer::new());
        let manager = manager(summarizer.clone(), 1000, 1000, 3);
        let history = conversation(6);

        let trimmed = manager.trim(&history).await;
        assert_eq!(trimmed.turns, history);
        assert_eq!(trimmed.discarded, 0);
        assert_eq!(trimmed.summary, SummaryOutcome::NotNeeded);
        assert!(summarizer.call_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_twenty_turns_keep_last_four_plus_summary() {
        let summarizer = Arc::new(RecordingSummarizer::new());
        // last 4 turns = 45 tokens, last 5 = 55
        let manager = manager(summarizer.clone(), 50, 1000, 3);
        let history = conversation(20);

        let trimmed = manager.trim(&history).await;

        assert_eq!(trimmed.turns.len(), 5);
        assert_eq!(trimmed.discarded, 16);
        assert_eq!(trimmed.summary, SummaryOutcome::Summarized);
        assert_eq!(trimmed.turns[0].role, Role::Assistant);
        assert_eq!(trimmed.turns[0].content, "summary of 16 turns");
        assert_eq!(trimmed.retained(), &history[16..]);

        let calls = summarizer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], history[..16].to_vec());
    }

    #[tokio::test]
    async fn test_retained_tail_is_contiguous_and_fits() {
        let history = conversation(13);
        for limit in [15, 25, 40, 77, 100, 135] {
            let summarizer = Arc::new(RecordingSummarizer::new());
            let manager = manager(summarizer, limit, 10_000, 3);
            let trimmed = manager.trim(&history).await;

            let retained = trimmed.retained();
            assert_eq!(retained, &history[history.len() - retained.len()..]);
            assert!(manager.count(retained) <= limit);
            // longest fitting tail: one more turn would not fit
            if trimmed.discarded > 0 {
                assert!(manager.count(&history[trimmed.discarded - 1..]) > limit);
            }
        }
    }

    #[tokio::test]
    async fn test_oversized_last_turn_terminates() {
        let summarizer = Arc::new(RecordingSummarizer::new());
        // a single turn costs 15 tokens, more than the limit
        let manager = manager(summarizer.clone(), 10, 1000, 3);
        let history = conversation(3);

        let trimmed = manager.trim(&history).await;
        assert_eq!(trimmed.discarded, 2);
        assert_eq!(trimmed.turns.len(), 2);
        assert_eq!(trimmed.retained(), &history[2..]);
    }

    #[tokio::test]
    async fn test_single_oversized_turn_is_returned_as_is() {
        let summarizer = Arc::new(RecordingSummarizer::new());
        let manager = manager(summarizer.clone(), 10, 1000, 3);
        let history = conversation(1);

        let trimmed = manager.trim(&history).await;
        assert_eq!(trimmed.turns, history);
        assert!(!trimmed.is_within(10));
        assert!(summarizer.call_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_large_prefix_is_summarized_recursively() {
        let summarizer = Arc::new(RecordingSummarizer::new());
        // summary placeholder costs 15, so half the free room (30) is left for
        // the older summary and each split keeps a 3-turn tail
        let manager = manager(summarizer.clone(), 50, 75, 10);
        let history = conversation(20);

        let trimmed = manager.trim(&history).await;
        assert_eq!(trimmed.summary, SummaryOutcome::Summarized);
        assert_eq!(trimmed.turns.len(), 5);

        // innermost 7 turns first, then each level's summary + 3 tail turns
        assert_eq!(summarizer.call_sizes(), vec![7, 4, 4, 4]);
        let calls = summarizer.calls.lock().unwrap();
        assert_eq!(calls[0], history[0..7].to_vec());
        assert_eq!(calls[1][1..], history[7..10]);
        assert_eq!(calls[3][1..], history[13..16]);
        for call in calls.iter() {
            assert!(manager.count(call) <= 75);
        }
    }

    #[tokio::test]
    async fn test_depth_cap_drops_oldest_turns() {
        let summarizer = Arc::new(RecordingSummarizer::new());
        let manager = manager(summarizer.clone(), 50, 75, 3);
        let history = conversation(20);

        let trimmed = manager.trim(&history).await;
        assert_eq!(trimmed.summary, SummaryOutcome::Summarized);

        // depth 3 keeps the 7 newest of its 10 turns; turns 1..3 are dropped
        assert_eq!(summarizer.call_sizes(), vec![7, 4, 4]);
        let calls = summarizer.calls.lock().unwrap();
        assert_eq!(calls[0], history[3..10].to_vec());
        for call in calls.iter() {
            assert!(manager.count(call) <= 75);
        }
    }

    #[tokio::test]
    async fn test_split_counts_the_summary_turn() {
        let manager = manager(Arc::new(RecordingSummarizer::new()), 50, 75, 3);
        let history = conversation(10);

        // placeholder + 3 turns = 45
        assert_eq!(manager.split_for_prompt(&history, 8, 45, true).unwrap(), 7);
        // 4 turns = 45
        assert_eq!(manager.split_for_prompt(&history, 8, 45, false).unwrap(), 6);
        // nothing fits: keep the last turn only
        assert_eq!(manager.split_for_prompt(&history, 8, 5, false).unwrap(), 9);
    }

    #[tokio::test]
    async fn test_summarization_failure_keeps_partial_buffer() {
        let summarizer = Arc::new(RecordingSummarizer::failing());
        let manager = manager(summarizer, 50, 1000, 3);
        let history = conversation(20);

        let trimmed = manager.trim(&history).await;
        assert!(matches!(trimmed.summary, SummaryOutcome::Failed(_)));
        assert_eq!(trimmed.turns, history[16..].to_vec());
        assert_eq!(trimmed.token_count, 45);
    }

    #[test]
    fn test_find_cut_on_empty_history() {
        let manager = manager(Arc::new(RecordingSummarizer::new()), 50, 50, 3);
        assert_eq!(manager.find_cut(&[], 50), (0, 0));
    }

    #[test]
    fn test_invalid_budget_is_rejected() {
        let result = ConversationBufferManager::new(
            Arc::new(FlatCounter { per_turn: 1, overhead: 0 }),
            Arc::new(RecordingSummarizer::new()),
            MemoryBudget::new(0, 10),
        );
        assert!(result.is_err());
    }
}
