//! Reciprocal rank fusion
//!
//! A candidate at 0-based rank `r` in a list earns `1 / (r + k)` from that
//! list. Contributions are summed across lists; lists that do not contain the
//! candidate add nothing.

use super::models::{RankedList, ScoredCandidate};
use crate::error::{ContextError, Result};
use indexmap::IndexMap;
use std::hash::Hash;

/// Fuse ranked lists, keyed by `key`.
///
/// Exact ties keep first-seen order (lists scanned in order, each by rank).
///
/// The first occurrence of each key is kept as its representative. Output is
/// sorted by fused score, descending, with a stable sort.
pub fn reciprocal_rank_fusion<T, K, F>(lists: &[Vec<T>], k: usize, key: F) -> Result<Vec<(T, f64)>>
where
    T: Clone,
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    if k == 0 {
        return Err(ContextError::InvalidInput(
            "rank fusion constant k must be positive".to_string(),
        ));
    }

    let mut fused: IndexMap<K, (T, f64)> = IndexMap::new();
    for list in lists {
        for (rank, item) in list.iter().enumerate() {
            let contribution = 1.0 / (rank + k) as f64;
            fused
                .entry(key(item))
                .and_modify(|(_, score)| *score += contribution)
                .or_insert_with(|| (item.clone(), contribution));
        }
    }

    let mut ranked: Vec<(T, f64)> = fused.into_values().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(ranked)
}

/// Fuse candidate lists by passage text; scores become the fused scores
pub fn fuse_candidates(lists: &[RankedList], k: usize) -> Result<RankedList> {
    let fused = reciprocal_rank_fusion(lists, k, |c: &ScoredCandidate| c.content.clone())?;
    Ok(fused
        .into_iter()
        .map(|(candidate, score)| ScoredCandidate {
            score: score as f32,
            ..candidate
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fuse(lists: &[Vec<String>], k: usize) -> Vec<(String, f64)> {
        reciprocal_rank_fusion(lists, k, |s: &String| s.clone()).unwrap()
    }

    fn order(fused: &[(String, f64)]) -> Vec<&str> {
        fused.iter().map(|(doc, _)| doc.as_str()).collect()
    }

    #[test]
    fn test_two_lists_with_shared_candidates() {
        let fused = fuse(&[texts(&["A", "B", "C"]), texts(&["B", "A", "D"])], 60);

        assert_eq!(fused.len(), 4);
        // A and B both collect 1/60 + 1/61; exact tie keeps first-seen order
        assert_eq!(fused[0].1, fused[1].1);
        assert_eq!(order(&fused[..2]), vec!["A", "B"]);
        assert!((fused[0].1 - (1.0 / 60.0 + 1.0 / 61.0)).abs() < 1e-12);
        // C and D each appear once at rank 2
        assert_eq!(order(&fused[2..]), vec!["C", "D"]);
        assert!((fused[2].1 - 1.0 / 62.0).abs() < 1e-12);
        assert_eq!(fused[2].1, fused[3].1);
    }

    #[test]
    fn test_identical_lists_preserve_order() {
        let list = texts(&["p", "q", "r", "s", "t"]);
        let fused = fuse(&[list.clone(), list.clone()], 60);
        assert_eq!(order(&fused), vec!["p", "q", "r", "s", "t"]);
        assert!((fused[0].1 - 2.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_list_order_does_not_change_ranking() {
        let a = texts(&["x", "y", "z"]);
        let b = texts(&["y", "w"]);
        let c = texts(&["z", "w", "v"]);

        let forward = fuse(&[a.clone(), b.clone(), c.clone()], 60);
        let backward = fuse(&[c, b, a], 60);
        assert_eq!(order(&forward), vec!["y", "z", "w", "x", "v"]);
        assert_eq!(order(&forward), order(&backward));
    }

    #[test]
    fn test_rank_within_list_matters() {
        let fused = fuse(&[texts(&["a", "b"]), texts(&["b", "c"])], 1);
        // b: 1/2 + 1/1, a: 1/1, c: 1/2
        assert_eq!(order(&fused), vec!["b", "a", "c"]);
        assert!((fused[0].1 - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_duplicates_sum_not_max() {
        let fused = fuse(&[texts(&["a"]), texts(&["a"]), texts(&["a"])], 10);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].1 - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_larger_k_flattens_top_ranks() {
        let lists = [texts(&["a", "b"])];
        let sharp = fuse(&lists, 1);
        let flat = fuse(&lists, 100);
        assert!(sharp[0].1 / sharp[1].1 > flat[0].1 / flat[1].1);
    }

    #[test]
    fn test_empty_input_and_zero_k() {
        assert!(fuse(&[], 60).is_empty());
        assert!(reciprocal_rank_fusion(&[texts(&["a"])], 0, |s: &String| s.clone()).is_err());
    }

    #[test]
    fn test_fuse_candidates_keys_by_content() {
        let first = vec![
            ScoredCandidate::new("1", "same text", 0.9),
            ScoredCandidate::new("2", "other", 0.8),
        ];
        let second = vec![ScoredCandidate::new("7", "same text", 0.4)];

        let fused = fuse_candidates(&[first, second], 60).unwrap();
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "1");
        assert!((fused[0].score - (2.0 / 60.0) as f32).abs() < 1e-6);
        assert_eq!(fused[1].content, "other");
    }
}
