//! Reciprocal Rank Fusion: score = Σ 1/(k + rank + 1), rank 0-based.
//!
//! Combines ranked lists from different retrieval methods without having to
//! normalize their scores against each other.

use std::collections::HashMap;

use serde::Serialize;

/// Default smoothing constant.
pub const DEFAULT_K: u32 = 60;

/// A document after fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub doc_num_id: u64,
    /// Summed reciprocal-rank contributions (higher = more relevant).
    pub fused_score: f64,
    /// Best 0-based rank the document had in any input list.
    pub best_rank: usize,
}

/// Fuse ranked lists of document ids.
///
/// A document absent from a list gets nothing from it. Only its first
/// occurrence in a list counts. Equal fused scores are ordered by best rank,
/// then id, so the output does not depend on the order of `lists`.
pub fn fuse(lists: &[Vec<u64>], k: u32) -> Vec<FusedResult> {
    let mut ranks: HashMap<u64, Vec<usize>> = HashMap::new();

    for list in lists {
        let mut seen = std::collections::HashSet::new();
        for (rank, id) in list.iter().enumerate() {
            if seen.insert(*id) {
                ranks.entry(*id).or_default().push(rank);
            }
        }
    }

    let mut fused: Vec<FusedResult> = ranks
        .into_iter()
        .map(|(doc_num_id, mut ranks)| {
            // Sum in a fixed order so the float result is order-independent.
            ranks.sort_unstable();
            let fused_score = ranks
                .iter()
                .map(|r| 1.0 / (k as f64 + *r as f64 + 1.0))
                .sum();
            FusedResult {
                doc_num_id,
                fused_score,
                best_rank: ranks[0],
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then(a.best_rank.cmp(&b.best_rank))
            .then(a.doc_num_id.cmp(&b.doc_num_id))
    });

    fused
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ids(results: &[FusedResult]) -> Vec<u64> {
        results.iter().map(|r| r.doc_num_id).collect()
    }

    #[test]
    fn contribution_formula() {
        let fused = fuse(&[vec![7]], 60);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn agreement_beats_single_list_hits() {
        let fused = fuse(&[vec![1, 2, 3], vec![3, 1, 4]], DEFAULT_K);
        // 1 is at ranks 0 and 1; 3 at ranks 2 and 0.
        assert_eq!(ids(&fused)[..2], [1, 3]);
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn empty_inputs() {
        assert!(fuse(&[], DEFAULT_K).is_empty());
        assert!(fuse(&[vec![], vec![]], DEFAULT_K).is_empty());
    }

    #[test]
    fn duplicates_within_a_list_count_once() {
        let fused = fuse(&[vec![5, 5, 6]], DEFAULT_K);
        assert_eq!(ids(&fused), vec![5, 6]);
        assert_eq!(fused[1].best_rank, 2);
    }

    #[test]
    fn ties_break_by_best_rank_then_id() {
        // 10 and 20 both get one rank-0 and one rank-1 contribution.
        let fused = fuse(&[vec![10, 20], vec![20, 10]], DEFAULT_K);
        assert_eq!(ids(&fused), vec![10, 20]);
    }

    fn ranked_list() -> impl Strategy<Value = Vec<u64>> {
        proptest::collection::hash_set(0u64..50, 0..20)
            .prop_map(|s| s.into_iter().collect())
    }

    proptest! {
        #[test]
        fn single_list_order_is_preserved(list in ranked_list()) {
            let fused = fuse(&[vec![], list.clone()], DEFAULT_K);
            prop_assert_eq!(ids(&fused), list);
        }

        #[test]
        fn self_fusion_preserves_order(list in ranked_list()) {
            let fused = fuse(&[list.clone(), list.clone()], DEFAULT_K);
            prop_assert_eq!(ids(&fused), list);
        }

        #[test]
        fn fusion_is_commutative(a in ranked_list(), b in ranked_list(), c in ranked_list()) {
            let one = fuse(&[a.clone(), b.clone(), c.clone()], DEFAULT_K);
            let two = fuse(&[c, a, b], DEFAULT_K);
            prop_assert_eq!(one, two);
        }

        #[test]
        fn scores_are_non_increasing(a in ranked_list(), b in ranked_list()) {
            let fused = fuse(&[a, b], DEFAULT_K);
            for pair in fused.windows(2) {
                prop_assert!(pair[0].fused_score >= pair[1].fused_score);
            }
        }
    }
}
