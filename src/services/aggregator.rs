use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::models::activity::{ItemId, SubjectId};
use crate::models::recommendation::RecommendationMode;
use crate::services::matrix::AffinityMatrix;
use crate::services::similarity::Neighbors;

/// Recommendation set for one subject, unordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub items: BTreeSet<ItemId>,
    pub mode: RecommendationMode,
}

/// Deterministic RNG for shuffling on behalf of `key`. The seed is the
/// SHA-256 of the configured seed and the key, so it is stable across
/// platforms and toolchains.
pub fn seeded_rng(seed: u64, key: &str) -> StdRng {
    StdRng::from_seed(shuffle_seed(seed, key))
}

fn shuffle_seed(seed: u64, key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(key.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    bytes
}

/// Shuffled copy of the pool without `excluded` items.
pub fn shuffled_pool(
    pool: &[ItemId],
    excluded: &BTreeSet<ItemId>,
    rng: &mut StdRng,
) -> Vec<ItemId> {
    let mut candidates: Vec<ItemId> = pool
        .iter()
        .filter(|item| !excluded.contains(*item))
        .cloned()
        .collect();
    candidates.shuffle(rng);
    candidates
}

pub struct Aggregator {
    trigger_limit: usize,
    seed: u64,
}

impl Aggregator {
    pub fn new(trigger_limit: usize, seed: u64) -> Self {
        Aggregator {
            trigger_limit,
            seed,
        }
    }

    /// Films liked by the neighbors that the subject has not engaged with.
    pub fn candidates(
        &self,
        subject: &SubjectId,
        neighbors: &Neighbors,
        matrix: &AffinityMatrix,
    ) -> BTreeSet<ItemId> {
        let seen = matrix.seen_items(subject);
        neighbors
            .subjects
            .iter()
            .filter(|neighbor| *neighbor != subject)
            .flat_map(|neighbor| matrix.liked_items(neighbor))
            .filter(|item| !seen.contains(item))
            .collect()
    }

    /// Collaborative candidates, topped up from the shuffled top pool when
    /// there are fewer than the trigger limit.
    pub fn aggregate(
        &self,
        subject: &SubjectId,
        neighbors: &Neighbors,
        matrix: &AffinityMatrix,
        top_pool: &[ItemId],
    ) -> Aggregation {
        let mut items = self.candidates(subject, neighbors, matrix);
        if items.len() >= self.trigger_limit {
            return Aggregation {
                items,
                mode: RecommendationMode::Collaborative,
            };
        }

        let mut excluded = matrix.seen_items(subject);
        excluded.extend(items.iter().cloned());
        let missing = self.trigger_limit - items.len();
        let mut rng = seeded_rng(self.seed, &subject.to_string());
        let fill = shuffled_pool(top_pool, &excluded, &mut rng);
        items.extend(fill.into_iter().take(missing));

        Aggregation {
            items,
            mode: RecommendationMode::SparseBlend,
        }
    }

    /// The whole top pool minus whatever the subject has seen.
    pub fn top_only(
        &self,
        subject: &SubjectId,
        matrix: &AffinityMatrix,
        top_pool: &[ItemId],
    ) -> Aggregation {
        let seen = matrix.seen_items(subject);
        Aggregation {
            items: top_pool
                .iter()
                .filter(|item| !seen.contains(*item))
                .cloned()
                .collect(),
            mode: RecommendationMode::TopOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::activity::UnifiedAffinity;
    use crate::services::similarity::NeighborSource;

    fn user(id: &str) -> SubjectId {
        SubjectId::Registered(id.to_string())
    }

    fn ids(items: &[&str]) -> Vec<ItemId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn neighbors(subjects: &[&str]) -> Neighbors {
        Neighbors {
            subjects: subjects.iter().map(|s| user(s)).collect(),
            source: NeighborSource::Band,
        }
    }

    fn sample() -> AffinityMatrix {
        let (u, n1, n2) = (user("u"), user("n1"), user("n2"));
        AffinityMatrix::from_affinities(&[
            UnifiedAffinity::new(&u, "seen-liked", 2),
            UnifiedAffinity::new(&u, "seen-disliked", -2),
            UnifiedAffinity::new(&u, "seen-neutral", 0),
            UnifiedAffinity::new(&n1, "seen-liked", 1),
            UnifiedAffinity::new(&n1, "seen-disliked", 2),
            UnifiedAffinity::new(&n1, "seen-neutral", 1),
            UnifiedAffinity::new(&n1, "fresh-1", 1),
            UnifiedAffinity::new(&n1, "hated", -1),
            UnifiedAffinity::new(&n2, "fresh-2", 2),
            UnifiedAffinity::new(&n2, "meh", 0),
        ])
    }

    #[test]
    fn test_candidates_exclude_everything_seen() {
        let candidates = Aggregator::new(1, 0).candidates(&user("u"), &neighbors(&["n1", "n2"]), &sample());
        assert_eq!(candidates.into_iter().collect::<Vec<_>>(), ids(&["fresh-1", "fresh-2"]));
    }

    #[test]
    fn test_enough_candidates_skip_blending() {
        let pool = ids(&["top-1", "top-2"]);
        let result = Aggregator::new(2, 0).aggregate(&user("u"), &neighbors(&["n1", "n2"]), &sample(), &pool);
        assert_eq!(result.mode, RecommendationMode::Collaborative);
        assert!(!result.items.contains("top-1"));
        assert_eq!(result.items.len(), 2);
    }

    #[test]
    fn test_sparse_candidates_are_topped_up_without_duplicates() {
        let pool = ids(&["fresh-1", "seen-liked", "top-1", "top-2", "top-3", "top-4"]);
        let result = Aggregator::new(4, 7).aggregate(&user("u"), &neighbors(&["n1"]), &sample(), &pool);

        assert_eq!(result.mode, RecommendationMode::SparseBlend);
        assert_eq!(result.items.len(), 4);
        assert!(result.items.contains("fresh-1"));
        assert!(!result.items.contains("seen-liked"));
        assert_eq!(result.items.iter().filter(|i| i.starts_with("top-")).count(), 3);
    }

    #[test]
    fn test_small_pool_gives_what_it_has() {
        let pool = ids(&["top-1"]);
        let result = Aggregator::new(50, 0).aggregate(&user("u"), &neighbors(&["n2"]), &sample(), &pool);
        assert_eq!(result.items.into_iter().collect::<Vec<_>>(), ids(&["fresh-2", "top-1"]));
    }

    #[test]
    fn test_blend_is_repeatable_per_subject() {
        let pool: Vec<ItemId> = (0..40).map(|i| format!("top-{}", i)).collect();
        let aggregator = Aggregator::new(10, 3);
        let first = aggregator.aggregate(&user("u"), &neighbors(&["n1"]), &sample(), &pool);
        let second = aggregator.aggregate(&user("u"), &neighbors(&["n1"]), &sample(), &pool);
        assert_eq!(first, second);
    }

    #[test]
    fn test_shuffle_seed_is_fixed_for_a_key() {
        let seed = shuffle_seed(0, "user:u1");
        assert_eq!(&seed[..8], &[0x41, 0x2b, 0x54, 0x1f, 0xe8, 0xb2, 0x4d, 0x98]);
        assert_ne!(seed, shuffle_seed(0, "anonymous:u1"));
        assert_ne!(seed, shuffle_seed(1, "user:u1"));

        let pool: Vec<ItemId> = (0..20).map(|i| format!("top-{}", i)).collect();
        let first = shuffled_pool(&pool, &BTreeSet::new(), &mut seeded_rng(0, "user:u1"));
        let second = shuffled_pool(&pool, &BTreeSet::new(), &mut seeded_rng(0, "user:u1"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_top_only_removes_seen() {
        let pool = ids(&["seen-disliked", "top-1"]);
        let result = Aggregator::new(50, 0).top_only(&user("u"), &sample(), &pool);
        assert_eq!(result.mode, RecommendationMode::TopOnly);
        assert_eq!(result.items.into_iter().collect::<Vec<_>>(), ids(&["top-1"]));
    }
}
