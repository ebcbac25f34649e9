//! Rank fusion: merge heterogeneous ranked result lists into one
//! ordering via reciprocal rank fusion, weighted sum over min-max
//! normalized scores, or Borda count.
//!
//! Fusion is deterministic for identical inputs: result sets are keyed
//! by an ordered map and score ties break toward the lower file id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sources a result list can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Text,
    Semantic,
    Image,
    Face,
    Metadata,
}

/// Per-source weights used by all three methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub text: f32,
    pub semantic: f32,
    pub image: f32,
    pub face: f32,
    pub metadata: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            text: 1.0,
            semantic: 0.8,
            image: 0.9,
            face: 0.7,
            metadata: 0.5,
        }
    }
}

impl FusionWeights {
    fn for_type(&self, search_type: SearchType) -> f32 {
        match search_type {
            SearchType::Text => self.text,
            SearchType::Semantic => self.semantic,
            SearchType::Image => self.image,
            SearchType::Face => self.face,
            SearchType::Metadata => self.metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    Rrf,
    WeightedSum,
    BordaCount,
}

/// Default RRF constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// One hit in a source list; rank is implied by list position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceHit {
    pub file_id: i64,
    pub score: f32,
}

/// Where a fused document appeared, preserved as an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceAnnotation {
    /// Raw score in the source list (normalized for weighted-sum).
    pub score: f32,
    /// 1-based rank in the source list.
    pub rank: usize,
}

/// A document in the fused ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedResult {
    pub file_id: i64,
    pub score: f32,
    /// 1-based rank in the fused ordering.
    pub rank: usize,
    pub sources: BTreeMap<SearchType, SourceAnnotation>,
}

pub type ResultSets = BTreeMap<SearchType, Vec<SourceHit>>;

/// Fuse the given result sets into one ranking of at most `top_k`.
pub fn fuse(
    result_sets: &ResultSets,
    weights: &FusionWeights,
    method: FusionMethod,
    rrf_k: f32,
    top_k: usize,
) -> Vec<FusedResult> {
    if result_sets.is_empty() {
        return Vec::new();
    }

    let scored = match method {
        FusionMethod::Rrf => rrf_scores(result_sets, weights, rrf_k),
        FusionMethod::WeightedSum => weighted_sum_scores(result_sets, weights),
        FusionMethod::BordaCount => borda_scores(result_sets, weights),
    };

    rank_and_truncate(scored, top_k)
}

/// RRF: score(d) = sum over sources of w / (k + rank(d)).
fn rrf_scores(
    result_sets: &ResultSets,
    weights: &FusionWeights,
    rrf_k: f32,
) -> BTreeMap<i64, (f32, BTreeMap<SearchType, SourceAnnotation>)> {
    let mut fused: BTreeMap<i64, (f32, BTreeMap<SearchType, SourceAnnotation>)> = BTreeMap::new();

    for (&search_type, hits) in result_sets {
        let weight = weights.for_type(search_type);
        for (index, hit) in hits.iter().enumerate() {
            let rank = index + 1;
            let entry = fused.entry(hit.file_id).or_default();
            entry.0 += weight / (rrf_k + rank as f32);
            entry.1.insert(
                search_type,
                SourceAnnotation {
                    score: hit.score,
                    rank,
                },
            );
        }
    }

    fused
}

/// Weighted sum over min-max normalized scores.
fn weighted_sum_scores(
    result_sets: &ResultSets,
    weights: &FusionWeights,
) -> BTreeMap<i64, (f32, BTreeMap<SearchType, SourceAnnotation>)> {
    let mut fused: BTreeMap<i64, (f32, BTreeMap<SearchType, SourceAnnotation>)> = BTreeMap::new();

    for (&search_type, hits) in result_sets {
        if hits.is_empty() {
            continue;
        }
        let weight = weights.for_type(search_type);

        let max = hits.iter().map(|h| h.score).fold(f32::NEG_INFINITY, f32::max);
        let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
        let range = max - min;

        for (index, hit) in hits.iter().enumerate() {
            let normalized = if range > 0.0 {
                (hit.score - min) / range
            } else {
                1.0
            };
            let entry = fused.entry(hit.file_id).or_default();
            entry.0 += normalized * weight;
            entry.1.insert(
                search_type,
                SourceAnnotation {
                    score: normalized,
                    rank: index + 1,
                },
            );
        }
    }

    fused
}

/// Borda: each list contributes w * (list_len - rank0).
fn borda_scores(
    result_sets: &ResultSets,
    weights: &FusionWeights,
) -> BTreeMap<i64, (f32, BTreeMap<SearchType, SourceAnnotation>)> {
    let mut fused: BTreeMap<i64, (f32, BTreeMap<SearchType, SourceAnnotation>)> = BTreeMap::new();

    for (&search_type, hits) in result_sets {
        let weight = weights.for_type(search_type);
        let len = hits.len();
        for (index, hit) in hits.iter().enumerate() {
            let entry = fused.entry(hit.file_id).or_default();
            entry.0 += weight * (len - index) as f32;
            entry.1.insert(
                search_type,
                SourceAnnotation {
                    score: hit.score,
                    rank: index + 1,
                },
            );
        }
    }

    fused
}

fn rank_and_truncate(
    scored: BTreeMap<i64, (f32, BTreeMap<SearchType, SourceAnnotation>)>,
    top_k: usize,
) -> Vec<FusedResult> {
    let mut results: Vec<FusedResult> = scored
        .into_iter()
        .map(|(file_id, (score, sources))| FusedResult {
            file_id,
            score,
            rank: 0,
            sources,
        })
        .collect();

    // Score descending; ties break toward the lower file id.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.file_id.cmp(&b.file_id))
    });
    results.truncate(top_k);
    for (index, result) in results.iter_mut().enumerate() {
        result.rank = index + 1;
    }
    results
}

/// Tuned weights and method per query shape.
pub fn recommended(query_type: &str) -> (FusionWeights, FusionMethod) {
    match query_type {
        "text" => (
            FusionWeights {
                text: 1.0,
                semantic: 0.6,
                image: 0.3,
                face: 0.2,
                metadata: 0.8,
            },
            FusionMethod::WeightedSum,
        ),
        "image" => (
            FusionWeights {
                text: 0.4,
                semantic: 0.9,
                image: 1.0,
                face: 0.3,
                metadata: 0.5,
            },
            FusionMethod::Rrf,
        ),
        "person" => (
            FusionWeights {
                text: 0.3,
                semantic: 0.5,
                image: 0.6,
                face: 1.0,
                metadata: 0.4,
            },
            FusionMethod::Rrf,
        ),
        "mixed" => (
            FusionWeights {
                text: 0.8,
                semantic: 0.8,
                image: 0.8,
                face: 0.6,
                metadata: 0.6,
            },
            FusionMethod::Rrf,
        ),
        _ => (FusionWeights::default(), FusionMethod::Rrf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[i64]) -> Vec<SourceHit> {
        ids.iter()
            .enumerate()
            .map(|(i, &file_id)| SourceHit {
                file_id,
                score: 1.0 - i as f32 * 0.1,
            })
            .collect()
    }

    #[test]
    fn test_rrf_of_single_list_preserves_order() {
        let mut sets = ResultSets::new();
        sets.insert(SearchType::Text, hits(&[5, 3, 9]));

        let fused = fuse(&sets, &FusionWeights::default(), FusionMethod::Rrf, DEFAULT_RRF_K, 10);
        let order: Vec<i64> = fused.iter().map(|r| r.file_id).collect();
        assert_eq!(order, vec![5, 3, 9]);
        assert_eq!(fused[0].rank, 1);
    }

    #[test]
    fn test_rrf_two_lists_default_weights() {
        // text [A, B, C], semantic [B, C, D] with A=1 B=2 C=3 D=4:
        // B: 1.0/62 + 0.8/61, C: 1.0/63 + 0.8/62, A: 1.0/61, D: 0.8/63
        let mut sets = ResultSets::new();
        sets.insert(SearchType::Text, hits(&[1, 2, 3]));
        sets.insert(SearchType::Semantic, hits(&[2, 3, 4]));

        let fused = fuse(&sets, &FusionWeights::default(), FusionMethod::Rrf, DEFAULT_RRF_K, 3);
        let order: Vec<i64> = fused.iter().map(|r| r.file_id).collect();
        assert_eq!(order, vec![2, 3, 1]);

        let b = &fused[0];
        assert!((b.score - (1.0 / 62.0 + 0.8 / 61.0)).abs() < 1e-6);
        assert_eq!(b.sources[&SearchType::Text].rank, 2);
        assert_eq!(b.sources[&SearchType::Semantic].rank, 1);
    }

    #[test]
    fn test_output_bounded_and_closed_over_inputs() {
        let mut sets = ResultSets::new();
        sets.insert(SearchType::Text, hits(&[1, 2, 3]));
        sets.insert(SearchType::Image, hits(&[4, 5]));

        let fused = fuse(&sets, &FusionWeights::default(), FusionMethod::Rrf, DEFAULT_RRF_K, 2);
        assert_eq!(fused.len(), 2);
        for result in &fused {
            assert!((1..=5).contains(&result.file_id));
        }
    }

    #[test]
    fn test_weighted_sum_normalizes_and_sums() {
        let mut sets = ResultSets::new();
        sets.insert(
            SearchType::Text,
            vec![
                SourceHit { file_id: 1, score: 10.0 },
                SourceHit { file_id: 2, score: 5.0 },
                SourceHit { file_id: 3, score: 0.0 },
            ],
        );
        sets.insert(
            SearchType::Semantic,
            vec![
                SourceHit { file_id: 2, score: 0.9 },
                SourceHit { file_id: 1, score: 0.1 },
            ],
        );

        let fused = fuse(&sets, &FusionWeights::default(), FusionMethod::WeightedSum, DEFAULT_RRF_K, 10);
        // 1: 1.0*1.0 + 0.8*0.0 = 1.0; 2: 0.5 + 0.8 = 1.3; 3: 0.0
        assert_eq!(fused[0].file_id, 2);
        assert!((fused[0].score - 1.3).abs() < 1e-6);
        assert_eq!(fused[1].file_id, 1);
        assert_eq!(fused[2].file_id, 3);
    }

    #[test]
    fn test_weighted_sum_permutation_invariant() {
        // BTreeMap input: insertion order cannot matter.
        let mut a = ResultSets::new();
        a.insert(SearchType::Text, hits(&[1, 2]));
        a.insert(SearchType::Semantic, hits(&[2, 1]));

        let mut b = ResultSets::new();
        b.insert(SearchType::Semantic, hits(&[2, 1]));
        b.insert(SearchType::Text, hits(&[1, 2]));

        let weights = FusionWeights::default();
        assert_eq!(
            fuse(&a, &weights, FusionMethod::WeightedSum, DEFAULT_RRF_K, 10),
            fuse(&b, &weights, FusionMethod::WeightedSum, DEFAULT_RRF_K, 10)
        );
    }

    #[test]
    fn test_borda_count() {
        let mut sets = ResultSets::new();
        sets.insert(SearchType::Text, hits(&[1, 2, 3]));

        let fused = fuse(&sets, &FusionWeights::default(), FusionMethod::BordaCount, DEFAULT_RRF_K, 10);
        // 1: 3, 2: 2, 3: 1 (weight 1.0)
        assert_eq!(fused[0].file_id, 1);
        assert!((fused[0].score - 3.0).abs() < 1e-6);
        assert!((fused[2].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_break_to_lower_file_id() {
        let mut sets = ResultSets::new();
        sets.insert(
            SearchType::Text,
            vec![
                SourceHit { file_id: 9, score: 1.0 },
            ],
        );
        sets.insert(
            SearchType::Semantic,
            vec![
                SourceHit { file_id: 4, score: 1.0 },
            ],
        );

        let weights = FusionWeights {
            text: 1.0,
            semantic: 1.0,
            ..FusionWeights::default()
        };
        let fused = fuse(&sets, &weights, FusionMethod::Rrf, DEFAULT_RRF_K, 10);
        assert_eq!(fused[0].file_id, 4);
        assert_eq!(fused[1].file_id, 9);
    }

    #[test]
    fn test_recommended_methods_per_query_type() {
        assert_eq!(recommended("text").1, FusionMethod::WeightedSum);
        assert_eq!(recommended("image").1, FusionMethod::Rrf);
        assert_eq!(recommended("person").1, FusionMethod::Rrf);
        assert_eq!(recommended("mixed").1, FusionMethod::Rrf);
    }

    #[test]
    fn test_empty_input() {
        let fused = fuse(
            &ResultSets::new(),
            &FusionWeights::default(),
            FusionMethod::Rrf,
            DEFAULT_RRF_K,
            10,
        );
        assert!(fused.is_empty());
    }
}
