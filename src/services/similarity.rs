use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::config::SimilarityConfig;
use crate::models::activity::SubjectId;
use crate::services::matrix::{AffinityMatrix, DenseMatrix};

/// Distances from one subject to every other subject, self excluded.
pub type DistanceRow = BTreeMap<SubjectId, f64>;

/// Distances for every subject of a batch run.
pub type DistanceTable = BTreeMap<SubjectId, DistanceRow>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// 1 - cosine similarity of the raw score vectors.
    Cosine,
    /// 1 - Pearson correlation of the score vectors across all items.
    Pearson,
    /// 1 - Spearman rank correlation (Pearson over average ranks).
    Spearman,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "pearson" | "correlation" => Ok(Metric::Pearson),
            "spearman" => Ok(Metric::Spearman),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::Pearson => f.write_str("pearson"),
            Metric::Spearman => f.write_str("spearman"),
        }
    }
}

impl Metric {
    /// Rewrites each subject row so that the metric reduces to a cosine
    /// distance between rows. Correlations are taken per subject across the
    /// item axis, i.e. column-wise over the item-indexed (transposed) view.
    fn prepare(&self, values: &Array2<f64>) -> Array2<f64> {
        match self {
            Metric::Cosine => values.clone(),
            Metric::Pearson => center_rows(values.clone()),
            Metric::Spearman => {
                let mut ranked = values.clone();
                for mut row in ranked.rows_mut() {
                    let ranks = average_ranks(row.view());
                    row.assign(&ndarray::Array1::from_vec(ranks));
                }
                center_rows(ranked)
            }
        }
    }
}

fn center_rows(mut values: Array2<f64>) -> Array2<f64> {
    if values.ncols() == 0 {
        return values;
    }
    if let Some(means) = values.mean_axis(Axis(1)) {
        for (mut row, mean) in values.rows_mut().into_iter().zip(means.iter()) {
            row.mapv_inplace(|v| v - mean);
        }
    }
    values
}

/// 1-based ranks, ties sharing the mean of the positions they span.
fn average_ranks(row: ArrayView1<f64>) -> Vec<f64> {
    let mut order: Vec<usize> = (0..row.len()).collect();
    order.sort_by(|&a, &b| row[a].partial_cmp(&row[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; row.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && row[order[end + 1]] == row[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &index in &order[start..=end] {
            ranks[index] = rank;
        }
        start = end + 1;
    }
    ranks
}

/// Cosine distance clamped to [0, 1]. Zero vectors are maximally distant.
fn cosine_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let norms = (a.dot(&a) * b.dot(&b)).sqrt();
    if norms == 0.0 {
        return 1.0;
    }
    let distance = 1.0 - a.dot(&b) / norms;
    if distance.is_nan() {
        1.0
    } else {
        distance.clamp(0.0, 1.0)
    }
}

/// Where a neighbor set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborSource {
    /// Primary metric, within the configured band.
    Band,
    /// Secondary metric, closest subjects regardless of band.
    Fallback,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbors {
    pub subjects: Vec<SubjectId>,
    pub source: NeighborSource,
}

impl Neighbors {
    pub fn none() -> Self {
        Neighbors {
            subjects: Vec::new(),
            source: NeighborSource::None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// A matrix rewritten for one metric, ready for distance lookups.
pub struct PreparedMatrix {
    dense: DenseMatrix,
    values: Array2<f64>,
}

impl PreparedMatrix {
    pub fn new(matrix: &AffinityMatrix, metric: Metric) -> Self {
        let dense = matrix.to_dense();
        let values = metric.prepare(&dense.values);
        PreparedMatrix { dense, values }
    }

    /// Distances from `target` to every other subject; empty for unknown subjects.
    pub fn distances_from(&self, target: &SubjectId) -> DistanceRow {
        match self.dense.index_of(target) {
            Some(index) => one_vs_rest(&self.dense, &self.values, index),
            None => DistanceRow::new(),
        }
    }
}

/// Lazily prepared view of a matrix under one metric. The preparation runs
/// on the first lookup and is shared by every later one.
pub struct PreparedView<'a> {
    matrix: &'a AffinityMatrix,
    metric: Metric,
    prepared: OnceLock<PreparedMatrix>,
}

impl<'a> PreparedView<'a> {
    pub fn new(matrix: &'a AffinityMatrix, metric: Metric) -> Self {
        PreparedView {
            matrix,
            metric,
            prepared: OnceLock::new(),
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.get().is_some()
    }

    pub fn distances_from(&self, target: &SubjectId) -> DistanceRow {
        self.prepared
            .get_or_init(|| PreparedMatrix::new(self.matrix, self.metric))
            .distances_from(target)
    }
}

pub struct SimilarityEngine {
    config: SimilarityConfig,
}

impl SimilarityEngine {
    pub fn new(config: SimilarityConfig) -> Self {
        SimilarityEngine { config }
    }

    /// All-pairs distances under the primary metric.
    pub fn batch(&self, matrix: &AffinityMatrix) -> DistanceTable {
        self.batch_with(matrix, self.config.primary)
    }

    /// All-pairs distances. Only the upper triangle is computed; the lower
    /// one is mirrored from it.
    pub fn batch_with(&self, matrix: &AffinityMatrix, metric: Metric) -> DistanceTable {
        let PreparedMatrix {
            dense,
            values: prepared,
        } = PreparedMatrix::new(matrix, metric);
        let n = dense.subjects.len();

        let upper: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                ((i + 1)..n)
                    .map(|j| cosine_distance(prepared.row(i), prepared.row(j)))
                    .collect()
            })
            .collect();

        let mut table: DistanceTable = dense
            .subjects
            .iter()
            .map(|subject| (subject.clone(), DistanceRow::new()))
            .collect();
        for (i, distances) in upper.into_iter().enumerate() {
            for (offset, distance) in distances.into_iter().enumerate() {
                let j = i + 1 + offset;
                let (a, b) = (&dense.subjects[i], &dense.subjects[j]);
                if let Some(row) = table.get_mut(a) {
                    row.insert(b.clone(), distance);
                }
                if let Some(row) = table.get_mut(b) {
                    row.insert(a.clone(), distance);
                }
            }
        }

        log::info!("Computed {} pairwise {} distances", n * n.saturating_sub(1) / 2, metric);
        table
    }

    /// Distances from `target` to every other subject under the primary metric.
    pub fn incremental(&self, matrix: &AffinityMatrix, target: &SubjectId) -> DistanceRow {
        self.incremental_with(matrix, target, self.config.primary)
    }

    pub fn incremental_with(
        &self,
        matrix: &AffinityMatrix,
        target: &SubjectId,
        metric: Metric,
    ) -> DistanceRow {
        PreparedMatrix::new(matrix, metric).distances_from(target)
    }

    /// View of `matrix` under the secondary metric, for neighbor fallbacks.
    pub fn fallback_view<'a>(&self, matrix: &'a AffinityMatrix) -> PreparedView<'a> {
        PreparedView::new(matrix, self.config.secondary)
    }

    /// Subjects whose distance falls inside the configured band.
    pub fn within_band(&self, distances: &DistanceRow) -> Vec<SubjectId> {
        distances
            .iter()
            .filter(|(_, d)| (self.config.lower_bound..=self.config.upper_bound).contains(*d))
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    /// Neighbors of `target`: the in-band subjects of `primary`, or, when
    /// there are none, the closest subjects of the secondary-metric view.
    pub fn neighbors(
        &self,
        fallback: &PreparedView<'_>,
        target: &SubjectId,
        primary: &DistanceRow,
    ) -> Neighbors {
        let in_band = self.within_band(primary);
        if !in_band.is_empty() {
            return Neighbors {
                subjects: in_band,
                source: NeighborSource::Band,
            };
        }

        let secondary = fallback.distances_from(target);
        let closest = closest(&secondary, self.config.fallback_top_k);
        if closest.is_empty() {
            log::debug!("No neighbors for {} under either metric", target);
            return Neighbors::none();
        }
        log::debug!(
            "{} has no {} neighbors in band, using {} closest by {}",
            target,
            self.config.primary,
            closest.len(),
            self.config.secondary
        );
        Neighbors {
            subjects: closest,
            source: NeighborSource::Fallback,
        }
    }
}

fn one_vs_rest(dense: &DenseMatrix, prepared: &Array2<f64>, index: usize) -> DistanceRow {
    let target = prepared.row(index);
    let distances: Vec<(usize, f64)> = (0..dense.subjects.len())
        .into_par_iter()
        .filter(|&other| other != index)
        .map(|other| (other, cosine_distance(target, prepared.row(other))))
        .collect();

    distances
        .into_iter()
        .map(|(other, distance)| (dense.subjects[other].clone(), distance))
        .collect()
}

/// Up to `k` subjects with distance below 1, closest first, ties by subject id.
fn closest(distances: &DistanceRow, k: usize) -> Vec<SubjectId> {
    let mut ranked: Vec<(&SubjectId, f64)> = distances
        .iter()
        .filter(|(_, d)| **d < 1.0)
        .map(|(subject, d)| (subject, *d))
        .collect();
    ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(k)
        .map(|(subject, _)| subject.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::activity::UnifiedAffinity;

    fn user(id: &str) -> SubjectId {
        SubjectId::Registered(id.to_string())
    }

    fn matrix(rows: &[(&str, &[(&str, i32)])]) -> AffinityMatrix {
        let affinities: Vec<UnifiedAffinity> = rows
            .iter()
            .flat_map(|(subject, cells)| {
                cells
                    .iter()
                    .map(move |(item, score)| UnifiedAffinity::new(&user(subject), *item, *score))
            })
            .collect();
        AffinityMatrix::from_affinities(&affinities)
    }

    fn engine() -> SimilarityEngine {
        SimilarityEngine::new(SimilarityConfig::default())
    }

    fn sample() -> AffinityMatrix {
        matrix(&[
            ("a", &[("1", 1), ("2", 1), ("3", 2)]),
            ("b", &[("1", 1), ("2", 1), ("4", 1)]),
            ("c", &[("3", -2), ("5", 1)]),
            ("d", &[("1", 2), ("2", 1), ("3", 2), ("6", -1)]),
        ])
    }

    #[test]
    fn test_batch_is_symmetric_in_range_and_excludes_self() {
        for metric in [Metric::Cosine, Metric::Pearson, Metric::Spearman] {
            let table = engine().batch_with(&sample(), metric);
            for (subject, row) in &table {
                assert!(!row.contains_key(subject), "{} self distance under {}", subject, metric);
                assert_eq!(row.len(), 3);
                for (other, distance) in row {
                    assert!((0.0..=1.0).contains(distance), "{} out of range", distance);
                    assert_eq!(table[other][subject], *distance);
                }
            }
        }
    }

    #[test]
    fn test_incremental_matches_batch() {
        let m = sample();
        let table = engine().batch(&m);
        let row = engine().incremental(&m, &user("a"));
        assert_eq!(row, table[&user("a")]);
        assert!(engine().incremental(&m, &user("nobody")).is_empty());
    }

    #[test]
    fn test_nine_of_ten_shared_likes_fall_in_band() {
        let first: Vec<(String, i32)> = (1..=10).map(|i| (i.to_string(), 1)).collect();
        let mut second: Vec<(String, i32)> = (1..=9).map(|i| (i.to_string(), 1)).collect();
        second.push(("11".to_string(), 1));
        let mut affinities = Vec::new();
        for (item, score) in &first {
            affinities.push(UnifiedAffinity::new(&user("u1"), item.clone(), *score));
        }
        for (item, score) in &second {
            affinities.push(UnifiedAffinity::new(&user("u2"), item.clone(), *score));
        }
        let m = AffinityMatrix::from_affinities(&affinities);

        let row = engine().incremental(&m, &user("u1"));
        let distance = row[&user("u2")];
        assert!((distance - 0.1).abs() < 1e-9);
        let fallback = engine().fallback_view(&m);
        let neighbors = engine().neighbors(&fallback, &user("u1"), &row);
        assert_eq!(neighbors.source, NeighborSource::Band);
        assert_eq!(neighbors.subjects, vec![user("u2")]);
        assert!(!fallback.is_prepared());
    }

    #[test]
    fn test_identical_and_opposite_subjects_are_outside_band() {
        let m = matrix(&[
            ("a", &[("1", 1), ("2", 1)]),
            ("twin", &[("1", 1), ("2", 1)]),
            ("opposite", &[("1", -1), ("2", -1)]),
        ]);
        let row = engine().incremental(&m, &user("a"));
        assert_eq!(row[&user("twin")], 0.0);
        assert_eq!(row[&user("opposite")], 1.0);
        assert!(engine().within_band(&row).is_empty());
    }

    #[test]
    fn test_fallback_metric_supplies_closest_subjects() {
        // cosine distances here sit above the band, but the score patterns correlate
        let m = matrix(&[
            ("a", &[("1", 2), ("2", 1), ("3", -1)]),
            ("b", &[("1", 1), ("3", -2), ("4", 1)]),
            ("c", &[("2", -1), ("4", 2)]),
        ]);
        let e = engine();
        let row = e.incremental(&m, &user("a"));
        assert!(e.within_band(&row).is_empty());

        let fallback = e.fallback_view(&m);
        let neighbors = e.neighbors(&fallback, &user("a"), &row);
        assert_eq!(neighbors.source, NeighborSource::Fallback);
        assert_eq!(neighbors.subjects, vec![user("b")]);
    }

    #[test]
    fn test_fallback_view_is_prepared_once_and_matches_incremental() {
        let m = sample();
        let e = engine();
        let fallback = e.fallback_view(&m);
        assert!(!fallback.is_prepared());

        for subject in ["a", "b", "c", "d"] {
            let expected = e.incremental_with(&m, &user(subject), Metric::Pearson);
            assert_eq!(fallback.distances_from(&user(subject)), expected);
        }
        assert!(fallback.is_prepared());
        assert!(fallback.distances_from(&user("nobody")).is_empty());
    }

    #[test]
    fn test_lonely_subject_has_no_neighbors() {
        let m = matrix(&[("a", &[("1", 1)])]);
        let e = engine();
        let row = e.incremental(&m, &user("a"));
        assert!(row.is_empty());
        assert_eq!(e.neighbors(&e.fallback_view(&m), &user("a"), &row), Neighbors::none());
    }

    #[test]
    fn test_average_ranks_share_ties() {
        let values = ndarray::arr1(&[0.0, 2.0, 0.0, 1.0]);
        assert_eq!(average_ranks(values.view()), vec![1.5, 4.0, 1.5, 3.0]);
    }

    #[test]
    fn test_metric_names_parse() {
        assert_eq!("Cosine".parse::<Metric>(), Ok(Metric::Cosine));
        assert_eq!("correlation".parse::<Metric>(), Ok(Metric::Pearson));
        assert!("jaccard".parse::<Metric>().is_err());
    }
}
