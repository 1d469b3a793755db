use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::activity::{ItemId, SubjectId, UnifiedAffinity};

pub type AffinityRow = BTreeMap<ItemId, i32>;

/// Sparse subject x item affinity matrix. Absent cells read as zero.
///
/// Rows keep every observed item, including those whose summed score is
/// zero, so a neutral rating still marks the item as seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffinityMatrix {
    rows: BTreeMap<SubjectId, AffinityRow>,
}

impl AffinityMatrix {
    /// Groups rows by (subject, item), summing duplicate pairs.
    pub fn from_affinities(affinities: &[UnifiedAffinity]) -> Self {
        let mut rows: BTreeMap<SubjectId, AffinityRow> = BTreeMap::new();
        for affinity in affinities {
            let subject = match affinity.subject_id() {
                Some(subject) => subject,
                None => continue,
            };
            *rows
                .entry(subject)
                .or_default()
                .entry(affinity.item_id.clone())
                .or_insert(0) += affinity.score;
        }
        AffinityMatrix { rows }
    }

    /// Copy of the matrix holding only rows with at least `min_activity` non-zero cells.
    /// All-zero rows never survive, whatever the threshold.
    pub fn retain_active(&self, min_activity: usize) -> AffinityMatrix {
        let threshold = min_activity.max(1);
        let rows = self
            .rows
            .iter()
            .filter(|(_, row)| non_zero(row) >= threshold)
            .map(|(subject, row)| (subject.clone(), row.clone()))
            .collect();
        AffinityMatrix { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, subject: &SubjectId) -> bool {
        self.rows.contains_key(subject)
    }

    pub fn row(&self, subject: &SubjectId) -> Option<&AffinityRow> {
        self.rows.get(subject)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&SubjectId, &AffinityRow)> {
        self.rows.iter()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &SubjectId> {
        self.rows.keys()
    }

    pub fn score(&self, subject: &SubjectId, item: &str) -> i32 {
        self.rows
            .get(subject)
            .and_then(|row| row.get(item))
            .copied()
            .unwrap_or(0)
    }

    pub fn non_zero_count(&self, subject: &SubjectId) -> usize {
        self.rows.get(subject).map(non_zero).unwrap_or(0)
    }

    /// Every item the subject engaged with in any way.
    pub fn seen_items(&self, subject: &SubjectId) -> BTreeSet<ItemId> {
        self.rows
            .get(subject)
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Items the subject scored at +1 or more.
    pub fn liked_items(&self, subject: &SubjectId) -> BTreeSet<ItemId> {
        self.rows
            .get(subject)
            .map(|row| {
                row.iter()
                    .filter(|(_, score)| **score >= 1)
                    .map(|(item, _)| item.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sorted union of all item columns.
    pub fn items(&self) -> Vec<ItemId> {
        let items: BTreeSet<&ItemId> = self.rows.values().flat_map(|row| row.keys()).collect();
        items.into_iter().cloned().collect()
    }

    /// Back to affinity rows, one per cell, in subject then item order.
    pub fn to_affinities(&self) -> Vec<UnifiedAffinity> {
        self.rows
            .iter()
            .flat_map(|(subject, row)| {
                row.iter()
                    .map(move |(item, score)| UnifiedAffinity::new(subject, item.clone(), *score))
            })
            .collect()
    }

    /// Dense view: rows follow subject order, columns follow `items()`.
    pub fn to_dense(&self) -> DenseMatrix {
        let subjects: Vec<SubjectId> = self.rows.keys().cloned().collect();
        let items = self.items();
        let column: BTreeMap<&str, usize> = items
            .iter()
            .enumerate()
            .map(|(index, item)| (item.as_str(), index))
            .collect();

        let mut values = Array2::<f64>::zeros((subjects.len(), items.len()));
        for (row_index, row) in self.rows.values().enumerate() {
            for (item, score) in row {
                values[(row_index, column[item.as_str()])] = f64::from(*score);
            }
        }

        DenseMatrix {
            subjects,
            items,
            values,
        }
    }
}

fn non_zero(row: &AffinityRow) -> usize {
    row.values().filter(|score| **score != 0).count()
}

/// Zero-filled dense copy of an [`AffinityMatrix`] for numeric work.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    pub subjects: Vec<SubjectId>,
    pub items: Vec<ItemId>,
    pub values: Array2<f64>,
}

impl DenseMatrix {
    pub fn index_of(&self, subject: &SubjectId) -> Option<usize> {
        self.subjects.binary_search(subject).ok()
    }
}

/// Both views produced from one batch of affinities.
#[derive(Debug, Clone, Default)]
pub struct BuiltMatrix {
    /// Every subject with any activity; used for seen/liked lookups.
    pub all: AffinityMatrix,
    /// Subjects active enough for collaborative filtering.
    pub retained: AffinityMatrix,
}

impl BuiltMatrix {
    pub fn dropped_subjects(&self) -> usize {
        self.all.len() - self.retained.len()
    }
}

pub struct MatrixBuilder {
    min_activity: usize,
}

impl MatrixBuilder {
    pub fn new(min_activity: usize) -> Self {
        MatrixBuilder { min_activity }
    }

    pub fn build(&self, affinities: &[UnifiedAffinity]) -> BuiltMatrix {
        let all = AffinityMatrix::from_affinities(affinities);
        let retained = all.retain_active(self.min_activity);
        log::info!(
            "Built affinity matrix: {} subjects, {} retained with at least {} scored films",
            all.len(),
            retained.len(),
            self.min_activity
        );
        BuiltMatrix { all, retained }
    }
}
