//! Sample identifiers and the precomputed 5-fold assignment
//!
//! The fold CSV (`id,fold`) is produced offline and never changes during a
//! run. For fold `i` the validation ids are exactly the ids assigned to `i`
//! and the training ids are every other id of the all-ids CSV, in that
//! file's order.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, ResultExt, SaltError};

/// Number of cross-validation folds
pub const NUM_FOLDS: usize = 5;

/// Identifier of one labeled (or pseudo-labeled) image
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Deserialize)]
struct IdRecord {
    id: SampleId,
}

#[derive(Debug, Deserialize)]
struct FoldRecord {
    id: SampleId,
    fold: usize,
}

/// Read the `id` column of a CSV, dropping repeated ids but keeping order
pub fn read_ids(path: &Path) -> Result<Vec<SampleId>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for record in reader.deserialize::<IdRecord>() {
        let record = record.with_context(|| format!("bad row in {}", path.display()))?;
        if seen.insert(record.id.clone()) {
            ids.push(record.id);
        }
    }

    Ok(ids)
}

/// Train/validation ids for one fold iteration
#[derive(Debug, Clone)]
pub struct FoldSplit {
    pub fold: usize,
    pub train_ids: Vec<SampleId>,
    pub val_ids: Vec<SampleId>,
}

impl FoldSplit {
    /// No id is in both halves
    pub fn is_disjoint(&self) -> bool {
        let val: HashSet<_> = self.val_ids.iter().collect();
        !self.train_ids.iter().any(|id| val.contains(id))
    }

    /// The two halves together are exactly `all_ids`
    pub fn covers(&self, all_ids: &[SampleId]) -> bool {
        let all: HashSet<_> = all_ids.iter().collect();
        let union: HashSet<_> = self.train_ids.iter().chain(&self.val_ids).collect();
        all == union
    }
}

/// Immutable mapping from sample id to fold index
#[derive(Debug, Clone)]
pub struct FoldAssignment {
    all_ids: Vec<SampleId>,
    folds: Vec<Vec<SampleId>>,
    fold_of: HashMap<SampleId, usize>,
}

impl FoldAssignment {
    /// Build an assignment, rejecting unknown ids and out-of-range folds
    pub fn new(all_ids: Vec<SampleId>, assignments: Vec<(SampleId, usize)>) -> Result<Self> {
        let known: HashSet<_> = all_ids.iter().cloned().collect();
        let mut folds = vec![Vec::new(); NUM_FOLDS];
        let mut fold_of = HashMap::with_capacity(assignments.len());

        for (id, fold) in assignments {
            if fold >= NUM_FOLDS {
                return Err(SaltError::Dataset(format!(
                    "id '{}' assigned to fold {} (expected 0..{})",
                    id, fold, NUM_FOLDS
                )));
            }
            if !known.contains(&id) {
                return Err(SaltError::Dataset(format!(
                    "fold file references unknown id '{}'",
                    id
                )));
            }

            match fold_of.get(&id) {
                Some(&existing) if existing != fold => {
                    return Err(SaltError::Dataset(format!(
                        "id '{}' assigned to both fold {} and fold {}",
                        id, existing, fold
                    )));
                }
                Some(_) => continue,
                None => {
                    fold_of.insert(id.clone(), fold);
                    folds[fold].push(id);
                }
            }
        }

        let mut seen = HashSet::new();
        let all_ids = all_ids.into_iter().filter(|id| seen.insert(id.clone())).collect();

        Ok(Self {
            all_ids,
            folds,
            fold_of,
        })
    }

    /// Load the all-ids CSV (`id`) and the fold CSV (`id,fold`)
    pub fn from_csv(ids_path: &Path, folds_path: &Path) -> Result<Self> {
        let all_ids = read_ids(ids_path)?;

        let mut reader = csv::Reader::from_path(folds_path)
            .with_context(|| format!("failed to open {}", folds_path.display()))?;
        let mut assignments = Vec::new();
        for record in reader.deserialize::<FoldRecord>() {
            let record = record.with_context(|| format!("bad row in {}", folds_path.display()))?;
            assignments.push((record.id, record.fold));
        }

        let assignment = Self::new(all_ids, assignments)?;
        tracing::debug!(
            "Loaded {} ids, fold sizes {:?}",
            assignment.all_ids.len(),
            assignment.fold_sizes()
        );
        Ok(assignment)
    }

    pub fn all_ids(&self) -> &[SampleId] {
        &self.all_ids
    }

    /// Fold index of an id, if it is assigned
    pub fn fold_of(&self, id: &SampleId) -> Option<usize> {
        self.fold_of.get(id).copied()
    }

    /// Number of ids in each fold
    pub fn fold_sizes(&self) -> [usize; NUM_FOLDS] {
        let mut sizes = [0; NUM_FOLDS];
        for (size, fold) in sizes.iter_mut().zip(&self.folds) {
            *size = fold.len();
        }
        sizes
    }

    /// Validation ids of one fold, in fold-file order
    pub fn fold_ids(&self, fold: usize) -> Result<&[SampleId]> {
        self.folds
            .get(fold)
            .map(Vec::as_slice)
            .ok_or_else(|| SaltError::Dataset(format!("fold {} is outside [0, {})", fold, NUM_FOLDS)))
    }

    /// Split ids into training (all ids minus fold) and validation (the fold)
    pub fn split(&self, fold: usize) -> Result<FoldSplit> {
        let val_ids = self.fold_ids(fold)?.to_vec();
        let train_ids = self
            .all_ids
            .iter()
            .filter(|id| self.fold_of(id) != Some(fold))
            .cloned()
            .collect();

        Ok(FoldSplit {
            fold,
            train_ids,
            val_ids,
        })
    }
}
