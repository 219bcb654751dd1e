use std::collections::HashMap;

use log::debug;

pub use crate::config::*;

/// Dense symmetric affinity matrix over the students of one grouping run.
///
/// Row and column `i` correspond to `students()[i]`. The diagonal is zero and
/// all the entries are non-negative.
#[derive(PartialEq, Debug, Clone)]
pub struct AffinityMatrix {
    students: Vec<StudentId>,
    values: Vec<f64>,
}

impl AffinityMatrix {
    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn students(&self) -> &[StudentId] {
        &self.students
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.len() + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.len();
        &self.values[i * n..(i + 1) * n]
    }

    pub fn max_value(&self) -> f64 {
        self.values.iter().cloned().fold(0.0, f64::max)
    }

    /// Sum of the affinities over all the unordered pairs inside each group.
    pub fn intra_group_sum(&self, groups: &[Vec<usize>]) -> f64 {
        let mut total = 0.0;
        for g in groups {
            for (pos, &i) in g.iter().enumerate() {
                for &j in g[pos + 1..].iter() {
                    total += self.get(i, j);
                }
            }
        }
        total
    }
}

/// A builder for the affinity matrix of one election.
///
/// ```
/// use affinity_grouping::builder::MatrixBuilder;
/// use affinity_grouping::{GroupingRules, StudentId, Vote};
/// # use affinity_grouping::GroupingErrors;
///
/// let mut builder = MatrixBuilder::new(&GroupingRules::DEFAULT_RULES)?
///     .students(&[StudentId(1), StudentId(2)])?;
///
/// builder.add_vote(&Vote { voter: StudentId(1), candidate: StudentId(2), score: 3 });
/// let matrix = builder.build();
/// assert_eq!(matrix.get(0, 1), matrix.get(1, 0));
///
/// # Ok::<(), GroupingErrors>(())
/// ```
pub struct MatrixBuilder {
    pub(crate) _rules: GroupingRules,
    pub(crate) _students: Vec<StudentId>,
    pub(crate) _index: HashMap<StudentId, usize>,
    // Directed sums, row = voter.
    pub(crate) _directed: Vec<f64>,
}

impl MatrixBuilder {
    /// Fails if the mutual boost factor is not a finite positive number.
    pub fn new(rules: &GroupingRules) -> Result<MatrixBuilder, GroupingErrors> {
        if let MutualBoost::Factor(f) = rules.mutual_boost {
            if !(f.is_finite() && f > 0.0) {
                return InvalidInputSnafu {
                    reason: format!("the mutual boost factor must be finite and positive, not {}", f),
                }
                .fail();
            }
        }
        Ok(MatrixBuilder {
            _rules: rules.clone(),
            _students: Vec::new(),
            _index: HashMap::new(),
            _directed: Vec::new(),
        })
    }

    /// Sets the participating students. The order fixes the matrix indexes.
    ///
    /// Fails if a student appears twice.
    pub fn students(self, ids: &[StudentId]) -> Result<MatrixBuilder, GroupingErrors> {
        let mut index: HashMap<StudentId, usize> = HashMap::with_capacity(ids.len());
        for (i, sid) in ids.iter().enumerate() {
            if index.insert(*sid, i).is_some() {
                return InvalidInputSnafu {
                    reason: format!("student {} is listed more than once", sid),
                }
                .fail();
            }
        }
        Ok(MatrixBuilder {
            _rules: self._rules,
            _students: ids.to_vec(),
            _index: index,
            _directed: vec![0.0; ids.len() * ids.len()],
        })
    }

    /// Adds a vote. Votes involving a student outside of the participants,
    /// and votes of a student for themselves, are ignored.
    ///
    /// Returns whether the vote was taken into account.
    pub fn add_vote(&mut self, vote: &Vote) -> bool {
        let (i, j) = match (self._index.get(&vote.voter), self._index.get(&vote.candidate)) {
            (Some(i), Some(j)) if i != j => (*i, *j),
            _ => return false,
        };
        let n = self._students.len();
        // Accumulate: the store should not return duplicates but nothing here relies on it.
        self._directed[i * n + j] += vote.score as f64;
        true
    }

    pub fn add_votes(&mut self, votes: &[Vote]) -> usize {
        votes.iter().filter(|v| self.add_vote(v)).count()
    }

    /// Applies the mutual boost policy, then symmetrizes in a single final pass.
    pub fn build(self) -> AffinityMatrix {
        let n = self._students.len();
        let mut values = self._directed;
        let mut boosted_pairs = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                let (ij, ji) = (values[i * n + j], values[j * n + i]);
                let (ij, ji) = match self._rules.mutual_boost {
                    MutualBoost::Factor(f) if ij > 0.0 && ji > 0.0 => {
                        boosted_pairs += 1;
                        (ij * f, ji * f)
                    }
                    _ => (ij, ji),
                };
                let sym = (ij + ji) / 2.0;
                values[i * n + j] = sym;
                values[j * n + i] = sym;
            }
        }
        debug!(
            "MatrixBuilder::build: {} students, {} mutual pairs boosted with {:?}",
            n, boosted_pairs, self._rules.mutual_boost
        );
        AffinityMatrix {
            students: self._students,
            values,
        }
    }
}
