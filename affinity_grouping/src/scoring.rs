//! Metrics computed on a realized partition, from the directed votes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

pub use crate::config::*;

/// The directed score of each (voter, candidate) pair. When the same pair
/// appears several times, the last vote wins.
fn directed_scores(votes: &[Vote]) -> HashMap<(StudentId, StudentId), u32> {
    votes
        .iter()
        .filter(|v| v.voter != v.candidate)
        .map(|v| ((v.voter, v.candidate), v.score))
        .collect()
}

/// Computes, for each student, the sum of the scores they gave to their groupmates.
///
/// Uses the directed votes and not the symmetrized affinities: the
/// satisfaction of a student only reflects what they asked for.
/// Votes from or for students outside of `assignments` are ignored.
pub fn satisfaction<G: Copy + Eq>(
    assignments: &BTreeMap<StudentId, G>,
    votes: &[Vote],
) -> SatisfactionReport {
    let mut per_student: BTreeMap<StudentId, u64> =
        assignments.keys().map(|sid| (*sid, 0)).collect();
    for ((voter, candidate), score) in directed_scores(votes) {
        match (assignments.get(&voter), assignments.get(&candidate)) {
            (Some(g1), Some(g2)) if g1 == g2 => {
                if let Some(s) = per_student.get_mut(&voter) {
                    *s += score as u64;
                }
            }
            _ => {}
        }
    }
    let total: u64 = per_student.values().sum();
    let average = if per_student.is_empty() {
        0.0
    } else {
        total as f64 / per_student.len() as f64
    };
    debug!(
        "satisfaction: {} students, total {}, average {:.3}",
        per_student.len(),
        total,
        average
    );
    SatisfactionReport {
        per_student,
        total,
        average,
    }
}

/// The groups in which at least one member gave a positive score to another member.
pub fn highlighted_groups<G: Copy + Ord>(
    assignments: &BTreeMap<StudentId, G>,
    votes: &[Vote],
) -> BTreeSet<G> {
    votes
        .iter()
        .filter(|v| v.score > 0 && v.voter != v.candidate)
        .filter_map(
            |v| match (assignments.get(&v.voter), assignments.get(&v.candidate)) {
                (Some(g1), Some(g2)) if g1 == g2 => Some(*g1),
                _ => None,
            },
        )
        .collect()
}
