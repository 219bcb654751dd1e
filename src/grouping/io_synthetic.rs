// Synthetic votes, to try out an election before the real votes are in.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::grouping::*;

pub const DEFAULT_TOTAL_POINTS: u32 = 100;

/// Every student spreads `total_points` over all the other students, in
/// order, each candidate taking a random share of what is left. The last
/// candidate takes the remainder. Allocations of zero points are dropped.
pub fn generate_votes(students: &[StudentId], total_points: u32, seed: u64) -> Vec<Vote> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut res: Vec<Vote> = Vec::new();
    for &voter in students.iter() {
        let candidates: Vec<StudentId> = students.iter().copied().filter(|c| *c != voter).collect();
        let mut remaining = total_points;
        for (idx, &candidate) in candidates.iter().enumerate() {
            let left_after = (candidates.len() - idx - 1) as u32;
            let score = if left_after == 0 {
                remaining
            } else {
                let max_alloc = remaining.saturating_sub(left_after);
                rng.gen_range(0..=max_alloc)
            };
            remaining -= score;
            if score > 0 {
                res.push(Vote {
                    voter,
                    candidate,
                    score,
                });
            }
        }
    }
    debug!(
        "generate_votes: {} votes for {} students",
        res.len(),
        students.len()
    );
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u64) -> Vec<StudentId> {
        (1..=n).map(StudentId).collect()
    }

    #[test]
    fn every_voter_spends_all_points() {
        let students = ids(6);
        let votes = generate_votes(&students, 100, 3);
        for voter in students.iter() {
            let spent: u32 = votes
                .iter()
                .filter(|v| v.voter == *voter)
                .map(|v| v.score)
                .sum();
            assert_eq!(spent, 100);
        }
        assert!(votes.iter().all(|v| v.voter != v.candidate && v.score > 0));
    }

    #[test]
    fn same_seed_same_votes() {
        let students = ids(5);
        assert_eq!(
            generate_votes(&students, 100, 11),
            generate_votes(&students, 100, 11)
        );
    }

    #[test]
    fn fewer_points_than_candidates() {
        let students = ids(5);
        let votes = generate_votes(&students, 2, 0);
        for voter in students.iter() {
            let spent: u32 = votes
                .iter()
                .filter(|v| v.voter == *voter)
                .map(|v| v.score)
                .sum();
            assert_eq!(spent, 2);
        }
    }

    #[test]
    fn lonely_student() {
        assert!(generate_votes(&ids(1), 100, 0).is_empty());
        assert!(generate_votes(&[], 100, 0).is_empty());
    }
}
