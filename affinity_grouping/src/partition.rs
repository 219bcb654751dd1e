//! Splitting the affinity matrix into groups of bounded size.
//!
//! The partition is obtained in two steps:
//! - k-means over the rows of the affinity matrix, restarted with several
//!   fixed seeds. The restart with the highest intra-group affinity wins.
//! - a greedy rebalancing that moves students out of oversized groups.
//!   It is a local heuristic: the size bound is guaranteed, the optimality of
//!   the final affinity is not.

use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::builder::AffinityMatrix;
pub use crate::config::*;

/// Number of groups needed to seat `num_students` with at most `group_size` per group.
pub fn number_of_groups(num_students: usize, group_size: usize) -> usize {
    if group_size == 0 {
        return 1;
    }
    std::cmp::max(1, (num_students + group_size - 1) / group_size)
}

/// Partitions the students of the matrix into groups of at most `rules.group_size`.
pub fn partition(
    matrix: &AffinityMatrix,
    rules: &GroupingRules,
) -> Result<PartitionOutcome, GroupingErrors> {
    let n = matrix.len();
    let group_size = rules.group_size;
    if n == 0 {
        return InvalidInputSnafu {
            reason: "no students to group",
        }
        .fail();
    }
    if group_size == 0 {
        return InvalidInputSnafu {
            reason: "the group size must be positive",
        }
        .fail();
    }
    if n < group_size {
        return InsufficientParticipantsSnafu {
            students: n,
            group_size,
        }
        .fail();
    }

    let k = number_of_groups(n, group_size);
    let features = clustering_features(matrix);
    info!(
        "partition: {} students, groups of {}, {} groups, {} restarts",
        n, group_size, k, rules.restarts
    );

    let mut best: Option<(f64, Vec<Vec<usize>>)> = None;
    let mut last_failure: Option<String> = None;
    for restart in 0..rules.restarts.max(1) {
        let seed = rules.base_seed.wrapping_add(restart as u64);
        let labels = match kmeans(&features, k, seed, rules.max_iterations) {
            Ok(labels) => labels,
            Err(reason) => {
                warn!("partition: restart {} (seed {}) failed: {}", restart, seed, reason);
                last_failure = Some(reason);
                continue;
            }
        };
        let groups = labels_to_groups(&labels, k);
        let score = matrix.intra_group_sum(&groups);
        debug!(
            "partition: restart {} (seed {}) score {:.3} sizes {:?}",
            restart,
            seed,
            score,
            groups.iter().map(|g| g.len()).collect::<Vec<usize>>()
        );
        // Ties keep the first restart found.
        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, groups));
        }
    }

    let (quality_score, mut groups) = match best {
        Some(b) => b,
        None => {
            return ClusteringFailureSnafu {
                attempts: rules.restarts.max(1),
                reason: last_failure.unwrap_or_else(|| "no restart attempted".to_string()),
            }
            .fail();
        }
    };

    let moves = rebalance(matrix, &mut groups, group_size);
    groups.retain(|g| !g.is_empty());
    for g in groups.iter_mut() {
        g.sort_unstable();
    }
    let rebalanced_score = matrix.intra_group_sum(&groups);
    info!(
        "partition: best score {:.3}, {} rebalancing moves, score after rebalancing {:.3}",
        quality_score, moves, rebalanced_score
    );
    Ok(PartitionOutcome {
        groups,
        quality_score,
        rebalanced_score,
    })
}

/// The affinity rows, with the diagonal set to the largest affinity.
///
/// A student then resembles the students they like the most, which is what
/// the euclidean distance of k-means picks up.
fn clustering_features(matrix: &AffinityMatrix) -> Vec<Vec<f64>> {
    let self_affinity = matrix.max_value();
    (0..matrix.len())
        .map(|i| {
            let mut row = matrix.row(i).to_vec();
            row[i] = self_affinity;
            row
        })
        .collect()
}

fn labels_to_groups(labels: &[usize], k: usize) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (idx, lbl) in labels.iter().enumerate() {
        groups[*lbl].push(idx);
    }
    groups
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the closest centroid. Ties go to the lowest index.
fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best_dist {
            best_dist = d;
            best_idx = idx;
        }
    }
    best_idx
}

/// k-means++ seeding: each new centroid is drawn with a probability
/// proportional to its squared distance to the closest existing centroid.
fn kmeans_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..n)].clone());
    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| squared_distance(p, &centroids[nearest(p, &centroids)]))
            .collect();
        let total: f64 = weights.iter().sum();
        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = None;
            for (idx, w) in weights.iter().enumerate() {
                if *w <= 0.0 {
                    continue;
                }
                cumulative += w;
                chosen = Some(idx);
                if cumulative >= target {
                    break;
                }
            }
            chosen.unwrap_or(0)
        } else {
            // All the points sit on the centroids already.
            rng.gen_range(0..n)
        };
        centroids.push(points[chosen].clone());
    }
    centroids
}

/// Lloyd iterations from a seeded k-means++ start. Returns one label in `0..k` per point.
fn kmeans(
    points: &[Vec<f64>],
    k: usize,
    seed: u64,
    max_iterations: u32,
) -> Result<Vec<usize>, String> {
    let n = points.len();
    if k == 0 || k > n {
        return Err(format!("cannot form {} clusters out of {} points", k, n));
    }
    if points.iter().flatten().any(|x| !x.is_finite()) {
        return Err("non-finite affinity value".to_string());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = kmeans_plus_plus(points, k, &mut rng);
    let mut labels: Vec<usize> = vec![usize::MAX; n];

    for iteration in 0..max_iterations.max(1) {
        let mut changed = false;
        for (idx, p) in points.iter().enumerate() {
            let lbl = nearest(p, &centroids);
            if labels[idx] != lbl {
                labels[idx] = lbl;
                changed = true;
            }
        }
        if !changed {
            debug!("kmeans: seed {} converged after {} iterations", seed, iteration);
            break;
        }
        let dim = points[0].len();
        let mut sums: Vec<Vec<f64>> = vec![vec![0.0; dim]; k];
        let mut counts: Vec<usize> = vec![0; k];
        for (p, lbl) in points.iter().zip(labels.iter()) {
            counts[*lbl] += 1;
            for (s, x) in sums[*lbl].iter_mut().zip(p.iter()) {
                *s += x;
            }
        }
        for c in 0..k {
            // An empty cluster keeps its previous centroid.
            if counts[c] > 0 {
                centroids[c] = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            }
        }
    }
    Ok(labels)
}

/// Moves students from oversized groups into undersized ones until no group
/// exceeds `group_size`.
///
/// At each step, the first oversized group gives to the first undersized
/// group the member whose move loses the least affinity:
/// `affinity to current groupmates - affinity to the receiving group`.
///
/// Returns the number of moves.
pub(crate) fn rebalance(
    matrix: &AffinityMatrix,
    groups: &mut [Vec<usize>],
    group_size: usize,
) -> usize {
    let mut moves = 0;
    loop {
        let big = groups.iter().position(|g| g.len() > group_size);
        let small = groups.iter().position(|g| g.len() < group_size);
        let (big, small) = match (big, small) {
            (Some(b), Some(s)) => (b, s),
            _ => break,
        };

        let mut best: Option<(usize, f64)> = None;
        for (pos, &student) in groups[big].iter().enumerate() {
            let loss: f64 = groups[big]
                .iter()
                .filter(|&&other| other != student)
                .map(|&other| matrix.get(student, other))
                .sum();
            let gain: f64 = groups[small]
                .iter()
                .map(|&other| matrix.get(student, other))
                .sum();
            let net_loss = loss - gain;
            if best.map_or(true, |(_, best_loss)| net_loss < best_loss) {
                best = Some((pos, net_loss));
            }
        }
        let (pos, net_loss) = match best {
            Some(b) => b,
            None => break,
        };
        let student = groups[big].remove(pos);
        debug!(
            "rebalance: moving student index {} from group {} to group {} (net loss {:.3})",
            student, big, small, net_loss
        );
        groups[small].push(student);
        moves += 1;
    }
    moves
}
