// ********* Input data structures ***********

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::time::Duration;

use snafu::Snafu;

/// Opaque reference to a student. Nothing else about a student is needed
/// by the engine.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct StudentId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct ElectionId(pub u64);

/// Canonical identifier of a persisted group, as assigned by the group store.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct GroupId(pub u64);

impl Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for ElectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed preference of one student for another, within one election.
///
/// A score of 0 means no preference (or avoid), higher is stronger.
/// Votes do not need to be reciprocated.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub struct Vote {
    pub voter: StudentId,
    pub candidate: StudentId,
    pub score: u32,
}

// ******** Output data structures *********

/// The result of partitioning, before anything is persisted.
#[derive(PartialEq, Debug, Clone)]
pub struct PartitionOutcome {
    /// Groups of student indexes into the affinity matrix. Never empty.
    pub groups: Vec<Vec<usize>>,
    /// Best intra-group affinity sum found across the restarts, before rebalancing.
    pub quality_score: f64,
    /// Intra-group affinity sum of the returned (rebalanced) groups.
    pub rebalanced_score: f64,
}

/// Where the name of a group came from.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum NameSource {
    Collaborator,
    /// The naming collaborator was missing, failed, timed out or answered
    /// with an empty name. The name is built from the member initials.
    InitialsFallback,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    pub name_source: NameSource,
    pub members: Vec<StudentId>,
}

/// How much each student got of what they asked for.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct SatisfactionReport {
    /// Sum of the scores each student gave to their realized groupmates.
    pub per_student: BTreeMap<StudentId, u64>,
    pub total: u64,
    /// `total` divided by the number of students, 0 when there are none.
    pub average: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct GroupingResult {
    pub election_id: ElectionId,
    /// Each student mapped to the canonical id of their persisted group.
    pub assignments: BTreeMap<StudentId, GroupId>,
    /// Groups ordered by their smallest member.
    pub groups: Vec<GroupSummary>,
    pub quality_score: f64,
    pub highlighted_groups: BTreeSet<GroupId>,
    pub satisfaction: SatisfactionReport,
}

// ******** Errors *********

/// Error type of the collaborator stores.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// The store operation that was running when a persistence error happened.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum PersistStage {
    ReadingVotes,
    ClearingGroups,
    WritingGroups,
    NamingGroups,
    ReadingGroups,
}

impl PersistStage {
    /// True if the groups of the election may already have been modified.
    pub fn may_have_written(&self) -> bool {
        !matches!(self, PersistStage::ReadingVotes)
    }
}

impl Display for PersistStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PersistStage::ReadingVotes => "reading votes",
            PersistStage::ClearingGroups => "clearing previous groups",
            PersistStage::WritingGroups => "writing groups",
            PersistStage::NamingGroups => "naming groups",
            PersistStage::ReadingGroups => "reading back groups",
        };
        write!(f, "{}", s)
    }
}

/// Errors that prevent a grouping from completing.
///
/// Naming failures are not part of this list: they are always recovered
/// with the initials fallback.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GroupingErrors {
    #[snafu(display("Invalid grouping input: {reason}"))]
    InvalidInput { reason: String },

    #[snafu(display(
        "Not enough students to form a group: {students} students for groups of {group_size}"
    ))]
    InsufficientParticipants { students: usize, group_size: usize },

    #[snafu(display("Clustering failed for all {attempts} restarts: {reason}"))]
    ClusteringFailure { attempts: u32, reason: String },

    #[snafu(display("Store failure for election {election_id} while {stage}"))]
    Persistence {
        election_id: ElectionId,
        stage: PersistStage,
        source: StoreError,
    },

    #[snafu(display(
        "Election {election_id} has inconsistent groups after writing: {} students without a group",
        missing.len()
    ))]
    InconsistentGroups {
        election_id: ElectionId,
        missing: Vec<StudentId>,
    },
}

impl GroupingErrors {
    /// True when the error was raised before any group of the election was touched.
    pub fn is_write_free(&self) -> bool {
        match self {
            GroupingErrors::InvalidInput { .. }
            | GroupingErrors::InsufficientParticipants { .. }
            | GroupingErrors::ClusteringFailure { .. } => true,
            GroupingErrors::Persistence { stage, .. } => !stage.may_have_written(),
            GroupingErrors::InconsistentGroups { .. } => false,
        }
    }
}

// ********* Configuration **********

/// Policy for reciprocated preferences.
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum MutualBoost {
    Disabled,
    /// Both directed scores of a pair are multiplied by this factor before
    /// symmetrization, when both are nonzero. Must be finite and positive.
    Factor(f64),
}

#[derive(PartialEq, Debug, Clone)]
pub struct GroupingRules {
    /// Maximum number of students in a group.
    pub group_size: usize,
    /// Number of clustering restarts. Restart `r` is seeded with `base_seed + r`,
    /// wrapping around past `u64::MAX`.
    pub restarts: u32,
    pub base_seed: u64,
    /// Upper bound on the k-means iterations of one restart.
    pub max_iterations: u32,
    pub mutual_boost: MutualBoost,
    /// Longest wait for the naming collaborator, per group.
    pub naming_timeout: Duration,
}

impl GroupingRules {
    pub const DEFAULT_RULES: GroupingRules = GroupingRules {
        group_size: 4,
        restarts: 5,
        base_seed: 42,
        max_iterations: 300,
        mutual_boost: MutualBoost::Factor(1.5),
        naming_timeout: Duration::from_secs(5),
    };

    pub fn with_group_size(&self, group_size: usize) -> GroupingRules {
        GroupingRules {
            group_size,
            ..self.clone()
        }
    }
}
