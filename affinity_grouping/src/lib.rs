mod config;

pub mod builder;
pub mod manual;
pub mod naming;
pub mod partition;
pub mod scoring;
pub mod store;

use log::{debug, info, warn};
use snafu::ResultExt;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

pub use crate::builder::{AffinityMatrix, MatrixBuilder};
pub use crate::config::*;
pub use crate::naming::{GroupNamer, NamingError};
pub use crate::store::{GroupStore, MemoryStore, StudentDirectory, VoteStore};

/// Builds the affinity matrix of the students and partitions it.
///
/// This is the pure part of a grouping run: nothing is read or written.
pub fn compute_partition(
    student_ids: &[StudentId],
    votes: &[Vote],
    rules: &GroupingRules,
) -> Result<(AffinityMatrix, PartitionOutcome), GroupingErrors> {
    let mut builder = MatrixBuilder::new(rules)?.students(student_ids)?;
    let used = builder.add_votes(votes);
    debug!(
        "compute_partition: {} of {} votes between participants",
        used,
        votes.len()
    );
    let matrix = builder.build();
    let outcome = partition::partition(&matrix, rules)?;
    Ok((matrix, outcome))
}

/// Runs the complete grouping of an election against a store.
///
/// Runs for the same election are serialized by the engine. Runs for
/// different elections do not share any state. The lock of an election only
/// lives while runs for it are in progress.
pub struct GroupingEngine<S> {
    store: Arc<S>,
    namer: Option<Arc<dyn GroupNamer>>,
    rules: GroupingRules,
    election_locks: Mutex<HashMap<ElectionId, Arc<Mutex<()>>>>,
}

impl<S: VoteStore + GroupStore + StudentDirectory> GroupingEngine<S> {
    /// An engine without naming collaborator: groups are named after their initials.
    pub fn new(store: Arc<S>, rules: &GroupingRules) -> GroupingEngine<S> {
        GroupingEngine {
            store,
            namer: None,
            rules: rules.clone(),
            election_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_namer(self, namer: Arc<dyn GroupNamer>) -> GroupingEngine<S> {
        GroupingEngine {
            namer: Some(namer),
            ..self
        }
    }

    pub fn rules(&self) -> &GroupingRules {
        &self.rules
    }

    fn election_lock(&self, election_id: ElectionId) -> Arc<Mutex<()>> {
        let mut locks = self
            .election_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(election_id).or_default())
    }

    /// Forgets the lock of an election once no other run holds or waits on it.
    fn release_election_lock(&self, election_id: ElectionId, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self
            .election_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(&election_id)
            .map_or(false, |l| Arc::strong_count(l) == 1)
        {
            locks.remove(&election_id);
        }
    }

    #[cfg(test)]
    fn tracked_elections(&self) -> usize {
        self.election_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Groups the students of an election, persists the groups and scores them.
    ///
    /// Arguments:
    /// * `election_id` the election whose votes are used and whose groups are replaced
    /// * `student_ids` the participants, without duplicates
    /// * `group_size` the maximum number of students per group
    ///
    /// Invalid input, too few students and clustering failures are reported
    /// before the groups of the election are touched.
    pub fn run_grouping(
        &self,
        election_id: ElectionId,
        student_ids: &[StudentId],
        group_size: usize,
    ) -> Result<GroupingResult, GroupingErrors> {
        info!(
            "run_grouping: election {}: {} students, groups of {}",
            election_id,
            student_ids.len(),
            group_size
        );
        let rules = self.rules.with_group_size(group_size);
        validate_input(student_ids, group_size)?;

        let lock = self.election_lock(election_id);
        let res = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.run_exclusive(election_id, student_ids, &rules)
        };
        self.release_election_lock(election_id, lock);
        res
    }

    // Runs with the lock of the election held.
    fn run_exclusive(
        &self,
        election_id: ElectionId,
        student_ids: &[StudentId],
        rules: &GroupingRules,
    ) -> Result<GroupingResult, GroupingErrors> {
        let votes = self.store.get_votes(election_id).context(PersistenceSnafu {
            election_id,
            stage: PersistStage::ReadingVotes,
        })?;
        let (_, outcome) = compute_partition(student_ids, &votes, rules)?;

        // Everything above is free of writes.
        let member_groups: Vec<Vec<StudentId>> = outcome
            .groups
            .iter()
            .map(|g| g.iter().map(|idx| student_ids[*idx]).collect())
            .collect();
        let group_ids = self.store.replace_groups(election_id, &member_groups)?;
        info!(
            "run_grouping: election {}: {} groups written",
            election_id,
            group_ids.len()
        );

        let mut names: HashMap<GroupId, (String, NameSource)> = HashMap::new();
        for (gid, members) in group_ids.iter().zip(member_groups.iter()) {
            let first_names: Vec<String> = members
                .iter()
                .filter_map(|sid| self.store.first_name(*sid))
                .collect();
            let (name, source) =
                naming::choose_group_name(self.namer.as_ref(), &first_names, rules.naming_timeout);
            self.store
                .set_group_name(*gid, &name)
                .context(PersistenceSnafu {
                    election_id,
                    stage: PersistStage::NamingGroups,
                })?;
            names.insert(*gid, (name, source));
        }

        let (assignments, mut groups) = self.read_back(election_id, student_ids, &names)?;
        groups.sort_by_key(|g| g.members.first().cloned());

        let satisfaction = scoring::satisfaction(&assignments, &votes);
        let highlighted_groups = scoring::highlighted_groups(&assignments, &votes);
        info!(
            "run_grouping: election {}: quality {:.3}, satisfaction total {} average {:.3}, {} groups highlighted",
            election_id,
            outcome.quality_score,
            satisfaction.total,
            satisfaction.average,
            highlighted_groups.len()
        );

        Ok(GroupingResult {
            election_id,
            assignments,
            groups,
            quality_score: outcome.quality_score,
            highlighted_groups,
            satisfaction,
        })
    }

    /// Reads the persisted groups again, to work with the canonical group ids.
    fn read_back(
        &self,
        election_id: ElectionId,
        student_ids: &[StudentId],
        names: &HashMap<GroupId, (String, NameSource)>,
    ) -> Result<(BTreeMap<StudentId, GroupId>, Vec<GroupSummary>), GroupingErrors> {
        let participants: HashSet<StudentId> = student_ids.iter().cloned().collect();
        let mut assignments: BTreeMap<StudentId, GroupId> = BTreeMap::new();
        let mut groups: Vec<GroupSummary> = Vec::new();

        let gids = self
            .store
            .list_groups(election_id)
            .context(PersistenceSnafu {
                election_id,
                stage: PersistStage::ReadingGroups,
            })?;
        for gid in gids {
            let mut members = self.store.list_members(gid).context(PersistenceSnafu {
                election_id,
                stage: PersistStage::ReadingGroups,
            })?;
            members.sort();
            for sid in members.iter() {
                if participants.contains(sid) {
                    assignments.insert(*sid, gid);
                } else {
                    warn!(
                        "run_grouping: election {}: group {} contains non participant {}",
                        election_id, gid, sid
                    );
                }
            }
            let (name, name_source) = names
                .get(&gid)
                .cloned()
                .unwrap_or_else(|| (naming::UNNAMED_GROUP.to_string(), NameSource::InitialsFallback));
            groups.push(GroupSummary {
                id: gid,
                name,
                name_source,
                members,
            });
        }

        let missing: Vec<StudentId> = student_ids
            .iter()
            .filter(|sid| !assignments.contains_key(sid))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return InconsistentGroupsSnafu {
                election_id,
                missing,
            }
            .fail();
        }
        Ok((assignments, groups))
    }
}

fn validate_input(student_ids: &[StudentId], group_size: usize) -> Result<(), GroupingErrors> {
    if student_ids.is_empty() {
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
    let mut seen: HashSet<StudentId> = HashSet::with_capacity(student_ids.len());
    for sid in student_ids.iter() {
        if !seen.insert(*sid) {
            return InvalidInputSnafu {
                reason: format!("student {} is listed more than once", sid),
            }
            .fail();
        }
    }
    if student_ids.len() < group_size {
        return InsufficientParticipantsSnafu {
            students: student_ids.len(),
            group_size,
        }
        .fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::ServiceFailedSnafu;
    use std::collections::BTreeSet;
    use std::thread;

    const ELECTION: ElectionId = ElectionId(7);

    fn vote(voter: u64, candidate: u64, score: u32) -> Vote {
        Vote {
            voter: StudentId(voter),
            candidate: StudentId(candidate),
            score,
        }
    }

    fn ids(v: &[u64]) -> Vec<StudentId> {
        v.iter().map(|x| StudentId(*x)).collect()
    }

    fn store_with(names: &[(u64, &str)], votes: &[Vote]) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for (sid, name) in names {
            store.add_student(StudentId(*sid), name).unwrap();
        }
        for v in votes {
            store.cast_vote(ELECTION, v).unwrap();
        }
        Arc::new(store)
    }

    fn reciprocal_store() -> Arc<MemoryStore> {
        store_with(
            &[(1, "Alice"), (2, "Bob"), (3, "Carl"), (4, "Dana")],
            &[
                vote(1, 2, 10),
                vote(2, 1, 10),
                vote(3, 4, 10),
                vote(4, 3, 10),
                vote(1, 3, 0),
                vote(1, 4, 0),
                vote(2, 3, 0),
                vote(2, 4, 0),
                vote(3, 1, 0),
                vote(4, 2, 0),
            ],
        )
    }

    struct Broken;

    impl GroupNamer for Broken {
        fn name_group(&self, _initials: &[String]) -> Result<String, NamingError> {
            ServiceFailedSnafu {
                message: "no credentials",
            }
            .fail()
        }
    }

    struct Mascot;

    impl GroupNamer for Mascot {
        fn name_group(&self, initials: &[String]) -> Result<String, NamingError> {
            Ok(format!("The {} Otters", initials.concat()))
        }
    }

    fn check_contract(res: &GroupingResult, students: &[StudentId], group_size: usize) {
        let assigned: BTreeSet<StudentId> = res.assignments.keys().cloned().collect();
        let expected: BTreeSet<StudentId> = students.iter().cloned().collect();
        assert_eq!(assigned, expected);
        let mut all_members: Vec<StudentId> =
            res.groups.iter().flat_map(|g| g.members.clone()).collect();
        all_members.sort();
        assert_eq!(all_members, expected.into_iter().collect::<Vec<StudentId>>());
        assert_eq!(
            res.groups.len(),
            partition::number_of_groups(students.len(), group_size)
        );
        for g in res.groups.iter() {
            assert!(!g.members.is_empty() && g.members.len() <= group_size);
            assert!(!g.name.is_empty());
        }
    }

    #[test]
    fn reciprocal_pairs_end_to_end() {
        let _ = env_logger::try_init();
        let store = reciprocal_store();
        let engine = GroupingEngine::new(store.clone(), &GroupingRules::DEFAULT_RULES);
        let students = ids(&[1, 2, 3, 4]);
        let res = engine.run_grouping(ELECTION, &students, 2).unwrap();
        check_contract(&res, &students, 2);

        let members: Vec<Vec<StudentId>> = res.groups.iter().map(|g| g.members.clone()).collect();
        assert_eq!(members, vec![ids(&[1, 2]), ids(&[3, 4])]);
        assert_eq!(res.satisfaction.total, 40);
        assert_eq!(res.satisfaction.average, 10.0);
        assert_eq!(res.quality_score, 30.0);
        let all: BTreeSet<GroupId> = res.groups.iter().map(|g| g.id).collect();
        assert_eq!(res.highlighted_groups, all);

        let names: Vec<&str> = res.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["AB", "CD"]);
        assert_eq!(
            store.group_name(res.groups[0].id).unwrap(),
            Some("AB".to_string())
        );
        assert_eq!(res.assignments[&StudentId(3)], res.groups[1].id);
    }

    #[test]
    fn uneven_remainder() {
        let store = store_with(
            &[(1, "A"), (2, "B"), (3, "C"), (4, "D"), (5, "E")],
            &[vote(1, 2, 3), vote(4, 5, 2), vote(3, 1, 1)],
        );
        let engine = GroupingEngine::new(store, &GroupingRules::DEFAULT_RULES);
        let students = ids(&[1, 2, 3, 4, 5]);
        let res = engine.run_grouping(ELECTION, &students, 2).unwrap();
        check_contract(&res, &students, 2);
        assert_eq!(res.groups.iter().filter(|g| g.members.len() == 1).count(), 1);
    }

    #[test]
    fn no_votes_cast() {
        let store = store_with(&[(1, "A"), (2, "B"), (3, "C"), (4, "D"), (5, "E"), (6, "F")], &[]);
        let engine = GroupingEngine::new(store, &GroupingRules::DEFAULT_RULES);
        let students = ids(&[1, 2, 3, 4, 5, 6]);
        let res = engine.run_grouping(ELECTION, &students, 4).unwrap();
        check_contract(&res, &students, 4);
        assert_eq!(res.quality_score, 0.0);
        assert_eq!(res.satisfaction.total, 0);
        assert_eq!(res.satisfaction.average, 0.0);
        assert!(res.highlighted_groups.is_empty());
    }

    #[test]
    fn broken_namer_falls_back_to_initials() {
        let engine = GroupingEngine::new(reciprocal_store(), &GroupingRules::DEFAULT_RULES)
            .with_namer(Arc::new(Broken));
        let res = engine.run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2).unwrap();
        for g in res.groups.iter() {
            assert_eq!(g.name_source, NameSource::InitialsFallback);
        }
        let names: Vec<&str> = res.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["AB", "CD"]);
    }

    #[test]
    fn namer_names_groups() {
        let engine = GroupingEngine::new(reciprocal_store(), &GroupingRules::DEFAULT_RULES)
            .with_namer(Arc::new(Mascot));
        let res = engine.run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2).unwrap();
        assert_eq!(res.groups[0].name, "The AB Otters");
        assert_eq!(res.groups[0].name_source, NameSource::Collaborator);
    }

    #[test]
    fn students_without_first_name_get_an_unnamed_group() {
        let store = store_with(&[], &[]);
        let engine = GroupingEngine::new(store, &GroupingRules::DEFAULT_RULES);
        let res = engine.run_grouping(ELECTION, &ids(&[1, 2]), 2).unwrap();
        assert_eq!(res.groups[0].name, naming::UNNAMED_GROUP);
    }

    #[test]
    fn insufficient_participants_write_nothing() {
        let store = reciprocal_store();
        let engine = GroupingEngine::new(store.clone(), &GroupingRules::DEFAULT_RULES);
        let first = engine.run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2).unwrap();

        let err = engine
            .run_grouping(ELECTION, &ids(&[1, 2, 3]), 4)
            .unwrap_err();
        assert!(matches!(
            err,
            GroupingErrors::InsufficientParticipants {
                students: 3,
                group_size: 4
            }
        ));
        assert!(err.is_write_free());
        let mut kept: Vec<GroupId> = first.groups.iter().map(|g| g.id).collect();
        kept.sort();
        let mut current = store.list_groups(ELECTION).unwrap();
        current.sort();
        assert_eq!(current, kept);
    }

    #[test]
    fn clustering_failure_writes_nothing() {
        let store = reciprocal_store();
        let engine = GroupingEngine::new(store.clone(), &GroupingRules::DEFAULT_RULES);
        let first = engine.run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2).unwrap();
        let mut kept: Vec<GroupId> = first.groups.iter().map(|g| g.id).collect();
        kept.sort();

        // Boosted mutual votes overflow to infinite affinities: every restart fails.
        let rules = GroupingRules {
            mutual_boost: MutualBoost::Factor(f64::MAX),
            ..GroupingRules::DEFAULT_RULES
        };
        let overflowing = GroupingEngine::new(store.clone(), &rules);
        let err = overflowing
            .run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2)
            .unwrap_err();
        assert!(
            matches!(err, GroupingErrors::ClusteringFailure { attempts: 5, .. }),
            "{}",
            err
        );
        assert!(err.is_write_free());

        let mut current = store.list_groups(ELECTION).unwrap();
        current.sort();
        assert_eq!(current, kept);
        for g in first.groups.iter() {
            assert_eq!(store.list_members(g.id).unwrap(), g.members);
            assert_eq!(store.group_name(g.id).unwrap(), Some(g.name.clone()));
        }
    }

    #[test]
    fn invalid_boost_is_rejected_before_writes() {
        let store = reciprocal_store();
        let rules = GroupingRules {
            mutual_boost: MutualBoost::Factor(-2.0),
            ..GroupingRules::DEFAULT_RULES
        };
        let engine = GroupingEngine::new(store.clone(), &rules);
        let err = engine
            .run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2)
            .unwrap_err();
        assert!(matches!(err, GroupingErrors::InvalidInput { .. }));
        assert!(store.list_groups(ELECTION).unwrap().is_empty());
    }

    #[test]
    fn election_locks_are_released() {
        let engine = GroupingEngine::new(reciprocal_store(), &GroupingRules::DEFAULT_RULES);
        for eid in 0..10 {
            let _ = engine.run_grouping(ElectionId(eid), &ids(&[1, 2, 3, 4]), 2);
        }
        let _ = engine.run_grouping(ELECTION, &ids(&[1, 2, 3]), 4);
        assert_eq!(engine.tracked_elections(), 0);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let engine = GroupingEngine::new(reciprocal_store(), &GroupingRules::DEFAULT_RULES);
        for (students, size) in [
            (vec![], 2),
            (ids(&[1, 2, 3]), 0),
            (ids(&[1, 2, 2, 3]), 2),
        ] {
            let err = engine.run_grouping(ELECTION, &students, size).unwrap_err();
            assert!(matches!(err, GroupingErrors::InvalidInput { .. }), "{}", err);
            assert!(err.is_write_free());
        }
    }

    #[test]
    fn votes_from_outsiders_are_ignored() {
        let store = store_with(
            &[(1, "A"), (2, "B"), (3, "C"), (4, "D")],
            &[vote(1, 2, 5), vote(9, 1, 50), vote(3, 9, 50)],
        );
        let engine = GroupingEngine::new(store, &GroupingRules::DEFAULT_RULES);
        let res = engine.run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2).unwrap();
        assert!(!res.assignments.contains_key(&StudentId(9)));
        assert!(res.satisfaction.total <= 5);
    }

    #[test]
    fn rerun_replaces_groups_with_the_same_quality() {
        let store = reciprocal_store();
        let engine = GroupingEngine::new(store.clone(), &GroupingRules::DEFAULT_RULES);
        let students = ids(&[1, 2, 3, 4]);
        let first = engine.run_grouping(ELECTION, &students, 2).unwrap();
        let second = engine.run_grouping(ELECTION, &students, 2).unwrap();
        assert_eq!(first.quality_score, second.quality_score);
        assert_eq!(store.list_groups(ELECTION).unwrap().len(), 2);
        assert!(first
            .groups
            .iter()
            .all(|g| store.list_members(g.id).is_err()));
    }

    #[test]
    fn concurrent_runs_on_one_election_do_not_interleave() {
        let store = reciprocal_store();
        let engine = Arc::new(GroupingEngine::new(
            store.clone(),
            &GroupingRules::DEFAULT_RULES,
        ));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || engine.run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
        assert_eq!(store.list_groups(ELECTION).unwrap().len(), 2);
    }

    /// Delegates to a memory store, but refuses memberships for one student.
    struct FlakyStore {
        inner: MemoryStore,
        refused: StudentId,
    }

    impl VoteStore for FlakyStore {
        fn get_votes(&self, election_id: ElectionId) -> Result<Vec<Vote>, StoreError> {
            self.inner.get_votes(election_id)
        }
    }

    impl StudentDirectory for FlakyStore {
        fn first_name(&self, student_id: StudentId) -> Option<String> {
            self.inner.first_name(student_id)
        }
    }

    impl GroupStore for FlakyStore {
        fn delete_groups(&self, election_id: ElectionId) -> Result<usize, StoreError> {
            self.inner.delete_groups(election_id)
        }
        fn create_group(&self, election_id: ElectionId) -> Result<GroupId, StoreError> {
            self.inner.create_group(election_id)
        }
        fn add_member(&self, group_id: GroupId, student_id: StudentId) -> Result<(), StoreError> {
            if student_id == self.refused {
                return Err("constraint violation".into());
            }
            self.inner.add_member(group_id, student_id)
        }
        fn set_group_name(&self, group_id: GroupId, name: &str) -> Result<(), StoreError> {
            self.inner.set_group_name(group_id, name)
        }
        fn list_groups(&self, election_id: ElectionId) -> Result<Vec<GroupId>, StoreError> {
            self.inner.list_groups(election_id)
        }
        fn list_members(&self, group_id: GroupId) -> Result<Vec<StudentId>, StoreError> {
            self.inner.list_members(group_id)
        }
    }

    #[test]
    fn failed_writes_are_reported_as_partial() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            refused: StudentId(4),
        };
        let engine = GroupingEngine::new(Arc::new(store), &GroupingRules::DEFAULT_RULES);
        let err = engine
            .run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2)
            .unwrap_err();
        match err {
            GroupingErrors::Persistence { stage, .. } => {
                assert_eq!(stage, PersistStage::WritingGroups)
            }
            e => panic!("unexpected error {:?}", e),
        }
        assert!(!engine
            .run_grouping(ELECTION, &ids(&[1, 2, 3, 4]), 2)
            .unwrap_err()
            .is_write_free());
    }

    #[test]
    fn compute_partition_is_pure() {
        let votes = [vote(1, 2, 10), vote(2, 1, 10), vote(3, 4, 10), vote(4, 3, 10)];
        let rules = GroupingRules::DEFAULT_RULES.with_group_size(2);
        let (matrix, outcome) = compute_partition(&ids(&[1, 2, 3, 4]), &votes, &rules).unwrap();
        assert_eq!(matrix.len(), 4);
        assert_eq!(outcome.quality_score, 30.0);
    }
}
