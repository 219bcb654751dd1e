//! Collaborator interfaces for reading votes and persisting groups, and an
//! in-memory implementation of all of them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use log::debug;
use snafu::ResultExt;

pub use crate::config::*;

pub trait VoteStore {
    /// All the votes cast in the election, decoded into typed records.
    fn get_votes(&self, election_id: ElectionId) -> Result<Vec<Vote>, StoreError>;
}

/// Knows the first names of the students. Used to name the groups.
pub trait StudentDirectory {
    fn first_name(&self, student_id: StudentId) -> Option<String>;
}

pub trait GroupStore {
    /// Deletes all the groups of the election and their memberships.
    /// Returns the number of deleted groups.
    fn delete_groups(&self, election_id: ElectionId) -> Result<usize, StoreError>;

    fn create_group(&self, election_id: ElectionId) -> Result<GroupId, StoreError>;

    fn add_member(&self, group_id: GroupId, student_id: StudentId) -> Result<(), StoreError>;

    fn set_group_name(&self, group_id: GroupId, name: &str) -> Result<(), StoreError>;

    fn list_groups(&self, election_id: ElectionId) -> Result<Vec<GroupId>, StoreError>;

    fn list_members(&self, group_id: GroupId) -> Result<Vec<StudentId>, StoreError>;

    /// Replaces all the groups of the election with the given ones.
    /// Returns the new group ids, in the order of `groups`.
    ///
    /// The default implementation deletes, then inserts group by group. A
    /// failure after the deletion leaves the election partially grouped.
    /// Stores that support transactions should override it and commit once.
    fn replace_groups(
        &self,
        election_id: ElectionId,
        groups: &[Vec<StudentId>],
    ) -> Result<Vec<GroupId>, GroupingErrors> {
        self.delete_groups(election_id).context(PersistenceSnafu {
            election_id,
            stage: PersistStage::ClearingGroups,
        })?;
        let mut ids: Vec<GroupId> = Vec::with_capacity(groups.len());
        for members in groups.iter() {
            let gid = self.create_group(election_id).context(PersistenceSnafu {
                election_id,
                stage: PersistStage::WritingGroups,
            })?;
            for sid in members.iter() {
                self.add_member(gid, *sid).context(PersistenceSnafu {
                    election_id,
                    stage: PersistStage::WritingGroups,
                })?;
            }
            ids.push(gid);
        }
        Ok(ids)
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
struct StoredGroup {
    election_id: ElectionId,
    name: Option<String>,
    members: Vec<StudentId>,
}

#[derive(Debug, Default)]
struct MemoryData {
    first_names: HashMap<StudentId, String>,
    // One score per (election, voter, candidate).
    votes: BTreeMap<(ElectionId, StudentId, StudentId), u32>,
    groups: BTreeMap<GroupId, StoredGroup>,
    last_group_id: u64,
}

impl MemoryData {
    fn new_group_id(&mut self) -> GroupId {
        self.last_group_id += 1;
        GroupId(self.last_group_id)
    }
}

/// A store that keeps everything in memory, behind a mutex.
///
/// Group replacement is atomic: it either fully happens or does not happen.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn data(&self) -> Result<MutexGuard<'_, MemoryData>, StoreError> {
        self.data
            .lock()
            .map_err(|_| "the memory store lock is poisoned".into())
    }

    pub fn add_student(&self, student_id: StudentId, first_name: &str) -> Result<(), StoreError> {
        self.data()?
            .first_names
            .insert(student_id, first_name.to_string());
        Ok(())
    }

    /// Records a vote. A vote for the same candidate by the same voter in the
    /// same election replaces the previous score.
    ///
    /// Returns true if a previous vote was replaced.
    pub fn cast_vote(&self, election_id: ElectionId, vote: &Vote) -> Result<bool, StoreError> {
        let previous = self
            .data()?
            .votes
            .insert((election_id, vote.voter, vote.candidate), vote.score);
        Ok(previous.is_some())
    }

    /// Removes all the votes of a voter in an election. Returns how many were removed.
    pub fn delete_votes_by_voter(
        &self,
        election_id: ElectionId,
        voter: StudentId,
    ) -> Result<usize, StoreError> {
        let mut data = self.data()?;
        let before = data.votes.len();
        data.votes
            .retain(|(eid, vid, _), _| !(*eid == election_id && *vid == voter));
        Ok(before - data.votes.len())
    }

    pub fn group_name(&self, group_id: GroupId) -> Result<Option<String>, StoreError> {
        Ok(self
            .data()?
            .groups
            .get(&group_id)
            .and_then(|g| g.name.clone()))
    }
}

impl VoteStore for MemoryStore {
    fn get_votes(&self, election_id: ElectionId) -> Result<Vec<Vote>, StoreError> {
        let data = self.data()?;
        Ok(data
            .votes
            .iter()
            .filter(|((eid, _, _), _)| *eid == election_id)
            .map(|((_, voter, candidate), score)| Vote {
                voter: *voter,
                candidate: *candidate,
                score: *score,
            })
            .collect())
    }
}

impl StudentDirectory for MemoryStore {
    fn first_name(&self, student_id: StudentId) -> Option<String> {
        self.data().ok()?.first_names.get(&student_id).cloned()
    }
}

impl GroupStore for MemoryStore {
    fn delete_groups(&self, election_id: ElectionId) -> Result<usize, StoreError> {
        let mut data = self.data()?;
        let before = data.groups.len();
        data.groups.retain(|_, g| g.election_id != election_id);
        Ok(before - data.groups.len())
    }

    fn create_group(&self, election_id: ElectionId) -> Result<GroupId, StoreError> {
        let mut data = self.data()?;
        let gid = data.new_group_id();
        data.groups.insert(
            gid,
            StoredGroup {
                election_id,
                name: None,
                members: Vec::new(),
            },
        );
        Ok(gid)
    }

    fn add_member(&self, group_id: GroupId, student_id: StudentId) -> Result<(), StoreError> {
        let mut data = self.data()?;
        let group = data
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| format!("unknown group {}", group_id))?;
        if !group.members.contains(&student_id) {
            group.members.push(student_id);
        }
        Ok(())
    }

    fn set_group_name(&self, group_id: GroupId, name: &str) -> Result<(), StoreError> {
        let mut data = self.data()?;
        let group = data
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| format!("unknown group {}", group_id))?;
        group.name = Some(name.to_string());
        Ok(())
    }

    fn list_groups(&self, election_id: ElectionId) -> Result<Vec<GroupId>, StoreError> {
        Ok(self
            .data()?
            .groups
            .iter()
            .filter(|(_, g)| g.election_id == election_id)
            .map(|(gid, _)| *gid)
            .collect())
    }

    fn list_members(&self, group_id: GroupId) -> Result<Vec<StudentId>, StoreError> {
        let data = self.data()?;
        let group = data
            .groups
            .get(&group_id)
            .ok_or_else(|| format!("unknown group {}", group_id))?;
        Ok(group.members.clone())
    }

    fn replace_groups(
        &self,
        election_id: ElectionId,
        groups: &[Vec<StudentId>],
    ) -> Result<Vec<GroupId>, GroupingErrors> {
        // A single critical section: readers never see a half-written election.
        let mut data = self.data().context(PersistenceSnafu {
            election_id,
            stage: PersistStage::ClearingGroups,
        })?;
        data.groups.retain(|_, g| g.election_id != election_id);
        let mut ids: Vec<GroupId> = Vec::with_capacity(groups.len());
        for members in groups.iter() {
            let gid = data.new_group_id();
            data.groups.insert(
                gid,
                StoredGroup {
                    election_id,
                    name: None,
                    members: members.clone(),
                },
            );
            ids.push(gid);
        }
        debug!(
            "MemoryStore::replace_groups: election {}: {} groups written",
            election_id,
            ids.len()
        );
        Ok(ids)
    }
}
