//! Participant roster adapter
//!
//! The roster store is external and authoritative. The manager only consumes
//! its snapshots and deltas; [`RosterTracker`] turns them into joined / left
//! sets and remembers who already left so stale messages can be dropped.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One session participant, as published by the roster store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    /// One per session join; distinguishes tabs of the same user
    pub participant_id: String,
    /// The human behind the participant
    pub user_id: String,
    pub display_name: String,
}

impl ParticipantRef {
    pub fn new(
        participant_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// A change published by the roster store
#[derive(Debug, Clone, PartialEq)]
pub enum RosterUpdate {
    /// Full list of current participants
    Snapshot(Vec<ParticipantRef>),
    /// A single participant joined
    Joined(ParticipantRef),
    /// A single participant left
    Left(String),
}

/// Result of applying a snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterDiff {
    /// True for the first snapshot seen: everyone in it was already present
    /// when the local participant joined
    pub baseline: bool,
    pub joined: Vec<ParticipantRef>,
    pub left: Vec<String>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Tracks who is present, excluding the local participant
#[derive(Debug, Default)]
pub struct RosterTracker {
    present: HashMap<String, ParticipantRef>,
    departed: HashSet<String>,
    baseline_taken: bool,
}

impl RosterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a full snapshot. Participants that already left stay gone even if
    /// a stale snapshot still lists them.
    pub fn apply_snapshot(
        &mut self,
        snapshot: Vec<ParticipantRef>,
        local_participant_id: &str,
    ) -> RosterDiff {
        let baseline = !self.baseline_taken;
        self.baseline_taken = true;

        let mut next: HashMap<String, ParticipantRef> = HashMap::new();
        let mut joined = Vec::new();

        for participant in snapshot {
            let id = participant.participant_id.clone();
            if id == local_participant_id
                || self.departed.contains(&id)
                || next.contains_key(&id)
            {
                continue;
            }
            if !self.present.contains_key(&id) {
                joined.push(participant.clone());
            }
            next.insert(id, participant);
        }

        let mut left: Vec<String> = self
            .present
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        left.sort();

        for id in &left {
            self.departed.insert(id.clone());
        }
        self.present = next;

        RosterDiff {
            baseline,
            joined,
            left,
        }
    }

    /// Apply a join delta. Returns the participant if it is new.
    pub fn apply_joined(
        &mut self,
        participant: ParticipantRef,
        local_participant_id: &str,
    ) -> Option<ParticipantRef> {
        let id = participant.participant_id.clone();
        if id == local_participant_id
            || self.departed.contains(&id)
            || self.present.contains_key(&id)
        {
            return None;
        }
        self.present.insert(id, participant.clone());
        Some(participant)
    }

    /// Apply a leave delta. Returns true if the participant was present.
    pub fn apply_left(&mut self, participant_id: &str) -> bool {
        self.departed.insert(participant_id.to_string());
        self.present.remove(participant_id).is_some()
    }

    pub fn has_departed(&self, participant_id: &str) -> bool {
        self.departed.contains(participant_id)
    }

    pub fn get(&self, participant_id: &str) -> Option<&ParticipantRef> {
        self.present.get(participant_id)
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: &str) -> ParticipantRef {
        ParticipantRef::new(id, format!("user-{}", id), id.to_uppercase())
    }

    #[test]
    fn test_first_snapshot_is_baseline() {
        let mut roster = RosterTracker::new();
        let diff = roster.apply_snapshot(vec![p("a"), p("me"), p("b")], "me");
        assert!(diff.baseline);
        assert_eq!(diff.joined, vec![p("a"), p("b")]);
        assert!(diff.left.is_empty());
        assert_eq!(roster.len(), 2);

        let diff = roster.apply_snapshot(vec![p("a"), p("me"), p("b"), p("c")], "me");
        assert!(!diff.baseline);
        assert_eq!(diff.joined, vec![p("c")]);
    }

    #[test]
    fn test_snapshot_detects_departures() {
        let mut roster = RosterTracker::new();
        roster.apply_snapshot(vec![p("a"), p("b"), p("c")], "me");
        let diff = roster.apply_snapshot(vec![p("b")], "me");
        assert_eq!(diff.left, vec!["a".to_string(), "c".to_string()]);
        assert!(roster.has_departed("a"));
        assert!(!roster.has_departed("b"));
    }

    #[test]
    fn test_departed_never_rejoin_from_stale_snapshot() {
        let mut roster = RosterTracker::new();
        roster.apply_snapshot(vec![p("a")], "me");
        assert!(roster.apply_left("a"));

        let diff = roster.apply_snapshot(vec![p("a")], "me");
        assert!(diff.joined.is_empty());
        assert!(roster.get("a").is_none());
    }

    #[test]
    fn test_duplicate_entries_collapse() {
        let mut roster = RosterTracker::new();
        let diff = roster.apply_snapshot(vec![p("a"), p("a")], "me");
        assert_eq!(diff.joined.len(), 1);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_join_delta_before_baseline() {
        let mut roster = RosterTracker::new();
        assert_eq!(roster.apply_joined(p("a"), "me"), Some(p("a")));
        assert_eq!(roster.apply_joined(p("a"), "me"), None);

        // Already known, so the baseline does not report it again
        let diff = roster.apply_snapshot(vec![p("a"), p("b")], "me");
        assert!(diff.baseline);
        assert_eq!(diff.joined, vec![p("b")]);
    }

    #[test]
    fn test_left_unknown_participant() {
        let mut roster = RosterTracker::new();
        assert!(!roster.apply_left("ghost"));
        assert!(roster.has_departed("ghost"));
    }
}
