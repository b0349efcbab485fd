//! Board replica: the authoritative local copy of a room's node table.
//!
//! The server assigns every accepted state transition a sequence number.
//! The board only moves forward along that sequence:
//!
//! ```text
//!            seq <= latest          from != latest (Resync)
//!   ┌──────────────────────┐      ┌─────────────────────┐
//!   │ Stale: no-op         │      │ Gap: no-op, caller  │
//!   └──────────────────────┘      │ requests a resync   │
//!                                 └─────────────────────┘
//!   snapshot(seq, nodes) ──► replace table, latest = seq
//!   delta(from, to, ops) ──► apply ops in order, latest = to
//! ```
//!
//! Every call is all-or-nothing: admission is decided before the table is
//! touched, and operations themselves cannot fail.

use indexmap::IndexMap;

use crate::node::Node;
use crate::ops::Operation;

/// What to do with a delta whose `from` does not match the local sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Apply the batch anyway. Intermediate operations may be skipped.
    Lenient,
    /// Reject the batch; the caller should fetch a fresh snapshot.
    #[default]
    Resync,
}

/// Result of offering a snapshot or delta to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The unit was applied; `latest_seq` is now `seq`.
    Applied { seq: u64 },
    /// The unit ends at or before what we already have.
    Stale { seq: u64, latest: u64 },
    /// The delta does not start where the board ends.
    Gap { expected: u64, from: u64, to: u64 },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Local replica of one room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Board {
    room_id: Option<String>,
    latest_seq: u64,
    nodes: IndexMap<String, Node>,
    gap_policy: GapPolicy,
}

impl Board {
    /// Empty board with the default gap policy.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gap_policy(gap_policy: GapPolicy) -> Self {
        Self {
            gap_policy,
            ..Self::default()
        }
    }

    pub fn gap_policy(&self) -> GapPolicy {
        self.gap_policy
    }

    pub fn set_gap_policy(&mut self, gap_policy: GapPolicy) {
        self.gap_policy = gap_policy;
    }

    /// Switch to `room_id`. Clears everything if the room changed.
    ///
    /// Returns `true` when the board was cleared.
    pub fn enter_room(&mut self, room_id: &str) -> bool {
        if self.room_id.as_deref() == Some(room_id) {
            return false;
        }
        self.room_id = Some(room_id.to_string());
        self.nodes.clear();
        self.latest_seq = 0;
        true
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn latest_seq(&self) -> u64 {
        self.latest_seq
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in paint order (first added is drawn first).
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Decide whether a snapshot ending at `seq` would be applied.
    pub fn admit_snapshot(&self, seq: u64) -> ApplyOutcome {
        if seq <= self.latest_seq {
            ApplyOutcome::Stale {
                seq,
                latest: self.latest_seq,
            }
        } else {
            ApplyOutcome::Applied { seq }
        }
    }

    /// Decide whether a delta `from..to` would be applied.
    pub fn admit_delta(&self, from: u64, to: u64) -> ApplyOutcome {
        if to <= self.latest_seq {
            return ApplyOutcome::Stale {
                seq: to,
                latest: self.latest_seq,
            };
        }
        if from != self.latest_seq && self.gap_policy == GapPolicy::Resync {
            return ApplyOutcome::Gap {
                expected: self.latest_seq,
                from,
                to,
            };
        }
        ApplyOutcome::Applied { seq: to }
    }

    /// Replace the whole table with `nodes` at sequence `seq`.
    pub fn apply_snapshot(&mut self, seq: u64, nodes: Vec<Node>) -> ApplyOutcome {
        let outcome = self.admit_snapshot(seq);
        if !outcome.is_applied() {
            log::debug!("Discarding stale snapshot {seq} (latest {})", self.latest_seq);
            return outcome;
        }

        let mut table = IndexMap::with_capacity(nodes.len());
        for node in nodes {
            table.insert(node.id.clone(), node);
        }
        self.nodes = table;
        self.latest_seq = seq;
        outcome
    }

    /// Apply `ops` in order and advance to `to`.
    pub fn apply_delta(&mut self, from: u64, to: u64, ops: Vec<Operation>) -> ApplyOutcome {
        let outcome = self.admit_delta(from, to);
        match outcome {
            ApplyOutcome::Applied { .. } => {}
            ApplyOutcome::Stale { .. } => {
                log::debug!("Discarding stale delta {from}..{to} (latest {})", self.latest_seq);
                return outcome;
            }
            ApplyOutcome::Gap { expected, .. } => {
                log::warn!("Delta {from}..{to} does not follow seq {expected}");
                return outcome;
            }
        }

        if from != self.latest_seq {
            log::warn!(
                "Applying delta {from}..{to} across a gap (latest {})",
                self.latest_seq
            );
        }
        for op in ops {
            self.apply_op(op);
        }
        self.latest_seq = to;
        outcome
    }

    fn apply_op(&mut self, op: Operation) {
        match op {
            Operation::Add { node } => {
                self.nodes.insert(node.id.clone(), node);
            }
            Operation::Move { id, x, y } => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.x = x;
                    node.y = y;
                }
            }
            Operation::Patch { id, changes } => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.merge(&changes);
                }
            }
            Operation::Remove { id } => {
                self.nodes.shift_remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeKind, NodePatch};

    fn player(id: &str, x: f64, y: f64) -> Node {
        Node::new(id, NodeKind::Player, x, y)
    }

    #[test]
    fn test_new_board_is_empty() {
        let board = Board::new();
        assert!(board.is_empty());
        assert_eq!(board.latest_seq(), 0);
        assert_eq!(board.gap_policy(), GapPolicy::Resync);
    }

    #[test]
    fn test_snapshot_replaces_table() {
        let mut board = Board::new();
        board.apply_snapshot(3, vec![player("a", 0.0, 0.0), player("b", 1.0, 1.0)]);
        let outcome = board.apply_snapshot(5, vec![player("c", 2.0, 2.0)]);

        assert_eq!(outcome, ApplyOutcome::Applied { seq: 5 });
        assert_eq!(board.len(), 1);
        assert!(board.contains("c"));
        assert!(!board.contains("a"));
        assert_eq!(board.latest_seq(), 5);
    }

    #[test]
    fn test_stale_snapshot_is_noop() {
        let mut board = Board::new();
        board.apply_snapshot(5, vec![player("a", 0.0, 0.0)]);
        let before = board.clone();

        assert_eq!(
            board.apply_snapshot(5, vec![]),
            ApplyOutcome::Stale { seq: 5, latest: 5 }
        );
        assert_eq!(
            board.apply_snapshot(2, vec![]),
            ApplyOutcome::Stale { seq: 2, latest: 5 }
        );
        assert_eq!(board, before);
    }

    #[test]
    fn test_snapshot_at_zero_is_stale_on_fresh_board() {
        let mut board = Board::new();
        let outcome = board.apply_snapshot(0, vec![player("a", 0.0, 0.0)]);
        assert!(!outcome.is_applied());
        assert!(board.is_empty());
    }

    #[test]
    fn test_add_move_patch_remove_leaves_empty_table() {
        let mut board = Board::new();
        board.apply_delta(0, 1, vec![Operation::add(player("a", 0.0, 0.0))]);
        board.apply_delta(1, 2, vec![Operation::move_to("a", 5.0, 5.0)]);
        assert_eq!(board.get("a").map(|n| (n.x, n.y)), Some((5.0, 5.0)));

        board.apply_delta(2, 3, vec![Operation::patch("a", NodePatch::color("#fff"))]);
        assert_eq!(board.get("a").and_then(|n| n.color.as_deref()), Some("#fff"));

        board.apply_delta(3, 4, vec![Operation::remove("a")]);
        assert!(board.is_empty());
        assert_eq!(board.latest_seq(), 4);
    }

    #[test]
    fn test_move_after_remove_does_not_recreate() {
        let mut board = Board::new();
        board.apply_delta(0, 1, vec![Operation::add(player("a", 0.0, 0.0))]);
        board.apply_delta(1, 2, vec![Operation::remove("a")]);
        let outcome = board.apply_delta(2, 3, vec![Operation::move_to("a", 1.0, 1.0)]);

        assert!(outcome.is_applied());
        assert!(!board.contains("a"));
        assert_eq!(board.latest_seq(), 3);
    }

    #[test]
    fn test_patch_on_missing_node_is_ignored() {
        let mut board = Board::new();
        board.apply_delta(0, 1, vec![Operation::patch("ghost", NodePatch::label("x"))]);
        assert!(board.is_empty());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut board = Board::new();
        board.apply_delta(0, 1, vec![Operation::add(player("a", 0.0, 0.0))]);
        board.apply_delta(1, 2, vec![Operation::remove("zzz")]);
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn test_readd_replaces_in_place() {
        let mut board = Board::new();
        board.apply_delta(
            0,
            1,
            vec![
                Operation::add(player("a", 0.0, 0.0)),
                Operation::add(player("b", 0.0, 0.0)),
                Operation::add(player("a", 9.0, 9.0)),
            ],
        );

        let ids: Vec<&str> = board.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(board.get("a").map(|n| n.x), Some(9.0));
    }

    #[test]
    fn test_ops_apply_in_list_order() {
        let mut board = Board::new();
        board.apply_delta(
            0,
            1,
            vec![
                Operation::add(player("a", 0.0, 0.0)),
                Operation::move_to("a", 1.0, 1.0),
                Operation::move_to("a", 2.0, 2.0),
            ],
        );
        assert_eq!(board.get("a").map(|n| (n.x, n.y)), Some((2.0, 2.0)));
    }

    #[test]
    fn test_remove_keeps_order_of_survivors() {
        let mut board = Board::new();
        board.apply_snapshot(
            1,
            vec![player("a", 0.0, 0.0), player("b", 0.0, 0.0), player("c", 0.0, 0.0)],
        );
        board.apply_delta(1, 2, vec![Operation::remove("b")]);

        let ids: Vec<&str> = board.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_stale_delta_is_noop() {
        let mut board = Board::new();
        board.apply_delta(0, 2, vec![Operation::add(player("a", 0.0, 0.0))]);
        let before = board.clone();

        let outcome = board.apply_delta(1, 2, vec![Operation::remove("a")]);
        assert_eq!(outcome, ApplyOutcome::Stale { seq: 2, latest: 2 });
        assert_eq!(board, before);
    }

    #[test]
    fn test_gap_rejected_under_resync() {
        let mut board = Board::new();
        board.apply_delta(0, 1, vec![Operation::add(player("a", 0.0, 0.0))]);
        let outcome = board.apply_delta(3, 4, vec![Operation::remove("a")]);

        assert_eq!(
            outcome,
            ApplyOutcome::Gap {
                expected: 1,
                from: 3,
                to: 4
            }
        );
        assert!(board.contains("a"));
        assert_eq!(board.latest_seq(), 1);
    }

    #[test]
    fn test_gap_applied_under_lenient() {
        let mut board = Board::with_gap_policy(GapPolicy::Lenient);
        board.apply_delta(0, 1, vec![Operation::add(player("a", 0.0, 0.0))]);
        let outcome = board.apply_delta(3, 4, vec![Operation::remove("a")]);

        assert_eq!(outcome, ApplyOutcome::Applied { seq: 4 });
        assert!(board.is_empty());
        assert_eq!(board.latest_seq(), 4);
    }

    #[test]
    fn test_latest_seq_tracks_max_accepted() {
        let mut board = Board::with_gap_policy(GapPolicy::Lenient);
        let mut accepted = Vec::new();
        let mut previous = 0;

        let units: [(bool, u64, u64); 8] = [
            (false, 0, 3),
            (true, 0, 2),
            (false, 3, 5),
            (true, 4, 4),
            (true, 0, 9),
            (false, 2, 7),
            (false, 9, 10),
            (true, 0, 10),
        ];
        for (is_snapshot, from, to) in units {
            let outcome = if is_snapshot {
                board.apply_snapshot(to, vec![])
            } else {
                board.apply_delta(from, to, vec![])
            };
            if outcome.is_applied() {
                accepted.push(to);
            }
            assert!(board.latest_seq() >= previous);
            previous = board.latest_seq();
        }

        assert_eq!(accepted, vec![3, 5, 9, 10]);
        assert_eq!(board.latest_seq(), *accepted.iter().max().unwrap());
    }

    #[test]
    fn test_enter_room_clears_on_change() {
        let mut board = Board::new();
        assert!(board.enter_room("r1"));
        board.apply_snapshot(4, vec![player("a", 0.0, 0.0)]);

        assert!(!board.enter_room("r1"));
        assert_eq!(board.len(), 1);

        assert!(board.enter_room("r2"));
        assert!(board.is_empty());
        assert_eq!(board.latest_seq(), 0);
        assert_eq!(board.room_id(), Some("r2"));
    }

    #[test]
    fn test_unknown_kind_survives_delta() {
        let mut board = Board::new();
        let node = Node::new("g", NodeKind::Other("goalpost".into()), 0.0, 0.0);
        board.apply_delta(0, 1, vec![Operation::add(node)]);
        board.apply_delta(1, 2, vec![Operation::move_to("g", 3.0, 3.0)]);

        assert_eq!(
            board.get("g").map(|n| n.kind.as_str()),
            Some("goalpost")
        );
    }
}
