//! In-memory execution queue
//!
//! A min-heap over `(scheduled_at, admission sequence)` paired with an
//! id-keyed membership map. The map is the source of truth: `remove` only
//! drops the membership entry, and `pop` lazily skips heap entries whose
//! membership is gone or superseded. A rollout can therefore be held at most
//! once, and conditional removal stays O(log n) amortized.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One rollout admitted to the execution queue
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub rollout_id: Uuid,
    /// Copied from the rollout at admission time; the ordering key.
    pub scheduled_at: DateTime<Utc>,
    /// Wall-clock time of admission to the in-memory queue.
    pub queued_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    scheduled_at: DateTime<Utc>,
    seq: u64,
    rollout_id: Uuid,
}

// BinaryHeap is a max-heap; reverse the comparison so the earliest
// scheduled_at (admission order on ties) surfaces first.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .scheduled_at
            .cmp(&self.scheduled_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct ExecutionQueue {
    heap: BinaryHeap<HeapEntry>,
    members: HashMap<Uuid, QueueEntry>,
    next_seq: u64,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a rollout. Returns false if it is already queued.
    pub fn insert(&mut self, rollout_id: Uuid, scheduled_at: DateTime<Utc>) -> bool {
        if self.members.contains_key(&rollout_id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = QueueEntry {
            rollout_id,
            scheduled_at,
            queued_at: Utc::now(),
            seq,
        };
        self.heap.push(HeapEntry {
            scheduled_at,
            seq,
            rollout_id,
        });
        self.members.insert(rollout_id, entry);
        true
    }

    /// Drop a rollout's membership. Its heap entry is skipped on a later pop.
    pub fn remove(&mut self, rollout_id: &Uuid) -> bool {
        self.members.remove(rollout_id).is_some()
    }

    /// Take the head of the queue: earliest `scheduled_at`, admission order
    /// breaking ties.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        while let Some(head) = self.heap.pop() {
            match self.members.get(&head.rollout_id) {
                Some(member) if member.seq == head.seq => {
                    return self.members.remove(&head.rollout_id);
                }
                // Stale entry: removed or re-admitted under a newer seq.
                _ => continue,
            }
        }
        None
    }

    pub fn contains(&self, rollout_id: &Uuid) -> bool {
        self.members.contains_key(rollout_id)
    }

    /// Snapshot of the currently held rollout ids.
    pub fn ids(&self) -> Vec<Uuid> {
        self.members.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.members.clear();
    }
}
