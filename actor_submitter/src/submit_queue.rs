/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Per-actor ordering of pending submissions.
//!
//! Every submission is assigned a per-actor sequence number. The queue
//! holds submissions until they become dispatchable and decides the order
//! in which they are handed to the transport. The two policies form a
//! closed set, so the queue is a tagged enum rather than a trait object:
//!
//! - [`Sequential`](SubmitQueue::Sequential): dispatch strictly in
//!   sequence order. The lowest-seq entry gates everything behind it; an
//!   unresolved head blocks the queue even if later entries are ready.
//! - [`OutOfOrder`](SubmitQueue::OutOfOrder): dispatch any entry whose
//!   dependencies are resolved. Ready entries drain in ascending seq, but
//!   that is a tie-break, not a promise.
//!
//! The policy is chosen when the actor's queue is created and never
//! changes.

use std::collections::BTreeMap;

use crate::reference::TaskId;
use crate::task::TaskSpec;

#[derive(Debug)]
struct PendingRequest {
    spec: TaskSpec,
    resolved: bool,
}

/// Dispatches in strict sequence order.
#[derive(Debug, Default)]
pub(crate) struct SequentialQueue {
    requests: BTreeMap<u64, PendingRequest>,
}

impl SequentialQueue {
    fn pop_ready(&mut self) -> Vec<(u64, TaskSpec)> {
        let mut ready = Vec::new();
        while let Some(entry) = self.requests.first_entry() {
            if !entry.get().resolved {
                break;
            }
            let (seq, request) = entry.remove_entry();
            ready.push((seq, request.spec));
        }
        ready
    }
}

/// Dispatches any resolved entry.
#[derive(Debug, Default)]
pub(crate) struct OutOfOrderQueue {
    pending: BTreeMap<u64, TaskSpec>,
    ready: BTreeMap<u64, TaskSpec>,
}

impl OutOfOrderQueue {
    fn pop_ready(&mut self) -> Vec<(u64, TaskSpec)> {
        std::mem::take(&mut self.ready).into_iter().collect()
    }
}

/// The pending submissions of one actor, in dispatch order.
#[derive(Debug)]
pub(crate) enum SubmitQueue {
    /// Strict sequence order.
    Sequential(SequentialQueue),
    /// Any resolved entry.
    OutOfOrder(OutOfOrderQueue),
}

impl SubmitQueue {
    pub(crate) fn new(execute_out_of_order: bool) -> Self {
        if execute_out_of_order {
            Self::OutOfOrder(OutOfOrderQueue::default())
        } else {
            Self::Sequential(SequentialQueue::default())
        }
    }

    /// Insert a submission. `seq` must be fresh for this queue.
    pub(crate) fn emplace(&mut self, seq: u64, spec: TaskSpec, dependencies_resolved: bool) {
        match self {
            Self::Sequential(queue) => {
                let old = queue.requests.insert(
                    seq,
                    PendingRequest {
                        spec,
                        resolved: dependencies_resolved,
                    },
                );
                debug_assert!(old.is_none(), "duplicate sequence number {}", seq);
            }
            Self::OutOfOrder(queue) => {
                let old = if dependencies_resolved {
                    queue.ready.insert(seq, spec)
                } else {
                    queue.pending.insert(seq, spec)
                };
                debug_assert!(old.is_none(), "duplicate sequence number {}", seq);
            }
        }
    }

    /// Record that the entry's dependencies are resolved. No-op if the
    /// entry was removed in the meantime.
    pub(crate) fn mark_dependency_resolved(&mut self, seq: u64) {
        match self {
            Self::Sequential(queue) => {
                if let Some(request) = queue.requests.get_mut(&seq) {
                    request.resolved = true;
                }
            }
            Self::OutOfOrder(queue) => {
                if let Some(spec) = queue.pending.remove(&seq) {
                    queue.ready.insert(seq, spec);
                }
            }
        }
    }

    /// Remove and return every entry that is dispatchable right now, in
    /// dispatch order.
    pub(crate) fn pop_ready(&mut self) -> Vec<(u64, TaskSpec)> {
        match self {
            Self::Sequential(queue) => queue.pop_ready(),
            Self::OutOfOrder(queue) => queue.pop_ready(),
        }
    }

    /// Whether an entry with this sequence number is still queued.
    pub(crate) fn contains(&self, seq: u64) -> bool {
        match self {
            Self::Sequential(queue) => queue.requests.contains_key(&seq),
            Self::OutOfOrder(queue) => {
                queue.pending.contains_key(&seq) || queue.ready.contains_key(&seq)
            }
        }
    }

    /// The sequence number of the queued entry for `task_id`, if any.
    /// Queues are bounded by the actor's pending-call limit, so a scan is
    /// fine here.
    pub(crate) fn find_seq(&self, task_id: &TaskId) -> Option<u64> {
        match self {
            Self::Sequential(queue) => queue
                .requests
                .iter()
                .find(|(_, request)| request.spec.task_id == *task_id)
                .map(|(seq, _)| *seq),
            Self::OutOfOrder(queue) => queue
                .pending
                .iter()
                .chain(queue.ready.iter())
                .find(|(_, spec)| spec.task_id == *task_id)
                .map(|(seq, _)| *seq),
        }
    }

    /// Remove one entry. Returns the entry and whether its dependencies
    /// had been resolved.
    pub(crate) fn remove(&mut self, seq: u64) -> Option<(TaskSpec, bool)> {
        match self {
            Self::Sequential(queue) => queue
                .requests
                .remove(&seq)
                .map(|request| (request.spec, request.resolved)),
            Self::OutOfOrder(queue) => match queue.pending.remove(&seq) {
                Some(spec) => Some((spec, false)),
                None => queue.ready.remove(&seq).map(|spec| (spec, true)),
            },
        }
    }

    /// Drain the queue. Returns every entry with its resolved flag, in seq
    /// order, so the caller can cancel outstanding resolutions.
    pub(crate) fn clear(&mut self) -> Vec<(TaskSpec, bool)> {
        match self {
            Self::Sequential(queue) => std::mem::take(&mut queue.requests)
                .into_values()
                .map(|request| (request.spec, request.resolved))
                .collect(),
            Self::OutOfOrder(queue) => {
                let mut drained: Vec<(u64, TaskSpec, bool)> = std::mem::take(&mut queue.pending)
                    .into_iter()
                    .map(|(seq, spec)| (seq, spec, false))
                    .chain(
                        std::mem::take(&mut queue.ready)
                            .into_iter()
                            .map(|(seq, spec)| (seq, spec, true)),
                    )
                    .collect();
                drained.sort_by_key(|(seq, _, _)| *seq);
                drained.into_iter().map(|(_, spec, resolved)| (spec, resolved)).collect()
            }
        }
    }

    /// The number of queued entries.
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Sequential(queue) => queue.requests.len(),
            Self::OutOfOrder(queue) => queue.pending.len() + queue.ready.len(),
        }
    }

    /// Whether the queue is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ActorId;

    fn spec(name: &str) -> TaskSpec {
        TaskSpec::new(TaskId::new(name), ActorId::new("a"))
    }

    fn popped_ids(queue: &mut SubmitQueue) -> Vec<String> {
        queue
            .pop_ready()
            .into_iter()
            .map(|(_, s)| s.task_id.to_string())
            .collect()
    }

    #[test]
    fn test_sequential_unresolved_head_blocks() {
        let mut queue = SubmitQueue::new(false);
        queue.emplace(0, spec("t0"), false);
        queue.emplace(1, spec("t1"), true);
        queue.emplace(2, spec("t2"), true);

        // t1 and t2 are resolved, but t0 gates the queue.
        assert!(popped_ids(&mut queue).is_empty());

        queue.mark_dependency_resolved(0);
        assert_eq!(popped_ids(&mut queue), vec!["t0", "t1", "t2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_sequential_removed_entry_does_not_block() {
        let mut queue = SubmitQueue::new(false);
        queue.emplace(0, spec("t0"), false);
        queue.emplace(1, spec("t1"), true);

        // Removing the unresolved head unblocks the rest.
        let (removed, resolved) = queue.remove(0).unwrap();
        assert_eq!(removed.task_id, TaskId::new("t0"));
        assert!(!resolved);
        assert_eq!(popped_ids(&mut queue), vec!["t1"]);
    }

    #[test]
    fn test_out_of_order_dispatches_any_resolved() {
        let mut queue = SubmitQueue::new(true);
        queue.emplace(0, spec("t0"), false);
        queue.emplace(1, spec("t1"), true);
        queue.emplace(2, spec("t2"), false);

        // Only t1 is ready; the unresolved entries do not gate it.
        assert_eq!(popped_ids(&mut queue), vec!["t1"]);

        queue.mark_dependency_resolved(2);
        assert_eq!(popped_ids(&mut queue), vec!["t2"]);

        queue.mark_dependency_resolved(0);
        assert_eq!(popped_ids(&mut queue), vec!["t0"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_find_seq_and_remove() {
        let mut queue = SubmitQueue::new(true);
        queue.emplace(7, spec("t7"), false);
        queue.emplace(8, spec("t8"), true);

        assert_eq!(queue.find_seq(&TaskId::new("t7")), Some(7));
        assert_eq!(queue.find_seq(&TaskId::new("t8")), Some(8));
        assert_eq!(queue.find_seq(&TaskId::new("t9")), None);

        let (_, resolved) = queue.remove(8).unwrap();
        assert!(resolved);
        assert_eq!(queue.find_seq(&TaskId::new("t8")), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_mark_resolved_after_remove_is_noop() {
        let mut queue = SubmitQueue::new(false);
        queue.emplace(0, spec("t0"), false);
        queue.remove(0);
        queue.mark_dependency_resolved(0);
        assert!(queue.pop_ready().is_empty());
    }

    #[test]
    fn test_clear_reports_resolved_flags_in_seq_order() {
        let mut queue = SubmitQueue::new(true);
        queue.emplace(0, spec("t0"), true);
        queue.emplace(1, spec("t1"), false);
        queue.emplace(2, spec("t2"), true);

        let drained = queue.clear();
        let flags: Vec<(String, bool)> = drained
            .into_iter()
            .map(|(s, resolved)| (s.task_id.to_string(), resolved))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("t0".to_string(), true),
                ("t1".to_string(), false),
                ("t2".to_string(), true),
            ]
        );
        assert!(queue.is_empty());
    }
}
