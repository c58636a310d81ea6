/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Per-actor client state.
//!
//! A [`ClientQueue`] is created the first time the local process learns of
//! an actor and lives until process teardown. It tracks the actor's
//! lifecycle as seen from this process, the RPC client while the actor is
//! reachable, the pending submissions, the in-flight attempts, and the
//! tasks parked waiting for an authoritative death notification.
//!
//! All fields are guarded by the submitter-wide mutex; this module only
//! defines the data and small helpers, the transitions live in the
//! submitter.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::DeathCause;
use crate::error::ErrorInfo;
use crate::error::RpcError;
use crate::reference::Address;
use crate::reference::TaskAttempt;
use crate::reference::WorkerId;
use crate::rpc::WorkerClient;
use crate::submit_queue::SubmitQueue;
use crate::task::TaskSpec;

/// The lifecycle of an actor, as seen from the submitting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorState {
    /// The creation task's dependencies are not resolved yet.
    DependenciesUnready,
    /// The creation task was handed to the GCS; the actor is being placed.
    PendingCreation,
    /// The actor is bound to a worker and accepts tasks.
    Alive,
    /// The actor lost its worker and is being restarted.
    Restarting,
    /// The actor is dead. May still be restarted for lineage
    /// reconstruction if it is restartable and owned.
    Dead,
}

impl ActorState {
    /// Whether the creation task has not been registered yet.
    pub fn is_dependencies_unready(&self) -> bool {
        matches!(self, Self::DependenciesUnready)
    }

    /// Whether the actor is bound to a worker.
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }

    /// Whether the actor is between workers.
    pub fn is_restarting(&self) -> bool {
        matches!(self, Self::Restarting)
    }

    /// Whether the actor is dead.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DependenciesUnready => "DEPENDENCIES_UNREADY",
            Self::PendingCreation => "PENDING_CREATION",
            Self::Alive => "ALIVE",
            Self::Restarting => "RESTARTING",
            Self::Dead => "DEAD",
        };
        write!(f, "{}", name)
    }
}

/// A task that was dispatched but whose send failed at the transport
/// level, parked until an authoritative death notification arrives or the
/// deadline passes.
#[derive(Debug)]
pub(crate) struct PendingTaskWaitingForDeathInfo {
    /// Absolute deadline, in clock milliseconds. The buffer is ordered by
    /// this field; entries are only pushed at the back.
    pub(crate) deadline_ms: u64,
    /// The parked task.
    pub(crate) task_spec: TaskSpec,
    /// The transport error that parked it.
    pub(crate) status: RpcError,
    /// The error to report if the deadline passes without death info.
    pub(crate) timeout_error_info: ErrorInfo,
    /// Whether the actor was preempted, copied from the queue when the
    /// entry expires. A preempted actor is treated as dead even if the
    /// death notification never arrives.
    pub(crate) actor_preempted: bool,
}

/// An attempt whose `PushTask` is in flight: sent, reply not yet seen.
/// Kept as inspectable data so restart cleanup and cancellation can walk
/// the table.
#[derive(Debug, Clone)]
pub(crate) struct InflightTask {
    pub(crate) spec: TaskSpec,
}

/// Per-actor client state.
pub(crate) struct ClientQueue {
    /// Current lifecycle state. If this is `Dead`, the submit queue is
    /// empty and `death_cause` says why.
    pub(crate) state: ActorState,
    /// Why the actor died. `None` while the actor is not dead.
    pub(crate) death_cause: Option<DeathCause>,
    /// Whether a dead actor can be restarted.
    pub(crate) is_restartable: bool,
    /// Whether the actor was preempted by the infrastructure.
    pub(crate) preempted: bool,
    /// How many times the actor has been restarted. Starts at -1: the
    /// actor is not created yet. Actor-state messages carrying a smaller
    /// value than the current one are stale and dropped.
    pub(crate) num_restarts: i64,
    /// How many times the actor has been restarted for lineage
    /// reconstruction. Used to drop stale restart acknowledgements.
    pub(crate) num_restarts_due_to_lineage_reconstructions: u64,
    /// A lineage-reconstruction restart request is in flight with the GCS.
    pub(crate) pending_lineage_restart: bool,
    /// The RPC client. Bound exactly while the actor is `Alive` and not
    /// pending out-of-scope death.
    pub(crate) rpc_client: Option<Arc<dyn WorkerClient>>,
    /// The worker the actor is bound to, while connected.
    pub(crate) worker_id: Option<WorkerId>,
    /// The address the actor was last connected at.
    pub(crate) address: Option<Address>,
    /// The actor is out of scope but its death has not been published to
    /// this worker yet. Suppresses dispatch.
    pub(crate) pending_out_of_scope_death: bool,
    /// The latest out-of-scope generation already notified to the GCS.
    pub(crate) last_out_of_scope_generation: Option<u64>,
    /// Pending submissions, in dispatch order.
    pub(crate) submit_queue: SubmitQueue,
    /// Sequence number for the next submission to this actor.
    pub(crate) next_sequence_number: u64,
    /// Tasks parked waiting for death info, deadline-ordered.
    pub(crate) wait_for_death_info_tasks: VecDeque<PendingTaskWaitingForDeathInfo>,
    /// In-flight attempts: `PushTask` sent, reply not yet seen.
    pub(crate) inflight_tasks: HashMap<TaskAttempt, InflightTask>,
    /// Back-pressure limit. `None` means unbounded.
    pub(crate) max_pending_calls: Option<usize>,
    /// Queued plus in-flight submissions.
    pub(crate) cur_pending_calls: usize,
    /// Fail new submissions immediately while the actor is unreachable,
    /// instead of queueing them.
    pub(crate) fail_if_actor_unreachable: bool,
    /// Whether this process owns the actor's lifecycle.
    pub(crate) owned: bool,
}

impl ClientQueue {
    pub(crate) fn new(
        max_pending_calls: Option<usize>,
        execute_out_of_order: bool,
        fail_if_actor_unreachable: bool,
        owned: bool,
    ) -> Self {
        Self {
            state: ActorState::DependenciesUnready,
            death_cause: None,
            is_restartable: false,
            preempted: false,
            num_restarts: -1,
            num_restarts_due_to_lineage_reconstructions: 0,
            pending_lineage_restart: false,
            rpc_client: None,
            worker_id: None,
            address: None,
            pending_out_of_scope_death: false,
            last_out_of_scope_generation: None,
            submit_queue: SubmitQueue::new(execute_out_of_order),
            next_sequence_number: 0,
            wait_for_death_info_tasks: VecDeque::new(),
            inflight_tasks: HashMap::new(),
            max_pending_calls,
            cur_pending_calls: 0,
            fail_if_actor_unreachable,
            owned,
        }
    }

    /// The recorded death cause. Only meaningful once the state is
    /// `Dead`; an actor released without a published cause reads as
    /// out-of-scope.
    pub(crate) fn death_cause_or_default(&self) -> DeathCause {
        self.death_cause.clone().unwrap_or(DeathCause::OutOfScope)
    }

    /// Whether a new submission would exceed the pending-call limit.
    pub(crate) fn is_full(&self) -> bool {
        match self.max_pending_calls {
            Some(max) => self.cur_pending_calls >= max,
            None => false,
        }
    }

    /// Whether tasks may be dispatched right now.
    pub(crate) fn can_dispatch(&self) -> bool {
        self.state.is_alive() && !self.pending_out_of_scope_death && self.rpc_client.is_some()
    }

    pub(crate) fn debug_string(&self) -> String {
        let max = match self.max_pending_calls {
            Some(max) => max.to_string(),
            None => "unlimited".to_string(),
        };
        format!(
            "state={} num_restarts={} max_pending_calls={} cur_pending_calls={} \
             queued={} inflight={} wait_for_death_info={}",
            self.state,
            self.num_restarts,
            max,
            self.cur_pending_calls,
            self.submit_queue.len(),
            self.inflight_tasks.len(),
            self.wait_for_death_info_tasks.len(),
        )
    }
}

impl fmt::Debug for ClientQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_pressure_accounting() {
        let mut queue = ClientQueue::new(Some(2), false, false, false);
        assert!(!queue.is_full());
        queue.cur_pending_calls = 2;
        assert!(queue.is_full());

        let unbounded = ClientQueue::new(None, false, false, false);
        assert!(!unbounded.is_full());
    }

    #[test]
    fn test_new_queue_is_not_dispatchable() {
        let queue = ClientQueue::new(Some(8), false, false, true);
        assert_eq!(queue.state, ActorState::DependenciesUnready);
        assert_eq!(queue.num_restarts, -1);
        assert!(!queue.can_dispatch());
    }

    #[test]
    fn test_debug_string() {
        let queue = ClientQueue::new(Some(8), false, false, true);
        let rendered = queue.debug_string();
        assert!(rendered.contains("state=DEPENDENCIES_UNREADY"));
        assert!(rendered.contains("max_pending_calls=8"));
        assert!(rendered.contains("cur_pending_calls=0"));
    }
}
