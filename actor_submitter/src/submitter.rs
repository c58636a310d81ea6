/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The submitter: the public façade over the per-actor client queues.
//!
//! The submitter accepts task submissions from local callers, orders them
//! per destination actor, has their dependencies resolved, dispatches them
//! to the worker hosting the actor, and routes every outcome to the task
//! manager. Actor lifecycle notifications (`connect_actor` /
//! `disconnect_actor`) drive the per-actor state machine; `num_restarts`
//! is the actor's generation number, and messages carrying a stale
//! generation are dropped.
//!
//! One exclusive mutex guards the queue registry and everything inside it.
//! Collaborator entry points (task manager, warn callback, resolver
//! cancellation) may call back into the submitter, so they are never
//! invoked under the lock: paths that need them collect the calls in a
//! [`Deferred`] and run it after the guard is dropped.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::clock::ClockKind;
use crate::config::Config;
use crate::error::DeathCause;
use crate::error::ErrorInfo;
use crate::error::RpcError;
use crate::error::SubmitError;
use crate::gcs::ActorCreator;
use crate::queue::ActorState;
use crate::queue::ClientQueue;
use crate::queue::InflightTask;
use crate::queue::PendingTaskWaitingForDeathInfo;
use crate::reference::ActorId;
use crate::reference::Address;
use crate::reference::TaskAttempt;
use crate::reference::TaskId;
use crate::reference_count::ReferenceCounter;
use crate::resolver::DependencyResolver;
use crate::rpc::CancelTaskRequest;
use crate::rpc::PushTaskReply;
use crate::rpc::PushTaskRequest;
use crate::rpc::WorkerClient;
use crate::rpc::WorkerClientPool;
use crate::task::TaskSpec;
use crate::task_manager::TaskManager;

/// Invoked (outside the lock) when the number of queued submissions to one
/// actor crosses the warning threshold.
pub type WarnExcessQueueingFn = Box<dyn Fn(&ActorId, u64) + Send + Sync>;

/// Work collected under the submitter mutex, executed after the guard is
/// dropped. Collaborators may call back into the submitter, so nothing in
/// here may run while the lock is held.
#[must_use = "deferred work runs only when `run` is called"]
struct Deferred(Vec<Box<dyn FnOnce() + Send>>);

impl Deferred {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn push(&mut self, work: impl FnOnce() + Send + 'static) {
        self.0.push(Box::new(work));
    }

    fn run(self) {
        for work in self.0 {
            work();
        }
    }
}

struct SubmitterState {
    client_queues: HashMap<ActorId, ClientQueue>,
    /// Streaming generators to resubmit once their current execution
    /// finishes.
    generators_to_resubmit: HashSet<TaskId>,
    /// Warn the next time an actor's pending submissions reach this count.
    /// Doubles each time it is hit.
    next_queueing_warn_threshold: u64,
}

/// Client-side task submission to remote actors.
///
/// All public methods are thread-safe; RPCs, dependency resolutions, and
/// cancel retries run as spawned tasks and re-enter the submitter when
/// they complete. Constructed behind an `Arc` (see [`new`](Self::new)) so
/// those tasks can hold on to it.
pub struct ActorTaskSubmitter {
    weak: Weak<Self>,
    client_pool: Arc<dyn WorkerClientPool>,
    actor_creator: Arc<dyn ActorCreator>,
    resolver: Arc<dyn DependencyResolver>,
    task_manager: Arc<dyn TaskManager>,
    reference_counter: Arc<dyn ReferenceCounter>,
    warn_excess_queueing: WarnExcessQueueingFn,
    config: Config,
    clock: ClockKind,
    state: Mutex<SubmitterState>,
}

impl ActorTaskSubmitter {
    /// Create a submitter over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_pool: Arc<dyn WorkerClientPool>,
        actor_creator: Arc<dyn ActorCreator>,
        resolver: Arc<dyn DependencyResolver>,
        task_manager: Arc<dyn TaskManager>,
        reference_counter: Arc<dyn ReferenceCounter>,
        warn_excess_queueing: WarnExcessQueueingFn,
        config: Config,
        clock: ClockKind,
    ) -> Arc<Self> {
        let next_queueing_warn_threshold = config.excess_queueing_warn_threshold;
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            client_pool,
            actor_creator,
            resolver,
            task_manager,
            reference_counter,
            warn_excess_queueing,
            config,
            clock,
            state: Mutex::new(SubmitterState {
                client_queues: HashMap::new(),
                generators_to_resubmit: HashSet::new(),
                next_queueing_warn_threshold,
            }),
        })
    }

    /// Add a queue for an actor. Called whenever the language frontend
    /// creates a reference to an actor; a no-op if the queue exists.
    ///
    /// For owned actors, also registers the out-of-scope hook with the
    /// reference counter so the GCS learns when the actor can be released.
    pub fn add_actor_queue_if_not_exists(
        &self,
        actor_id: &ActorId,
        max_pending_calls: Option<usize>,
        execute_out_of_order: bool,
        fail_if_actor_unreachable: bool,
        owned: bool,
    ) {
        {
            let mut state = self.state.lock().unwrap();
            if state.client_queues.contains_key(actor_id) {
                return;
            }
            tracing::debug!("adding submit queue for actor {}", actor_id);
            state.client_queues.insert(
                actor_id.clone(),
                ClientQueue::new(
                    max_pending_calls,
                    execute_out_of_order,
                    fail_if_actor_unreachable,
                    owned,
                ),
            );
            // TODO: remove the queue once the frontend can prove it will
            // never hand out another reference to this actor; today queues
            // live until process teardown.
        }
        if owned {
            let weak = self.weak.clone();
            self.reference_counter.set_actor_out_of_scope_callback(
                actor_id,
                Box::new(move |id| {
                    let Some(submitter) = weak.upgrade() else {
                        return;
                    };
                    let generation = {
                        let state = submitter.state.lock().unwrap();
                        match state.client_queues.get(id) {
                            Some(queue) => queue.num_restarts_due_to_lineage_reconstructions,
                            None => return,
                        }
                    };
                    submitter.notify_gcs_when_actor_out_of_scope(id, generation);
                }),
            );
        }
    }

    /// Submit a task for execution on its destination actor.
    ///
    /// Rejections that can be decided synchronously ([`SubmitError`]) are
    /// returned; every other failure of the task is reported to the task
    /// manager asynchronously.
    pub fn submit_task(&self, task_spec: TaskSpec) -> Result<(), SubmitError> {
        let actor_id = task_spec.actor_id.clone();
        let mut deferred = Deferred::new();
        let mut resolution = None;
        {
            let mut state = self.state.lock().unwrap();
            let Some(queue) = state.client_queues.get_mut(&actor_id) else {
                return Err(SubmitError::QueueMissing(actor_id));
            };
            if queue.state.is_dead() && !(queue.owned && queue.is_restartable) {
                let error_info = ErrorInfo::actor_died(&queue.death_cause_or_default());
                let task_manager = Arc::clone(&self.task_manager);
                let task_id = task_spec.task_id.clone();
                deferred.push(move || task_manager.fail_pending_task(&task_id, error_info));
            } else if queue.fail_if_actor_unreachable && queue.state.is_restarting() {
                let error_info =
                    ErrorInfo::actor_unavailable(format!("actor {} is restarting", actor_id));
                let task_manager = Arc::clone(&self.task_manager);
                let task_id = task_spec.task_id.clone();
                let attempt_number = task_spec.attempt_number;
                deferred.push(move || {
                    task_manager.fail_or_retry_pending_task(
                        &task_id,
                        attempt_number,
                        error_info,
                        None,
                    )
                });
            } else {
                if queue.is_full() {
                    return Err(SubmitError::QueueFull(actor_id, queue.cur_pending_calls));
                }
                queue.cur_pending_calls += 1;
                let seq = queue.next_sequence_number;
                queue.next_sequence_number += 1;
                queue.submit_queue.emplace(seq, task_spec.clone(), false);
                if queue.state.is_dead() {
                    // Dead but restartable and owned: the submission is
                    // new lineage-reconstruction work. Ask the GCS to
                    // restart the actor; the task waits for the reconnect.
                    self.request_lineage_restart(&actor_id, queue);
                }
                resolution = Some((seq, task_spec));
            }
        }
        deferred.run();
        if let Some((seq, spec)) = resolution {
            self.spawn_resolution(seq, spec);
        }
        Ok(())
    }

    /// Submit an actor-creation task: register the actor with the GCS, and
    /// on success move the queue from DEPENDENCIES_UNREADY to
    /// PENDING_CREATION. The actor becomes reachable when the scheduler
    /// announces it via [`connect_actor`](Self::connect_actor).
    pub async fn submit_actor_creation_task(&self, task_spec: TaskSpec) -> Result<(), SubmitError> {
        let actor_id = task_spec.actor_id.clone();
        {
            let state = self.state.lock().unwrap();
            if !state.client_queues.contains_key(&actor_id) {
                return Err(SubmitError::QueueMissing(actor_id));
            }
        }
        match self.actor_creator.register_actor(&task_spec).await {
            Ok(()) => {
                let mut state = self.state.lock().unwrap();
                if let Some(queue) = state.client_queues.get_mut(&actor_id) {
                    if queue.state.is_dependencies_unready() {
                        queue.state = ActorState::PendingCreation;
                    }
                }
                Ok(())
            }
            Err(err) => Err(SubmitError::ActorRegistration(actor_id, err)),
        }
    }

    /// The actor is (re)bound to a worker: bind an RPC client and dispatch
    /// whatever is ready. `num_restarts` is the actor's generation; stale
    /// generations are dropped.
    pub fn connect_actor(&self, actor_id: &ActorId, address: Address, num_restarts: i64) {
        let mut deferred = Deferred::new();
        {
            let mut state = self.state.lock().unwrap();
            let Some(queue) = state.client_queues.get_mut(actor_id) else {
                tracing::warn!("connect for unknown actor {}", actor_id);
                return;
            };
            if num_restarts < queue.num_restarts {
                tracing::debug!(
                    "dropping stale connect for actor {} (restart {} < {})",
                    actor_id,
                    num_restarts,
                    queue.num_restarts
                );
                return;
            }
            if num_restarts == queue.num_restarts && queue.state.is_alive() {
                // Duplicate announcement for the current incarnation.
                return;
            }
            tracing::info!(
                "actor {} alive at {} (restart {})",
                actor_id,
                address,
                num_restarts
            );
            if queue.rpc_client.is_some() {
                // We missed the disconnect for the previous incarnation;
                // retire its in-flight attempts now.
                self.release_rpc_client(queue, &mut deferred);
            }
            queue.num_restarts = num_restarts;
            queue.state = ActorState::Alive;
            queue.death_cause = None;
            queue.is_restartable = false;
            queue.preempted = false;
            queue.worker_id = Some(address.worker_id.clone());
            if !queue.pending_out_of_scope_death {
                queue.rpc_client = Some(self.client_pool.get_or_connect(&address));
            }
            queue.address = Some(address);
            self.send_pending_tasks(&mut state, actor_id, &mut deferred);
        }
        deferred.run();
    }

    /// The actor lost its worker. With `dead = false` the actor is
    /// restarting: in-flight attempts are retired as retriable failures
    /// and queued submissions are preserved for the reconnect. With
    /// `dead = true` the notification is authoritative: everything pending
    /// fails with `death_cause`, and a restartable owned actor with
    /// pending work triggers a lineage-reconstruction restart.
    pub fn disconnect_actor(
        &self,
        actor_id: &ActorId,
        num_restarts: i64,
        dead: bool,
        death_cause: Option<DeathCause>,
        is_restartable: bool,
    ) {
        let mut deferred = Deferred::new();
        {
            let mut state = self.state.lock().unwrap();
            let Some(queue) = state.client_queues.get_mut(actor_id) else {
                tracing::warn!("disconnect for unknown actor {}", actor_id);
                return;
            };
            if num_restarts < queue.num_restarts {
                tracing::debug!(
                    "dropping stale disconnect for actor {} (restart {} < {})",
                    actor_id,
                    num_restarts,
                    queue.num_restarts
                );
                return;
            }
            if dead {
                if queue.state.is_dead() {
                    return;
                }
                let cause = death_cause.unwrap_or_else(|| DeathCause::ActorExit {
                    reason: "actor died without a published cause".to_string(),
                });
                tracing::info!(
                    "actor {} dead (restart {}): {}",
                    actor_id,
                    num_restarts,
                    cause
                );
                queue.num_restarts = num_restarts;
                queue.state = ActorState::Dead;
                queue.death_cause = Some(cause.clone());
                queue.is_restartable = is_restartable;
                queue.pending_out_of_scope_death = false;
                self.release_rpc_client(queue, &mut deferred);

                let drained = queue.submit_queue.clear();
                queue.cur_pending_calls -= drained.len();
                let parked: Vec<PendingTaskWaitingForDeathInfo> =
                    queue.wait_for_death_info_tasks.drain(..).collect();
                let retriable = queue.owned && queue.is_restartable;
                let has_lineage_work = !drained.is_empty() || !parked.is_empty();
                for (spec, resolved) in drained {
                    if !resolved {
                        let resolver = Arc::clone(&self.resolver);
                        let task_id = spec.task_id.clone();
                        deferred.push(move || resolver.cancel_resolution(&task_id));
                    }
                    self.defer_death_failure(&spec, &cause, retriable, &mut deferred);
                }
                for task in parked {
                    self.defer_death_failure(&task.task_spec, &cause, retriable, &mut deferred);
                }
                if retriable && has_lineage_work {
                    self.request_lineage_restart(actor_id, queue);
                }
            } else {
                if !queue.state.is_alive() {
                    // Never connected, or already restarting or dead.
                    return;
                }
                tracing::info!("actor {} restarting (restart {})", actor_id, num_restarts);
                queue.num_restarts = num_restarts;
                queue.state = ActorState::Restarting;
                self.release_rpc_client(queue, &mut deferred);
            }
        }
        deferred.run();
    }

    /// Mark the actor as preempted by the infrastructure. Idempotent. A
    /// subsequent death-info timeout reports preemption instead of a
    /// generic timeout.
    pub fn set_preempted(&self, actor_id: &ActorId) {
        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.client_queues.get_mut(actor_id) {
            queue.preempted = true;
        }
    }

    /// Sweep every actor's death-info buffer and fail the entries whose
    /// deadline has passed. Driven periodically by the runtime; see
    /// [`spawn_timeout_sweeper`](Self::spawn_timeout_sweeper).
    pub fn check_timeout_tasks(&self) {
        let now_ms = self.clock.now_ms();
        let mut expired = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for queue in state.client_queues.values_mut() {
                while let Some(task) = queue.wait_for_death_info_tasks.pop_front() {
                    if task.deadline_ms > now_ms {
                        queue.wait_for_death_info_tasks.push_front(task);
                        break;
                    }
                    let mut task = task;
                    task.actor_preempted = queue.preempted;
                    expired.push(task);
                }
            }
        }
        for task in expired {
            self.fail_task_with_error(task);
        }
    }

    /// Cancel a task.
    ///
    /// Asynchronous: `true` means the submitter accepted responsibility to
    /// cancel if possible, not that cancellation has happened. `false`
    /// means no cancellation is needed (the task already finished, or its
    /// actor is already dead). Repeated cancels are idempotent.
    ///
    /// - Dependencies unresolved: resolution is abandoned and the task
    ///   fails immediately.
    /// - Queued: the entry is removed and the task fails immediately.
    /// - In flight: a cancel RPC goes to the executor and is retried, with
    ///   doubling backoff, until the executor accepts or the original push
    ///   resolves. The executor cannot distinguish "never received" from
    ///   "already finished", so only the push reply stops the retries.
    pub fn cancel_task(&self, task_spec: TaskSpec, recursive: bool) -> bool {
        self.cancel_task_with_backoff(task_spec, recursive, self.config.cancel_retry_backoff_ms)
    }

    /// Re-run [`cancel_task`](Self::cancel_task) after `delay_ms`
    /// milliseconds, with the backoff for any further retry doubled.
    pub fn retry_cancel_task(&self, task_spec: TaskSpec, recursive: bool, delay_ms: u64) {
        let Some(submitter) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            submitter.clock.sleep(Duration::from_millis(delay_ms)).await;
            submitter.cancel_task_with_backoff(task_spec, recursive, delay_ms.saturating_mul(2));
        });
    }

    /// Queue a streaming generator for resubmission when its current
    /// execution finishes. Returns whether resubmission will happen; a
    /// generator that is not in flight is not resubmitted.
    pub fn queue_generator_for_resubmit(&self, task_spec: &TaskSpec) -> bool {
        let mut state = self.state.lock().unwrap();
        let inflight = state
            .client_queues
            .get(&task_spec.actor_id)
            .is_some_and(|queue| queue.inflight_tasks.contains_key(&task_spec.task_attempt()));
        if inflight {
            state
                .generators_to_resubmit
                .insert(task_spec.task_id.clone());
        }
        inflight
    }

    /// The owner dropped its last reference to the actor: stop dispatching
    /// and tell the GCS the actor can be released. Idempotent; calls with
    /// a generation at or below one already notified are dropped.
    pub fn notify_gcs_when_actor_out_of_scope(
        &self,
        actor_id: &ActorId,
        restart_generation: u64,
    ) {
        {
            let mut state = self.state.lock().unwrap();
            let Some(queue) = state.client_queues.get_mut(actor_id) else {
                tracing::warn!("out-of-scope notification for unknown actor {}", actor_id);
                return;
            };
            if queue
                .last_out_of_scope_generation
                .is_some_and(|generation| generation >= restart_generation)
            {
                return;
            }
            queue.last_out_of_scope_generation = Some(restart_generation);
            if !queue.state.is_dead() {
                // Hold off dispatch until the death is published; queued
                // work is failed or restarted when it arrives.
                queue.pending_out_of_scope_death = true;
                queue.rpc_client = None;
            }
        }
        let Some(submitter) = self.weak.upgrade() else {
            return;
        };
        let actor_id = actor_id.clone();
        tokio::spawn(async move {
            if let Err(err) = submitter
                .actor_creator
                .notify_actor_out_of_scope(&actor_id, restart_generation)
                .await
            {
                tracing::warn!("failed to notify actor {} out of scope: {}", actor_id, err);
            }
        });
    }

    /// Whether a new submission to the actor would be rejected for
    /// back-pressure.
    pub fn pending_tasks_full(&self, actor_id: &ActorId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .client_queues
            .get(actor_id)
            .is_some_and(|queue| queue.is_full())
    }

    /// The number of submissions to the actor that are queued or in
    /// flight.
    pub fn num_pending_tasks(&self, actor_id: &ActorId) -> usize {
        let state = self.state.lock().unwrap();
        state
            .client_queues
            .get(actor_id)
            .map_or(0, |queue| queue.cur_pending_calls)
    }

    /// Whether a queue exists for the actor.
    pub fn check_actor_exists(&self, actor_id: &ActorId) -> bool {
        let state = self.state.lock().unwrap();
        state.client_queues.contains_key(actor_id)
    }

    /// Whether the actor is currently alive.
    pub fn is_actor_alive(&self, actor_id: &ActorId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .client_queues
            .get(actor_id)
            .is_some_and(|queue| queue.state.is_alive())
    }

    /// The actor's last reported address, while connected.
    pub fn get_actor_address(&self, actor_id: &ActorId) -> Option<Address> {
        let state = self.state.lock().unwrap();
        state
            .client_queues
            .get(actor_id)
            .and_then(|queue| queue.address.clone())
    }

    /// The actor's lifecycle state as seen locally. `None` if the actor is
    /// unknown.
    pub fn get_local_actor_state(&self, actor_id: &ActorId) -> Option<ActorState> {
        let state = self.state.lock().unwrap();
        state.client_queues.get(actor_id).map(|queue| queue.state)
    }

    /// A rendering of the actor's queue for diagnostics.
    pub fn debug_string(&self, actor_id: &ActorId) -> String {
        let state = self.state.lock().unwrap();
        match state.client_queues.get(actor_id) {
            Some(queue) => queue.debug_string(),
            None => format!("no queue for actor {}", actor_id),
        }
    }

    /// Run [`check_timeout_tasks`](Self::check_timeout_tasks) periodically
    /// until the submitter is dropped.
    pub fn spawn_timeout_sweeper(&self) -> JoinHandle<()> {
        let weak = self.weak.clone();
        let clock = self.clock.clone();
        let interval = Duration::from_millis(self.config.check_timeout_interval_ms);
        tokio::spawn(async move {
            loop {
                clock.sleep(interval).await;
                let Some(submitter) = weak.upgrade() else {
                    return;
                };
                submitter.check_timeout_tasks();
            }
        })
    }

    fn cancel_task_with_backoff(
        &self,
        task_spec: TaskSpec,
        recursive: bool,
        retry_backoff_ms: u64,
    ) -> bool {
        let actor_id = task_spec.actor_id.clone();
        let task_id = task_spec.task_id.clone();
        let attempt = task_spec.task_attempt();
        let mut deferred = Deferred::new();
        let mut inflight_client = None;
        let mut schedule_retry = false;
        let accepted;
        {
            let mut state = self.state.lock().unwrap();
            state.generators_to_resubmit.remove(&task_id);
            let Some(queue) = state.client_queues.get_mut(&actor_id) else {
                tracing::warn!("cancel for unknown actor {}", actor_id);
                return false;
            };
            if queue.state.is_dead() {
                // Death handling already failed, or will fail, the task.
                accepted = false;
            } else if let Some(seq) = queue.submit_queue.find_seq(&task_id) {
                if let Some((_, resolved)) = queue.submit_queue.remove(seq) {
                    queue.cur_pending_calls -= 1;
                    if !resolved {
                        let resolver = Arc::clone(&self.resolver);
                        let cancel_id = task_id.clone();
                        deferred.push(move || resolver.cancel_resolution(&cancel_id));
                    }
                }
                let task_manager = Arc::clone(&self.task_manager);
                let failed_id = task_id.clone();
                deferred.push(move || {
                    task_manager.mark_task_canceled(&failed_id);
                    task_manager.fail_pending_task(&failed_id, ErrorInfo::cancelled(&failed_id));
                });
                accepted = true;
            } else if queue.inflight_tasks.contains_key(&attempt) {
                let task_manager = Arc::clone(&self.task_manager);
                let canceled_id = task_id.clone();
                deferred.push(move || task_manager.mark_task_canceled(&canceled_id));
                match &queue.rpc_client {
                    Some(client) => inflight_client = Some(Arc::clone(client)),
                    // The actor is reconnecting; try again once it is back.
                    None => schedule_retry = true,
                }
                accepted = true;
            } else {
                // Already finished.
                accepted = false;
            }
        }
        deferred.run();
        if let Some(client) = inflight_client {
            if let Some(submitter) = self.weak.upgrade() {
                tokio::spawn(async move {
                    let request = CancelTaskRequest {
                        task_id: task_spec.task_id.clone(),
                        attempt_number: task_spec.attempt_number,
                        recursive,
                    };
                    match client.cancel_task(request).await {
                        Ok(reply) if reply.attempt_succeeded => {
                            tracing::debug!(
                                "executor accepted cancel of {}",
                                task_spec.task_attempt()
                            );
                        }
                        Ok(_) | Err(_) => {
                            // "Never received" and "already finished" look
                            // the same from here; keep retrying until the
                            // original push resolves.
                            submitter.retry_cancel_task(task_spec, recursive, retry_backoff_ms);
                        }
                    }
                });
            }
        } else if schedule_retry {
            self.retry_cancel_task(task_spec, recursive, retry_backoff_ms);
        }
        accepted
    }

    fn spawn_resolution(&self, seq: u64, task_spec: TaskSpec) {
        let Some(submitter) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let result = submitter.resolver.resolve_dependencies(&task_spec).await;
            submitter.finish_resolution(seq, task_spec, result);
        });
    }

    fn finish_resolution(&self, seq: u64, task_spec: TaskSpec, result: Result<(), anyhow::Error>) {
        let actor_id = task_spec.actor_id.clone();
        let mut deferred = Deferred::new();
        {
            let mut state = self.state.lock().unwrap();
            let Some(queue) = state.client_queues.get_mut(&actor_id) else {
                return;
            };
            if !queue.submit_queue.contains(seq) {
                // Cancelled, or failed wholesale on actor death.
                return;
            }
            match result {
                Ok(()) => {
                    queue.submit_queue.mark_dependency_resolved(seq);
                    self.send_pending_tasks(&mut state, &actor_id, &mut deferred);
                }
                Err(err) => {
                    queue.submit_queue.remove(seq);
                    queue.cur_pending_calls -= 1;
                    let task_manager = Arc::clone(&self.task_manager);
                    let task_id = task_spec.task_id.clone();
                    let error_info = ErrorInfo::dependency_resolution_failed(err.to_string());
                    deferred.push(move || task_manager.fail_pending_task(&task_id, error_info));
                }
            }
        }
        deferred.run();
    }

    /// Dispatch everything that is ready. Requires the lock (via `state`);
    /// the excess-queueing warning is deferred past the unlock.
    fn send_pending_tasks(
        &self,
        state: &mut SubmitterState,
        actor_id: &ActorId,
        deferred: &mut Deferred,
    ) {
        let Some(queue) = state.client_queues.get_mut(actor_id) else {
            return;
        };
        if !queue.can_dispatch() {
            return;
        }
        let Some(client) = queue.rpc_client.clone() else {
            return;
        };
        for (seq, spec) in queue.submit_queue.pop_ready() {
            queue
                .inflight_tasks
                .insert(spec.task_attempt(), InflightTask { spec: spec.clone() });
            self.push_actor_task(Arc::clone(&client), seq, spec);
        }
        let cur_pending = queue.cur_pending_calls as u64;
        if cur_pending >= state.next_queueing_warn_threshold {
            state.next_queueing_warn_threshold *= 2;
            if let Some(submitter) = self.weak.upgrade() {
                let warn_actor = actor_id.clone();
                deferred.push(move || (submitter.warn_excess_queueing)(&warn_actor, cur_pending));
            }
        }
    }

    fn push_actor_task(&self, client: Arc<dyn WorkerClient>, seq: u64, spec: TaskSpec) {
        tracing::debug!(
            "pushing {} (seq {}) to actor {}",
            spec.task_attempt(),
            seq,
            spec.actor_id
        );
        let Some(submitter) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let request = PushTaskRequest {
                task_spec: spec.clone(),
                sequence_number: seq,
            };
            let result = client.push_task(request).await;
            submitter.handle_push_task_reply(result, spec);
        });
    }

    fn handle_push_task_reply(&self, result: Result<PushTaskReply, RpcError>, task_spec: TaskSpec) {
        let actor_id = task_spec.actor_id.clone();
        let attempt = task_spec.task_attempt();
        let mut deferred = Deferred::new();
        {
            let mut state = self.state.lock().unwrap();
            let Some(queue) = state.client_queues.get_mut(&actor_id) else {
                return;
            };
            if queue.inflight_tasks.remove(&attempt).is_none() {
                // The attempt was retired when the actor restarted or
                // died; its failure is already reported.
                tracing::debug!("dropping stale reply for {}", attempt);
                return;
            }
            queue.cur_pending_calls -= 1;
            let mut completed = false;
            match result {
                Ok(reply) => {
                    let task_manager = Arc::clone(&self.task_manager);
                    let task_id = task_spec.task_id.clone();
                    let attempt_number = task_spec.attempt_number;
                    deferred.push(move || {
                        task_manager.mark_task_succeeded(&task_id, attempt_number, reply)
                    });
                    completed = true;
                }
                Err(status) => {
                    if queue.state.is_dead() {
                        let cause = queue.death_cause_or_default();
                        let retriable = queue.owned && queue.is_restartable;
                        self.defer_death_failure(&task_spec, &cause, retriable, &mut deferred);
                    } else if queue.state.is_alive() {
                        if queue.fail_if_actor_unreachable {
                            let task_manager = Arc::clone(&self.task_manager);
                            let task_id = task_spec.task_id.clone();
                            let attempt_number = task_spec.attempt_number;
                            let error_info = ErrorInfo::actor_unavailable(format!(
                                "task could not be delivered to actor {}: {}",
                                actor_id, status
                            ));
                            deferred.push(move || {
                                task_manager.fail_or_retry_pending_task(
                                    &task_id,
                                    attempt_number,
                                    error_info,
                                    Some(status),
                                )
                            });
                        } else {
                            // The actor may be dead without us knowing yet.
                            // Park the task until the death notification
                            // arrives or the deadline passes.
                            let deadline_ms =
                                self.clock.now_ms() + self.config.actor_task_timeout_ms;
                            let timeout_error_info =
                                ErrorInfo::timed_out_waiting_for_death_info(&actor_id);
                            queue.wait_for_death_info_tasks.push_back(
                                PendingTaskWaitingForDeathInfo {
                                    deadline_ms,
                                    task_spec: task_spec.clone(),
                                    status,
                                    timeout_error_info,
                                    actor_preempted: false,
                                },
                            );
                        }
                    } else {
                        // The actor moved on to a new incarnation; the
                        // task manager may retry against it.
                        let task_manager = Arc::clone(&self.task_manager);
                        let task_id = task_spec.task_id.clone();
                        let attempt_number = task_spec.attempt_number;
                        let error_info = ErrorInfo::actor_unavailable(format!(
                            "actor {} restarted while the task was in flight",
                            actor_id
                        ));
                        deferred.push(move || {
                            task_manager.fail_or_retry_pending_task(
                                &task_id,
                                attempt_number,
                                error_info,
                                Some(status),
                            )
                        });
                    }
                }
            }
            if completed && state.generators_to_resubmit.remove(&task_spec.task_id) {
                let task_manager = Arc::clone(&self.task_manager);
                let task_id = task_spec.task_id.clone();
                deferred.push(move || task_manager.mark_generator_failed_and_resubmit(&task_id));
            }
        }
        deferred.run();
    }

    /// Fail an expired death-info entry, with the preemption error when
    /// the actor was preempted.
    fn fail_task_with_error(&self, task: PendingTaskWaitingForDeathInfo) {
        let error_info = if task.actor_preempted {
            ErrorInfo::actor_preempted(&task.task_spec.actor_id)
        } else {
            task.timeout_error_info
        };
        tracing::info!(
            "failing task {} after waiting for death info: {}",
            task.task_spec.task_id,
            task.status
        );
        self.task_manager
            .fail_pending_task(&task.task_spec.task_id, error_info);
    }

    /// Unbind the RPC client and retire the in-flight table. The retired
    /// attempts are reported (outside the lock) as retriable failures so
    /// the task manager can resubmit them.
    fn release_rpc_client(&self, queue: &mut ClientQueue, deferred: &mut Deferred) {
        queue.rpc_client = None;
        queue.worker_id = None;
        queue.address = None;
        let inflight = std::mem::take(&mut queue.inflight_tasks);
        queue.cur_pending_calls -= inflight.len();
        if !inflight.is_empty() {
            let task_manager = Arc::clone(&self.task_manager);
            deferred.push(move || fail_inflight_tasks_on_restart(task_manager, inflight));
        }
    }

    fn defer_death_failure(
        &self,
        spec: &TaskSpec,
        cause: &DeathCause,
        retriable: bool,
        deferred: &mut Deferred,
    ) {
        let task_manager = Arc::clone(&self.task_manager);
        let task_id = spec.task_id.clone();
        let attempt_number = spec.attempt_number;
        let error_info = ErrorInfo::actor_died(cause);
        if retriable {
            deferred.push(move || {
                task_manager.fail_or_retry_pending_task(&task_id, attempt_number, error_info, None)
            });
        } else {
            deferred.push(move || task_manager.fail_pending_task(&task_id, error_info));
        }
    }

    /// Ask the GCS to restart a dead, restartable, owned actor for lineage
    /// reconstruction. At most one request is in flight per actor; the
    /// acknowledgement bumps the lineage-restart generation, and a
    /// subsequent `connect_actor` completes the restart.
    fn request_lineage_restart(&self, actor_id: &ActorId, queue: &mut ClientQueue) {
        if queue.pending_lineage_restart {
            return;
        }
        queue.pending_lineage_restart = true;
        let target_generation = queue.num_restarts_due_to_lineage_reconstructions + 1;
        tracing::info!(
            "requesting lineage-reconstruction restart of actor {} (generation {})",
            actor_id,
            target_generation
        );
        let Some(submitter) = self.weak.upgrade() else {
            return;
        };
        let actor_id = actor_id.clone();
        tokio::spawn(async move {
            let result = submitter
                .actor_creator
                .restart_actor_for_lineage_reconstruction(&actor_id, target_generation)
                .await;
            let mut state = submitter.state.lock().unwrap();
            let Some(queue) = state.client_queues.get_mut(&actor_id) else {
                return;
            };
            queue.pending_lineage_restart = false;
            match result {
                Ok(()) => {
                    if queue.num_restarts_due_to_lineage_reconstructions < target_generation {
                        queue.num_restarts_due_to_lineage_reconstructions = target_generation;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "lineage-reconstruction restart of actor {} failed: {}",
                        actor_id,
                        err
                    );
                }
            }
        });
    }
}

/// Report each retired in-flight attempt as a retriable failure. Runs with
/// no lock held: the task manager may resubmit synchronously.
fn fail_inflight_tasks_on_restart(
    task_manager: Arc<dyn TaskManager>,
    inflight: HashMap<TaskAttempt, InflightTask>,
) {
    for (attempt, task) in inflight {
        tracing::debug!("retiring in-flight attempt {}", attempt);
        let error_info = ErrorInfo::actor_unavailable(format!(
            "actor {} lost its worker before the reply arrived",
            task.spec.actor_id
        ));
        task_manager.fail_or_retry_pending_task(&attempt.0, attempt.1, error_info, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::error::ErrorKind;
    use crate::reference::ObjectId;
    use crate::reference::WorkerId;
    use crate::rpc::CancelTaskReply;
    use crate::task::TaskArg;
    use crate::test_utils::ActorCreatorEvent;
    use crate::test_utils::MockActorCreator;
    use crate::test_utils::MockDependencyResolver;
    use crate::test_utils::MockReferenceCounter;
    use crate::test_utils::MockTaskManager;
    use crate::test_utils::MockWorkerClientPool;
    use crate::test_utils::TaskManagerEvent;

    struct TestHarness {
        submitter: Arc<ActorTaskSubmitter>,
        pool: Arc<MockWorkerClientPool>,
        task_manager: Arc<MockTaskManager>,
        resolver: Arc<MockDependencyResolver>,
        actor_creator: Arc<MockActorCreator>,
        reference_counter: Arc<MockReferenceCounter>,
        clock: SimClock,
        warnings: Arc<Mutex<Vec<(ActorId, u64)>>>,
    }

    fn test_config() -> Config {
        Config {
            excess_queueing_warn_threshold: 1000,
            actor_task_timeout_ms: 1000,
            cancel_retry_backoff_ms: 100,
            check_timeout_interval_ms: 100,
        }
    }

    fn harness() -> TestHarness {
        harness_with_config(test_config())
    }

    fn harness_with_config(config: Config) -> TestHarness {
        let pool = MockWorkerClientPool::new();
        let task_manager = MockTaskManager::new();
        let resolver = MockDependencyResolver::new();
        let actor_creator = MockActorCreator::new();
        let reference_counter = MockReferenceCounter::new();
        let clock = SimClock::new();
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let warn: WarnExcessQueueingFn = {
            let warnings = Arc::clone(&warnings);
            Box::new(move |actor_id: &ActorId, queued: u64| {
                warnings.lock().unwrap().push((actor_id.clone(), queued));
            })
        };
        let submitter = ActorTaskSubmitter::new(
            Arc::clone(&pool) as Arc<dyn WorkerClientPool>,
            Arc::clone(&actor_creator) as Arc<dyn ActorCreator>,
            Arc::clone(&resolver) as Arc<dyn DependencyResolver>,
            Arc::clone(&task_manager) as Arc<dyn TaskManager>,
            Arc::clone(&reference_counter) as Arc<dyn ReferenceCounter>,
            warn,
            config,
            ClockKind::Sim(clock.clone()),
        );
        TestHarness {
            submitter,
            pool,
            task_manager,
            resolver,
            actor_creator,
            reference_counter,
            clock,
            warnings,
        }
    }

    impl TestHarness {
        fn add_queue(&self, actor_id: &ActorId, max_pending_calls: Option<usize>) {
            self.submitter.add_actor_queue_if_not_exists(
                actor_id,
                max_pending_calls,
                false,
                false,
                false,
            );
        }
    }

    fn actor(name: &str) -> ActorId {
        ActorId::new(name)
    }

    fn addr(port: u16) -> Address {
        Address::new("10.0.0.1", port, WorkerId::new(format!("w{}", port)))
    }

    fn task(name: &str, actor_id: &ActorId) -> TaskSpec {
        TaskSpec::new(TaskId::new(name), actor_id.clone())
    }

    fn task_with_dep(name: &str, actor_id: &ActorId, object: &str) -> TaskSpec {
        let mut spec = task(name, actor_id);
        spec.args = vec![TaskArg::ObjectRef(ObjectId::new(object))];
        spec
    }

    /// Let spawned resolution, push, and reply tasks run to their next
    /// await point.
    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_happy_path_dispatches_in_submission_order() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));

        for name in ["t0", "t1", "t2"] {
            h.submitter.submit_task(task(name, &a)).unwrap();
        }
        settle().await;

        h.submitter.connect_actor(&a, addr(1), 0);
        settle().await;

        let client = h.pool.client_for(&addr(1));
        assert_eq!(
            client.pushed_task_ids(),
            vec![TaskId::new("t0"), TaskId::new("t1"), TaskId::new("t2")]
        );
        let seqs: Vec<u64> = client.pushes().iter().map(|p| p.sequence_number).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(h.submitter.num_pending_tasks(&a), 3);

        for index in 0..3 {
            assert!(client.reply_to_push(index, Ok(PushTaskReply::default())));
        }
        settle().await;

        assert_eq!(
            h.task_manager.succeeded(),
            vec![TaskId::new("t0"), TaskId::new("t1"), TaskId::new("t2")]
        );
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);
        assert!(!h.submitter.pending_tasks_full(&a));
    }

    #[tokio::test]
    async fn test_back_pressure_rejects_before_counting() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(2));

        h.submitter.submit_task(task("t0", &a)).unwrap();
        h.submitter.submit_task(task("t1", &a)).unwrap();
        assert!(h.submitter.pending_tasks_full(&a));

        let result = h.submitter.submit_task(task("t2", &a));
        assert!(matches!(result, Err(SubmitError::QueueFull(_, 2))));
        // The rejected submission did not move the counter.
        assert_eq!(h.submitter.num_pending_tasks(&a), 2);
    }

    #[tokio::test]
    async fn test_restart_mid_flight_retires_and_redispatches() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);

        h.submitter.submit_task(task("t0", &a)).unwrap();
        h.submitter.submit_task(task("t1", &a)).unwrap();
        settle().await;
        assert_eq!(h.pool.client_for(&addr(1)).num_pushes(), 2);

        h.submitter.disconnect_actor(&a, 0, false, None, false);
        settle().await;

        let mut retried = h.task_manager.retriable_failures();
        retried.sort();
        assert_eq!(
            retried,
            vec![
                (TaskId::new("t0"), ErrorKind::ActorUnavailable),
                (TaskId::new("t1"), ErrorKind::ActorUnavailable),
            ]
        );
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);
        assert_eq!(
            h.submitter.get_local_actor_state(&a),
            Some(ActorState::Restarting)
        );

        // The task manager resubmits the retried attempts.
        for name in ["t0", "t1"] {
            let mut spec = task(name, &a);
            spec.attempt_number = 1;
            h.submitter.submit_task(spec).unwrap();
        }
        settle().await;

        h.submitter.connect_actor(&a, addr(2), 1);
        settle().await;

        let client = h.pool.client_for(&addr(2));
        assert_eq!(
            client.pushed_task_ids(),
            vec![TaskId::new("t0"), TaskId::new("t1")]
        );
        client.reply_to_push(0, Ok(PushTaskReply::default()));
        client.reply_to_push(1, Ok(PushTaskReply::default()));
        settle().await;

        assert_eq!(
            h.task_manager.succeeded(),
            vec![TaskId::new("t0"), TaskId::new("t1")]
        );
        assert!(h.submitter.is_actor_alive(&a));
    }

    #[tokio::test]
    async fn test_authoritative_death_beats_timeout() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);

        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;

        let client = h.pool.client_for(&addr(1));
        client.reply_to_push(0, Err(RpcError::Disconnected));
        settle().await;

        // Parked waiting for death info; nothing failed yet.
        assert!(h.task_manager.terminal_failures().is_empty());

        h.submitter.disconnect_actor(
            &a,
            0,
            true,
            Some(DeathCause::OutOfMemory {
                reason: "worker over limit".to_string(),
            }),
            false,
        );
        settle().await;

        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(TaskId::new("t0"), ErrorKind::ActorDied)]
        );

        // The buffer is drained; a later sweep finds nothing.
        h.clock.advance(10_000);
        h.submitter.check_timeout_tasks();
        settle().await;
        assert_eq!(h.task_manager.terminal_failures().len(), 1);
    }

    #[tokio::test]
    async fn test_death_info_timeout_fails_task() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);
        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;

        h.pool
            .client_for(&addr(1))
            .reply_to_push(0, Err(RpcError::Disconnected));
        settle().await;

        // Just short of the deadline: nothing expires.
        h.clock.advance(999);
        h.submitter.check_timeout_tasks();
        assert!(h.task_manager.terminal_failures().is_empty());

        h.clock.advance(1);
        h.submitter.check_timeout_tasks();
        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(
                TaskId::new("t0"),
                ErrorKind::TaskTimedOutWaitingForDeathInfo
            )]
        );
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);
    }

    #[tokio::test]
    async fn test_death_buffer_expires_in_deadline_order() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);

        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;
        let client = h.pool.client_for(&addr(1));
        client.reply_to_push(0, Err(RpcError::Disconnected));
        settle().await;

        h.clock.advance(500);
        h.submitter.submit_task(task("t1", &a)).unwrap();
        settle().await;
        client.reply_to_push(1, Err(RpcError::Disconnected));
        settle().await;

        // t0's deadline (1000) passes first; t1 (1500) survives the sweep.
        h.clock.advance(500);
        h.submitter.check_timeout_tasks();
        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(
                TaskId::new("t0"),
                ErrorKind::TaskTimedOutWaitingForDeathInfo
            )]
        );

        h.clock.advance(500);
        h.submitter.check_timeout_tasks();
        assert_eq!(h.task_manager.terminal_failures().len(), 2);
    }

    #[tokio::test]
    async fn test_preempted_actor_fails_with_preemption_error() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);
        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;

        h.pool
            .client_for(&addr(1))
            .reply_to_push(0, Err(RpcError::Disconnected));
        settle().await;

        h.submitter.set_preempted(&a);
        // Idempotent.
        h.submitter.set_preempted(&a);

        h.clock.advance(1000);
        h.submitter.check_timeout_tasks();
        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(TaskId::new("t0"), ErrorKind::ActorPreempted)]
        );
    }

    #[tokio::test]
    async fn test_cancel_unresolved_dependency() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));

        let spec = task_with_dep("t0", &a, "o1");
        h.submitter.submit_task(spec.clone()).unwrap();
        settle().await;

        assert!(h.submitter.cancel_task(spec, false));
        settle().await;

        assert_eq!(h.resolver.cancelled(), vec![TaskId::new("t0")]);
        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(TaskId::new("t0"), ErrorKind::TaskCancelled)]
        );
        assert!(h
            .task_manager
            .events()
            .contains(&TaskManagerEvent::Canceled {
                task_id: TaskId::new("t0")
            }));
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);

        // The actor never sees the task.
        h.submitter.connect_actor(&a, addr(1), 0);
        settle().await;
        assert_eq!(h.pool.client_for(&addr(1)).num_pushes(), 0);
    }

    #[tokio::test]
    async fn test_cancel_queued_resolved_task() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));

        let spec = task("t0", &a);
        h.submitter.submit_task(spec.clone()).unwrap();
        settle().await;

        assert!(h.submitter.cancel_task(spec, false));
        settle().await;

        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(TaskId::new("t0"), ErrorKind::TaskCancelled)]
        );
        assert!(h.resolver.cancelled().is_empty());
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);
    }

    #[tokio::test]
    async fn test_cancel_inflight_retries_until_push_resolves() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);

        let spec = task("t0", &a);
        h.submitter.submit_task(spec.clone()).unwrap();
        settle().await;

        let client = h.pool.client_for(&addr(1));
        assert_eq!(client.num_pushes(), 1);

        // First cancel attempt is rejected by the executor.
        client.queue_cancel_reply(Ok(CancelTaskReply {
            attempt_succeeded: false,
        }));
        assert!(h.submitter.cancel_task(spec.clone(), false));
        settle().await;
        assert_eq!(client.cancel_requests().len(), 1);

        // The retry fires after the backoff and succeeds.
        h.clock.advance(100);
        settle().await;
        assert_eq!(client.cancel_requests().len(), 2);

        // No further retries once the executor accepted.
        h.clock.advance(10_000);
        settle().await;
        assert_eq!(client.cancel_requests().len(), 2);

        // The push resolves as cancelled-before-running.
        client.reply_to_push(
            0,
            Ok(PushTaskReply {
                was_cancelled_before_running: true,
                ..Default::default()
            }),
        );
        settle().await;
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);
    }

    #[tokio::test]
    async fn test_cancel_finished_task_is_noop() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);

        let spec = task("t0", &a);
        h.submitter.submit_task(spec.clone()).unwrap();
        settle().await;
        h.pool
            .client_for(&addr(1))
            .reply_to_push(0, Ok(PushTaskReply::default()));
        settle().await;

        assert!(!h.submitter.cancel_task(spec, false));
        settle().await;
        assert!(!h
            .task_manager
            .events()
            .iter()
            .any(|event| matches!(event, TaskManagerEvent::Canceled { .. })));
    }

    #[tokio::test]
    async fn test_stale_lifecycle_messages_dropped() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));

        h.submitter.connect_actor(&a, addr(2), 2);
        assert!(h.submitter.is_actor_alive(&a));

        // A stale connect from an older incarnation.
        h.submitter.connect_actor(&a, addr(1), 1);
        assert_eq!(
            h.submitter.get_actor_address(&a).unwrap().worker_id,
            WorkerId::new("w2")
        );

        // A stale death notification.
        h.submitter.disconnect_actor(
            &a,
            1,
            true,
            Some(DeathCause::ActorExit {
                reason: "old incarnation".to_string(),
            }),
            false,
        );
        assert!(h.submitter.is_actor_alive(&a));
        assert_eq!(h.submitter.get_local_actor_state(&a), Some(ActorState::Alive));
    }

    #[tokio::test]
    async fn test_sequential_unresolved_head_gates_dispatch() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);

        h.submitter.submit_task(task_with_dep("t0", &a, "o1")).unwrap();
        h.submitter.submit_task(task("t1", &a)).unwrap();
        h.submitter.submit_task(task("t2", &a)).unwrap();
        settle().await;

        let client = h.pool.client_for(&addr(1));
        assert_eq!(client.num_pushes(), 0);

        h.resolver.complete(&TaskId::new("t0"));
        settle().await;
        assert_eq!(
            client.pushed_task_ids(),
            vec![TaskId::new("t0"), TaskId::new("t1"), TaskId::new("t2")]
        );
    }

    #[tokio::test]
    async fn test_out_of_order_queue_does_not_gate() {
        let h = harness();
        let a = actor("a");
        h.submitter
            .add_actor_queue_if_not_exists(&a, Some(8), true, false, false);
        h.submitter.connect_actor(&a, addr(1), 0);

        h.submitter.submit_task(task_with_dep("t0", &a, "o1")).unwrap();
        h.submitter.submit_task(task("t1", &a)).unwrap();
        settle().await;

        let client = h.pool.client_for(&addr(1));
        assert_eq!(client.pushed_task_ids(), vec![TaskId::new("t1")]);

        h.resolver.complete(&TaskId::new("t0"));
        settle().await;
        assert_eq!(
            client.pushed_task_ids(),
            vec![TaskId::new("t1"), TaskId::new("t0")]
        );
    }

    #[tokio::test]
    async fn test_dependency_resolution_failure_fails_task() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));

        h.submitter.submit_task(task_with_dep("t0", &a, "o1")).unwrap();
        settle().await;

        h.resolver.fail(&TaskId::new("t0"), "object lost");
        settle().await;

        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(
                TaskId::new("t0"),
                ErrorKind::DependencyResolutionFailed
            )]
        );
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);
    }

    #[tokio::test]
    async fn test_submit_to_unknown_actor() {
        let h = harness();
        let result = h.submitter.submit_task(task("t0", &actor("nobody")));
        assert!(matches!(result, Err(SubmitError::QueueMissing(_))));
    }

    #[tokio::test]
    async fn test_submit_to_dead_actor_fails_with_death_cause() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);
        h.submitter.disconnect_actor(
            &a,
            0,
            true,
            Some(DeathCause::OutOfMemory {
                reason: "oom".to_string(),
            }),
            false,
        );

        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;

        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(TaskId::new("t0"), ErrorKind::ActorDied)]
        );
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);
    }

    #[tokio::test]
    async fn test_fail_if_actor_unreachable_fails_fast_while_restarting() {
        let h = harness();
        let a = actor("a");
        h.submitter
            .add_actor_queue_if_not_exists(&a, Some(8), false, true, false);
        h.submitter.connect_actor(&a, addr(1), 0);
        h.submitter.disconnect_actor(&a, 0, false, None, false);

        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;

        assert_eq!(
            h.task_manager.retriable_failures(),
            vec![(TaskId::new("t0"), ErrorKind::ActorUnavailable)]
        );
        assert_eq!(h.submitter.num_pending_tasks(&a), 0);
    }

    #[tokio::test]
    async fn test_fail_if_actor_unreachable_skips_death_buffer() {
        let h = harness();
        let a = actor("a");
        h.submitter
            .add_actor_queue_if_not_exists(&a, Some(8), false, true, false);
        h.submitter.connect_actor(&a, addr(1), 0);
        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;

        h.pool
            .client_for(&addr(1))
            .reply_to_push(0, Err(RpcError::Disconnected));
        settle().await;

        // Failed immediately instead of parking for death info.
        assert_eq!(
            h.task_manager.retriable_failures(),
            vec![(TaskId::new("t0"), ErrorKind::ActorUnavailable)]
        );
    }

    #[tokio::test]
    async fn test_add_queue_is_idempotent() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(1));
        // The second registration does not replace the first.
        h.add_queue(&a, Some(99));
        assert!(h.submitter.check_actor_exists(&a));

        h.submitter.submit_task(task("t0", &a)).unwrap();
        assert!(h.submitter.pending_tasks_full(&a));
    }

    #[tokio::test]
    async fn test_excess_queueing_warns_and_doubles() {
        let mut config = test_config();
        config.excess_queueing_warn_threshold = 2;
        let h = harness_with_config(config);
        let a = actor("a");
        h.add_queue(&a, Some(16));

        for name in ["t0", "t1", "t2"] {
            h.submitter.submit_task(task(name, &a)).unwrap();
        }
        settle().await;
        assert!(h.warnings.lock().unwrap().is_empty());

        h.submitter.connect_actor(&a, addr(1), 0);
        settle().await;
        assert_eq!(h.warnings.lock().unwrap().clone(), vec![(a.clone(), 3)]);
    }

    #[tokio::test]
    async fn test_generator_resubmitted_after_reply() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.submitter.connect_actor(&a, addr(1), 0);

        let mut spec = task("t0", &a);
        spec.is_streaming_generator = true;
        h.submitter.submit_task(spec.clone()).unwrap();
        settle().await;

        assert!(h.submitter.queue_generator_for_resubmit(&spec));

        h.pool
            .client_for(&addr(1))
            .reply_to_push(0, Ok(PushTaskReply::default()));
        settle().await;

        let events = h.task_manager.events();
        assert!(events.contains(&TaskManagerEvent::GeneratorResubmitted {
            task_id: TaskId::new("t0")
        }));

        // Not in flight anymore: no resubmission promise.
        assert!(!h.submitter.queue_generator_for_resubmit(&spec));
    }

    #[tokio::test]
    async fn test_out_of_scope_suppresses_dispatch_until_death() {
        let h = harness();
        let a = actor("a");
        h.submitter
            .add_actor_queue_if_not_exists(&a, Some(8), false, false, true);

        assert!(h.reference_counter.drop_all_references(&a));
        settle().await;
        assert_eq!(
            h.actor_creator.events(),
            vec![ActorCreatorEvent::OutOfScopeNotified {
                actor_id: a.clone(),
                restart_generation: 0
            }]
        );

        // Repeated notification for the same generation is dropped.
        assert!(h.reference_counter.drop_all_references(&a));
        settle().await;
        assert_eq!(h.actor_creator.events().len(), 1);

        // Dispatch is held back even though the actor connects.
        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;
        h.submitter.connect_actor(&a, addr(1), 0);
        settle().await;
        assert_eq!(h.pool.client_for(&addr(1)).num_pushes(), 0);

        // The published death resolves the pending work.
        h.submitter
            .disconnect_actor(&a, 0, true, Some(DeathCause::OutOfScope), false);
        settle().await;
        assert_eq!(
            h.task_manager.terminal_failures(),
            vec![(TaskId::new("t0"), ErrorKind::ActorDied)]
        );
    }

    #[tokio::test]
    async fn test_lineage_restart_for_dead_restartable_actor() {
        let h = harness();
        let a = actor("a");
        h.submitter
            .add_actor_queue_if_not_exists(&a, Some(8), false, false, true);

        h.submitter.submit_task(task("t0", &a)).unwrap();
        settle().await;

        h.submitter.disconnect_actor(
            &a,
            0,
            true,
            Some(DeathCause::NodeDied {
                node: "n1".to_string(),
            }),
            true,
        );
        settle().await;

        // Queued work fails retriably and triggers a restart request.
        assert_eq!(
            h.task_manager.retriable_failures(),
            vec![(TaskId::new("t0"), ErrorKind::ActorDied)]
        );
        assert_eq!(
            h.actor_creator.events(),
            vec![ActorCreatorEvent::LineageRestartRequested {
                actor_id: a.clone(),
                target_generation: 1
            }]
        );

        // A retried submission against the dead actor requests another
        // restart for the next generation.
        let mut retry = task("t0", &a);
        retry.attempt_number = 1;
        h.submitter.submit_task(retry).unwrap();
        settle().await;
        assert_eq!(h.actor_creator.events().len(), 2);

        // The restart completes: the actor reconnects and the queued
        // attempt is dispatched.
        h.submitter.connect_actor(&a, addr(3), 1);
        settle().await;
        let client = h.pool.client_for(&addr(3));
        assert_eq!(client.pushed_task_ids(), vec![TaskId::new("t0")]);
    }

    #[tokio::test]
    async fn test_actor_creation_task_moves_to_pending_creation() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));

        h.submitter
            .submit_actor_creation_task(task("create-a", &a))
            .await
            .unwrap();
        assert_eq!(
            h.submitter.get_local_actor_state(&a),
            Some(ActorState::PendingCreation)
        );
        assert_eq!(
            h.actor_creator.events(),
            vec![ActorCreatorEvent::Registered { actor_id: a.clone() }]
        );
    }

    #[tokio::test]
    async fn test_actor_creation_registration_failure() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));
        h.actor_creator.fail_next_register("placement failed");

        let result = h
            .submitter
            .submit_actor_creation_task(task("create-a", &a))
            .await;
        assert!(matches!(result, Err(SubmitError::ActorRegistration(_, _))));
        assert_eq!(
            h.submitter.get_local_actor_state(&a),
            Some(ActorState::DependenciesUnready)
        );
    }

    #[tokio::test]
    async fn test_pending_calls_invariant_across_lifecycle() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(8));

        for name in ["t0", "t1", "t2"] {
            h.submitter.submit_task(task(name, &a)).unwrap();
        }
        settle().await;
        // All queued.
        assert_eq!(h.submitter.num_pending_tasks(&a), 3);

        h.submitter.connect_actor(&a, addr(1), 0);
        settle().await;
        // All in flight.
        assert_eq!(h.submitter.num_pending_tasks(&a), 3);

        h.pool
            .client_for(&addr(1))
            .reply_to_push(0, Ok(PushTaskReply::default()));
        settle().await;
        assert_eq!(h.submitter.num_pending_tasks(&a), 2);
    }

    #[tokio::test]
    async fn test_debug_string_renders_counters() {
        let h = harness();
        let a = actor("a");
        h.add_queue(&a, Some(4));
        h.submitter.submit_task(task("t0", &a)).unwrap();

        let rendered = h.submitter.debug_string(&a);
        assert!(rendered.contains("max_pending_calls=4"));
        assert!(rendered.contains("cur_pending_calls=1"));
        assert!(h
            .submitter
            .debug_string(&actor("nobody"))
            .contains("no queue"));
    }
}
