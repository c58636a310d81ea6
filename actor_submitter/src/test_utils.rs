/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Test doubles for the collaborator seams: a scriptable worker client and
//! pool, a recording task manager, a gated dependency resolver, a
//! recording actor creator, and a manually triggered reference counter.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::ErrorInfo;
use crate::error::ErrorKind;
use crate::error::RpcError;
use crate::gcs::ActorCreator;
use crate::reference::ActorId;
use crate::reference::Address;
use crate::reference::TaskId;
use crate::reference_count::ActorOutOfScopeCallback;
use crate::reference_count::ReferenceCounter;
use crate::resolver::DependencyResolver;
use crate::rpc::CancelTaskReply;
use crate::rpc::CancelTaskRequest;
use crate::rpc::PushTaskReply;
use crate::rpc::PushTaskRequest;
use crate::rpc::WorkerClient;
use crate::rpc::WorkerClientPool;
use crate::task::TaskSpec;
use crate::task_manager::TaskManager;

/// A worker client whose push replies are supplied by the test after the
/// fact, and whose cancel replies can be scripted.
#[derive(Debug, Default)]
pub struct MockWorkerClient {
    state: Mutex<MockWorkerClientState>,
}

#[derive(Debug, Default)]
struct MockWorkerClientState {
    pushes: Vec<PushTaskRequest>,
    push_replies: Vec<Option<oneshot::Sender<Result<PushTaskReply, RpcError>>>>,
    cancels: Vec<CancelTaskRequest>,
    cancel_replies: VecDeque<Result<CancelTaskReply, RpcError>>,
}

impl MockWorkerClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The push requests seen so far, in arrival order.
    pub fn pushes(&self) -> Vec<PushTaskRequest> {
        self.state.lock().unwrap().pushes.clone()
    }

    /// The task ids of the pushes seen so far, in arrival order.
    pub fn pushed_task_ids(&self) -> Vec<TaskId> {
        self.state
            .lock()
            .unwrap()
            .pushes
            .iter()
            .map(|request| request.task_spec.task_id.clone())
            .collect()
    }

    pub fn num_pushes(&self) -> usize {
        self.state.lock().unwrap().pushes.len()
    }

    /// Complete the `index`-th push with `result`. Returns false if that
    /// push was already completed.
    pub fn reply_to_push(&self, index: usize, result: Result<PushTaskReply, RpcError>) -> bool {
        let sender = {
            let mut state = self.state.lock().unwrap();
            match state.push_replies.get_mut(index) {
                Some(slot) => slot.take(),
                None => None,
            }
        };
        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    /// The cancel requests seen so far, in arrival order.
    pub fn cancel_requests(&self) -> Vec<CancelTaskRequest> {
        self.state.lock().unwrap().cancels.clone()
    }

    /// Script the reply to the next cancel request. Unscripted cancels
    /// succeed.
    pub fn queue_cancel_reply(&self, reply: Result<CancelTaskReply, RpcError>) {
        self.state.lock().unwrap().cancel_replies.push_back(reply);
    }
}

#[async_trait]
impl WorkerClient for MockWorkerClient {
    async fn push_task(&self, request: PushTaskRequest) -> Result<PushTaskReply, RpcError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().unwrap();
            state.pushes.push(request);
            state.push_replies.push(Some(tx));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Disconnected),
        }
    }

    async fn cancel_task(&self, request: CancelTaskRequest) -> Result<CancelTaskReply, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.cancels.push(request);
        state.cancel_replies.pop_front().unwrap_or(Ok(CancelTaskReply {
            attempt_succeeded: true,
        }))
    }
}

/// A pool handing out one [`MockWorkerClient`] per address.
#[derive(Debug, Default)]
pub struct MockWorkerClientPool {
    clients: Mutex<HashMap<Address, Arc<MockWorkerClient>>>,
}

impl MockWorkerClientPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The client for `address`, created on first use. The same client the
    /// submitter sees.
    pub fn client_for(&self, address: &Address) -> Arc<MockWorkerClient> {
        let mut clients = self.clients.lock().unwrap();
        Arc::clone(
            clients
                .entry(address.clone())
                .or_insert_with(|| Arc::new(MockWorkerClient::default())),
        )
    }
}

impl WorkerClientPool for MockWorkerClientPool {
    fn get_or_connect(&self, address: &Address) -> Arc<dyn WorkerClient> {
        self.client_for(address)
    }
}

/// What the task manager was told about a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskManagerEvent {
    Succeeded {
        task_id: TaskId,
        attempt_number: u32,
        reply: PushTaskReply,
    },
    FailedOrRetried {
        task_id: TaskId,
        attempt_number: u32,
        kind: ErrorKind,
    },
    Failed {
        task_id: TaskId,
        kind: ErrorKind,
    },
    Canceled {
        task_id: TaskId,
    },
    GeneratorResubmitted {
        task_id: TaskId,
    },
}

/// A task manager that records every report.
#[derive(Debug, Default)]
pub struct MockTaskManager {
    events: Mutex<Vec<TaskManagerEvent>>,
}

impl MockTaskManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TaskManagerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Task ids marked succeeded, in report order.
    pub fn succeeded(&self) -> Vec<TaskId> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskManagerEvent::Succeeded { task_id, .. } => Some(task_id),
                _ => None,
            })
            .collect()
    }

    /// Retriable failures, in report order.
    pub fn retriable_failures(&self) -> Vec<(TaskId, ErrorKind)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskManagerEvent::FailedOrRetried { task_id, kind, .. } => Some((task_id, kind)),
                _ => None,
            })
            .collect()
    }

    /// Terminal failures, in report order.
    pub fn terminal_failures(&self) -> Vec<(TaskId, ErrorKind)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskManagerEvent::Failed { task_id, kind } => Some((task_id, kind)),
                _ => None,
            })
            .collect()
    }
}

impl TaskManager for MockTaskManager {
    fn mark_task_succeeded(&self, task_id: &TaskId, attempt_number: u32, reply: PushTaskReply) {
        self.events.lock().unwrap().push(TaskManagerEvent::Succeeded {
            task_id: task_id.clone(),
            attempt_number,
            reply,
        });
    }

    fn fail_or_retry_pending_task(
        &self,
        task_id: &TaskId,
        attempt_number: u32,
        error_info: ErrorInfo,
        _status: Option<RpcError>,
    ) {
        self.events
            .lock()
            .unwrap()
            .push(TaskManagerEvent::FailedOrRetried {
                task_id: task_id.clone(),
                attempt_number,
                kind: error_info.kind,
            });
    }

    fn fail_pending_task(&self, task_id: &TaskId, error_info: ErrorInfo) {
        self.events.lock().unwrap().push(TaskManagerEvent::Failed {
            task_id: task_id.clone(),
            kind: error_info.kind,
        });
    }

    fn mark_task_canceled(&self, task_id: &TaskId) {
        self.events.lock().unwrap().push(TaskManagerEvent::Canceled {
            task_id: task_id.clone(),
        });
    }

    fn mark_generator_failed_and_resubmit(&self, task_id: &TaskId) {
        self.events
            .lock()
            .unwrap()
            .push(TaskManagerEvent::GeneratorResubmitted {
                task_id: task_id.clone(),
            });
    }
}

#[derive(Debug, Default)]
struct MockResolverState {
    waiting: HashMap<TaskId, oneshot::Sender<Result<(), anyhow::Error>>>,
    cancelled: Vec<TaskId>,
}

/// A resolver that resolves dependency-free tasks immediately and gates
/// everything else until the test completes or fails it.
#[derive(Debug, Default)]
pub struct MockDependencyResolver {
    state: Mutex<MockResolverState>,
}

impl MockDependencyResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Complete a gated resolution successfully. Returns false if nothing
    /// was waiting under `task_id`.
    pub fn complete(&self, task_id: &TaskId) -> bool {
        let sender = self.state.lock().unwrap().waiting.remove(task_id);
        match sender {
            Some(sender) => sender.send(Ok(())).is_ok(),
            None => false,
        }
    }

    /// Fail a gated resolution. Returns false if nothing was waiting.
    pub fn fail(&self, task_id: &TaskId, message: &str) -> bool {
        let sender = self.state.lock().unwrap().waiting.remove(task_id);
        match sender {
            Some(sender) => sender.send(Err(anyhow::anyhow!(message.to_string()))).is_ok(),
            None => false,
        }
    }

    /// Task ids whose resolution was cancelled, in cancellation order.
    pub fn cancelled(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl DependencyResolver for MockDependencyResolver {
    async fn resolve_dependencies(&self, spec: &TaskSpec) -> Result<(), anyhow::Error> {
        if !spec.has_dependencies() {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        self.state
            .lock()
            .unwrap()
            .waiting
            .insert(spec.task_id.clone(), tx);
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("dependency resolution abandoned")),
        }
    }

    fn cancel_resolution(&self, task_id: &TaskId) {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(task_id.clone());
        // Dropping the sender wakes the gated resolve with an error.
        state.waiting.remove(task_id);
    }
}

/// What the actor creator was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorCreatorEvent {
    Registered {
        actor_id: ActorId,
    },
    LineageRestartRequested {
        actor_id: ActorId,
        target_generation: u64,
    },
    OutOfScopeNotified {
        actor_id: ActorId,
        restart_generation: u64,
    },
}

/// An actor creator that records requests and acknowledges them all.
#[derive(Debug, Default)]
pub struct MockActorCreator {
    events: Mutex<Vec<ActorCreatorEvent>>,
    fail_next_register: Mutex<Option<String>>,
}

impl MockActorCreator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ActorCreatorEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Make the next `register_actor` fail with `message`.
    pub fn fail_next_register(&self, message: &str) {
        *self.fail_next_register.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl ActorCreator for MockActorCreator {
    async fn register_actor(&self, spec: &TaskSpec) -> Result<(), anyhow::Error> {
        if let Some(message) = self.fail_next_register.lock().unwrap().take() {
            return Err(anyhow::anyhow!(message));
        }
        self.events.lock().unwrap().push(ActorCreatorEvent::Registered {
            actor_id: spec.actor_id.clone(),
        });
        Ok(())
    }

    async fn restart_actor_for_lineage_reconstruction(
        &self,
        actor_id: &ActorId,
        target_generation: u64,
    ) -> Result<(), anyhow::Error> {
        self.events
            .lock()
            .unwrap()
            .push(ActorCreatorEvent::LineageRestartRequested {
                actor_id: actor_id.clone(),
                target_generation,
            });
        Ok(())
    }

    async fn notify_actor_out_of_scope(
        &self,
        actor_id: &ActorId,
        restart_generation: u64,
    ) -> Result<(), anyhow::Error> {
        self.events
            .lock()
            .unwrap()
            .push(ActorCreatorEvent::OutOfScopeNotified {
                actor_id: actor_id.clone(),
                restart_generation,
            });
        Ok(())
    }
}

/// A reference counter whose out-of-scope events are fired by the test.
#[derive(Default)]
pub struct MockReferenceCounter {
    callbacks: Mutex<HashMap<ActorId, ActorOutOfScopeCallback>>,
}

impl MockReferenceCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate the last local reference to `actor_id` dropping. Returns
    /// false if no callback was registered.
    pub fn drop_all_references(&self, actor_id: &ActorId) -> bool {
        let callbacks = self.callbacks.lock().unwrap();
        match callbacks.get(actor_id) {
            Some(callback) => {
                callback(actor_id);
                true
            }
            None => false,
        }
    }
}

impl ReferenceCounter for MockReferenceCounter {
    fn set_actor_out_of_scope_callback(
        &self,
        actor_id: &ActorId,
        callback: ActorOutOfScopeCallback,
    ) {
        self.callbacks
            .lock()
            .unwrap()
            .insert(actor_id.clone(), callback);
    }
}
