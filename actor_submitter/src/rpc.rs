/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The RPC seam between the submitter and remote workers.
//!
//! The submitter does not own a transport. It asks a [`WorkerClientPool`]
//! for a [`WorkerClient`] bound to a worker address, and drives the two
//! RPCs of the wire protocol through it: `PushTask` to deliver a task for
//! execution, and `CancelTask` to request cancellation of an earlier push.
//!
//! Sends are non-blocking from the submitter's point of view: a push is
//! issued from a spawned task and its reply re-enters the submitter when
//! the transport completes the future.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::RpcError;
use crate::reference::Address;
use crate::reference::TaskId;
use crate::task::TaskSpec;

/// A request to execute one task attempt on the destination worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTaskRequest {
    /// The task to execute.
    pub task_spec: TaskSpec,
    /// The submitter's per-actor sequence number for this request. Workers
    /// executing in submission order use it to reconstruct that order.
    pub sequence_number: u64,
}

/// The executor's reply to a `PushTask`.
///
/// A reply only reports what happened on the worker; transport failures
/// surface as [`RpcError`] instead. Application-level failures ride inside
/// a successful reply and are interpreted by the task manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTaskReply {
    /// The task ran and raised an application error.
    pub is_application_error: bool,
    /// The task was cancelled on the worker before it started running.
    pub was_cancelled_before_running: bool,
}

/// A request to cancel one previously pushed task attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    /// The task to cancel.
    pub task_id: TaskId,
    /// The attempt to cancel.
    pub attempt_number: u32,
    /// Whether tasks spawned by the cancelled task are cancelled too.
    pub recursive: bool,
}

/// The executor's reply to a `CancelTask`.
///
/// A failed cancellation does not distinguish "the worker never received
/// the task" from "the task already finished"; callers stop retrying when
/// the original push resolves, not on any particular reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTaskReply {
    /// The worker found the attempt queued or running and will cancel it.
    pub attempt_succeeded: bool,
}

/// A client bound to one worker.
#[async_trait]
pub trait WorkerClient: Send + Sync + fmt::Debug {
    /// Deliver a task for execution. Resolves when the executor replies,
    /// which may be after the task has run to completion.
    async fn push_task(&self, request: PushTaskRequest) -> Result<PushTaskReply, RpcError>;

    /// Request cancellation of a previously pushed attempt.
    async fn cancel_task(&self, request: CancelTaskRequest) -> Result<CancelTaskReply, RpcError>;
}

/// A pool of worker clients, keyed by address. The pool performs its own
/// synchronization and connection reuse.
pub trait WorkerClientPool: Send + Sync {
    /// Get a client for the worker at `address`, dialing if necessary.
    fn get_or_connect(&self, address: &Address) -> Arc<dyn WorkerClient>;
}
