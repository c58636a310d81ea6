/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Error taxonomy.
//!
//! Three layers of failure are kept distinct:
//!
//! - [`SubmitError`]: synchronous rejections of a submission, returned to
//!   the caller (missing queue, back-pressure).
//! - [`RpcError`]: transport-level failures of a single RPC. These are
//!   never authoritative about the actor's fate; an unreachable actor may
//!   still be alive.
//! - [`ErrorInfo`]: the structured failure report handed to the task
//!   manager when a task's outcome is decided. Retriable reports go through
//!   `fail_or_retry_pending_task`, authoritative ones through
//!   `fail_pending_task`.
//!
//! [`DeathCause`] is the authoritative statement of why an actor died,
//! published by the cluster controller. It is carried on the dead queue and
//! converted to [`ErrorInfo`] at the point a task is failed with it.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::reference::ActorId;
use crate::reference::TaskId;

/// Why an actor died. Published with the death notification; authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeathCause {
    /// The actor exited, voluntarily or because its creation failed.
    ActorExit {
        /// Human-readable exit context.
        reason: String,
    },
    /// The worker hosting the actor was killed by the out-of-memory killer.
    OutOfMemory {
        /// Which process was killed and why.
        reason: String,
    },
    /// The node hosting the actor went away.
    NodeDied {
        /// The node that died.
        node: String,
    },
    /// The actor went out of scope: no references to it remain.
    OutOfScope,
    /// The actor was preempted by the infrastructure (e.g. spot reclaim).
    Preempted,
}

impl std::fmt::Display for DeathCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ActorExit { reason } => write!(f, "actor exited: {}", reason),
            Self::OutOfMemory { reason } => write!(f, "worker killed by OOM: {}", reason),
            Self::NodeDied { node } => write!(f, "node {} died", node),
            Self::OutOfScope => write!(f, "actor went out of scope"),
            Self::Preempted => write!(f, "actor was preempted"),
        }
    }
}

/// The distinct, observable kinds of task failure the submitter reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize
)]
pub enum ErrorKind {
    /// The destination actor is dead, with an authoritative cause.
    ActorDied,
    /// The destination actor could not be reached. Transient.
    ActorUnavailable,
    /// The destination actor was preempted by the infrastructure.
    ActorPreempted,
    /// An argument could not be resolved.
    DependencyResolutionFailed,
    /// The task waited for an authoritative death notification that never
    /// arrived within the configured deadline.
    TaskTimedOutWaitingForDeathInfo,
    /// The task was cancelled at the caller's request.
    TaskCancelled,
}

/// A structured failure report for one task, routed to the task manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// The kind of failure.
    pub kind: ErrorKind,
    /// Human-readable context.
    pub message: String,
}

impl ErrorInfo {
    /// A failure with an authoritative death cause.
    pub fn actor_died(cause: &DeathCause) -> Self {
        Self {
            kind: ErrorKind::ActorDied,
            message: cause.to_string(),
        }
    }

    /// A transient failure to reach the actor.
    pub fn actor_unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ActorUnavailable,
            message: message.into(),
        }
    }

    /// The actor was preempted; treated as dead even if the death
    /// notification has not arrived yet.
    pub fn actor_preempted(actor_id: &ActorId) -> Self {
        Self {
            kind: ErrorKind::ActorPreempted,
            message: format!("actor {} was preempted", actor_id),
        }
    }

    /// An argument could not be resolved.
    pub fn dependency_resolution_failed(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::DependencyResolutionFailed,
            message: message.into(),
        }
    }

    /// No death notification arrived before the deadline.
    pub fn timed_out_waiting_for_death_info(actor_id: &ActorId) -> Self {
        Self {
            kind: ErrorKind::TaskTimedOutWaitingForDeathInfo,
            message: format!(
                "task could not be delivered to actor {} and no death \
                 notification arrived before the deadline",
                actor_id
            ),
        }
    }

    /// The task was cancelled.
    pub fn cancelled(task_id: &TaskId) -> Self {
        Self {
            kind: ErrorKind::TaskCancelled,
            message: format!("task {} was cancelled", task_id),
        }
    }
}

/// Synchronous rejection of a submission.
#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    /// No queue was registered for the destination actor.
    #[error("no submit queue for actor {0}")]
    QueueMissing(ActorId),

    /// The actor's pending-call limit was reached. The submission was
    /// rejected before any state changed.
    #[error("pending task queue for actor {0} is full ({1} calls pending)")]
    QueueFull(ActorId, usize),

    /// Actor registration with the actor-creator service failed.
    #[error("failed to register actor {0}")]
    ActorRegistration(ActorId, #[source] anyhow::Error),
}

/// A transport-level RPC failure. Never authoritative about actor death.
#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    /// The connection to the worker was closed.
    #[error("connection to worker closed")]
    Disconnected,

    /// The RPC did not complete in time.
    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),

    /// The worker could not be reached.
    #[error("worker unavailable: {0}")]
    Unavailable(String),

    /// Some other transport error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_death_cause_to_error_info() {
        let cause = DeathCause::OutOfMemory {
            reason: "worker rss 32g over limit 30g".to_string(),
        };
        let info = ErrorInfo::actor_died(&cause);
        assert_eq!(info.kind, ErrorKind::ActorDied);
        assert!(info.message.contains("OOM"));
    }

    #[test]
    fn test_submit_error_display() {
        let err = SubmitError::QueueFull(ActorId::new("a1"), 8);
        assert_eq!(
            err.to_string(),
            "pending task queue for actor a1 is full (8 calls pending)"
        );
    }
}
