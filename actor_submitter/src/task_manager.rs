/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The task-manager seam.
//!
//! The task manager owns task outcomes: it finalizes results, decides
//! retries, and fails the objects a task was going to produce. The
//! submitter only reports; it never retries a task on its own.
//!
//! All entry points are invoked with no submitter lock held, so an
//! implementation may call back into the submitter (to resubmit a retried
//! task, for example) without deadlocking.

use crate::error::ErrorInfo;
use crate::error::RpcError;
use crate::reference::TaskId;
use crate::rpc::PushTaskReply;

/// The upstream owner of task outcomes.
pub trait TaskManager: Send + Sync {
    /// The attempt completed on the worker. The reply may still carry an
    /// application error; interpreting it is the task manager's business.
    fn mark_task_succeeded(&self, task_id: &TaskId, attempt_number: u32, reply: PushTaskReply);

    /// The attempt failed in a way that may be retried. The task manager
    /// decides, based on the task's retry budget, whether to resubmit or to
    /// fail the task for good. `status` carries the transport error when
    /// there was one.
    fn fail_or_retry_pending_task(
        &self,
        task_id: &TaskId,
        attempt_number: u32,
        error_info: ErrorInfo,
        status: Option<RpcError>,
    );

    /// The task failed with an authoritative cause. Terminal: no retry.
    fn fail_pending_task(&self, task_id: &TaskId, error_info: ErrorInfo);

    /// Zero the task's retry budget so its eventual failure surfaces as a
    /// terminal cancellation rather than a retry.
    fn mark_task_canceled(&self, task_id: &TaskId);

    /// A streaming generator that was queued for resubmission finished its
    /// current execution; resubmit it.
    fn mark_generator_failed_and_resubmit(&self, task_id: &TaskId);
}
