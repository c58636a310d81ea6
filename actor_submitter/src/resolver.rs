/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The dependency-resolver seam.
//!
//! Before a task is eligible for dispatch, every `ObjectRef` among its
//! arguments must be resolved to a concrete value. The resolution
//! algorithm itself lives elsewhere; the submitter only consumes this
//! contract: ask for resolution, learn the outcome, and cancel resolution
//! when the task is cancelled first.

use async_trait::async_trait;

use crate::reference::TaskId;
use crate::task::TaskSpec;

/// Resolves task arguments to concrete values.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Resolve all of `spec`'s dependencies. Resolves immediately for a
    /// task with no dependencies. An error means at least one argument can
    /// never be produced.
    async fn resolve_dependencies(&self, spec: &TaskSpec) -> Result<(), anyhow::Error>;

    /// Abandon an in-flight resolution. The corresponding
    /// `resolve_dependencies` call may resolve with an error or not at
    /// all; callers must not depend on which.
    fn cancel_resolution(&self, task_id: &TaskId);
}
