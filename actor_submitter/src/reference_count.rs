/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The reference-counter seam.
//!
//! The reference counter tracks which actors the local process still holds
//! handles to. For owned actors the submitter registers a callback here;
//! when the last reference drops, the callback notifies the GCS that the
//! actor can be released.

use crate::reference::ActorId;

/// Invoked when the last local reference to an actor is dropped.
pub type ActorOutOfScopeCallback = Box<dyn Fn(&ActorId) + Send + Sync>;

/// Tracks local references to actors.
pub trait ReferenceCounter: Send + Sync {
    /// Register `callback` to run when the last local reference to
    /// `actor_id` drops. A later registration for the same actor replaces
    /// an earlier one.
    fn set_actor_out_of_scope_callback(&self, actor_id: &ActorId, callback: ActorOutOfScopeCallback);
}
