/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The actor-creator seam: the submitter's view of the global control
//! service (GCS).
//!
//! The GCS registers new actors, restarts dead-but-restartable actors when
//! lineage reconstruction needs them, and releases actors the owner no
//! longer references. The submitter issues requests and reacts to the
//! actor-state notifications that come back through `connect_actor` /
//! `disconnect_actor`; it never talks to workers about lifecycle directly.

use async_trait::async_trait;

use crate::reference::ActorId;
use crate::task::TaskSpec;

/// The actor-creator service.
#[async_trait]
pub trait ActorCreator: Send + Sync {
    /// Register a new actor from its creation task. On success the actor
    /// will eventually be scheduled and announced via `connect_actor`.
    async fn register_actor(&self, spec: &TaskSpec) -> Result<(), anyhow::Error>;

    /// Ask the GCS to restart a dead but restartable actor because lineage
    /// reconstruction has new work for it. `target_generation` is the
    /// lineage-restart generation this request is for; the GCS drops
    /// requests for generations it has already served.
    async fn restart_actor_for_lineage_reconstruction(
        &self,
        actor_id: &ActorId,
        target_generation: u64,
    ) -> Result<(), anyhow::Error>;

    /// Tell the GCS that this owner holds no more references to the actor,
    /// so the actor can be released. Idempotent per generation.
    async fn notify_actor_out_of_scope(
        &self,
        actor_id: &ActorId,
        restart_generation: u64,
    ) -> Result<(), anyhow::Error>;
}
