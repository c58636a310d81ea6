/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Client-side task submission to remote actors.
//!
//! This crate is the submitting half of a distributed actor runtime: it
//! accepts task submissions from a local caller, orders them per
//! destination actor, resolves their data dependencies, pushes them over
//! RPC to the worker hosting the actor, and tracks every pending and
//! in-flight task across actor restarts, disconnects, preemption, and
//! cancellation.
//!
//! # Model
//!
//! Each known actor has one [`client queue`](crate::submitter) holding its
//! lifecycle state, its pending submissions, and its in-flight attempts.
//! Actor lifecycle is announced from outside through
//! [`ActorTaskSubmitter::connect_actor`] and
//! [`ActorTaskSubmitter::disconnect_actor`]; announcements carry the
//! actor's restart count, which acts as a generation number, and stale
//! generations are dropped.
//!
//! A task that cannot be delivered is not failed on the spot: unless the
//! actor's queue opts into failing fast, the task waits for the
//! authoritative death notification (or a deadline) so that the reported
//! failure carries the real cause of death.
//!
//! The submitter executes nothing and retries nothing on its own (cancel
//! RPCs aside); every outcome is routed to the task manager, which owns
//! retry policy.
//!
//! # Collaborators
//!
//! The transport, object store, task manager, actor creator, and
//! dependency resolver are consumed through traits ([`rpc`],
//! [`task_manager`], [`gcs`], [`resolver`], [`reference_count`]);
//! [`test_utils`] provides scriptable doubles for all of them.
//!
//! # Example
//!
//! Submitting one task to an actor, with the test doubles standing in for
//! the collaborators:
//!
//! ```
//! use actor_submitter::ActorId;
//! use actor_submitter::ActorTaskSubmitter;
//! use actor_submitter::Address;
//! use actor_submitter::ClockKind;
//! use actor_submitter::Config;
//! use actor_submitter::TaskId;
//! use actor_submitter::TaskSpec;
//! use actor_submitter::WorkerId;
//! use actor_submitter::test_utils::MockActorCreator;
//! use actor_submitter::test_utils::MockDependencyResolver;
//! use actor_submitter::test_utils::MockReferenceCounter;
//! use actor_submitter::test_utils::MockTaskManager;
//! use actor_submitter::test_utils::MockWorkerClientPool;
//!
//! # tokio_test::block_on(async {
//! let pool = MockWorkerClientPool::new();
//! let task_manager = MockTaskManager::new();
//! let submitter = ActorTaskSubmitter::new(
//!     pool.clone(),
//!     MockActorCreator::new(),
//!     MockDependencyResolver::new(),
//!     task_manager.clone(),
//!     MockReferenceCounter::new(),
//!     Box::new(|actor_id, queued| eprintln!("{} has {} queued calls", actor_id, queued)),
//!     Config::default(),
//!     ClockKind::default(),
//! );
//!
//! let actor_id = ActorId::new("worker");
//! let address = Address::new("127.0.0.1", 7000, WorkerId::new("w0"));
//! submitter.add_actor_queue_if_not_exists(&actor_id, Some(8), false, false, false);
//! submitter.submit_task(TaskSpec::new(TaskId::new("t0"), actor_id.clone())).unwrap();
//! # for _ in 0..64 { tokio::task::yield_now().await; }
//! submitter.connect_actor(&actor_id, address.clone(), 0);
//! # for _ in 0..64 { tokio::task::yield_now().await; }
//!
//! let client = pool.client_for(&address);
//! assert_eq!(client.pushed_task_ids(), vec![TaskId::new("t0")]);
//! client.reply_to_push(0, Ok(Default::default()));
//! # for _ in 0..64 { tokio::task::yield_now().await; }
//! assert_eq!(task_manager.succeeded(), vec![TaskId::new("t0")]);
//! # });
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod gcs;
mod queue;
pub mod reference;
pub mod reference_count;
pub mod resolver;
pub mod rpc;
mod submit_queue;
pub mod submitter;
pub mod task;
pub mod task_manager;
pub mod test_utils;

pub use clock::Clock;
pub use clock::ClockKind;
pub use clock::RealClock;
pub use clock::SimClock;
pub use config::Config;
pub use error::DeathCause;
pub use error::ErrorInfo;
pub use error::ErrorKind;
pub use error::RpcError;
pub use error::SubmitError;
pub use queue::ActorState;
pub use reference::ActorId;
pub use reference::Address;
pub use reference::ObjectId;
pub use reference::TaskAttempt;
pub use reference::TaskId;
pub use reference::WorkerId;
pub use submitter::ActorTaskSubmitter;
pub use task::TaskArg;
pub use task::TaskSpec;
