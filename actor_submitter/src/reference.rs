/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Identifiers for the resources the submitter deals in: actors, workers,
//! tasks, objects, and worker addresses.
//!
//! Identifiers are transparent newtypes over their wire representation.
//! They are cheap to clone, hashable, totally ordered, and serializable so
//! that they can travel inside RPC messages.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// The identity of a remote actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Create an actor id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The string form of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActorId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// The identity of a worker process hosting an actor. An actor that is
/// restarted is hosted by a new worker with a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a worker id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of a task. A task may be sent more than once; each send is
/// a distinct [`TaskAttempt`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of an object in the object store. Task arguments may refer
/// to objects that have to be resolved before the task can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    /// Create an object id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One send of a task: the pair of the task's id and its attempt number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskAttempt(pub TaskId, pub u32);

impl fmt::Display for TaskAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0, self.1)
    }
}

/// The location of a worker: where to dial the RPC client, and which
/// worker we expect to find there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Host on which the worker is listening.
    pub ip_address: String,
    /// Port on which the worker is listening.
    pub port: u16,
    /// The worker expected at this address.
    pub worker_id: WorkerId,
}

impl Address {
    /// Create an address.
    pub fn new(ip_address: impl Into<String>, port: u16, worker_id: WorkerId) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
            worker_id,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.ip_address, self.port, self.worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips() {
        let actor_id: ActorId = "trainer".parse().unwrap();
        assert_eq!(actor_id.to_string(), "trainer");
        assert_eq!(actor_id, ActorId::new("trainer"));
    }

    #[test]
    fn test_task_attempt_display() {
        let attempt = TaskAttempt(TaskId::new("t1"), 2);
        assert_eq!(attempt.to_string(), "t1#2");
    }

    #[test]
    fn test_address_display() {
        let addr = Address::new("10.0.0.1", 7199, WorkerId::new("w1"));
        assert_eq!(addr.to_string(), "10.0.0.1:7199[w1]");
    }
}
