/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Task descriptors. A [`TaskSpec`] is the unit of submission: it names the
//! destination actor, carries the (possibly unresolved) arguments, and the
//! attributes the submitter reads to drive retries, timeouts, and
//! generator resubmission.

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use serde::Deserialize;
use serde::Serialize;

use crate::reference::ActorId;
use crate::reference::ObjectId;
use crate::reference::TaskAttempt;
use crate::reference::TaskId;

/// One argument of a task: either an inline value, or a reference to an
/// object that must be resolved before the task is eligible for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumAsInner)]
pub enum TaskArg {
    /// An inline value, passed by copy.
    Value(Bytes),
    /// A reference into the object store.
    ObjectRef(ObjectId),
}

/// A task submitted for execution on a remote actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// The task's identity.
    pub task_id: TaskId,
    /// Which attempt of the task this is. The first submission is attempt 0;
    /// the task manager bumps this on retry.
    pub attempt_number: u32,
    /// The actor this task is destined for.
    pub actor_id: ActorId,
    /// Arguments, in call order.
    pub args: Vec<TaskArg>,
    /// How many times the task manager may retry this task.
    pub max_retries: u32,
    /// Task-level execution timeout, in milliseconds. `None` means no limit.
    pub timeout_ms: Option<u64>,
    /// Whether the task returns a stream of results. Streaming generators
    /// may be queued for resubmission while still executing.
    pub is_streaming_generator: bool,
}

impl TaskSpec {
    /// Create a task spec with no arguments and default attributes.
    pub fn new(task_id: TaskId, actor_id: ActorId) -> Self {
        Self {
            task_id,
            attempt_number: 0,
            actor_id,
            args: Vec::new(),
            max_retries: 0,
            timeout_ms: None,
            is_streaming_generator: false,
        }
    }

    /// The identity of this send of the task.
    pub fn task_attempt(&self) -> TaskAttempt {
        TaskAttempt(self.task_id.clone(), self.attempt_number)
    }

    /// The object references among this task's arguments. These are the
    /// task's data dependencies; the task may not be dispatched until all
    /// of them have been resolved to concrete values.
    pub fn dependencies(&self) -> impl Iterator<Item = &ObjectId> {
        self.args.iter().filter_map(|arg| match arg {
            TaskArg::ObjectRef(id) => Some(id),
            TaskArg::Value(_) => None,
        })
    }

    /// Whether any argument still refers into the object store.
    pub fn has_dependencies(&self) -> bool {
        self.dependencies().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies() {
        let mut spec = TaskSpec::new(TaskId::new("t1"), ActorId::new("a1"));
        assert!(!spec.has_dependencies());

        spec.args = vec![
            TaskArg::Value(Bytes::from_static(b"x")),
            TaskArg::ObjectRef(ObjectId::new("o1")),
            TaskArg::ObjectRef(ObjectId::new("o2")),
        ];
        let deps: Vec<_> = spec.dependencies().cloned().collect();
        assert_eq!(deps, vec![ObjectId::new("o1"), ObjectId::new("o2")]);
        assert!(spec.has_dependencies());
    }

    #[test]
    fn test_task_attempt_identity() {
        let mut spec = TaskSpec::new(TaskId::new("t1"), ActorId::new("a1"));
        assert_eq!(spec.task_attempt(), TaskAttempt(TaskId::new("t1"), 0));
        spec.attempt_number = 3;
        assert_eq!(spec.task_attempt(), TaskAttempt(TaskId::new("t1"), 3));
    }
}
