/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Configuration for the submitter.
//!
//! A [`Config`] carries the few tunables the submitter honors. Defaults are
//! production values; [`Config::from_env`] lets deployments override them
//! through `ACTOR_SUBMITTER_*` environment variables.

use std::env;

/// Submitter tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Warn the first time the number of queued submissions to one actor
    /// reaches this threshold. The threshold doubles after each warning, so
    /// warnings are logarithmic in queue growth.
    pub excess_queueing_warn_threshold: u64,

    /// How long a task whose send failed at the transport level waits for
    /// an authoritative death notification before it is failed with a
    /// timeout, in milliseconds.
    pub actor_task_timeout_ms: u64,

    /// Initial backoff between cancellation retries, in milliseconds. The
    /// backoff doubles on each retry.
    pub cancel_retry_backoff_ms: u64,

    /// Period of the death-info timeout sweeper, in milliseconds.
    pub check_timeout_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            excess_queueing_warn_threshold: 1000,
            actor_task_timeout_ms: 30_000,
            cancel_retry_backoff_ms: 1000,
            check_timeout_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env("ACTOR_SUBMITTER_EXCESS_QUEUEING_WARN_THRESHOLD") {
            config.excess_queueing_warn_threshold = val;
        }
        if let Some(val) = parse_env("ACTOR_SUBMITTER_ACTOR_TASK_TIMEOUT_MS") {
            config.actor_task_timeout_ms = val;
        }
        if let Some(val) = parse_env("ACTOR_SUBMITTER_CANCEL_RETRY_BACKOFF_MS") {
            config.cancel_retry_backoff_ms = val;
        }
        if let Some(val) = parse_env("ACTOR_SUBMITTER_CHECK_TIMEOUT_INTERVAL_MS") {
            config.check_timeout_interval_ms = val;
        }

        config
    }
}

fn parse_env(name: &str) -> Option<u64> {
    let val = env::var(name).ok()?;
    match val.parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!("ignoring unparsable {}={:?}: {}", name, val, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.excess_queueing_warn_threshold, 1000);
        assert_eq!(config.actor_task_timeout_ms, 30_000);
        assert_eq!(config.cancel_retry_backoff_ms, 1000);
        assert_eq!(config.check_timeout_interval_ms, 1000);
    }

    #[test]
    fn test_from_env_overrides() {
        // SAFETY-adjacent caveat: process environment is shared across
        // tests, so this test owns variables no other test touches.
        env::set_var("ACTOR_SUBMITTER_ACTOR_TASK_TIMEOUT_MS", "250");
        env::set_var("ACTOR_SUBMITTER_CANCEL_RETRY_BACKOFF_MS", "not-a-number");

        let config = Config::from_env();
        assert_eq!(config.actor_task_timeout_ms, 250);
        // Unparsable values fall back to the default.
        assert_eq!(config.cancel_retry_backoff_ms, 1000);

        env::remove_var("ACTOR_SUBMITTER_ACTOR_TASK_TIMEOUT_MS");
        env::remove_var("ACTOR_SUBMITTER_CANCEL_RETRY_BACKOFF_MS");
    }
}
