// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retry with exponential backoff.
//!
//! Connect, execute and transfer all go through [`with_retry`], so the
//! attempt count and the backoff sequence are identical everywhere.

use std::future::Future;
use std::time::Duration;

/// Retry policy shared by every remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Growth factor applied per subsequent failure.
    pub multiplier: u32,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sum of all delays slept when every attempt fails.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_for(attempt))
            .sum()
    }
}

/// Outcome of a retried operation with the number of attempts made.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. The last error is returned as is.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut op: F,
) -> Retried<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let ((), retried) = with_retry_state(policy, is_retryable, (), |(), attempt| {
        let attempt_fut = op(attempt);
        async move { ((), attempt_fut.await) }
    })
    .await;
    retried
}

/// Like [`with_retry`], threading owned state through every attempt.
///
/// Each attempt takes the state and hands it back with its result, which lets
/// a caller keep a mutable resource (a session) across attempts without
/// sharing it.
pub async fn with_retry_state<S, T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut state: S,
    mut op: F,
) -> (S, Retried<T, E>)
where
    F: FnMut(S, u32) -> Fut,
    Fut: Future<Output = (S, Result<T, E>)>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let (next_state, result) = op(state, attempt).await;
        state = next_state;
        match result {
            Ok(value) => {
                return (
                    state,
                    Retried {
                        result: Ok(value),
                        attempts: attempt,
                    },
                )
            }
            Err(e) => {
                if attempt >= max_attempts || !is_retryable(&e) {
                    return (
                        state,
                        Retried {
                            result: Err(e),
                            attempts: attempt,
                        },
                    );
                }
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
