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

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ClusterError;
use crate::transport::CommandOutput;

/// Outcome of one operation on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub node_id: String,
    /// Remote exit status when a command ran to completion.
    pub exit_code: Option<i32>,
    /// Trailing whitespace trimmed.
    pub stdout: String,
    /// Trailing whitespace trimmed.
    pub stderr: String,
    pub attempts: u32,
    pub duration: Duration,
    pub error: Option<ClusterError>,
}

impl OperationResult {
    /// Result of a completed command. A non-zero exit becomes an `Execution` error.
    pub fn from_output(
        node_id: impl Into<String>,
        output: CommandOutput,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        let node_id = node_id.into();
        let exit_code = i32::try_from(output.exit_status).unwrap_or(i32::MAX);
        let error = (exit_code != 0).then(|| ClusterError::Execution {
            node: node_id.clone(),
            exit_code,
        });
        Self {
            node_id,
            exit_code: Some(exit_code),
            stdout: output.stdout.trim_end().to_string(),
            stderr: output.stderr.trim_end().to_string(),
            attempts,
            duration,
            error,
        }
    }

    /// Result of a transfer or connect that completed without output.
    pub fn completed(node_id: impl Into<String>, attempts: u32, duration: Duration) -> Self {
        Self {
            node_id: node_id.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            attempts,
            duration,
            error: None,
        }
    }

    pub fn failed(
        node_id: impl Into<String>,
        error: ClusterError,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::completed(node_id, attempts, duration)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// One-line failure description for reports.
    pub fn failure_reason(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        match error {
            ClusterError::Execution { .. } if !self.stderr.is_empty() => {
                let last = self.stderr.lines().last().unwrap_or_default();
                Some(format!("{error}: {last}"))
            }
            _ => Some(error.to_string()),
        }
    }
}

/// Aggregate view over a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutSummary {
    pub succeeded: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

impl FanOutSummary {
    pub fn from_results(results: &BTreeMap<String, OperationResult>) -> Self {
        let mut summary = Self::default();
        for (node_id, result) in results {
            match result.failure_reason() {
                None => summary.succeeded.push(node_id.clone()),
                Some(reason) => {
                    summary.failed.insert(node_id.clone(), reason);
                }
            }
        }
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}
