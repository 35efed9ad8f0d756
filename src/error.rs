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

//! Error taxonomy for remote orchestration.
//!
//! Per-node failures are carried as values of [`ClusterError`] inside
//! operation results, check results and artifact outcomes. Whether a failure
//! stops the pipeline is decided by step/check criticality, never by the
//! transport layer.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while talking to cluster nodes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// Credentials or host key were rejected. Never retried.
    #[error("authentication to {node} failed: {reason}")]
    Auth { node: String, reason: String },

    /// Network-level failure; retried according to the retry policy.
    #[error("connection to {node} failed: {reason}")]
    Connection { node: String, reason: String },

    /// The remote command ran but exited with a non-zero status.
    #[error("command on {node} exited with status {exit_code}")]
    Execution { node: String, exit_code: i32 },

    /// An operation exceeded its hard timeout.
    #[error("{operation} on {node} timed out after {}s", .timeout.as_secs())]
    Timeout {
        node: String,
        operation: String,
        timeout: Duration,
    },

    /// Upload or download failure.
    #[error("transfer of '{path}' on {node} failed: {reason}")]
    Transfer {
        node: String,
        path: String,
        reason: String,
    },

    /// A critical preflight check failed.
    #[error("critical check '{check}' failed: {reason}")]
    ValidationFailure { check: String, reason: String },

    /// A backup or restore artifact could not be produced or applied.
    #[error("snapshot artifact '{artifact}' on {node}: {reason}")]
    Snapshot {
        node: String,
        artifact: String,
        reason: String,
    },

    /// The task driving a node operation panicked or was cancelled.
    #[error("operation on {node} aborted: {reason}")]
    Internal { node: String, reason: String },
}

impl ClusterError {
    /// Whether the retry policy may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::Connection { .. } | ClusterError::Timeout { .. }
        )
    }

    /// Short category label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterError::Auth { .. } => "auth",
            ClusterError::Connection { .. } => "connection",
            ClusterError::Execution { .. } => "execution",
            ClusterError::Timeout { .. } => "timeout",
            ClusterError::Transfer { .. } => "transfer",
            ClusterError::ValidationFailure { .. } => "validation",
            ClusterError::Snapshot { .. } => "snapshot",
            ClusterError::Internal { .. } => "internal",
        }
    }

    pub fn connection(node: impl Into<String>, reason: impl Into<String>) -> Self {
        ClusterError::Connection {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn transfer(
        node: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ClusterError::Transfer {
            node: node.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn snapshot(
        node: impl Into<String>,
        artifact: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ClusterError::Snapshot {
            node: node.into(),
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }
}
