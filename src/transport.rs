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

//! The seam between orchestration and the wire.
//!
//! The connection pool only ever talks to a [`Transport`] and the
//! [`RemoteSession`]s it opens. Production uses [`crate::ssh::SshTransport`];
//! tests plug in scripted in-memory nodes.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::node::Node;

/// Raw result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// The unix exit status (`$?` in bash).
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }
}

/// Failure reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Credentials or host key rejected.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// The endpoint could not be reached.
    #[error("{0}")]
    Connect(String),
    /// The session broke while an operation was in flight.
    #[error("session lost: {0}")]
    Disconnected(String),
    /// The remote side refused the operation (missing file, permission).
    #[error("{0}")]
    Remote(String),
}

impl TransportError {
    /// Whether the broken session should be discarded and the operation retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Disconnected(_)
        )
    }
}

/// Opens sessions to nodes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>, TransportError>;
}

/// An authenticated session to one node.
///
/// Sessions are owned by exactly one node worker, hence `&mut self`.
#[async_trait]
pub trait RemoteSession: Send {
    async fn execute(&mut self, command: &str) -> Result<CommandOutput, TransportError>;

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), TransportError>;

    async fn download(&mut self, remote: &str, local: &Path) -> Result<(), TransportError>;

    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_retryability() {
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(TransportError::Disconnected("eof".into()).is_retryable());
        assert!(!TransportError::Auth("denied".into()).is_retryable());
        assert!(!TransportError::Remote("no such file".into()).is_retryable());
    }
}
