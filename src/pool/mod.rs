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

//! Connection pool: one session per node, owned by a per-node worker task.

mod worker;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use crate::error::ClusterError;
use crate::executor::OperationResult;
use crate::node::Node;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use worker::{NodeRequest, NodeWorker};

const REQUEST_QUEUE_DEPTH: usize = 32;

/// Timeouts and retry policy applied to every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub connect_timeout: Duration,
    /// Default per-command timeout; also bounds each transfer attempt.
    pub command_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(crate::config::DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(crate::config::DEFAULT_COMMAND_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

/// Cheap, cloneable handle to a node's worker.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    node_id: String,
    sender: Option<mpsc::Sender<NodeRequest>>,
    default_timeout: Duration,
}

impl NodeHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn request<F>(&self, build: F) -> OperationResult
    where
        F: FnOnce(oneshot::Sender<OperationResult>) -> NodeRequest,
    {
        let start = Instant::now();
        let Some(sender) = &self.sender else {
            return OperationResult::failed(
                &self.node_id,
                ClusterError::connection(&self.node_id, "unknown node"),
                0,
                start.elapsed(),
            );
        };

        let (reply, response) = oneshot::channel();
        if sender.send(build(reply)).await.is_err() {
            return self.worker_gone(start);
        }
        response.await.unwrap_or_else(|_| self.worker_gone(start))
    }

    fn worker_gone(&self, start: Instant) -> OperationResult {
        OperationResult::failed(
            &self.node_id,
            ClusterError::Internal {
                node: self.node_id.clone(),
                reason: "node worker stopped".to_string(),
            },
            0,
            start.elapsed(),
        )
    }

    /// Establish the session now instead of on first use.
    pub async fn connect(&self) -> OperationResult {
        self.request(|reply| NodeRequest::Connect { reply }).await
    }

    /// Run `command` with the pool's default timeout.
    pub async fn execute(&self, command: &str) -> OperationResult {
        self.execute_with_timeout(command, self.default_timeout)
            .await
    }

    pub async fn execute_with_timeout(&self, command: &str, timeout: Duration) -> OperationResult {
        let command = command.to_string();
        self.request(|reply| NodeRequest::Execute {
            command,
            timeout,
            reply,
        })
        .await
    }

    pub async fn upload(&self, local: &Path, remote: &str) -> OperationResult {
        let local = local.to_path_buf();
        let remote = remote.to_string();
        self.request(|reply| NodeRequest::Upload {
            local,
            remote,
            reply,
        })
        .await
    }

    pub async fn download(&self, remote: &str, local: &Path) -> OperationResult {
        let remote = remote.to_string();
        let local: PathBuf = local.to_path_buf();
        self.request(|reply| NodeRequest::Download {
            remote,
            local,
            reply,
        })
        .await
    }

    /// Close the node's session. The next request reconnects.
    pub async fn close(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (reply, done) = oneshot::channel();
        if sender.send(NodeRequest::Close { reply }).await.is_ok() {
            let _ = done.await;
        }
    }
}

/// Owns one worker per node for the duration of a run.
///
/// Sessions open lazily on first use. Dropping the pool (and every handle)
/// ends the workers, which close their sessions on the way out.
pub struct ConnectionPool {
    handles: HashMap<String, NodeHandle>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Spawn a worker per node. Must be called inside a tokio runtime.
    pub fn new(nodes: &[Node], transport: Arc<dyn Transport>, config: PoolConfig) -> Self {
        let handles = nodes
            .iter()
            .map(|node| {
                let (sender, receiver) = mpsc::channel(REQUEST_QUEUE_DEPTH);
                let worker = NodeWorker::new(node.clone(), Arc::clone(&transport), config, receiver);
                tokio::spawn(worker.run());
                let handle = NodeHandle {
                    node_id: node.id().to_string(),
                    sender: Some(sender),
                    default_timeout: config.command_timeout,
                };
                (node.id().to_string(), handle)
            })
            .collect();
        Self { handles, config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Handle for `node_id`. Unknown ids get a handle whose every operation
    /// fails with a `Connection` error.
    pub fn handle(&self, node_id: &str) -> NodeHandle {
        self.handles
            .get(node_id)
            .cloned()
            .unwrap_or_else(|| NodeHandle {
                node_id: node_id.to_string(),
                sender: None,
                default_timeout: self.config.command_timeout,
            })
    }

    /// Establish the session for `node_id` and return its handle.
    pub async fn connect(&self, node_id: &str) -> Result<NodeHandle, ClusterError> {
        let handle = self.handle(node_id);
        match handle.connect().await.error {
            None => Ok(handle),
            Some(error) => Err(error),
        }
    }

    /// Close every open session.
    pub async fn close_all(&self) {
        futures::future::join_all(self.handles.values().map(|h| h.close())).await;
        tracing::debug!("Closed sessions for {} node(s)", self.handles.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRole;
    use crate::os::OsFamily;
    use crate::transport::{CommandOutput, RemoteSession, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        connects: AtomicU32,
        closes: Arc<AtomicU32>,
        refuse: bool,
    }

    struct EchoSession {
        closes: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn connect(&self, _node: &Node) -> Result<Box<dyn RemoteSession>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(TransportError::Auth("permission denied".to_string()));
            }
            Ok(Box::new(EchoSession {
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    #[async_trait]
    impl RemoteSession for EchoSession {
        async fn execute(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
            match command.strip_prefix("echo ") {
                Some(text) => Ok(CommandOutput::success(format!("{text}\n"))),
                None => Ok(CommandOutput {
                    exit_status: 127,
                    stderr: "command not found\n".to_string(),
                    ..CommandOutput::default()
                }),
            }
        }

        async fn upload(&mut self, _local: &Path, _remote: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn download(&mut self, remote: &str, _local: &Path) -> Result<(), TransportError> {
            Err(TransportError::Remote(format!("{remote}: no such file")))
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn nodes() -> Vec<Node> {
        vec![
            Node::new("ctl01", NodeRole::Controller, OsFamily::Debian),
            Node::new("cn01", NodeRole::Compute, OsFamily::Debian),
        ]
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let transport = Arc::new(CountingTransport::default());
        let pool = ConnectionPool::new(&nodes(), transport.clone(), PoolConfig::default());

        let handle = pool.handle("cn01");
        assert_eq!(handle.execute("echo one").await.stdout, "one");
        assert_eq!(handle.execute("echo two").await.stdout, "two");
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);

        pool.close_all().await;
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_retried() {
        let transport = Arc::new(CountingTransport::default());
        let pool = ConnectionPool::new(&nodes(), transport, PoolConfig::default());

        let result = pool.handle("ctl01").execute("false").await;
        assert_eq!(result.attempts, 1);
        assert_eq!(result.exit_code, Some(127));
        assert!(matches!(
            result.error,
            Some(ClusterError::Execution { exit_code: 127, .. })
        ));
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let transport = Arc::new(CountingTransport {
            refuse: true,
            ..Default::default()
        });
        let pool = ConnectionPool::new(&nodes(), transport.clone(), PoolConfig::default());

        let result = pool.handle("cn01").connect().await;
        assert_eq!(result.attempts, 1);
        assert!(matches!(result.error, Some(ClusterError::Auth { .. })));
        assert!(matches!(
            pool.connect("cn01").await,
            Err(ClusterError::Auth { .. })
        ));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_node_yields_connection_error() {
        let pool = ConnectionPool::new(
            &nodes(),
            Arc::new(CountingTransport::default()),
            PoolConfig::default(),
        );
        let result = pool.handle("ghost").execute("echo hi").await;
        assert_eq!(result.node_id, "ghost");
        assert!(matches!(result.error, Some(ClusterError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_remote_transfer_error_is_reported_once() {
        let pool = ConnectionPool::new(
            &nodes(),
            Arc::new(CountingTransport::default()),
            PoolConfig::default(),
        );
        let result = pool
            .handle("cn01")
            .download("/etc/missing", Path::new("/tmp/unused"))
            .await;
        assert_eq!(result.attempts, 1);
        assert!(matches!(result.error, Some(ClusterError::Transfer { .. })));
    }

    #[tokio::test]
    async fn test_dropping_pool_closes_sessions() {
        let transport = Arc::new(CountingTransport::default());
        {
            let pool = ConnectionPool::new(&nodes(), transport.clone(), PoolConfig::default());
            pool.handle("cn01").execute("echo hi").await;
        }
        for _ in 0..100 {
            if transport.closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }
}
