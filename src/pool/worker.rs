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

//! Per-node worker task.
//!
//! The worker is the only owner of its node's session. Requests arrive over
//! an mpsc channel and are served strictly in order, so a node never has two
//! operations in flight.
//!
//! Commands run as root: non-root logins are elevated with `sudo -n`, and
//! their transfers are staged in `/tmp` and moved into place by root.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use super::PoolConfig;
use crate::error::ClusterError;
use crate::executor::OperationResult;
use crate::node::Node;
use crate::retry::with_retry_state;
use crate::transport::{CommandOutput, RemoteSession, Transport, TransportError};
use crate::utils::{flatten_remote_path, shell_quote};

type Slot = Option<Box<dyn RemoteSession>>;

pub(super) enum NodeRequest {
    Connect {
        reply: oneshot::Sender<OperationResult>,
    },
    Execute {
        command: String,
        timeout: Duration,
        reply: oneshot::Sender<OperationResult>,
    },
    Upload {
        local: PathBuf,
        remote: String,
        reply: oneshot::Sender<OperationResult>,
    },
    Download {
        remote: String,
        local: PathBuf,
        reply: oneshot::Sender<OperationResult>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Failure of a single attempt, tagged with whether another attempt may help.
struct AttemptError {
    error: ClusterError,
    retryable: bool,
}

impl AttemptError {
    fn fatal(error: ClusterError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }

    fn retryable(error: ClusterError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

struct NodeContext {
    node: Node,
    transport: Arc<dyn Transport>,
    config: PoolConfig,
}

impl NodeContext {
    fn id(&self) -> &str {
        self.node.id()
    }

    async fn connect(&self, slot: Slot) -> Result<Box<dyn RemoteSession>, AttemptError> {
        if let Some(session) = slot {
            return Ok(session);
        }
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.transport.connect(&self.node)).await {
            Ok(Ok(session)) => {
                tracing::debug!("Connected to {}", self.node.endpoint());
                Ok(session)
            }
            Ok(Err(TransportError::Auth(reason))) => Err(AttemptError::fatal(ClusterError::Auth {
                node: self.id().to_string(),
                reason,
            })),
            Ok(Err(e)) => Err(AttemptError {
                retryable: e.is_retryable(),
                error: ClusterError::connection(self.id(), e.to_string()),
            }),
            Err(_) => Err(AttemptError::retryable(ClusterError::Timeout {
                node: self.id().to_string(),
                operation: "connect".to_string(),
                timeout,
            })),
        }
    }

    async fn connect_attempt(&self, slot: Slot) -> (Slot, Result<(), AttemptError>) {
        match self.connect(slot).await {
            Ok(session) => (Some(session), Ok(())),
            Err(e) => (None, Err(e)),
        }
    }

    async fn execute_attempt(
        &self,
        slot: Slot,
        command: &str,
        timeout: Duration,
    ) -> (Slot, Result<CommandOutput, AttemptError>) {
        let mut session = match self.connect(slot).await {
            Ok(session) => session,
            Err(e) => return (None, Err(e)),
        };
        match tokio::time::timeout(timeout, session.execute(command)).await {
            Ok(Ok(output)) => (Some(session), Ok(output)),
            Ok(Err(e)) => {
                let error = match &e {
                    TransportError::Auth(reason) => ClusterError::Auth {
                        node: self.id().to_string(),
                        reason: reason.clone(),
                    },
                    _ => ClusterError::connection(self.id(), e.to_string()),
                };
                let retryable = e.is_retryable();
                // A broken session is dropped; the next attempt reconnects.
                let slot = if retryable { None } else { Some(session) };
                (slot, Err(AttemptError { error, retryable }))
            }
            Err(_) => (
                None,
                Err(AttemptError::retryable(ClusterError::Timeout {
                    node: self.id().to_string(),
                    operation: "execute".to_string(),
                    timeout,
                })),
            ),
        }
    }

    async fn transfer_attempt(
        &self,
        slot: Slot,
        direction: Transfer<'_>,
    ) -> (Slot, Result<(), AttemptError>) {
        let mut session = match self.connect(slot).await {
            Ok(session) => session,
            Err(e) => return (None, Err(e)),
        };
        let timeout = self.config.command_timeout;
        let transfer = async {
            match direction {
                Transfer::Upload { local, remote } => session.upload(local, remote).await,
                Transfer::Download { remote, local } => session.download(remote, local).await,
            }
        };
        match tokio::time::timeout(timeout, transfer).await {
            Ok(Ok(())) => (Some(session), Ok(())),
            Ok(Err(e)) => {
                let retryable = e.is_retryable();
                let error = ClusterError::transfer(self.id(), direction.remote(), e.to_string());
                let slot = if retryable { None } else { Some(session) };
                (slot, Err(AttemptError { error, retryable }))
            }
            Err(_) => (
                None,
                Err(AttemptError::retryable(ClusterError::Timeout {
                    node: self.id().to_string(),
                    operation: format!("transfer of {}", direction.remote()),
                    timeout,
                })),
            ),
        }
    }
}

#[derive(Clone, Copy)]
enum Transfer<'a> {
    Upload { local: &'a Path, remote: &'a str },
    Download { remote: &'a str, local: &'a Path },
}

impl Transfer<'_> {
    fn remote(&self) -> &str {
        match self {
            Transfer::Upload { remote, .. } | Transfer::Download { remote, .. } => remote,
        }
    }
}

/// Per-path staging file for elevated transfers.
fn staging_path(remote: &str) -> String {
    format!("/tmp/.clusterup-stage-{}", flatten_remote_path(remote))
}

pub(super) struct NodeWorker {
    context: NodeContext,
    session: Slot,
    receiver: mpsc::Receiver<NodeRequest>,
}

impl NodeWorker {
    pub(super) fn new(
        node: Node,
        transport: Arc<dyn Transport>,
        config: PoolConfig,
        receiver: mpsc::Receiver<NodeRequest>,
    ) -> Self {
        Self {
            context: NodeContext {
                node,
                transport,
                config,
            },
            session: None,
            receiver,
        }
    }

    pub(super) async fn run(mut self) {
        while let Some(request) = self.receiver.recv().await {
            match request {
                NodeRequest::Connect { reply } => {
                    let _ = reply.send(self.connect().await);
                }
                NodeRequest::Execute {
                    command,
                    timeout,
                    reply,
                } => {
                    let _ = reply.send(self.execute(&command, timeout).await);
                }
                NodeRequest::Upload {
                    local,
                    remote,
                    reply,
                } => {
                    let result = self
                        .transfer(Transfer::Upload {
                            local: &local,
                            remote: &remote,
                        })
                        .await;
                    let _ = reply.send(result);
                }
                NodeRequest::Download {
                    remote,
                    local,
                    reply,
                } => {
                    let result = self
                        .transfer(Transfer::Download {
                            remote: &remote,
                            local: &local,
                        })
                        .await;
                    let _ = reply.send(result);
                }
                NodeRequest::Close { reply } => {
                    self.close_session().await;
                    let _ = reply.send(());
                }
            }
        }
        // Every handle is gone.
        self.close_session().await;
    }

    async fn connect(&mut self) -> OperationResult {
        let start = Instant::now();
        let context = &self.context;
        let (slot, retried) = with_retry_state(
            &context.config.retry,
            |e: &AttemptError| e.retryable,
            self.session.take(),
            move |slot, _| context.connect_attempt(slot),
        )
        .await;
        self.session = slot;

        match retried.result {
            Ok(()) => OperationResult::completed(context.id(), retried.attempts, start.elapsed()),
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", context.id(), e);
                OperationResult::failed(context.id(), e.error, retried.attempts, start.elapsed())
            }
        }
    }

    async fn execute(&mut self, command: &str, timeout: Duration) -> OperationResult {
        let start = Instant::now();
        let context = &self.context;
        let command = context.node.privileged(command);
        let command = command.as_str();
        tracing::debug!("Executing on {}: {}", context.id(), command);
        let (slot, retried) = with_retry_state(
            &context.config.retry,
            |e: &AttemptError| e.retryable,
            self.session.take(),
            move |slot, _| context.execute_attempt(slot, command, timeout),
        )
        .await;
        self.session = slot;

        match retried.result {
            Ok(output) => {
                OperationResult::from_output(context.id(), output, retried.attempts, start.elapsed())
            }
            Err(e) => {
                tracing::warn!("Command on {} failed: {}", context.id(), e);
                OperationResult::failed(context.id(), e.error, retried.attempts, start.elapsed())
            }
        }
    }

    async fn transfer(&mut self, direction: Transfer<'_>) -> OperationResult {
        if !self.context.node.needs_sudo() {
            return self.sftp_transfer(direction).await;
        }

        let start = Instant::now();
        let timeout = self.context.config.command_timeout;
        let stage = staging_path(direction.remote());
        let quoted_stage = shell_quote(&stage);
        let quoted_remote = shell_quote(direction.remote());

        let (moved, attempts) = match direction {
            Transfer::Upload { local, .. } => {
                let sent = self
                    .sftp_transfer(Transfer::Upload {
                        local,
                        remote: &stage,
                    })
                    .await;
                if !sent.is_success() {
                    return sent;
                }
                let place = format!("cp -f {quoted_stage} {quoted_remote} && rm -f {quoted_stage}");
                let placed = self.execute(&place, timeout).await;
                if !placed.is_success() {
                    let _ = self.execute(&format!("rm -f {quoted_stage}"), timeout).await;
                }
                (placed, sent.attempts)
            }
            Transfer::Download { local, .. } => {
                let copy = format!(
                    "cp -f {quoted_remote} {quoted_stage} && chown {} {quoted_stage}",
                    shell_quote(&self.context.node.user)
                );
                let copied = self.execute(&copy, timeout).await;
                let fetched = if copied.is_success() {
                    self.sftp_transfer(Transfer::Download {
                        remote: &stage,
                        local,
                    })
                    .await
                } else {
                    copied
                };
                let _ = self.execute(&format!("rm -f {quoted_stage}"), timeout).await;
                let attempts = fetched.attempts;
                (fetched, attempts)
            }
        };

        let Some(error) = moved.error.clone() else {
            return OperationResult::completed(self.context.id(), attempts, start.elapsed());
        };
        // A failed cp or chown is a transfer failure; connection trouble keeps its kind.
        let error = match error {
            ClusterError::Execution { .. } => ClusterError::transfer(
                self.context.id(),
                direction.remote(),
                moved.failure_reason().unwrap_or_default(),
            ),
            other => other,
        };
        OperationResult::failed(
            self.context.id(),
            error,
            attempts.max(moved.attempts),
            start.elapsed(),
        )
    }

    async fn sftp_transfer(&mut self, direction: Transfer<'_>) -> OperationResult {
        let start = Instant::now();
        let context = &self.context;
        let (slot, retried) = with_retry_state(
            &context.config.retry,
            |e: &AttemptError| e.retryable,
            self.session.take(),
            move |slot, _| context.transfer_attempt(slot, direction),
        )
        .await;
        self.session = slot;

        match retried.result {
            Ok(()) => OperationResult::completed(context.id(), retried.attempts, start.elapsed()),
            Err(e) => {
                tracing::warn!("Transfer on {} failed: {}", context.id(), e);
                OperationResult::failed(context.id(), e.error, retried.attempts, start.elapsed())
            }
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            tracing::debug!("Closing session to {}", self.context.id());
            session.close().await;
        }
    }
}
