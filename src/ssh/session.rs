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

//! [`Transport`] implementation backed by russh.

use async_trait::async_trait;
use std::path::Path;

use super::auth::resolve_auth_method;
use super::known_hosts::{host_key_check, StrictHostKeyChecking};
use super::tokio_client::{self, Client};
use crate::node::Node;
use crate::transport::{CommandOutput, RemoteSession, Transport, TransportError};

/// Opens real SSH sessions.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    strict_mode: StrictHostKeyChecking,
}

impl SshTransport {
    pub fn new(strict_mode: StrictHostKeyChecking) -> Self {
        Self { strict_mode }
    }
}

fn connect_error(e: tokio_client::Error) -> TransportError {
    match &e {
        err if err.is_auth_failure() => TransportError::Auth(describe_auth_failure(err)),
        tokio_client::Error::SshError(russh::Error::UnknownKey) => TransportError::Auth(
            "host key verification failed. The server's host key was not recognized or has changed"
                .to_string(),
        ),
        _ => TransportError::Connect(e.to_string()),
    }
}

fn describe_auth_failure(e: &tokio_client::Error) -> String {
    match e {
        tokio_client::Error::KeyAuthFailed => {
            "the private key was rejected by the server".to_string()
        }
        tokio_client::Error::KeyInvalid(key_err) => {
            format!("failed to load SSH key: {key_err}. Check the key file format and passphrase")
        }
        tokio_client::Error::AgentNoIdentities => {
            "SSH agent has no identities. Add your key with 'ssh-add'".to_string()
        }
        other => other.to_string(),
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>, TransportError> {
        let auth = resolve_auth_method(&node.credential).map_err(TransportError::Auth)?;
        let check = host_key_check(self.strict_mode);

        tracing::debug!("Connecting to {}@{}", node.user, node.endpoint());
        let client = Client::connect(node.connect_host(), node.port, &node.user, auth, check)
            .await
            .map_err(connect_error)?;

        Ok(Box::new(SshSession { client }))
    }
}

/// One authenticated russh connection.
#[derive(Debug)]
pub struct SshSession {
    client: Client,
}

impl SshSession {
    /// Classify a failure after connect: a closed handle means the session is gone.
    fn operation_error(&self, e: tokio_client::Error) -> TransportError {
        if self.client.is_closed() {
            return TransportError::Disconnected(e.to_string());
        }
        match e {
            tokio_client::Error::SshError(_) | tokio_client::Error::CommandDidntExit => {
                TransportError::Disconnected(e.to_string())
            }
            other => TransportError::Remote(other.to_string()),
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
        let result = self
            .client
            .run_command(command)
            .await
            .map_err(|e| self.operation_error(e))?;
        Ok(CommandOutput {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_status: result.exit_status,
        })
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        self.client
            .push_file(local, remote)
            .await
            .map(|_| ())
            .map_err(|e| self.operation_error(e))
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<(), TransportError> {
        self.client
            .pull_file(remote, local)
            .await
            .map(|_| ())
            .map_err(|e| self.operation_error(e))
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(
                "Disconnect from {} failed: {}",
                self.client.address(),
                e
            );
        }
    }
}
