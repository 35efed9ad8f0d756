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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

use crate::os::OsFamily;
use crate::utils::shell_quote;

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Controller,
    #[default]
    Compute,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Controller => write!(f, "controller"),
            NodeRole::Compute => write!(f, "compute"),
        }
    }
}

/// How to authenticate to a node.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credential {
    KeyFile {
        path: PathBuf,
        passphrase: Option<Zeroizing<String>>,
    },
    Password(Zeroizing<String>),
    Agent,
    /// Try `~/.ssh/id_ed25519`, then `~/.ssh/id_rsa`.
    #[default]
    DefaultKeys,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credential::Password(_) => write!(f, "Password(<redacted>)"),
            Credential::Agent => write!(f, "Agent"),
            Credential::DefaultKeys => write!(f, "DefaultKeys"),
        }
    }
}

/// Hardware descriptor as declared in the topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub gpus: Option<u32>,
}

/// A managed machine participating in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub hostname: String,
    /// Reachable endpoint; overrides `hostname` for connecting when set.
    pub address: Option<String>,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    pub role: NodeRole,
    pub os_family: OsFamily,
    pub hardware: Hardware,
}

impl Node {
    pub fn new(hostname: impl Into<String>, role: NodeRole, os_family: OsFamily) -> Self {
        Self {
            hostname: hostname.into(),
            address: None,
            port: 22,
            user: "root".to_string(),
            credential: Credential::DefaultKeys,
            role,
            os_family,
            hardware: Hardware::default(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    /// Identifier used as the key of every per-node result map.
    pub fn id(&self) -> &str {
        &self.hostname
    }

    /// Host used for the TCP connection.
    pub fn connect_host(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.hostname)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.connect_host(), self.port)
    }

    pub fn is_controller(&self) -> bool {
        self.role == NodeRole::Controller
    }

    /// Whether remote commands must be elevated with `sudo`.
    pub fn needs_sudo(&self) -> bool {
        self.user != "root"
    }

    /// Wrap `command` so it runs as root on this node.
    ///
    /// Root logins run the command as is. Anyone else goes through
    /// non-interactive `sudo`, which fails instead of prompting.
    pub fn privileged(&self, command: &str) -> String {
        if self.needs_sudo() {
            format!("sudo -n sh -c {}", shell_quote(command))
        } else {
            command.to_string()
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hostname)
    }
}
