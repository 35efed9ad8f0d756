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

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use zeroize::Zeroizing;

use super::types::{Config, NodeConfig};
use super::utils::{expand_env_vars, expand_tilde};
use crate::node::{Credential, Node};
use crate::retry::RetryPolicy;
use crate::ssh::StrictHostKeyChecking;
use crate::utils::sanitize_hostname;

pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER: &str = "root";
const DEFAULT_PORT: u16 = 22;

impl Config {
    /// Load and validate the topology file.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        let content = fs::read_to_string(&expanded_path)
            .await
            .with_context(|| format!("Failed to read configuration file at {}. Please check the path and file permissions.", expanded_path.display()))?;

        let config = Self::from_yaml(&content).with_context(|| {
            format!(
                "Invalid configuration file at {}",
                expanded_path.display()
            )
        })?;
        tracing::debug!(
            "Loaded {} node(s) from {:?}",
            config.nodes.len(),
            expanded_path
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).context(
            "Failed to parse YAML. Common issues:\n  - Incorrect indentation (use spaces, not tabs)\n  - Missing colons after keys\n  - Unknown os_family or role value",
        )?;
        config.validate()?;
        Ok(config)
    }

    /// Enforce the topology invariants.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("No nodes defined. Add at least one entry under 'nodes'.");
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            sanitize_hostname(&node.hostname)
                .with_context(|| format!("Invalid hostname '{}'", node.hostname))?;
            if let Some(address) = &node.address {
                sanitize_hostname(address).with_context(|| {
                    format!("Invalid address '{}' for node {}", address, node.hostname)
                })?;
            }
            if !seen.insert(node.hostname.as_str()) {
                bail!("Duplicate hostname '{}' in nodes", node.hostname);
            }
        }

        if !self.nodes.iter().any(|n| n.role == crate::node::NodeRole::Controller) {
            tracing::warn!("No controller node defined; controller steps will be skipped");
        }

        if self.defaults.max_workers == Some(0) {
            bail!("defaults.max_workers must be at least 1");
        }
        Ok(())
    }

    /// Build the node set for this run.
    pub fn build_nodes(&self) -> Result<Vec<Node>> {
        self.nodes.iter().map(|n| self.build_node(n)).collect()
    }

    fn build_node(&self, node: &NodeConfig) -> Result<Node> {
        let mut built = Node::new(node.hostname.clone(), node.role, node.os_family)
            .with_port(node.port.or(self.defaults.port).unwrap_or(DEFAULT_PORT))
            .with_user(
                node.user
                    .clone()
                    .or_else(|| self.defaults.user.clone())
                    .unwrap_or_else(|| DEFAULT_USER.to_string()),
            )
            .with_credential(self.credential_for(node)?);
        if let Some(address) = &node.address {
            built = built.with_address(address.clone());
        }
        built.hardware = node.hardware.clone();
        Ok(built)
    }

    fn credential_for(&self, node: &NodeConfig) -> Result<Credential> {
        if let Some(password) = &node.password {
            let expanded = expand_env_vars(password);
            if expanded.contains("${") {
                bail!(
                    "Password for node {} references an unset environment variable",
                    node.hostname
                );
            }
            return Ok(Credential::Password(Zeroizing::new(expanded)));
        }
        if node.use_agent {
            return Ok(Credential::Agent);
        }
        match node.ssh_key.as_ref().or(self.defaults.ssh_key.as_ref()) {
            Some(key) => Ok(Credential::KeyFile {
                path: expand_tilde(Path::new(key)),
                passphrase: node
                    .key_passphrase
                    .as_deref()
                    .map(|p| Zeroizing::new(expand_env_vars(p))),
            }),
            None => Ok(Credential::DefaultKeys),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.defaults.max_workers.unwrap_or(DEFAULT_MAX_WORKERS).max(1)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.defaults.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.defaults
                .connect_timeout
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy::new(
            self.defaults.max_retries.unwrap_or(defaults.max_attempts),
            self.defaults
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
        )
    }

    pub fn strict_mode(&self) -> StrictHostKeyChecking {
        self.defaults.strict_host_key_checking.unwrap_or_default()
    }

    /// Where snapshots are stored.
    pub fn snapshot_dir(&self) -> PathBuf {
        if let Some(dir) = &self.snapshot.directory {
            return expand_tilde(Path::new(dir));
        }
        ProjectDirs::from("", "", "clusterup")
            .map(|dirs| dirs.data_dir().join("snapshots"))
            .unwrap_or_else(|| PathBuf::from("snapshots"))
    }
}
