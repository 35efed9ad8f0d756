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

use crate::node::{Hardware, NodeRole};
use crate::os::OsFamily;
use crate::ssh::StrictHostKeyChecking;

/// Root of `cluster.yaml`.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub features: Features,

    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Defaults {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub ssh_key: Option<String>,
    pub strict_host_key_checking: Option<StrictHostKeyChecking>,
    /// Upper bound on simultaneous node operations.
    pub max_workers: Option<usize>,
    /// Per-command timeout in seconds.
    pub timeout: Option<u64>,
    /// Per-connect timeout in seconds.
    pub connect_timeout: Option<u64>,
    /// Total attempts for connect, execute and transfer.
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConfig {
    pub hostname: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub key_passphrase: Option<String>,
    /// Supports `${VAR}` expansion so secrets can stay out of the file.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub use_agent: bool,
    #[serde(default)]
    pub role: NodeRole,
    pub os_family: OsFamily,
    #[serde(default)]
    pub hardware: Hardware,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Features {
    /// Installed on every node during the base system stage.
    #[serde(default)]
    pub base_packages: Vec<String>,

    #[serde(default)]
    pub firewall: FirewallConfig,

    #[serde(default)]
    pub service_user: Option<ServiceUser>,

    #[serde(default)]
    pub nfs: Option<NfsMount>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FirewallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_firewall_ports")]
    pub ports: Vec<u16>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ports: default_firewall_ports(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceUser {
    pub name: String,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub home: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NfsMount {
    pub server: String,
    pub export: String,
    pub mount_point: String,
    #[serde(default)]
    pub options: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct SchedulerConfig {
    /// Installed on every node in addition to the role packages.
    #[serde(default)]
    pub extra_packages: Vec<String>,

    #[serde(default)]
    pub config_files: Vec<ConfigUpload>,

    /// Local munge key distributed to every node when set.
    #[serde(default)]
    pub munge_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConfigUpload {
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnapshotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to the platform data directory.
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_config_paths")]
    pub config_paths: Vec<String>,

    #[serde(default = "default_services")]
    pub services: Vec<String>,

    #[serde(default)]
    pub database: Option<DatabaseBackup>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            config_paths: default_config_paths(),
            services: default_services(),
            database: None,
        }
    }
}

/// Dump and restore commands for the accounting database on the controller.
///
/// `dump_command` must write SQL to stdout; `restore_command` reads it on stdin.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseBackup {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub dump_command: String,
    pub restore_command: String,
}

fn default_true() -> bool {
    true
}

fn default_firewall_ports() -> Vec<u16> {
    vec![6817, 6818, 6819]
}

fn default_config_paths() -> Vec<String> {
    [
        "/etc/slurm/slurm.conf",
        "/etc/slurm/cgroup.conf",
        "/etc/munge/munge.key",
        "/etc/hosts",
        "/etc/fstab",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_services() -> Vec<String> {
    ["munge", "slurmctld", "slurmd"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
