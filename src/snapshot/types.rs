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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::ClusterError;

/// Prints `<octal mode> <owner> <group>` for a path.
pub const STAT_OWNERSHIP_FORMAT: &str = "stat -c '%a %U %G'";

/// Mode and ownership of a remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwnership {
    /// Octal permission bits as `stat %a` prints them, e.g. `400`.
    pub mode: String,
    pub owner: String,
    pub group: String,
}

impl FileOwnership {
    /// Parse the output of [`STAT_OWNERSHIP_FORMAT`].
    pub fn parse(stat_output: &str) -> Option<Self> {
        let mut fields = stat_output.split_whitespace();
        let (mode, owner, group) = (fields.next()?, fields.next()?, fields.next()?);
        if fields.next().is_some()
            || mode.len() > 4
            || !mode.chars().all(|c| ('0'..='7').contains(&c))
        {
            return None;
        }
        Some(Self {
            mode: mode.to_string(),
            owner: owner.to_string(),
            group: group.to_string(),
        })
    }
}

/// One backed-up configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBackup {
    pub remote_path: String,
    /// Relative to the snapshot's artifact directory.
    pub backup_path: PathBuf,
    /// Hex SHA-256 of the backed-up contents.
    pub sha256: String,
    /// Absent for snapshots taken before ownership was recorded.
    #[serde(default)]
    pub ownership: Option<FileOwnership>,
}

/// Captured system state, immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub stage_tag: String,
    #[serde(default)]
    pub config_backups: BTreeMap<String, Vec<ConfigBackup>>,
    /// Relative to the snapshot's artifact directory.
    #[serde(default)]
    pub database_backup: Option<PathBuf>,
    /// Node of the database dump.
    #[serde(default)]
    pub database_node: Option<String>,
    /// node -> service -> running
    #[serde(default)]
    pub service_states: BTreeMap<String, BTreeMap<String, bool>>,
    #[serde(default)]
    pub package_lists: BTreeMap<String, Vec<String>>,
    /// Artifacts that could not be captured.
    #[serde(default)]
    pub failures: Vec<String>,
}

impl Snapshot {
    pub fn new(stage_tag: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let stage_tag = stage_tag.into();
        Self {
            id: format!("{}_{}", created_at.format("%Y%m%d_%H%M%S_%3f"), stage_tag),
            created_at,
            stage_tag,
            config_backups: BTreeMap::new(),
            database_backup: None,
            database_node: None,
            service_states: BTreeMap::new(),
            package_lists: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn file_count(&self) -> usize {
        self.config_backups.values().map(Vec::len).sum()
    }

    /// Every node with at least one captured artifact.
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self
            .config_backups
            .keys()
            .chain(self.service_states.keys())
            .chain(self.package_lists.keys())
            .cloned()
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            stage_tag: self.stage_tag.clone(),
            nodes: self.nodes().len(),
            files: self.file_count(),
            has_db: self.database_backup.is_some(),
            failures: self.failures.len(),
        }
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub stage_tag: String,
    pub nodes: usize,
    pub files: usize,
    pub has_db: bool,
    pub failures: usize,
}

/// Outcome of restoring one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactOutcome {
    pub node: String,
    pub artifact: String,
    pub error: Option<ClusterError>,
}

impl ArtifactOutcome {
    pub fn ok(node: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            artifact: artifact.into(),
            error: None,
        }
    }

    pub fn failed(node: impl Into<String>, artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        let node = node.into();
        let artifact = artifact.into();
        Self {
            error: Some(ClusterError::snapshot(&node, &artifact, reason)),
            node,
            artifact,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub snapshot_id: String,
    pub outcomes: Vec<ArtifactOutcome>,
}

impl RollbackReport {
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(ArtifactOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn restored_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }
}
