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

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::store::{SnapshotStore, DATABASE_DUMP_FILE};
use super::types::{ConfigBackup, FileOwnership, Snapshot, STAT_OWNERSHIP_FORMAT};
use super::{restrict_to_owner, sha256_file};
use crate::config::SnapshotConfig;
use crate::error::ClusterError;
use crate::executor::ParallelExecutor;
use crate::node::Node;
use crate::os::capability_for;
use crate::pool::NodeHandle;
use crate::utils::{flatten_remote_path, shell_quote};

/// Everything captured from one node.
#[derive(Debug, Default)]
struct NodeCapture {
    backups: Vec<ConfigBackup>,
    services: BTreeMap<String, bool>,
    packages: Option<Vec<String>>,
    failures: Vec<String>,
}

/// Captures system state before risky stages.
pub struct SnapshotManager<'a> {
    executor: &'a ParallelExecutor,
    nodes: &'a [Node],
    store: &'a SnapshotStore,
    config: &'a SnapshotConfig,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(
        executor: &'a ParallelExecutor,
        nodes: &'a [Node],
        store: &'a SnapshotStore,
        config: &'a SnapshotConfig,
    ) -> Self {
        Self {
            executor,
            nodes,
            store,
            config,
        }
    }

    /// Capture and persist a snapshot tagged `stage_tag`.
    ///
    /// Per-artifact failures are recorded in `Snapshot::failures`; only store
    /// I/O errors fail the call.
    pub async fn create_snapshot(&self, stage_tag: &str) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new(stage_tag, Utc::now());
        // Ids carry millisecond precision; disambiguate back-to-back captures.
        let base_id = snapshot.id.clone();
        let mut suffix = 1;
        while self.store.exists(&snapshot.id) || self.store.artifact_dir(&snapshot.id).exists() {
            suffix += 1;
            snapshot.id = format!("{base_id}_{suffix}");
        }
        let artifact_dir = self.store.artifact_dir(&snapshot.id);
        tokio::fs::create_dir_all(&artifact_dir).await?;
        tracing::info!(
            "Creating snapshot {} of {} node(s)",
            snapshot.id,
            self.nodes.len()
        );

        let paths = Arc::new(self.config.config_paths.clone());
        let services = Arc::new(self.config.services.clone());
        let captures = self
            .executor
            .map_nodes(self.nodes, "Capturing state...", |handle, node| {
                capture_node(
                    handle,
                    node,
                    Arc::clone(&paths),
                    Arc::clone(&services),
                    artifact_dir.clone(),
                )
            })
            .await;

        for (node_id, capture) in captures {
            match capture {
                Ok(capture) => {
                    if !capture.backups.is_empty() {
                        snapshot.config_backups.insert(node_id.clone(), capture.backups);
                    }
                    snapshot.service_states.insert(node_id.clone(), capture.services);
                    if let Some(packages) = capture.packages {
                        snapshot.package_lists.insert(node_id.clone(), packages);
                    }
                    snapshot.failures.extend(capture.failures);
                }
                Err(e) => snapshot.failures.push(e.to_string()),
            }
        }

        if let Some(database) = self.config.database.as_ref().filter(|db| db.enabled) {
            match self.nodes.iter().find(|n| n.is_controller()) {
                Some(controller) => {
                    let handle = self.executor.pool().handle(controller.id());
                    match dump_database(
                        &handle,
                        &snapshot.id,
                        &database.dump_command,
                        &artifact_dir.join(DATABASE_DUMP_FILE),
                    )
                    .await
                    {
                        Ok(()) => {
                            snapshot.database_backup = Some(PathBuf::from(DATABASE_DUMP_FILE));
                            snapshot.database_node = Some(controller.id().to_string());
                        }
                        Err(e) => {
                            tracing::warn!("Database backup failed: {}", e);
                            snapshot.failures.push(e.to_string());
                        }
                    }
                }
                None => snapshot
                    .failures
                    .push("database backup skipped: no controller node".to_string()),
            }
        }

        self.store.save(&snapshot).await?;
        Ok(snapshot)
    }
}

async fn capture_node(
    handle: NodeHandle,
    node: Node,
    paths: Arc<Vec<String>>,
    services: Arc<Vec<String>>,
    artifact_dir: PathBuf,
) -> NodeCapture {
    let node_id = node.id().to_string();
    let mut capture = NodeCapture::default();

    for remote_path in paths.iter() {
        let exists = handle
            .execute(&format!("test -e {}", shell_quote(remote_path)))
            .await;
        match (&exists.error, exists.exit_code) {
            (None, _) => {}
            // Absent paths are skipped silently.
            (Some(ClusterError::Execution { .. }), Some(1)) => continue,
            (Some(e), _) => {
                capture
                    .failures
                    .push(ClusterError::snapshot(&node_id, remote_path, e.to_string()).to_string());
                continue;
            }
        }

        let stat = handle
            .execute(&format!("{STAT_OWNERSHIP_FORMAT} {}", shell_quote(remote_path)))
            .await;
        let ownership = if stat.is_success() {
            FileOwnership::parse(&stat.stdout)
        } else {
            None
        };
        if ownership.is_none() {
            tracing::warn!(
                "Could not record ownership of {} on {}; rollback keeps defaults",
                remote_path,
                node_id
            );
        }

        let relative = Path::new(&node_id).join(flatten_remote_path(remote_path));
        let local = artifact_dir.join(&relative);
        let download = handle.download(remote_path, &local).await;
        if let Some(e) = download.error {
            capture
                .failures
                .push(ClusterError::snapshot(&node_id, remote_path, e.to_string()).to_string());
            continue;
        }
        if let Err(e) = restrict_to_owner(&local).await {
            tracing::warn!("Could not restrict permissions of {:?}: {}", local, e);
        }

        match sha256_file(&local).await {
            Ok(sha256) => capture.backups.push(ConfigBackup {
                remote_path: remote_path.clone(),
                backup_path: relative,
                sha256,
                ownership,
            }),
            Err(e) => capture.failures.push(
                ClusterError::snapshot(&node_id, remote_path, format!("unreadable backup: {e}"))
                    .to_string(),
            ),
        }
    }

    for service in services.iter() {
        let state = handle
            .execute(&format!("systemctl is-active --quiet {}", shell_quote(service)))
            .await;
        match &state.error {
            None => {
                capture.services.insert(service.clone(), true);
            }
            Some(ClusterError::Execution { .. }) => {
                capture.services.insert(service.clone(), false);
            }
            Some(e) => capture.failures.push(
                ClusterError::snapshot(&node_id, format!("service:{service}"), e.to_string())
                    .to_string(),
            ),
        }
    }

    let listing = handle
        .execute(&capability_for(node.os_family).list_packages())
        .await;
    match listing.error {
        None => {
            let mut packages: Vec<String> = listing
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            packages.sort();
            packages.dedup();
            capture.packages = Some(packages);
        }
        Some(e) => capture.failures.push(
            ClusterError::snapshot(&node_id, "packages", e.to_string()).to_string(),
        ),
    }

    tracing::debug!(
        "Captured {} file(s) and {} service state(s) from {}",
        capture.backups.len(),
        capture.services.len(),
        node_id
    );
    capture
}

/// Dump on the controller into a private temp file, download it, delete the temp copy.
async fn dump_database(
    handle: &NodeHandle,
    snapshot_id: &str,
    dump_command: &str,
    local: &Path,
) -> Result<(), ClusterError> {
    let node_id = handle.node_id();
    let remote_tmp = format!("/tmp/clusterup-db-{snapshot_id}.sql");
    let quoted_tmp = shell_quote(&remote_tmp);

    let dump = handle
        .execute(&format!("umask 077 && {dump_command} > {quoted_tmp}"))
        .await;
    let result = match dump.error {
        Some(e) => Err(ClusterError::snapshot(node_id, "database", e.to_string())),
        None => match handle.download(&remote_tmp, local).await.error {
            Some(e) => Err(ClusterError::snapshot(node_id, "database", e.to_string())),
            None => {
                if let Err(e) = restrict_to_owner(local).await {
                    tracing::warn!("Could not restrict permissions of {:?}: {}", local, e);
                }
                Ok(())
            }
        },
    };

    let cleanup = handle.execute(&format!("rm -f {quoted_tmp}")).await;
    if let Some(e) = cleanup.error {
        tracing::warn!("Failed to remove {} on {}: {}", remote_tmp, node_id, e);
    }
    result
}
