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
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use super::sha256_file;
use super::store::SnapshotStore;
use super::types::{ArtifactOutcome, ConfigBackup, RollbackReport, Snapshot};
use crate::config::SnapshotConfig;
use crate::executor::ParallelExecutor;
use crate::node::Node;
use crate::pool::NodeHandle;
use crate::utils::shell_quote;

const RESTORE_SUFFIX: &str = ".clusterup-restore";

/// What a single node needs restored.
#[derive(Debug, Clone, Default)]
struct NodePlan {
    backups: Vec<ConfigBackup>,
    services: BTreeMap<String, bool>,
    database: Option<DatabaseRestore>,
}

#[derive(Debug, Clone)]
struct DatabaseRestore {
    local: PathBuf,
    remote_tmp: String,
    restore_command: String,
}

/// Restores a stored snapshot onto the cluster.
pub struct RollbackExecutor<'a> {
    executor: &'a ParallelExecutor,
    nodes: &'a [Node],
    store: &'a SnapshotStore,
    config: &'a SnapshotConfig,
}

impl<'a> RollbackExecutor<'a> {
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

    /// Restore snapshot `snapshot_id`.
    ///
    /// Per node: stop recorded services, restore config files, restore the
    /// database dump on its node, restart services that were running. Nodes
    /// are restored independently.
    pub async fn rollback(&self, snapshot_id: &str) -> Result<RollbackReport> {
        let snapshot = self.store.load(snapshot_id).await?;
        let artifact_dir = self.store.artifact_dir(&snapshot.id);
        tracing::info!("Rolling back to snapshot {}", snapshot.id);

        let mut report = RollbackReport {
            snapshot_id: snapshot.id.clone(),
            outcomes: Vec::new(),
        };

        let known: HashSet<&str> = self.nodes.iter().map(Node::id).collect();
        for node_id in snapshot.nodes() {
            if !known.contains(node_id.as_str()) {
                report.outcomes.push(ArtifactOutcome::failed(
                    &node_id,
                    "node",
                    "node is not in the current topology",
                ));
            }
        }

        let plans = self.plan(&snapshot, &artifact_dir);
        let targets: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| plans.contains_key(n.id()))
            .cloned()
            .collect();

        let results = self
            .executor
            .map_nodes(&targets, "Restoring...", |handle, node| {
                let plan = plans.get(node.id()).cloned().unwrap_or_default();
                let artifact_dir = artifact_dir.clone();
                restore_node(handle, plan, artifact_dir)
            })
            .await;

        for (node_id, outcome) in results {
            match outcome {
                Ok(outcomes) => report.outcomes.extend(outcomes),
                Err(e) => report
                    .outcomes
                    .push(ArtifactOutcome::failed(node_id, "node", e.to_string())),
            }
        }

        tracing::info!(
            "Rollback of {} finished: {} restored, {} failed",
            report.snapshot_id,
            report.restored_count(),
            report.failures().count()
        );
        Ok(report)
    }

    fn plan(&self, snapshot: &Snapshot, artifact_dir: &Path) -> BTreeMap<String, NodePlan> {
        let mut plans: BTreeMap<String, NodePlan> = BTreeMap::new();
        for (node_id, backups) in &snapshot.config_backups {
            plans.entry(node_id.clone()).or_default().backups = backups.clone();
        }
        for (node_id, services) in &snapshot.service_states {
            plans.entry(node_id.clone()).or_default().services = services.clone();
        }

        if let (Some(dump), Some(db_node)) = (&snapshot.database_backup, &snapshot.database_node) {
            match self.config.database.as_ref() {
                Some(database) => {
                    plans.entry(db_node.clone()).or_default().database = Some(DatabaseRestore {
                        local: artifact_dir.join(dump),
                        remote_tmp: format!("/tmp/clusterup-restore-{}.sql", snapshot.id),
                        restore_command: database.restore_command.clone(),
                    });
                }
                None => tracing::warn!(
                    "Snapshot {} has a database dump but no restore command is configured",
                    snapshot.id
                ),
            }
        }
        plans
    }
}

async fn restore_node(handle: NodeHandle, plan: NodePlan, artifact_dir: PathBuf) -> Vec<ArtifactOutcome> {
    let node_id = handle.node_id().to_string();
    let mut outcomes = Vec::new();

    // Best effort: a unit that does not exist must not block file restore.
    for service in plan.services.keys() {
        let stop = handle
            .execute(&format!("systemctl stop {}", shell_quote(service)))
            .await;
        if let Some(e) = stop.error {
            tracing::warn!("Could not stop {} on {}: {}", service, node_id, e);
        }
    }

    for backup in &plan.backups {
        let outcome = match restore_file(&handle, &artifact_dir, backup).await {
            Ok(()) => ArtifactOutcome::ok(&node_id, &backup.remote_path),
            Err(reason) => ArtifactOutcome::failed(&node_id, &backup.remote_path, reason),
        };
        outcomes.push(outcome);
    }

    if let Some(database) = &plan.database {
        let outcome = match restore_database(&handle, database).await {
            Ok(()) => ArtifactOutcome::ok(&node_id, "database"),
            Err(reason) => ArtifactOutcome::failed(&node_id, "database", reason),
        };
        outcomes.push(outcome);
    }

    for (service, _) in plan.services.iter().filter(|(_, running)| **running) {
        let artifact = format!("service:{service}");
        let restart = handle
            .execute(&format!("systemctl restart {}", shell_quote(service)))
            .await;
        outcomes.push(match restart.failure_reason() {
            None => ArtifactOutcome::ok(&node_id, artifact),
            Some(reason) => ArtifactOutcome::failed(&node_id, artifact, reason),
        });
    }

    outcomes
}

/// Upload to a temp path, verify the checksum remotely, reapply the recorded
/// mode and ownership, then move into place.
async fn restore_file(
    handle: &NodeHandle,
    artifact_dir: &Path,
    backup: &ConfigBackup,
) -> Result<(), String> {
    let local = artifact_dir.join(&backup.backup_path);
    let local_sha = sha256_file(&local)
        .await
        .map_err(|e| format!("backup file {} unreadable: {e}", local.display()))?;
    if !backup.sha256.is_empty() && local_sha != backup.sha256 {
        return Err(format!("backup file {} is corrupt", local.display()));
    }

    let remote = &backup.remote_path;
    let tmp = format!("{remote}{RESTORE_SUFFIX}");
    if let Some(parent) = Path::new(remote).parent().and_then(Path::to_str) {
        if !parent.is_empty() {
            let mkdir = handle
                .execute(&format!("mkdir -p {}", shell_quote(parent)))
                .await;
            if let Some(reason) = mkdir.failure_reason() {
                return Err(reason);
            }
        }
    }

    if let Some(reason) = handle.upload(&local, &tmp).await.failure_reason() {
        return Err(reason);
    }

    let checksum = handle
        .execute(&format!("sha256sum {}", shell_quote(&tmp)))
        .await;
    let remote_sha = checksum.stdout.split_whitespace().next().unwrap_or_default();
    if checksum.error.is_some() || remote_sha != local_sha {
        let _ = handle.execute(&format!("rm -f {}", shell_quote(&tmp))).await;
        return Err(match checksum.failure_reason() {
            Some(reason) => reason,
            None => format!("checksum mismatch after upload ({remote_sha} != {local_sha})"),
        });
    }

    let quoted_tmp = shell_quote(&tmp);
    if let Some(ownership) = &backup.ownership {
        let apply = handle
            .execute(&format!(
                "chown {}:{} {quoted_tmp} && chmod {} {quoted_tmp}",
                shell_quote(&ownership.owner),
                shell_quote(&ownership.group),
                ownership.mode,
            ))
            .await;
        if let Some(reason) = apply.failure_reason() {
            let _ = handle.execute(&format!("rm -f {quoted_tmp}")).await;
            return Err(reason);
        }
    }

    let mv = handle
        .execute(&format!("mv -f {quoted_tmp} {}", shell_quote(remote)))
        .await;
    match mv.failure_reason() {
        None => {
            tracing::debug!("Restored {} on {}", remote, handle.node_id());
            Ok(())
        }
        Some(reason) => {
            let _ = handle.execute(&format!("rm -f {quoted_tmp}")).await;
            Err(reason)
        }
    }
}

async fn restore_database(handle: &NodeHandle, database: &DatabaseRestore) -> Result<(), String> {
    if let Some(reason) = handle
        .upload(&database.local, &database.remote_tmp)
        .await
        .failure_reason()
    {
        return Err(reason);
    }
    let tmp = shell_quote(&database.remote_tmp);
    let restore = handle
        .execute(&format!("{} < {tmp}", database.restore_command))
        .await;
    let _ = handle.execute(&format!("rm -f {tmp}")).await;
    match restore.failure_reason() {
        None => Ok(()),
        Some(reason) => Err(reason),
    }
}
