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

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use super::ClusterContext;
use crate::report;
use crate::snapshot::{RollbackExecutor, RollbackReport, Snapshot, SnapshotManager, SnapshotSummary};

pub async fn create_snapshot(ctx: &ClusterContext, stage: Option<usize>) -> Result<Snapshot> {
    let tag = stage
        .map(|n| format!("stage{n}"))
        .unwrap_or_else(|| "manual".to_string());
    let snapshot = SnapshotManager::new(&ctx.executor, &ctx.nodes, &ctx.store, &ctx.config.snapshot)
        .create_snapshot(&tag)
        .await
        .context("Failed to create snapshot")?;

    println!(
        "{} Snapshot {} created: {} file(s) from {} node(s){}",
        "●".green(),
        snapshot.id.bold(),
        snapshot.file_count(),
        snapshot.nodes().len(),
        if snapshot.database_backup.is_some() {
            ", database dump included"
        } else {
            ""
        }
    );
    for failure in &snapshot.failures {
        println!("  {} {}", "⚠".yellow(), failure.dimmed());
    }
    Ok(snapshot)
}

pub async fn list_snapshots(ctx: &ClusterContext) -> Result<Vec<SnapshotSummary>> {
    let snapshots = ctx.store.list().await?;
    print!("{}", report::format_snapshot_list(&snapshots));
    Ok(snapshots)
}

pub async fn rollback_snapshot(ctx: &ClusterContext, id: &str) -> Result<RollbackReport> {
    println!("{}", report::format_header(&format!("Rollback to {id}")));
    let report = RollbackExecutor::new(&ctx.executor, &ctx.nodes, &ctx.store, &ctx.config.snapshot)
        .rollback(id)
        .await
        .with_context(|| format!("Failed to roll back snapshot {id}"))?;
    println!("{}", report::format_rollback_report(&report));
    Ok(report)
}
