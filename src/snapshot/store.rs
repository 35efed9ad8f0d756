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

//! On-disk snapshot store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <id>.json                      metadata
//! <id>/<node>/<flattened path>   config file backups
//! <id>/database.sql              database dump, when enabled
//! ```

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::{Snapshot, SnapshotSummary};

pub const DATABASE_DUMP_FILE: &str = "database.sql";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Directory holding the artifacts of snapshot `id`.
    pub fn artifact_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.metadata_path(id).exists()
    }

    /// Persist metadata. Refuses to overwrite an existing snapshot.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        validate_id(&snapshot.id)?;
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create snapshot directory {}", self.root.display()))?;

        let path = self.metadata_path(&snapshot.id);
        if path.exists() {
            bail!("Snapshot {} already exists and is immutable", snapshot.id);
        }

        let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;
        let tmp = self.root.join(format!(".{}.json.tmp", snapshot.id));
        fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to finalize {}", path.display()))?;

        tracing::info!("Snapshot {} saved to {}", snapshot.id, path.display());
        Ok(path)
    }

    pub async fn load(&self, id: &str) -> Result<Snapshot> {
        validate_id(id)?;
        let path = self.metadata_path(id);
        let content = fs::read(&path).await.with_context(|| {
            format!(
                "Snapshot '{}' not found in {}. Use 'clusterup snapshot list' to see available snapshots.",
                id,
                self.root.display()
            )
        })?;
        serde_json::from_slice(&content)
            .with_context(|| format!("Snapshot metadata {} is corrupt", path.display()))
    }

    /// All snapshots, newest first. Unreadable entries are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read snapshot directory {}", self.root.display())
                })
            }
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            match self.load(id).await {
                Ok(snapshot) => summaries.push(snapshot.summary()),
                Err(e) => tracing::warn!("Skipping snapshot {}: {:#}", id, e),
            }
        }

        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(summaries)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id.starts_with('.')
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        bail!("Invalid snapshot id '{id}'");
    }
    Ok(())
}
