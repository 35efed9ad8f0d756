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

//! Snapshot capture and rollback.

mod manager;
mod rollback;
mod store;
mod types;

use sha2::{Digest, Sha256};
use std::path::Path;

pub use manager::SnapshotManager;
pub use rollback::RollbackExecutor;
pub use store::{SnapshotStore, DATABASE_DUMP_FILE};
pub use types::{
    ArtifactOutcome, ConfigBackup, FileOwnership, RollbackReport, Snapshot, SnapshotSummary,
    STAT_OWNERSHIP_FORMAT,
};

/// Make a local backup readable by its owner only.
pub(crate) async fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Hex SHA-256 of a local file, as `sha256sum` prints it.
pub(crate) async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let contents = tokio::fs::read(path).await?;
    Ok(format!("{:x}", Sha256::digest(&contents)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sha256_matches_coreutils_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello");
        std::fs::write(&path, b"hello\n").unwrap();
        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restrict_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("munge.key");
        std::fs::write(&path, b"secret").unwrap();
        restrict_to_owner(&path).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
