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


//! Host key policy as configured per cluster.

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use super::tokio_client::HostKeyCheck;

/// Host key policy, named after OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrictHostKeyChecking {
    Yes,
    No,
    #[default]
    AcceptNew,
}

impl FromStr for StrictHostKeyChecking {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" | "true" => Ok(Self::Yes),
            "no" | "false" => Ok(Self::No),
            "accept-new" | "tofu" => Ok(Self::AcceptNew),
            other => Err(format!("invalid host key checking mode '{other}'")),
        }
    }
}

pub fn known_hosts_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

/// Translate the configured policy for the SSH client.
///
/// `accept-new` needs a writable `~/.ssh`; without a home directory it
/// degrades to skipping verification.
pub fn host_key_check(mode: StrictHostKeyChecking) -> HostKeyCheck {
    match mode {
        StrictHostKeyChecking::Yes => HostKeyCheck::Strict,
        StrictHostKeyChecking::No => {
            tracing::debug!("Host key checking disabled");
            HostKeyCheck::Skip
        }
        StrictHostKeyChecking::AcceptNew => {
            let Some(path) = known_hosts_path() else {
                tracing::warn!("No home directory for known_hosts, skipping host key checks");
                return HostKeyCheck::Skip;
            };
            if let Some(dir) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    tracing::warn!("Could not create {:?}: {}", dir, e);
                }
            }
            HostKeyCheck::AcceptNew
        }
    }
}
