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

//! Topology and feature configuration loaded from `cluster.yaml`.

mod loader;
#[cfg(test)]
mod tests;
mod types;
mod utils;

pub use loader::{DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_WORKERS};
pub use types::{
    Config, ConfigUpload, DatabaseBackup, Defaults, Features, FirewallConfig, NfsMount,
    NodeConfig, SchedulerConfig, ServiceUser, SnapshotConfig,
};
pub use utils::{expand_env_vars, expand_tilde};
