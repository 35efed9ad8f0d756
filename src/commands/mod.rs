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

//! Subcommand implementations.
//!
//! Each command runs against a [`ClusterContext`] built once per invocation.
//! Nothing here is global: the pool, executor and snapshot store are owned by
//! the context and closed through [`ClusterContext::shutdown`].

pub mod cleanup;
pub mod run;
pub mod snapshot;
pub mod validate;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::executor::ParallelExecutor;
use crate::node::Node;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::snapshot::SnapshotStore;
use crate::ssh::SshTransport;
use crate::transport::Transport;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
    pub max_workers: Option<usize>,
}

/// Everything a command needs for one invocation.
pub struct ClusterContext {
    pub config: Config,
    pub nodes: Vec<Node>,
    pub executor: ParallelExecutor,
    pub store: SnapshotStore,
}

impl ClusterContext {
    /// Load the topology at `path` and talk to it over SSH.
    pub async fn load(path: &Path, overrides: Overrides) -> Result<Self> {
        let config = Config::load(path).await?;
        let transport = Arc::new(SshTransport::new(config.strict_mode()));
        let context = Self::with_transport(config, transport, overrides)?;
        Ok(Self {
            executor: context.executor.with_progress(true),
            ..context
        })
    }

    /// Build a context over an arbitrary transport.
    pub fn with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
        overrides: Overrides,
    ) -> Result<Self> {
        let nodes = config.build_nodes()?;
        let pool_config = PoolConfig {
            connect_timeout: overrides
                .connect_timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.connect_timeout()),
            command_timeout: overrides
                .timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.command_timeout()),
            retry: config.retry_policy(),
        };
        let max_workers = overrides.max_workers.unwrap_or_else(|| config.max_workers());
        tracing::debug!(
            "Using {} node(s), max_workers={}, {:?}",
            nodes.len(),
            max_workers,
            pool_config
        );

        let pool = Arc::new(ConnectionPool::new(&nodes, transport, pool_config));
        let store = SnapshotStore::new(config.snapshot_dir());
        Ok(Self {
            executor: ParallelExecutor::new(pool, max_workers),
            nodes,
            store,
            config,
        })
    }

    /// Close every node connection.
    pub async fn shutdown(&self) {
        self.executor.pool().close_all().await;
    }
}
