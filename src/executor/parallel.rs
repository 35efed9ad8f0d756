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

use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar};
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::progress::{finish_spinner, node_spinner};
use super::OperationResult;
use crate::error::ClusterError;
use crate::node::Node;
use crate::pool::{ConnectionPool, NodeHandle};
use crate::utils::flatten_remote_path;

/// Fans operations out across nodes with bounded concurrency.
///
/// Every call returns exactly one [`OperationResult`] per input node, keyed by
/// node id. A node's failure or panic is recorded in its own entry and never
/// affects the others.
///
/// All fan-outs issued through one executor share a single set of
/// `max_workers` permits, including fan-outs running concurrently.
pub struct ParallelExecutor {
    pool: Arc<ConnectionPool>,
    max_workers: usize,
    permits: Arc<Semaphore>,
    show_progress: bool,
}

impl ParallelExecutor {
    pub fn new(pool: Arc<ConnectionPool>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            pool,
            max_workers,
            permits: Arc::new(Semaphore::new(max_workers)),
            show_progress: false,
        }
    }

    /// Draw a spinner per node while operations run.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `op` against every node.
    pub async fn run_on_all<F, Fut>(&self, nodes: &[Node], op: F) -> BTreeMap<String, OperationResult>
    where
        F: Fn(NodeHandle, Node) -> Fut,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        self.fan_out(nodes, "Running...", op).await
    }

    /// Run `op` against every node, collecting an arbitrary per-node value.
    ///
    /// A panicked or cancelled task yields an `Internal` error for its node.
    pub async fn map_nodes<T, F, Fut>(
        &self,
        nodes: &[Node],
        activity: &str,
        op: F,
    ) -> BTreeMap<String, Result<T, ClusterError>>
    where
        T: Send + 'static,
        F: Fn(NodeHandle, Node) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.spawn_all(nodes, activity, op, |pb, _| {
            pb.finish_with_message(format!("{} {}", "●".green(), "Done".green()))
        })
        .await
    }

    async fn fan_out<F, Fut>(
        &self,
        nodes: &[Node],
        activity: &str,
        op: F,
    ) -> BTreeMap<String, OperationResult>
    where
        F: Fn(NodeHandle, Node) -> Fut,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        self.spawn_all(nodes, activity, op, finish_spinner)
            .await
            .into_iter()
            .map(|(node_id, joined)| {
                let result = joined.unwrap_or_else(|error| {
                    OperationResult::failed(&node_id, error, 0, Duration::ZERO)
                });
                (node_id, result)
            })
            .collect()
    }

    async fn spawn_all<T, F, Fut>(
        &self,
        nodes: &[Node],
        activity: &str,
        op: F,
        finish: fn(&ProgressBar, &T),
    ) -> BTreeMap<String, Result<T, ClusterError>>
    where
        T: Send + 'static,
        F: Fn(NodeHandle, Node) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let multi = self.show_progress.then(MultiProgress::new);

        let tasks = nodes.iter().map(|node| {
            let node_id = node.id().to_string();
            let pb = node_spinner(multi.as_ref(), &node_id);
            let semaphore = Arc::clone(&self.permits);
            let activity = activity.to_string();
            let operation = op(self.pool.handle(&node_id), node.clone());

            let task = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                pb.set_message(format!("{}", activity.blue()));
                let value = operation.await;
                finish(&pb, &value);
                value
            });
            async move { (node_id, task.await) }
        });

        join_all(tasks)
            .await
            .into_iter()
            .map(|(node_id, joined)| {
                let value = joined.map_err(|e| {
                    tracing::error!("Task for node {} failed: {}", node_id, e);
                    let reason = if e.is_panic() { "panicked" } else { "cancelled" };
                    ClusterError::Internal {
                        node: node_id.clone(),
                        reason: reason.to_string(),
                    }
                });
                (node_id, value)
            })
            .collect()
    }

    /// Run the same command on every node.
    pub async fn execute(&self, nodes: &[Node], command: &str) -> BTreeMap<String, OperationResult> {
        let command = command.to_string();
        self.fan_out(nodes, "Executing...", |handle, _node| {
            let command = command.clone();
            async move { handle.execute(&command).await }
        })
        .await
    }

    /// Run a command rendered separately for each node.
    pub async fn execute_per_node<R>(&self, nodes: &[Node], render: R) -> BTreeMap<String, OperationResult>
    where
        R: Fn(&Node) -> String,
    {
        self.fan_out(nodes, "Executing...", |handle, node| {
            let command = render(&node);
            async move { handle.execute(&command).await }
        })
        .await
    }

    pub async fn upload(
        &self,
        nodes: &[Node],
        local: &Path,
        remote: &str,
    ) -> BTreeMap<String, OperationResult> {
        let local = local.to_path_buf();
        let remote = remote.to_string();
        self.fan_out(nodes, "Uploading (SFTP)...", |handle, _node| {
            let local = local.clone();
            let remote = remote.clone();
            async move { handle.upload(&local, &remote).await }
        })
        .await
    }

    /// Download `remote` from every node into `local_dir/<node>/<flattened path>`.
    pub async fn download(
        &self,
        nodes: &[Node],
        remote: &str,
        local_dir: &Path,
    ) -> BTreeMap<String, OperationResult> {
        let remote = remote.to_string();
        let file_name = flatten_remote_path(&remote);
        let local_dir = local_dir.to_path_buf();
        self.fan_out(nodes, "Downloading (SFTP)...", |handle, node| {
            let remote = remote.clone();
            let local = local_dir.join(node.id()).join(&file_name);
            async move { handle.download(&remote, &local).await }
        })
        .await
    }
}
