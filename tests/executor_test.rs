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

//! Fan-out behavior of the parallel executor over the in-memory cluster.

mod common;

use clusterup::error::ClusterError;
use clusterup::executor::{FanOutSummary, OperationResult};
use clusterup::preflight::checks::{memory, ssh_connectivity, sudo_access, time_sync};
use clusterup::preflight::{Check, PreflightValidator};
use common::{cluster_for, executor, topology, FakeNode};
use std::time::Duration;

#[tokio::test]
async fn test_echo_on_three_nodes_with_two_workers() {
    let nodes = topology(2);
    let cluster = cluster_for(&nodes);
    let executor = executor(&cluster, &nodes, 2);

    let results = executor.execute(&nodes, "echo ok").await;

    assert_eq!(results.len(), 3);
    for node in &nodes {
        let result = &results[node.id()];
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "ok");
        assert!(result.is_success());
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_node_gets_exactly_one_entry() {
    let nodes = topology(5);
    let cluster = cluster_for(&nodes);
    cluster.add("cn03", FakeNode::default().unreachable());
    cluster.add("cn04", FakeNode::default().failing("uptime", 2));
    let executor = executor(&cluster, &nodes, 3);

    let results = executor.execute(&nodes, "uptime").await;

    assert_eq!(results.len(), nodes.len());
    for node in &nodes {
        assert_eq!(results[node.id()].node_id, node.id());
    }
    assert!(matches!(
        results["cn03"].error,
        Some(ClusterError::Connection { .. })
    ));
    assert!(matches!(
        results["cn04"].error,
        Some(ClusterError::Execution { exit_code: 2, .. })
    ));
    assert!(results["cn05"].is_success());

    let summary = FanOutSummary::from_results(&results);
    assert_eq!(summary.total(), 6);
    assert_eq!(summary.succeeded.len(), 4);
    assert_eq!(
        summary.failed.keys().cloned().collect::<Vec<_>>(),
        vec!["cn03".to_string(), "cn04".to_string()]
    );
    assert!(summary.failed["cn04"].contains("injected failure"));
}

#[tokio::test(start_paused = true)]
async fn test_max_workers_bounds_concurrent_fan_outs() {
    let nodes = topology(5);
    let cluster = cluster_for(&nodes);
    for node in &nodes {
        cluster.update(node.id(), |fake| fake.latency = Some(Duration::from_millis(100)));
    }
    let executor = executor(&cluster, &nodes, 1);
    let checks: Vec<Box<dyn Check>> = vec![
        Box::new(ssh_connectivity()),
        Box::new(memory(1)),
        Box::new(time_sync()),
    ];

    let report = PreflightValidator::new(&executor).run_all(&checks, &nodes).await;

    assert!(report.overall_success, "{:?}", report.errors);
    assert_eq!(cluster.peak_concurrency(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_uses_all_workers() {
    let nodes = topology(5);
    let cluster = cluster_for(&nodes);
    for node in &nodes {
        cluster.update(node.id(), |fake| fake.latency = Some(Duration::from_millis(100)));
    }
    let executor = executor(&cluster, &nodes, 3);

    let results = executor.execute(&nodes, "uptime").await;

    assert!(results.values().all(OperationResult::is_success));
    assert_eq!(cluster.peak_concurrency(), 3);
}

#[tokio::test]
async fn test_non_zero_exit_is_not_retried() {
    let nodes = topology(1);
    let cluster = cluster_for(&nodes);
    cluster.add("cn01", FakeNode::default().failing("flaky", 1));
    let executor = executor(&cluster, &nodes, 2);

    let results = executor.execute(&nodes, "flaky-command").await;

    assert_eq!(results["cn01"].attempts, 1);
    assert_eq!(
        cluster
            .log("cn01")
            .iter()
            .filter(|c| c.as_str() == "flaky-command")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_panicking_operation_is_isolated() {
    let nodes = topology(2);
    let cluster = cluster_for(&nodes);
    let executor = executor(&cluster, &nodes, 2);

    let results = executor
        .run_on_all(&nodes, |handle, node| async move {
            if node.id() == "cn01" {
                panic!("operation blew up");
            }
            handle.execute("echo ok").await
        })
        .await;

    assert_eq!(results.len(), 3);
    assert!(matches!(
        &results["cn01"].error,
        Some(ClusterError::Internal { reason, .. }) if reason == "panicked"
    ));
    assert!(results["ctl01"].is_success());
    assert!(results["cn02"].is_success());
}

#[tokio::test]
async fn test_connection_is_reused_across_operations() {
    let nodes = topology(1);
    let cluster = cluster_for(&nodes);
    let executor = executor(&cluster, &nodes, 4);

    for _ in 0..3 {
        executor.execute(&nodes, "echo ok").await;
    }

    assert_eq!(cluster.connects("ctl01"), 1);
    assert_eq!(cluster.connects("cn01"), 1);
    executor.pool().close_all().await;
}

#[tokio::test]
async fn test_upload_and_download_round_trip() {
    let nodes = topology(1);
    let cluster = cluster_for(&nodes);
    let executor = executor(&cluster, &nodes, 2);
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("slurm.conf");
    std::fs::write(&local, "ClusterName=test\n").unwrap();

    let uploads = executor.upload(&nodes, &local, "/etc/slurm/slurm.conf").await;
    assert!(uploads.values().all(OperationResult::is_success));
    assert_eq!(
        cluster.node("cn01").files["/etc/slurm/slurm.conf"],
        b"ClusterName=test\n".to_vec()
    );

    let downloads = executor
        .download(&nodes, "/etc/slurm/slurm.conf", &dir.path().join("pulled"))
        .await;
    assert!(downloads.values().all(OperationResult::is_success));
    let pulled = dir
        .path()
        .join("pulled")
        .join("ctl01")
        .join("etc__slurm__slurm.conf");
    assert_eq!(std::fs::read_to_string(pulled).unwrap(), "ClusterName=test\n");
}

#[tokio::test]
async fn test_missing_remote_file_is_a_transfer_error() {
    let nodes = topology(0);
    let cluster = cluster_for(&nodes);
    let executor = executor(&cluster, &nodes, 1);
    let dir = tempfile::tempdir().unwrap();

    let results = executor
        .download(&nodes, "/etc/does-not-exist", dir.path())
        .await;

    let result = &results["ctl01"];
    assert!(matches!(result.error, Some(ClusterError::Transfer { .. })));
    assert_eq!(result.attempts, 1);
    assert!(result.duration < Duration::from_secs(5));
}

#[tokio::test]
async fn test_non_root_login_is_elevated_with_sudo() {
    let mut nodes = topology(1);
    nodes[1].user = "admin".to_string();
    let cluster = cluster_for(&nodes);
    let executor = executor(&cluster, &nodes, 2);
    let computes = &nodes[1..];

    let results = executor.execute(computes, "systemctl restart munge").await;
    assert!(results["cn01"].is_success());
    assert!(cluster.ran("cn01", "sudo -n sh -c 'systemctl restart munge'"));
    assert_eq!(cluster.node("cn01").services.get("munge"), Some(&true));

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("slurm.conf");
    std::fs::write(&local, "ClusterName=test\n").unwrap();
    let uploads = executor.upload(computes, &local, "/etc/slurm/slurm.conf").await;
    assert!(uploads["cn01"].is_success(), "{:?}", uploads["cn01"].error);

    let fake = cluster.node("cn01");
    assert_eq!(fake.files["/etc/slurm/slurm.conf"], b"ClusterName=test\n".to_vec());
    assert_eq!(fake.meta_of("/etc/slurm/slurm.conf").owner, "root");
    assert!(!fake.files.keys().any(|path| path.starts_with("/tmp/")));

    let downloads = executor
        .download(computes, "/etc/slurm/slurm.conf", &dir.path().join("pulled"))
        .await;
    assert!(downloads["cn01"].is_success(), "{:?}", downloads["cn01"].error);
    let pulled = dir
        .path()
        .join("pulled")
        .join("cn01")
        .join("etc__slurm__slurm.conf");
    assert_eq!(std::fs::read_to_string(pulled).unwrap(), "ClusterName=test\n");
    assert!(!cluster.node("cn01").files.keys().any(|path| path.starts_with("/tmp/")));

    // Root logins are never wrapped.
    executor.execute(&nodes[..1], "systemctl restart munge").await;
    assert!(!cluster.ran("ctl01", "sudo"));
}

#[tokio::test]
async fn test_sudo_access_for_root_and_sudoers() {
    let mut nodes = topology(2);
    nodes[1].user = "admin".to_string();
    let cluster = cluster_for(&nodes);
    // Root needs no sudo binary at all.
    cluster.add("ctl01", FakeNode::healthy("ctl01").failing("sudo", 127));
    cluster.add("cn02", FakeNode::healthy("cn02").failing("sudo", 127));
    let executor = executor(&cluster, &nodes, 4);
    let checks: Vec<Box<dyn Check>> = vec![Box::new(sudo_access())];

    let report = PreflightValidator::new(&executor).run_all(&checks, &nodes).await;

    assert!(report.overall_success, "{:?}", report.errors);
    assert!(!cluster.ran("ctl01", "sudo"));
    assert!(cluster.ran("cn01", "sudo -n sh -c true"));
}
