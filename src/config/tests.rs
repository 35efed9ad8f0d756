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

use serial_test::serial;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::Config;
use super::utils::{expand_env_vars, expand_tilde};
use crate::node::{Credential, NodeRole};
use crate::os::OsFamily;
use crate::ssh::StrictHostKeyChecking;

const SAMPLE: &str = r#"
defaults:
  user: admin
  ssh_key: /keys/cluster
  max_workers: 4
  max_retries: 5
  retry_base_delay_ms: 250
  strict_host_key_checking: "no"

nodes:
  - hostname: ctl01
    address: 10.0.0.10
    role: controller
    os_family: ubuntu
  - hostname: cn01
    os_family: rocky
    port: 2222
    user: ops
    hardware:
      cpus: 64
      memory_mb: 262144
  - hostname: cn02
    os_family: debian
    use_agent: true

features:
  base_packages: [vim, curl]
  service_user:
    name: slurm
    uid: 64030
  nfs:
    server: storage01
    export: /export/home
    mount_point: /home

snapshot:
  directory: /var/lib/clusterup/snapshots
  database:
    dump_command: mysqldump --all-databases
    restore_command: mysql
"#;

#[test]
#[serial]
fn test_expand_env_vars() {
    std::env::set_var("CLUSTERUP_TEST_VAR", "test_value");

    assert_eq!(
        expand_env_vars("Hello ${CLUSTERUP_TEST_VAR}!"),
        "Hello test_value!"
    );
    assert_eq!(
        expand_env_vars("${CLUSTERUP_NONEXISTENT}"),
        "${CLUSTERUP_NONEXISTENT}"
    );
    assert_eq!(expand_env_vars("cost: ${ 5"), "cost: ${ 5");
    assert_eq!(expand_env_vars("no variables here"), "no variables here");

    std::env::remove_var("CLUSTERUP_TEST_VAR");
}

#[test]
#[serial]
fn test_expand_tilde() {
    let original_home = std::env::var("HOME").ok();
    std::env::set_var("HOME", "/home/user");

    let expanded = expand_tilde(Path::new("~/.ssh/config"));

    match original_home {
        Some(home) => std::env::set_var("HOME", home),
        None => std::env::remove_var("HOME"),
    }

    assert_eq!(expanded, PathBuf::from("/home/user/.ssh/config"));
    assert_eq!(expand_tilde(Path::new("/etc/hosts")), PathBuf::from("/etc/hosts"));
}

#[test]
fn test_config_parsing() {
    let config = Config::from_yaml(SAMPLE).unwrap();

    assert_eq!(config.nodes.len(), 3);
    assert_eq!(config.max_workers(), 4);
    assert_eq!(config.retry_policy().max_attempts, 5);
    assert_eq!(config.retry_policy().base_delay, Duration::from_millis(250));
    assert_eq!(config.strict_mode(), StrictHostKeyChecking::No);
    assert_eq!(config.features.base_packages, vec!["vim", "curl"]);
    assert_eq!(
        config.snapshot_dir(),
        PathBuf::from("/var/lib/clusterup/snapshots")
    );
    assert!(config.snapshot.database.as_ref().unwrap().enabled);
    // Defaults survive a partial snapshot section.
    assert!(config.snapshot.config_paths.contains(&"/etc/hosts".to_string()));
    assert!(config.features.firewall.enabled);
}

#[test]
fn test_build_nodes_applies_defaults() {
    let config = Config::from_yaml(SAMPLE).unwrap();
    let nodes = config.build_nodes().unwrap();

    let ctl = &nodes[0];
    assert_eq!(ctl.role, NodeRole::Controller);
    assert_eq!(ctl.os_family, OsFamily::Debian);
    assert_eq!(ctl.connect_host(), "10.0.0.10");
    assert_eq!(ctl.user, "admin");
    assert_eq!(ctl.port, 22);
    assert!(matches!(&ctl.credential, Credential::KeyFile { path, .. } if path == Path::new("/keys/cluster")));

    let cn01 = &nodes[1];
    assert_eq!(cn01.role, NodeRole::Compute);
    assert_eq!(cn01.os_family, OsFamily::RedHat);
    assert_eq!(cn01.endpoint(), "cn01:2222");
    assert_eq!(cn01.user, "ops");
    assert_eq!(cn01.hardware.cpus, Some(64));

    assert_eq!(nodes[2].credential, Credential::Agent);
}

#[test]
fn test_duplicate_hostnames_rejected() {
    let yaml = r#"
nodes:
  - hostname: cn01
    os_family: debian
  - hostname: cn01
    os_family: debian
"#;
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("Duplicate hostname 'cn01'"));
}

#[test]
fn test_invalid_topology_rejected() {
    assert!(Config::from_yaml("nodes: []").is_err());

    let bad_host = r#"
nodes:
  - hostname: "cn01;reboot"
    os_family: debian
"#;
    assert!(Config::from_yaml(bad_host).is_err());

    let bad_os = r#"
nodes:
  - hostname: cn01
    os_family: windows
"#;
    assert!(Config::from_yaml(bad_os).is_err());
}

#[test]
#[serial]
fn test_password_from_environment() {
    let yaml = r#"
nodes:
  - hostname: cn01
    os_family: debian
    password: "${CLUSTERUP_TEST_PW}"
"#;
    let config = Config::from_yaml(yaml).unwrap();

    std::env::remove_var("CLUSTERUP_TEST_PW");
    assert!(config.build_nodes().is_err());

    std::env::set_var("CLUSTERUP_TEST_PW", "s3cret");
    let nodes = config.build_nodes().unwrap();
    std::env::remove_var("CLUSTERUP_TEST_PW");

    match &nodes[0].credential {
        Credential::Password(pw) => assert_eq!(pw.as_str(), "s3cret"),
        other => panic!("Expected password credential, got {other:?}"),
    }
}

#[tokio::test]
async fn test_load_missing_file_fails() {
    let err = Config::load(Path::new("/nonexistent/cluster.yaml"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to read configuration file"));
}
