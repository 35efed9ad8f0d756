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

//! In-memory cluster used by the integration tests.
//!
//! Each fake node has a file system, systemd-like service states, an
//! installed package list and a database blob. Commands are interpreted by a
//! tiny shell that understands `&&`, `||`, parentheses, `>` and `<`, plus the
//! handful of utilities the pipeline and snapshot code emit. Anything else
//! succeeds silently.
//!
//! Files carry a mode, owner and group. `sudo -n sh -c` runs its argument as
//! root; everything else runs as the login user.

#![allow(dead_code)]

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clusterup::config::Config;
use clusterup::executor::ParallelExecutor;
use clusterup::node::{Node, NodeRole};
use clusterup::os::OsFamily;
use clusterup::pool::{ConnectionPool, PoolConfig};
use clusterup::retry::RetryPolicy;
use clusterup::transport::{CommandOutput, RemoteSession, Transport, TransportError};

pub const DUMP_COMMAND: &str = "dump-db";
pub const RESTORE_COMMAND: &str = "restore-db";

pub const DEFAULT_MODE: &str = "644";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub mode: String,
    pub owner: String,
    pub group: String,
}

impl FileMeta {
    pub fn new(mode: &str, owner: &str, group: &str) -> Self {
        Self {
            mode: mode.to_string(),
            owner: owner.to_string(),
            group: group.to_string(),
        }
    }

    fn owned_by(user: &str) -> Self {
        Self::new(DEFAULT_MODE, user, user)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    pub files: BTreeMap<String, Vec<u8>>,
    /// Files without an entry are `644 root root`.
    pub meta: BTreeMap<String, FileMeta>,
    pub services: BTreeMap<String, bool>,
    pub packages: Vec<String>,
    pub database: String,
    pub unreachable: bool,
    pub reject_auth: bool,
    /// Commands containing the pattern exit with the given status.
    pub failures: Vec<(String, u32)>,
    /// Canned stdout for exact commands.
    pub responses: BTreeMap<String, String>,
    /// Commands containing the pattern never finish.
    pub hangs: Vec<String>,
    /// Every command takes this long.
    pub latency: Option<Duration>,
    /// `sudo -n` asks for a password.
    pub sudo_denied: bool,
    pub log: Vec<String>,
}

impl FakeNode {
    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.as_bytes().to_vec());
        self
    }

    pub fn with_service(mut self, name: &str, running: bool) -> Self {
        self.services.insert(name.to_string(), running);
        self
    }

    pub fn with_owned_file(mut self, path: &str, contents: &str, meta: FileMeta) -> Self {
        self.files.insert(path.to_string(), contents.as_bytes().to_vec());
        self.meta.insert(path.to_string(), meta);
        self
    }

    pub fn hanging(mut self, pattern: &str) -> Self {
        self.hangs.push(pattern.to_string());
        self
    }

    pub fn slow(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn sudo_denied(mut self) -> Self {
        self.sudo_denied = true;
        self
    }

    pub fn meta_of(&self, path: &str) -> FileMeta {
        self.meta
            .get(path)
            .cloned()
            .unwrap_or_else(|| FileMeta::owned_by("root"))
    }

    pub fn failing(mut self, pattern: &str, status: u32) -> Self {
        self.failures.push((pattern.to_string(), status));
        self
    }

    pub fn responding(mut self, command: &str, stdout: &str) -> Self {
        self.responses.insert(command.to_string(), stdout.to_string());
        self
    }

    /// A node that passes every built-in preflight check.
    pub fn healthy(hostname: &str) -> Self {
        FakeNode::default()
            .with_file("/etc/os-release", "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n")
            .responding("df -Pk / | tail -1 | awk '{print $4}'", "52428800")
            .responding("awk '/^MemTotal:/ {print $2}' /proc/meminfo", "16384000")
            .responding("timedatectl show -p NTPSynchronized --value", "yes")
            .responding("hostname", hostname)
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

/// Commands in flight across the whole cluster.
#[derive(Debug, Default)]
struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight(Arc<Concurrency>);

impl InFlight {
    fn enter(counter: &Arc<Concurrency>) -> Self {
        let now = counter.current.fetch_add(1, Ordering::SeqCst) + 1;
        counter.peak.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    nodes: Arc<Mutex<HashMap<String, FakeNode>>>,
    connects: Arc<Mutex<HashMap<String, u32>>>,
    concurrency: Arc<Concurrency>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hostname: &str, node: FakeNode) {
        let mut node = node;
        if node.packages.is_empty() {
            node.packages = vec!["bash".to_string(), "openssh-server".to_string()];
        }
        self.nodes
            .lock()
            .unwrap()
            .insert(hostname.to_string(), node);
    }

    pub fn node(&self, hostname: &str) -> FakeNode {
        self.nodes.lock().unwrap()[hostname].clone()
    }

    pub fn update<F: FnOnce(&mut FakeNode)>(&self, hostname: &str, f: F) {
        let mut nodes = self.nodes.lock().unwrap();
        f(nodes.get_mut(hostname).unwrap());
    }

    pub fn connects(&self, hostname: &str) -> u32 {
        self.connects
            .lock()
            .unwrap()
            .get(hostname)
            .copied()
            .unwrap_or(0)
    }

    /// Every command executed on `hostname`, in order.
    pub fn log(&self, hostname: &str) -> Vec<String> {
        self.node(hostname).log
    }

    pub fn ran(&self, hostname: &str, pattern: &str) -> bool {
        self.log(hostname).iter().any(|c| c.contains(pattern))
    }

    /// Highest number of commands that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.concurrency.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeCluster {
    async fn connect(&self, node: &Node) -> Result<Box<dyn RemoteSession>, TransportError> {
        *self
            .connects
            .lock()
            .unwrap()
            .entry(node.id().to_string())
            .or_default() += 1;

        let nodes = self.nodes.lock().unwrap();
        match nodes.get(node.id()) {
            None => Err(TransportError::Connect(format!(
                "failed to resolve {}",
                node.endpoint()
            ))),
            Some(fake) if fake.unreachable => Err(TransportError::Connect(format!(
                "connection refused by {}",
                node.endpoint()
            ))),
            Some(fake) if fake.reject_auth => {
                Err(TransportError::Auth("permission denied (publickey)".to_string()))
            }
            Some(_) => Ok(Box::new(FakeSession {
                hostname: node.id().to_string(),
                user: node.user.clone(),
                nodes: Arc::clone(&self.nodes),
                concurrency: Arc::clone(&self.concurrency),
            })),
        }
    }
}

struct FakeSession {
    hostname: String,
    user: String,
    nodes: Arc<Mutex<HashMap<String, FakeNode>>>,
    concurrency: Arc<Concurrency>,
}

const SUDO_PREFIX: &str = "sudo -n sh -c ";

/// Strip `sudo -n sh -c '<script>'` down to the script.
fn elevated_script(command: &str) -> Option<String> {
    let quoted = command.strip_prefix(SUDO_PREFIX)?;
    match quoted.strip_prefix('\'').and_then(|q| q.strip_suffix('\'')) {
        Some(inner) => Some(inner.replace(r"'\''", "'")),
        None => Some(quoted.to_string()),
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn execute(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
        let _in_flight = InFlight::enter(&self.concurrency);
        let (script, acting_user) = match elevated_script(command) {
            Some(script) => (script, "root".to_string()),
            None => (command.to_string(), self.user.clone()),
        };

        let (hangs, latency) = {
            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes
                .get_mut(&self.hostname)
                .ok_or_else(|| TransportError::Disconnected("node vanished".to_string()))?;
            node.log.push(command.to_string());
            let hangs = node.hangs.iter().any(|p| script.contains(p.as_str()));
            (hangs, node.latency)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(&self.hostname)
            .ok_or_else(|| TransportError::Disconnected("node vanished".to_string()))?;
        if command.starts_with(SUDO_PREFIX) && node.sudo_denied {
            return Ok(fail(1, "sudo: a password is required"));
        }
        if let Some((_, status)) = node.failures.iter().find(|(p, _)| script.contains(p.as_str())) {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!("injected failure: {script}"),
                exit_status: *status,
            });
        }
        if let Some(stdout) = node.responses.get(&script) {
            return Ok(ok(stdout.clone()));
        }
        Ok(run_script(node, &acting_user, &script))
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let contents = std::fs::read(local)
            .map_err(|e| TransportError::Remote(format!("{}: {e}", local.display())))?;
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(&self.hostname)
            .ok_or_else(|| TransportError::Disconnected("node vanished".to_string()))?;
        if self.user != "root" && !remote.starts_with("/tmp/") {
            return Err(TransportError::Remote(format!(
                "{remote}: permission denied for {}",
                self.user
            )));
        }
        node.files.insert(remote.to_string(), contents);
        node.meta
            .insert(remote.to_string(), FileMeta::owned_by(&self.user));
        Ok(())
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let contents = {
            let nodes = self.nodes.lock().unwrap();
            let node = nodes
                .get(&self.hostname)
                .ok_or_else(|| TransportError::Disconnected("node vanished".to_string()))?;
            let contents = node
                .files
                .get(remote)
                .cloned()
                .ok_or_else(|| TransportError::Remote(format!("no such file: {remote}")))?;
            let meta = node.meta_of(remote);
            if self.user != "root" && meta.owner != self.user && meta.mode.ends_with('0') {
                return Err(TransportError::Remote(format!(
                    "{remote}: permission denied for {}",
                    self.user
                )));
            }
            contents
        };
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TransportError::Remote(e.to_string()))?;
        }
        std::fs::write(local, contents).map_err(|e| TransportError::Remote(e.to_string()))
    }

    async fn close(&mut self) {}
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput::success(stdout)
}

fn fail(status: u32, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.into(),
        exit_status: status,
    }
}

fn run_script(node: &mut FakeNode, user: &str, script: &str) -> CommandOutput {
    let mut stdout = String::new();
    for segment in script.split(" && ") {
        let segment = segment.trim().trim_start_matches('(').trim_end_matches(')');
        let mut last = fail(1, "empty");
        for alternative in segment.split(" || ") {
            last = run_simple(node, user, alternative.trim());
            if last.exit_status == 0 {
                break;
            }
        }
        stdout.push_str(&last.stdout);
        if last.exit_status != 0 {
            return CommandOutput { stdout, ..last };
        }
    }
    ok(stdout)
}

fn tokens(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;
    for c in command.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                started = true;
            }
            ' ' if !quoted => {
                if started {
                    out.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            _ => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        out.push(current);
    }
    out
}

fn run_simple(node: &mut FakeNode, user: &str, command: &str) -> CommandOutput {
    if let Some((left, path)) = command.split_once(" > ") {
        let output = run_simple(node, user, left.trim());
        if output.exit_status == 0 {
            let path = tokens(path).concat();
            node.files.insert(path, output.stdout.into_bytes());
            return ok("");
        }
        return output;
    }
    if let Some((left, path)) = command.split_once(" < ") {
        let path = tokens(path).concat();
        let Some(input) = node.files.get(&path).cloned() else {
            return fail(1, format!("{path}: No such file or directory"));
        };
        if left.trim() == RESTORE_COMMAND {
            node.database = String::from_utf8_lossy(&input).to_string();
            return ok("");
        }
        return run_simple(node, user, left.trim());
    }

    let args = tokens(command);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] => ok(""),
        ["true"] | ["umask", _] => ok(""),
        ["echo", rest @ ..] => ok(format!("{}\n", rest.join(" "))),
        [DUMP_COMMAND] => ok(node.database.clone()),
        ["test", "-e", path] => {
            if node.files.contains_key(*path) {
                ok("")
            } else {
                fail(1, "")
            }
        }
        ["cat", path] => match node.files.get(*path) {
            Some(contents) => ok(String::from_utf8_lossy(contents).to_string()),
            None => fail(1, format!("cat: {path}: No such file or directory")),
        },
        ["sha256sum", path] => match node.files.get(*path) {
            Some(contents) => ok(format!("{:x}  {}\n", Sha256::digest(contents), path)),
            None => fail(1, format!("sha256sum: {path}: No such file or directory")),
        },
        ["stat", "-c", "%a %U %G", path] => {
            if !node.files.contains_key(*path) {
                return fail(1, format!("stat: cannot statx '{path}'"));
            }
            let meta = node.meta_of(path);
            ok(format!("{} {} {}\n", meta.mode, meta.owner, meta.group))
        }
        ["mv", "-f", from, to] => match node.files.remove(*from) {
            Some(contents) => {
                let meta = node.meta_of(from);
                node.meta.remove(*from);
                node.files.insert(to.to_string(), contents);
                node.meta.insert(to.to_string(), meta);
                ok("")
            }
            None => fail(1, format!("mv: cannot stat '{from}'")),
        },
        ["cp", "-f", from, to] => match node.files.get(*from).cloned() {
            Some(contents) => {
                // An existing target keeps its mode and owner.
                if !node.files.contains_key(*to) {
                    node.meta.insert(to.to_string(), FileMeta::owned_by(user));
                }
                node.files.insert(to.to_string(), contents);
                ok("")
            }
            None => fail(1, format!("cp: cannot stat '{from}'")),
        },
        ["rm", "-f", paths @ ..] => {
            for path in paths {
                node.files.remove(*path);
                node.meta.remove(*path);
            }
            ok("")
        }
        ["chown", owner, path] => {
            if !node.files.contains_key(*path) {
                return fail(1, format!("chown: cannot access '{path}'"));
            }
            let mut meta = node.meta_of(path);
            match owner.split_once(':') {
                Some((owner, group)) => {
                    meta.owner = owner.to_string();
                    meta.group = group.to_string();
                }
                None => meta.owner = owner.to_string(),
            }
            node.meta.insert(path.to_string(), meta);
            ok("")
        }
        ["chmod", mode, path] => {
            if !node.files.contains_key(*path) {
                return fail(1, format!("chmod: cannot access '{path}'"));
            }
            let mut meta = node.meta_of(path);
            meta.mode = mode.to_string();
            node.meta.insert(path.to_string(), meta);
            ok("")
        }
        ["mkdir", "-p", ..] | ["chown", ..] | ["chmod", ..] => ok(""),
        ["systemctl", "is-active", "--quiet", service] => {
            if node.services.get(*service).copied().unwrap_or(false) {
                ok("")
            } else {
                fail(3, "")
            }
        }
        ["systemctl", "stop", service] | ["systemctl", "disable", "--now", service] => {
            if let Some(running) = node.services.get_mut(*service) {
                *running = false;
            }
            ok("")
        }
        ["systemctl", "restart" | "start", service] => {
            node.services.insert(service.to_string(), true);
            ok("")
        }
        ["systemctl", "enable", _] => ok(""),
        ["dpkg-query", ..] | ["rpm", "-qa", ..] => ok(node.packages.join("\n")),
        _ => ok(""),
    }
}

/// Nodes `ctl01` (controller) and `cn01..cn{computes}`.
pub fn topology(computes: usize) -> Vec<Node> {
    let mut nodes = vec![Node::new("ctl01", NodeRole::Controller, OsFamily::Debian)];
    nodes.extend(
        (1..=computes).map(|i| Node::new(format!("cn{i:02}"), NodeRole::Compute, OsFamily::Debian)),
    );
    nodes
}

/// A fake cluster with every node of `nodes` reachable.
pub fn cluster_for(nodes: &[Node]) -> FakeCluster {
    let cluster = FakeCluster::new();
    for node in nodes {
        cluster.add(node.id(), FakeNode::healthy(node.id()));
    }
    cluster
}

pub fn pool_config() -> PoolConfig {
    PoolConfig {
        connect_timeout: Duration::from_secs(5),
        command_timeout: Duration::from_secs(30),
        retry: RetryPolicy::default(),
    }
}

pub fn executor(cluster: &FakeCluster, nodes: &[Node], max_workers: usize) -> ParallelExecutor {
    let pool = ConnectionPool::new(nodes, Arc::new(cluster.clone()), pool_config());
    ParallelExecutor::new(Arc::new(pool), max_workers)
}

/// Config for the default stages with the snapshot store under `snapshot_dir`.
pub fn config_yaml(snapshot_dir: &Path, with_database: bool) -> Config {
    let database = if with_database {
        format!(
            "  database:\n    dump_command: {DUMP_COMMAND}\n    restore_command: {RESTORE_COMMAND}\n"
        )
    } else {
        String::new()
    };
    let yaml = format!(
        r#"
defaults:
  user: root
  max_workers: 4
nodes:
  - hostname: ctl01
    role: controller
    os_family: ubuntu
  - hostname: cn01
    role: compute
    os_family: debian
  - hostname: cn02
    role: compute
    os_family: debian
features:
  base_packages: [curl]
  service_user:
    name: slurm
snapshot:
  directory: {}
  config_paths:
    - /etc/slurm/slurm.conf
    - /etc/hosts
  services: [munge, slurmctld, slurmd]
{}"#,
        snapshot_dir.display(),
        database
    );
    Config::from_yaml(&yaml).unwrap()
}
