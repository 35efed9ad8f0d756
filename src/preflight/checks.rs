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

//! Built-in preflight checks.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Check, CheckContext, CheckResult};
use crate::executor::OperationResult;
use crate::node::Node;
use crate::os::{detect_os_family, DETECT_OS_COMMAND};

/// Turns one node's command result into a detail line, or a failure reason.
pub type Evaluator = Arc<dyn Fn(&Node, &OperationResult) -> Result<String, String> + Send + Sync>;

/// Minimum resources required by the resource checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckThresholds {
    pub min_disk_gib: u64,
    pub min_memory_mib: u64,
}

impl Default for CheckThresholds {
    fn default() -> Self {
        Self {
            min_disk_gib: 10,
            min_memory_mib: 2048,
        }
    }
}

/// Hostnames must be unique. Runs locally.
pub struct UniqueHostnamesCheck;

#[async_trait]
impl Check for UniqueHostnamesCheck {
    fn name(&self) -> &str {
        "unique_hostnames"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> anyhow::Result<CheckResult> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for node in ctx.nodes {
            *counts.entry(node.id()).or_default() += 1;
        }
        let duplicates: Vec<String> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(host, count)| format!("{host} appears {count} times"))
            .collect();

        if duplicates.is_empty() {
            Ok(CheckResult::pass(
                self.name(),
                true,
                format!("{} unique hostnames", ctx.nodes.len()),
            ))
        } else {
            Ok(
                CheckResult::fail(self.name(), true, "duplicate hostnames in topology")
                    .with_details(duplicates)
                    .with_fix_hint(Some("Give every node a distinct hostname in cluster.yaml")),
            )
        }
    }
}

/// A check that runs one command on every node and evaluates each result.
pub struct CommandCheck {
    name: String,
    critical: bool,
    command: String,
    fix_hint: Option<String>,
    evaluate: Evaluator,
}

impl CommandCheck {
    pub fn new(
        name: impl Into<String>,
        critical: bool,
        command: impl Into<String>,
        evaluate: Evaluator,
    ) -> Self {
        Self {
            name: name.into(),
            critical,
            command: command.into(),
            fix_hint: None,
            evaluate,
        }
    }

    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

#[async_trait]
impl Check for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> anyhow::Result<CheckResult> {
        let results = ctx.executor.execute(ctx.nodes, &self.command).await;

        let mut details = Vec::with_capacity(results.len());
        let mut failed = 0;
        for node in ctx.nodes {
            let Some(result) = results.get(node.id()) else {
                continue;
            };
            let verdict = match result.failure_reason() {
                Some(reason) => Err(reason),
                None => (self.evaluate)(node, result),
            };
            match verdict {
                Ok(detail) => details.push(format!("{}: {}", node.id(), detail)),
                Err(reason) => {
                    failed += 1;
                    details.push(format!("{}: {}", node.id(), reason));
                }
            }
        }

        let total = ctx.nodes.len();
        let result = if failed == 0 {
            CheckResult::pass(&self.name, self.critical, format!("all {total} node(s) passed"))
        } else {
            CheckResult::fail(
                &self.name,
                self.critical,
                format!("{failed} of {total} node(s) failed"),
            )
            .with_fix_hint(self.fix_hint.as_deref())
        };
        Ok(result.with_details(details))
    }
}

fn evaluator<F>(f: F) -> Evaluator
where
    F: Fn(&Node, &OperationResult) -> Result<String, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn ssh_connectivity() -> CommandCheck {
    CommandCheck::new(
        "ssh_connectivity",
        true,
        "echo ok",
        evaluator(|_, result| {
            if result.stdout == "ok" {
                Ok(format!("reachable in {} attempt(s)", result.attempts))
            } else {
                Err(format!("unexpected output '{}'", result.stdout))
            }
        }),
    )
    .with_fix_hint("Check the address, port and credentials, and that sshd is running")
}

pub fn os_supported() -> CommandCheck {
    CommandCheck::new(
        "os_supported",
        true,
        DETECT_OS_COMMAND,
        evaluator(|node, result| match detect_os_family(&result.stdout) {
            Some(family) if family == node.os_family => Ok(format!("{family}")),
            Some(family) => Err(format!(
                "detected {family}, declared {}",
                node.os_family
            )),
            None => Err("unsupported or unrecognized distribution".to_string()),
        }),
    )
    .with_fix_hint("Set os_family to match the node, or use a Debian or RedHat family distribution")
}

/// Root access, either by logging in as root or through passwordless sudo.
///
/// The pool elevates every command for non-root users, so a bare `true`
/// exercises exactly the path later steps take.
pub fn sudo_access() -> CommandCheck {
    CommandCheck::new(
        "sudo_access",
        true,
        "true",
        evaluator(|node, _| {
            if node.needs_sudo() {
                Ok(format!("passwordless sudo for {}", node.user))
            } else {
                Ok("root login".to_string())
            }
        }),
    )
    .with_fix_hint("Grant the SSH user passwordless sudo (NOPASSWD) or connect as root")
}

pub fn disk_space(min_gib: u64) -> CommandCheck {
    CommandCheck::new(
        "disk_space",
        true,
        "df -Pk / | tail -1 | awk '{print $4}'",
        evaluator(move |_, result| {
            let available_kib: u64 = result
                .stdout
                .trim()
                .parse()
                .map_err(|_| format!("could not parse df output '{}'", result.stdout))?;
            let available_gib = available_kib / (1024 * 1024);
            if available_gib >= min_gib {
                Ok(format!("{available_gib} GiB free on /"))
            } else {
                Err(format!("{available_gib} GiB free on /, need {min_gib} GiB"))
            }
        }),
    )
    .with_fix_hint("Free space on the root filesystem")
}

pub fn memory(min_mib: u64) -> CommandCheck {
    CommandCheck::new(
        "memory",
        false,
        "awk '/^MemTotal:/ {print $2}' /proc/meminfo",
        evaluator(move |_, result| {
            let total_kib: u64 = result
                .stdout
                .trim()
                .parse()
                .map_err(|_| format!("could not parse meminfo output '{}'", result.stdout))?;
            let total_mib = total_kib / 1024;
            if total_mib >= min_mib {
                Ok(format!("{total_mib} MiB"))
            } else {
                Err(format!("{total_mib} MiB, recommended {min_mib} MiB"))
            }
        }),
    )
}

pub fn time_sync() -> CommandCheck {
    CommandCheck::new(
        "time_sync",
        false,
        "timedatectl show -p NTPSynchronized --value",
        evaluator(|_, result| {
            if result.stdout.trim() == "yes" {
                Ok("synchronized".to_string())
            } else {
                Err("clock not synchronized".to_string())
            }
        }),
    )
    .with_fix_hint("Install and enable chrony; munge rejects credentials across clock skew")
}

pub fn hostname_matches() -> CommandCheck {
    CommandCheck::new(
        "hostname_matches",
        false,
        "hostname",
        evaluator(|node, result| {
            let actual = result.stdout.trim();
            let short = node.hostname.split('.').next().unwrap_or(&node.hostname);
            if actual == node.hostname || actual == short {
                Ok(actual.to_string())
            } else {
                Err(format!("reports '{actual}', expected '{}'", node.hostname))
            }
        }),
    )
    .with_fix_hint("Run 'hostnamectl set-hostname' so node names match the topology")
}

/// The standard preflight suite.
pub fn default_checks(thresholds: CheckThresholds) -> Vec<Box<dyn Check>> {
    vec![
        Box::new(UniqueHostnamesCheck),
        Box::new(ssh_connectivity()),
        Box::new(os_supported()),
        Box::new(sudo_access()),
        Box::new(disk_space(thresholds.min_disk_gib)),
        Box::new(memory(thresholds.min_memory_mib)),
        Box::new(time_sync()),
        Box::new(hostname_matches()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRole;
    use crate::os::OsFamily;
    use crate::transport::CommandOutput;
    use std::time::Duration;

    fn output(stdout: &str) -> OperationResult {
        OperationResult::from_output("cn01", CommandOutput::success(stdout), 1, Duration::ZERO)
    }

    fn node() -> Node {
        Node::new("cn01.cluster.local", NodeRole::Compute, OsFamily::RedHat)
    }

    #[test]
    fn test_disk_space_threshold() {
        let check = disk_space(10);
        assert!((check.evaluate)(&node(), &output("52428800\n")).is_ok());
        let err = (check.evaluate)(&node(), &output("1048576")).unwrap_err();
        assert!(err.contains("need 10 GiB"));
        assert!((check.evaluate)(&node(), &output("garbage")).is_err());
    }

    #[test]
    fn test_os_supported_compares_declared_family() {
        let check = os_supported();
        assert!((check.evaluate)(&node(), &output("ID=rocky\nID_LIKE=\"rhel\"")).is_ok());
        let err = (check.evaluate)(&node(), &output("ID=ubuntu")).unwrap_err();
        assert_eq!(err, "detected debian, declared redhat");
    }

    #[test]
    fn test_hostname_accepts_short_name() {
        let check = hostname_matches();
        assert!((check.evaluate)(&node(), &output("cn01")).is_ok());
        assert!((check.evaluate)(&node(), &output("localhost")).is_err());
    }

    #[test]
    fn test_default_suite_classification() {
        let checks = default_checks(CheckThresholds::default());
        let advisory: Vec<&str> = checks
            .iter()
            .filter(|c| !c.critical())
            .map(|c| c.name())
            .collect();
        assert_eq!(advisory, vec!["memory", "time_sync", "hostname_matches"]);
        assert_eq!(checks.len(), 8);
    }
}
