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

//! Parallel preflight validation.
//!
//! Checks are independent; each one is classified critical or advisory. A
//! failing critical check makes the report unsuccessful, an advisory one only
//! adds a warning.

pub mod checks;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

use crate::executor::ParallelExecutor;
use crate::node::Node;

pub use checks::{
    default_checks, CheckThresholds, CommandCheck, Evaluator, UniqueHostnamesCheck,
};

/// Outcome of one check across the node set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub critical: bool,
    pub passed: bool,
    /// One line per node or finding.
    pub details: Vec<String>,
    pub message: Option<String>,
    pub fix_hint: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, critical: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            critical,
            passed: true,
            details: Vec::new(),
            message: Some(message.into()),
            fix_hint: None,
        }
    }

    pub fn fail(name: impl Into<String>, critical: bool, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::pass(name, critical, message)
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_fix_hint(mut self, hint: Option<&str>) -> Self {
        self.fix_hint = hint.map(str::to_string);
        self
    }
}

/// Everything a check may use.
pub struct CheckContext<'a> {
    pub nodes: &'a [Node],
    pub executor: &'a ParallelExecutor,
}

#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &str;

    fn critical(&self) -> bool;

    /// An `Err` is reported as this check failing.
    async fn run(&self, ctx: &CheckContext<'_>) -> anyhow::Result<CheckResult>;
}

/// Aggregated validation outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
    pub overall_success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for check in checks.iter().filter(|c| !c.passed) {
            let line = match &check.message {
                Some(message) => format!("{}: {}", check.name, message),
                None => check.name.clone(),
            };
            if check.critical {
                errors.push(line);
            } else {
                warnings.push(line);
            }
        }
        Self {
            overall_success: errors.is_empty(),
            checks,
            errors,
            warnings,
        }
    }

    pub fn failed_critical(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.critical && !c.passed)
    }
}

/// Runs checks concurrently against a node set.
pub struct PreflightValidator<'a> {
    executor: &'a ParallelExecutor,
}

impl<'a> PreflightValidator<'a> {
    pub fn new(executor: &'a ParallelExecutor) -> Self {
        Self { executor }
    }

    pub async fn run_all(&self, checks: &[Box<dyn Check>], nodes: &[Node]) -> ValidationReport {
        let ctx = CheckContext {
            nodes,
            executor: self.executor,
        };

        let runs = checks.iter().map(|check| {
            let ctx = &ctx;
            async move {
                tracing::debug!("Running preflight check {}", check.name());
                let outcome = AssertUnwindSafe(check.run(ctx)).catch_unwind().await;
                match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        tracing::warn!("Check {} errored: {:#}", check.name(), e);
                        CheckResult::fail(check.name(), check.critical(), format!("{e:#}"))
                    }
                    Err(_) => {
                        tracing::error!("Check {} panicked", check.name());
                        CheckResult::fail(check.name(), check.critical(), "check panicked")
                    }
                }
            }
        });

        let report = ValidationReport::from_checks(join_all(runs).await);
        tracing::info!(
            "Preflight finished: {} check(s), {} error(s), {} warning(s)",
            report.checks.len(),
            report.errors.len(),
            report.warnings.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, critical: bool, passed: bool) -> CheckResult {
        if passed {
            CheckResult::pass(name, critical, "ok")
        } else {
            CheckResult::fail(name, critical, "bad")
        }
    }

    #[test]
    fn test_critical_failure_fails_report() {
        let report = ValidationReport::from_checks(vec![
            result("ssh_connectivity", true, false),
            result("memory", false, false),
            result("time_sync", false, false),
        ]);
        assert!(!report.overall_success);
        assert_eq!(report.errors, vec!["ssh_connectivity: bad".to_string()]);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(report.failed_critical().count(), 1);
    }

    #[test]
    fn test_advisory_failures_only_warn() {
        let report = ValidationReport::from_checks(vec![
            result("ssh_connectivity", true, true),
            result("memory", false, false),
            result("time_sync", false, false),
        ]);
        assert!(report.overall_success);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 2);
    }
}
