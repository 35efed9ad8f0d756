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

use std::collections::BTreeMap;

use super::types::{
    PipelineOptions, PipelineRun, PipelineState, Stage, Step, StepAction, StepOutcome,
};
use crate::executor::{OperationResult, ParallelExecutor};
use crate::node::Node;
use crate::preflight::{Check, PreflightValidator};
use crate::snapshot::SnapshotManager;

/// Drives stages over the node set.
pub struct StagePipeline<'a> {
    executor: &'a ParallelExecutor,
    nodes: &'a [Node],
    snapshots: Option<&'a SnapshotManager<'a>>,
    checks: Vec<Box<dyn Check>>,
    options: PipelineOptions,
}

impl<'a> StagePipeline<'a> {
    pub fn new(executor: &'a ParallelExecutor, nodes: &'a [Node], options: PipelineOptions) -> Self {
        Self {
            executor,
            nodes,
            snapshots: None,
            checks: Vec::new(),
            options,
        }
    }

    /// Snapshot before stages flagged `snapshot_before`.
    pub fn with_snapshots(mut self, manager: &'a SnapshotManager<'a>) -> Self {
        self.snapshots = Some(manager);
        self
    }

    /// Preflight checks gating entry into the first stage.
    pub fn with_checks(mut self, checks: Vec<Box<dyn Check>>) -> Self {
        self.checks = checks;
        self
    }

    pub async fn run(&self, stages: &[Stage]) -> PipelineRun {
        let mut run = PipelineRun::new(self.options);

        if !self.preflight(&mut run).await {
            return run;
        }

        for stage in stages {
            if !run.can_enter(stage.index) {
                let reason = format!(
                    "stage {} did not complete successfully",
                    run.current_stage.unwrap_or_default()
                );
                tracing::warn!("Not entering stage {}: {}", stage.index, reason);
                run.state = PipelineState::Aborted {
                    stage: stage.index,
                    reason,
                };
                break;
            }
            self.run_stage(stage, &mut run).await;
            if run.state.is_terminal() {
                break;
            }
        }

        if !run.state.is_terminal() {
            run.state = PipelineState::AllCompleted;
        }
        run.overall_success =
            run.state == PipelineState::AllCompleted && run.unresolved.is_empty();
        tracing::info!("Pipeline finished: {}", run.state);
        run
    }

    /// Returns false when the run must not start.
    async fn preflight(&self, run: &mut PipelineRun) -> bool {
        if self.options.skip_validation || self.options.dry_run || self.checks.is_empty() {
            return true;
        }

        tracing::info!("Running {} preflight check(s)", self.checks.len());
        let report = PreflightValidator::new(self.executor)
            .run_all(&self.checks, self.nodes)
            .await;
        let passed = report.overall_success;
        if !passed {
            run.state = PipelineState::Aborted {
                stage: 0,
                reason: format!("preflight failed: {}", report.errors.join("; ")),
            };
        }
        run.validation = Some(report);
        passed
    }

    async fn run_stage(&self, stage: &Stage, run: &mut PipelineRun) {
        tracing::info!("Entering stage {}: {}", stage.index, stage.name);
        run.state = PipelineState::StageInProgress(stage.index);
        run.current_stage = Some(stage.index);

        if stage.snapshot_before && !self.options.dry_run {
            if let Some(manager) = self.snapshots {
                let tag = format!("stage{}", stage.index);
                match manager.create_snapshot(&tag).await {
                    Ok(snapshot) => run.snapshots.push(snapshot.id),
                    Err(e) => {
                        let reason = format!("snapshot before stage {} failed: {e:#}", stage.index);
                        if !self.fail_critical(run, stage.index, reason) {
                            return;
                        }
                    }
                }
            }
        }

        for step in &stage.steps {
            let outcome = self.run_step(stage.index, step).await;
            let success = outcome.success();
            let failed_nodes: Vec<String> = outcome.summary().failed.into_keys().collect();
            run.step_outcomes.push(outcome);

            if success {
                continue;
            }
            if step.is_critical() {
                let reason = format!("step '{}' failed on {}", step.name, failed_nodes.join(", "));
                if !self.fail_critical(run, stage.index, reason) {
                    return;
                }
            } else {
                tracing::warn!(
                    "Advisory step '{}' failed on {}",
                    step.name,
                    failed_nodes.join(", ")
                );
            }
        }

        run.state = PipelineState::StageCompleted(stage.index);
        tracing::info!("Stage {} completed", stage.index);
    }

    /// Record a critical failure. Returns whether the stage continues.
    fn fail_critical(&self, run: &mut PipelineRun, stage: usize, reason: String) -> bool {
        if self.options.continue_on_error {
            tracing::warn!("{} (continuing)", reason);
            run.unresolved.push(reason);
            true
        } else {
            tracing::error!("{}", reason);
            run.state = PipelineState::Aborted { stage, reason };
            false
        }
    }

    async fn run_step(&self, stage: usize, step: &Step) -> StepOutcome {
        let targets = step.target.select(self.nodes);
        let mut outcome = StepOutcome {
            stage,
            step: step.name.clone(),
            criticality: step.criticality,
            results: BTreeMap::new(),
            planned: BTreeMap::new(),
        };

        if self.options.dry_run {
            outcome.planned = targets
                .iter()
                .map(|node| (node.id().to_string(), step.action.describe(node)))
                .collect();
            return outcome;
        }

        tracing::info!("Running step '{}' on {} node(s)", step.name, targets.len());
        outcome.results = self.dispatch(&step.action, &targets).await;

        for pass in 1..=step.retries {
            let failed: Vec<Node> = targets
                .iter()
                .filter(|n| outcome.results.get(n.id()).is_some_and(|r| !r.is_success()))
                .cloned()
                .collect();
            if failed.is_empty() {
                break;
            }
            tracing::info!(
                "Retrying step '{}' on {} node(s) (pass {}/{})",
                step.name,
                failed.len(),
                pass,
                step.retries
            );
            outcome.results.extend(self.dispatch(&step.action, &failed).await);
        }
        outcome
    }

    async fn dispatch(&self, action: &StepAction, targets: &[Node]) -> BTreeMap<String, OperationResult> {
        match action {
            StepAction::Command(command) => self.executor.execute(targets, command).await,
            StepAction::PerNode(render) => {
                self.executor
                    .execute_per_node(targets, |node| render(node))
                    .await
            }
            StepAction::Upload { local, remote } => {
                self.executor.upload(targets, local, remote).await
            }
        }
    }
}
