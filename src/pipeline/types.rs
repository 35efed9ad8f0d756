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
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::executor::{FanOutSummary, OperationResult};
use crate::node::{Node, NodeRole};
use crate::preflight::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure aborts the stage unless `continue_on_error` is set.
    Critical,
    /// Failure is recorded and never aborts.
    Advisory,
}

/// Which nodes a step runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelector {
    All,
    Controllers,
    Computes,
    Hosts(Vec<String>),
}

impl NodeSelector {
    pub fn select(&self, nodes: &[Node]) -> Vec<Node> {
        nodes
            .iter()
            .filter(|node| match self {
                NodeSelector::All => true,
                NodeSelector::Controllers => node.role == NodeRole::Controller,
                NodeSelector::Computes => node.role == NodeRole::Compute,
                NodeSelector::Hosts(hosts) => hosts.iter().any(|h| h == node.id()),
            })
            .cloned()
            .collect()
    }
}

pub type CommandRenderer = Arc<dyn Fn(&Node) -> String + Send + Sync>;

#[derive(Clone)]
pub enum StepAction {
    /// Same command on every target.
    Command(String),
    /// Command rendered per node, e.g. from its OS family.
    PerNode(CommandRenderer),
    Upload { local: PathBuf, remote: String },
}

impl StepAction {
    pub fn per_node<F>(render: F) -> Self
    where
        F: Fn(&Node) -> String + Send + Sync + 'static,
    {
        StepAction::PerNode(Arc::new(render))
    }

    /// What the step would do on `node`.
    pub fn describe(&self, node: &Node) -> String {
        match self {
            StepAction::Command(command) => command.clone(),
            StepAction::PerNode(render) => render(node),
            StepAction::Upload { local, remote } => {
                format!("upload {} -> {}", local.display(), remote)
            }
        }
    }
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Command(command) => f.debug_tuple("Command").field(command).finish(),
            StepAction::PerNode(_) => write!(f, "PerNode(<renderer>)"),
            StepAction::Upload { local, remote } => f
                .debug_struct("Upload")
                .field("local", local)
                .field("remote", remote)
                .finish(),
        }
    }
}

/// One idempotent unit of work.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub criticality: Criticality,
    pub target: NodeSelector,
    pub action: StepAction,
    /// Extra passes over the nodes that failed.
    pub retries: u32,
}

impl Step {
    pub fn new(name: impl Into<String>, target: NodeSelector, action: StepAction) -> Self {
        Self {
            name: name.into(),
            criticality: Criticality::Critical,
            target,
            action,
            retries: 0,
        }
    }

    pub fn advisory(mut self) -> Self {
        self.criticality = Criticality::Advisory;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.criticality == Criticality::Critical
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    /// 1-based.
    pub index: usize,
    pub name: String,
    pub steps: Vec<Step>,
    pub snapshot_before: bool,
}

impl Stage {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            steps: Vec::new(),
            snapshot_before: false,
        }
    }

    pub fn with_snapshot(mut self) -> Self {
        self.snapshot_before = true;
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    StageInProgress(usize),
    StageCompleted(usize),
    AllCompleted,
    /// Stage 0 means preflight.
    Aborted { stage: usize, reason: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::AllCompleted | PipelineState::Aborted { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::NotStarted => write!(f, "not started"),
            PipelineState::StageInProgress(n) => write!(f, "stage {n} in progress"),
            PipelineState::StageCompleted(n) => write!(f, "stage {n} completed"),
            PipelineState::AllCompleted => write!(f, "all stages completed"),
            PipelineState::Aborted { stage: 0, reason } => {
                write!(f, "aborted before stage 1: {reason}")
            }
            PipelineState::Aborted { stage, reason } => {
                write!(f, "aborted in stage {stage}: {reason}")
            }
        }
    }
}

/// What happened to one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub stage: usize,
    pub step: String,
    pub criticality: Criticality,
    pub results: BTreeMap<String, OperationResult>,
    /// Dry run: node -> action that would run.
    pub planned: BTreeMap<String, String>,
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        self.results.values().all(OperationResult::is_success)
    }

    pub fn summary(&self) -> FanOutSummary {
        FanOutSummary::from_results(&self.results)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub continue_on_error: bool,
    pub dry_run: bool,
    pub skip_validation: bool,
}

/// Record of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub current_stage: Option<usize>,
    pub step_outcomes: Vec<StepOutcome>,
    pub overall_success: bool,
    pub continue_on_error: bool,
    pub dry_run: bool,
    /// Ids of snapshots taken during the run.
    pub snapshots: Vec<String>,
    pub validation: Option<ValidationReport>,
    /// Critical failures recorded under `continue_on_error`.
    pub unresolved: Vec<String>,
}

impl PipelineRun {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            state: PipelineState::NotStarted,
            current_stage: None,
            step_outcomes: Vec::new(),
            overall_success: false,
            continue_on_error: options.continue_on_error,
            dry_run: options.dry_run,
            snapshots: Vec::new(),
            validation: None,
            unresolved: Vec::new(),
        }
    }

    pub fn outcomes_for_stage(&self, stage: usize) -> impl Iterator<Item = &StepOutcome> {
        self.step_outcomes.iter().filter(move |o| o.stage == stage)
    }

    /// Whether stage `index` may start now.
    ///
    /// The previous stage of this run must have completed without an
    /// unresolved critical failure, unless `continue_on_error` is set.
    pub fn can_enter(&self, index: usize) -> bool {
        match &self.state {
            PipelineState::NotStarted => true,
            PipelineState::StageCompleted(prev) if *prev < index => {
                self.continue_on_error || self.stage_succeeded(*prev)
            }
            _ => false,
        }
    }

    pub fn stage_succeeded(&self, stage: usize) -> bool {
        self.outcomes_for_stage(stage)
            .filter(|o| o.criticality == Criticality::Critical)
            .all(StepOutcome::success)
    }
}
