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

//! Staged install pipeline.
//!
//! A run walks `NotStarted -> StageInProgress(n) -> StageCompleted(n) -> ...
//! -> AllCompleted`, or ends in `Aborted`. Stage `n + 1` is entered only when
//! stage `n` finished without a critical failure, unless `continue_on_error`
//! is set.

mod runner;
mod stages;
mod types;

pub use runner::StagePipeline;
pub use stages::{bringup_stages, cleanup_stages};
pub use types::{
    CommandRenderer, Criticality, NodeSelector, PipelineOptions, PipelineRun, PipelineState,
    Stage, Step, StepAction, StepOutcome,
};
