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

use anyhow::Result;

use super::ClusterContext;
use crate::cli::StageSelection;
use crate::pipeline::{bringup_stages, PipelineOptions, PipelineRun, StagePipeline};
use crate::preflight::checks::{default_checks, CheckThresholds};
use crate::report;
use crate::snapshot::SnapshotManager;

#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    pub stage: StageSelection,
    pub options: PipelineOptions,
}

/// Run the selected bring-up stages and print the report.
pub async fn run_pipeline(ctx: &ClusterContext, params: RunParams) -> Result<PipelineRun> {
    let stages: Vec<_> = bringup_stages(&ctx.config)
        .into_iter()
        .filter(|stage| params.stage.includes(stage.index))
        .collect();

    let title = match params.stage {
        StageSelection::All => format!("Bring-up of {} node(s)", ctx.nodes.len()),
        StageSelection::Only(n) => format!("Bring-up stage {n} on {} node(s)", ctx.nodes.len()),
    };
    println!("{}", report::format_header(&title));

    let manager = SnapshotManager::new(
        &ctx.executor,
        &ctx.nodes,
        &ctx.store,
        &ctx.config.snapshot,
    );
    let mut pipeline = StagePipeline::new(&ctx.executor, &ctx.nodes, params.options)
        .with_checks(default_checks(CheckThresholds::default()));
    if ctx.config.snapshot.enabled {
        pipeline = pipeline.with_snapshots(&manager);
    }

    let run = pipeline.run(&stages).await;
    println!("{}", report::format_pipeline_run(&run));
    Ok(run)
}
