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
use owo_colors::OwoColorize;

use super::ClusterContext;
use crate::pipeline::{cleanup_stages, PipelineOptions, PipelineRun, StagePipeline};
use crate::report;

/// Tear down scheduler services, packages and uploaded files.
///
/// Without `force` this only prints the plan.
pub async fn cleanup_cluster(ctx: &ClusterContext, force: bool) -> Result<PipelineRun> {
    println!(
        "{}",
        report::format_header(&format!("Cleanup of {} node(s)", ctx.nodes.len()))
    );
    if !force {
        println!(
            "{} {}",
            "⚠".yellow(),
            "Dry run: pass --force to apply the plan below".yellow()
        );
    }

    let options = PipelineOptions {
        continue_on_error: true,
        dry_run: !force,
        skip_validation: true,
    };
    let run = StagePipeline::new(&ctx.executor, &ctx.nodes, options)
        .run(&cleanup_stages(&ctx.config))
        .await;
    println!("{}", report::format_pipeline_run(&run));
    Ok(run)
}
