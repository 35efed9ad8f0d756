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
use clap::Parser;
use std::time::{Duration, Instant};

use clusterup::{
    cli::{Cli, Commands, SnapshotAction},
    commands::{
        cleanup::cleanup_cluster,
        run::{run_pipeline, RunParams},
        snapshot::{create_snapshot, list_snapshots, rollback_snapshot},
        validate::validate_cluster,
        ClusterContext, Overrides,
    },
    pipeline::PipelineOptions,
    utils::init_logging,
};

/// Format a Duration into a human-readable string
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs_f64();

    if total_seconds < 60.0 {
        format!("{total_seconds:.2} s")
    } else {
        let minutes = duration.as_secs() / 60;
        let seconds = duration.as_secs() % 60;
        format!("{minutes}m {seconds}s")
    }
}

/// Returns whether the command finished without an unresolved critical failure.
async fn dispatch(ctx: &ClusterContext, command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            stage,
            dry_run,
            skip_validation,
            continue_on_error,
            max_workers: _,
        } => {
            let params = RunParams {
                stage,
                options: PipelineOptions {
                    continue_on_error,
                    dry_run,
                    skip_validation,
                },
            };
            Ok(run_pipeline(ctx, params).await?.overall_success)
        }
        Commands::Validate => Ok(validate_cluster(ctx).await?.overall_success),
        Commands::Cleanup { force } => Ok(cleanup_cluster(ctx, force).await?.overall_success),
        Commands::Snapshot { action } => match action {
            SnapshotAction::Create { stage } => {
                create_snapshot(ctx, stage).await?;
                Ok(true)
            }
            SnapshotAction::List => {
                list_snapshots(ctx).await?;
                Ok(true)
            }
            SnapshotAction::Rollback { id } => Ok(rollback_snapshot(ctx, &id).await?.success()),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = Overrides {
        timeout: cli.timeout,
        connect_timeout: cli.connect_timeout,
        max_workers: match &cli.command {
            Commands::Run { max_workers, .. } => *max_workers,
            _ => None,
        },
    };

    let started = Instant::now();
    let ctx = ClusterContext::load(&cli.config, overrides).await?;
    let outcome = dispatch(&ctx, cli.command).await;
    ctx.shutdown().await;
    tracing::info!("Finished in {}", format_duration(started.elapsed()));

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}
