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

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "clusterup",
    version,
    about = "Staged multi-node cluster bring-up over SSH",
    long_about = "clusterup installs and configures a compute cluster over SSH.\nIt validates nodes before touching them, runs a staged install pipeline across all\nnodes in parallel, and snapshots configuration, service state and package lists before\nrisky stages so a failed install can be rolled back.",
    after_help = "EXAMPLES:\n  Validate the topology:        clusterup validate\n  Preview a full install:       clusterup run --dry-run\n  Install the base system only: clusterup run --stage 1\n  List stored snapshots:        clusterup snapshot list\n  Roll back a snapshot:         clusterup snapshot rollback 20250101_120000_000_stage2"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        global = true,
        default_value = "./cluster.yaml",
        env = "CLUSTERUP_CONFIG",
        help = "Cluster topology file"
    )]
    pub config: PathBuf,

    #[arg(
        short = 'v',
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    #[arg(
        long,
        global = true,
        help = "Per-command timeout in seconds [default: config or 300]"
    )]
    pub timeout: Option<u64>,

    #[arg(
        long,
        global = true,
        help = "SSH connection timeout in seconds [default: config or 30]"
    )]
    pub connect_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run the install pipeline",
        long_about = "Runs preflight validation, then the selected install stages.\nStage N+1 only starts when stage N finished without a critical failure.\n\nExit codes: 0 (success), 1 (unresolved critical failure)"
    )]
    Run {
        #[arg(
            long,
            default_value = "all",
            value_parser = parse_stage,
            help = "Stage to run: 1, 2, 3 or all"
        )]
        stage: StageSelection,

        #[arg(long, help = "Print what each step would do without connecting")]
        dry_run: bool,

        #[arg(long, help = "Skip preflight validation")]
        skip_validation: bool,

        #[arg(long, help = "Record critical failures and keep going")]
        continue_on_error: bool,

        #[arg(long, help = "Maximum simultaneous node operations [default: config or 10]")]
        max_workers: Option<usize>,
    },

    #[command(
        about = "Run preflight validation only",
        long_about = "Runs every preflight check and prints the report.\n\nExit codes: 0 (no critical failure), 1 (critical failure)"
    )]
    Validate,

    #[command(
        about = "Tear down a prior install",
        long_about = "Stops scheduler services, removes scheduler packages and uploaded config files.\nWithout --force only the plan is printed."
    )]
    Cleanup {
        #[arg(long, help = "Actually apply the cleanup")]
        force: bool,
    },

    #[command(about = "Create, list and roll back snapshots")]
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SnapshotAction {
    #[command(about = "Capture current state of every node")]
    Create {
        #[arg(long, help = "Tag the snapshot with a stage number")]
        stage: Option<usize>,
    },

    #[command(about = "List stored snapshots, newest first")]
    List,

    #[command(about = "Restore a stored snapshot")]
    Rollback {
        #[arg(help = "Snapshot id as shown by 'snapshot list'")]
        id: String,
    },
}

/// Which stages `run` executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSelection {
    All,
    Only(usize),
}

impl StageSelection {
    pub fn includes(&self, index: usize) -> bool {
        match self {
            StageSelection::All => true,
            StageSelection::Only(n) => *n == index,
        }
    }
}

fn parse_stage(value: &str) -> Result<StageSelection, String> {
    match value {
        "all" => Ok(StageSelection::All),
        "1" | "2" | "3" => value
            .parse()
            .map(StageSelection::Only)
            .map_err(|e| format!("invalid stage '{value}': {e}")),
        _ => Err(format!("invalid stage '{value}' (expected 1, 2, 3 or all)")),
    }
}
