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
use crate::preflight::checks::{default_checks, CheckThresholds};
use crate::preflight::{PreflightValidator, ValidationReport};
use crate::report;

/// Run every preflight check and print the report.
pub async fn validate_cluster(ctx: &ClusterContext) -> Result<ValidationReport> {
    println!(
        "{}",
        report::format_header(&format!("Preflight validation of {} node(s)", ctx.nodes.len()))
    );
    let checks = default_checks(CheckThresholds::default());
    let report = PreflightValidator::new(&ctx.executor)
        .run_all(&checks, &ctx.nodes)
        .await;
    println!("{}", report::format_validation_report(&report));
    Ok(report)
}
