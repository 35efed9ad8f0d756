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

//! Terminal rendering of pipeline, validation and snapshot results.

use owo_colors::OwoColorize;
use std::collections::BTreeMap;

use crate::pipeline::{Criticality, PipelineRun, PipelineState, StepOutcome};
use crate::preflight::ValidationReport;
use crate::snapshot::{RollbackReport, SnapshotSummary};

fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(80)
        .min(120)
}

pub fn format_header(title: &str) -> String {
    let width = terminal_width();
    let border = "─".repeat(width);
    format!("{}\n {}\n{}", border.dimmed(), title.cyan().bold(), border.dimmed())
}

fn status_dot(success: bool) -> String {
    if success {
        "●".green().to_string()
    } else {
        "●".red().to_string()
    }
}

fn format_step(outcome: &StepOutcome) -> String {
    let mut output = String::new();
    let label = match outcome.criticality {
        Criticality::Critical => "critical".dimmed().to_string(),
        Criticality::Advisory => "advisory".yellow().to_string(),
    };

    if !outcome.planned.is_empty() {
        output.push_str(&format!(
            "  {} {} ({})\n",
            "○".dimmed(),
            outcome.step.bold(),
            label
        ));
        for (node, action) in &outcome.planned {
            output.push_str(&format!("    {} {}: {}\n", "└".dimmed(), node, action.dimmed()));
        }
        return output;
    }

    let summary = outcome.summary();
    output.push_str(&format!(
        "  {} {:<32} {:>3}/{:<3} ({})\n",
        status_dot(summary.all_succeeded()),
        outcome.step.bold(),
        summary.succeeded.len(),
        summary.total(),
        label
    ));
    for (node, reason) in &summary.failed {
        output.push_str(&format!(
            "    {} {}: {}\n",
            "✗".red(),
            node.red(),
            reason.dimmed()
        ));
    }
    output
}

/// Per-stage pass/fail table followed by the final state.
pub fn format_pipeline_run(run: &PipelineRun) -> String {
    let mut output = String::new();

    if let Some(report) = &run.validation {
        output.push_str(&format_validation_report(report));
        output.push('\n');
    }

    let mut stages: BTreeMap<usize, Vec<&StepOutcome>> = BTreeMap::new();
    for outcome in &run.step_outcomes {
        stages.entry(outcome.stage).or_default().push(outcome);
    }

    for (stage, outcomes) in &stages {
        let title = if run.dry_run {
            format!("Stage {stage} (dry run)")
        } else {
            format!("Stage {stage}")
        };
        output.push_str(&format!("\n{} {}\n", "▶".cyan(), title.bold()));
        for outcome in outcomes {
            output.push_str(&format_step(outcome));
        }
    }

    if !run.snapshots.is_empty() {
        output.push_str(&format!("\n{}\n", "Snapshots taken:".bold()));
        for id in &run.snapshots {
            output.push_str(&format!("  {} {}\n", "•".cyan(), id));
        }
    }

    if !run.unresolved.is_empty() {
        output.push_str(&format!("\n{}\n", "Unresolved critical failures:".red().bold()));
        for reason in &run.unresolved {
            output.push_str(&format!("  {} {}\n", "✗".red(), reason));
        }
    }

    let state = run.state.to_string();
    let state = match (&run.state, run.overall_success) {
        (PipelineState::AllCompleted, true) => state.green().bold().to_string(),
        (PipelineState::AllCompleted, false) => state.yellow().bold().to_string(),
        _ => state.red().bold().to_string(),
    };
    output.push_str(&format!("\n{} {}\n", "Result:".bold(), state));
    output
}

/// Check list with errors, warnings and fix hints.
pub fn format_validation_report(report: &ValidationReport) -> String {
    let mut output = format!("{} {}\n", "▶".cyan(), "Preflight Validation".bold());

    for check in &report.checks {
        let symbol = match (check.passed, check.critical) {
            (true, _) => "●".green().to_string(),
            (false, true) => "●".red().to_string(),
            (false, false) => "●".yellow().to_string(),
        };
        let message = check.message.as_deref().unwrap_or_default();
        output.push_str(&format!("  {} {:<20} {}\n", symbol, check.name.bold(), message));
        if !check.passed {
            for detail in &check.details {
                output.push_str(&format!("    {} {}\n", "└".dimmed(), detail.dimmed()));
            }
            if let Some(hint) = &check.fix_hint {
                output.push_str(&format!("    {} {}\n", "fix:".cyan(), hint));
            }
        }
    }

    let verdict = if report.overall_success {
        "passed".green().bold().to_string()
    } else {
        "failed".red().bold().to_string()
    };
    output.push_str(&format!(
        "\n  Validation {} • {} error(s) • {} warning(s)\n",
        verdict,
        report.errors.len(),
        report.warnings.len()
    ));
    output
}

pub fn format_snapshot_list(snapshots: &[SnapshotSummary]) -> String {
    if snapshots.is_empty() {
        return format!("{}\n", "No snapshots found".dimmed());
    }

    let mut output = format!(
        "{:<36} {:<20} {:>5} {:>5} {:>3}\n",
        "ID".bold(),
        "CREATED".bold(),
        "NODES".bold(),
        "FILES".bold(),
        "DB".bold()
    );
    for snapshot in snapshots {
        let db = if snapshot.has_db {
            "yes".green().to_string()
        } else {
            "no".dimmed().to_string()
        };
        output.push_str(&format!(
            "{:<36} {:<20} {:>5} {:>5} {:>3}",
            snapshot.id,
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.nodes,
            snapshot.files,
            db
        ));
        if snapshot.failures > 0 {
            output.push_str(&format!(
                "  {}",
                format!("{} artifact(s) missing", snapshot.failures).yellow()
            ));
        }
        output.push('\n');
    }
    output
}

pub fn format_rollback_report(report: &RollbackReport) -> String {
    let mut output = format!(
        "{} {} {}\n",
        "▶".cyan(),
        "Rollback of".bold(),
        report.snapshot_id.bold()
    );

    for outcome in &report.outcomes {
        match &outcome.error {
            None => output.push_str(&format!(
                "  {} {}: {}\n",
                "●".green(),
                outcome.node.bold(),
                outcome.artifact
            )),
            Some(error) => output.push_str(&format!(
                "  {} {}: {}\n    {} {}\n",
                "●".red(),
                outcome.node.bold(),
                outcome.artifact,
                "└".dimmed(),
                error.to_string().dimmed()
            )),
        }
    }

    let failed = report.failures().count();
    let mut parts = vec![format!(
        "{} {}",
        report.restored_count().to_string().green().bold(),
        "restored".green()
    )];
    if failed > 0 {
        parts.push(format!("{} {}", failed.to_string().red().bold(), "failed".red()));
    }
    output.push_str(&format!("\n  {}\n", parts.join(" • ")));
    output
}
