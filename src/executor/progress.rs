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

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

use super::OperationResult;

const PROGRESS_BAR_TICK_RATE_MS: u64 = 80;

pub(crate) fn create_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold} {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷ ")
}

pub(crate) fn format_node_display(node_id: &str) -> String {
    if node_id.chars().count() > 20 {
        let head: String = node_id.chars().take(17).collect();
        format!("{head}...")
    } else {
        node_id.to_string()
    }
}

/// Spinner for one node, or a hidden bar when progress is off.
pub(crate) fn node_spinner(multi: Option<&MultiProgress>, node_id: &str) -> ProgressBar {
    let Some(multi) = multi else {
        return ProgressBar::hidden();
    };
    let pb = multi.add(ProgressBar::new_spinner());
    pb.set_style(create_progress_style());
    pb.set_prefix(format!("[{}]", format_node_display(node_id)));
    pb.set_message(format!("{}", "Queued".dimmed()));
    pb.enable_steady_tick(Duration::from_millis(PROGRESS_BAR_TICK_RATE_MS));
    pb
}

pub(crate) fn finish_spinner(pb: &ProgressBar, result: &OperationResult) {
    match result.failure_reason() {
        None => pb.finish_with_message(format!("{} {}", "●".green(), "Success".green())),
        Some(reason) => {
            let first_line = reason.lines().next().unwrap_or("Unknown error");
            let short_error = if first_line.chars().count() > 50 {
                let head: String = first_line.chars().take(47).collect();
                format!("{head}...")
            } else {
                first_line.to_string()
            };
            pb.finish_with_message(format!("{} {}", "●".red(), short_error.red()));
        }
    }
}
