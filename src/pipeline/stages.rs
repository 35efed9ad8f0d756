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

//! Default bring-up and cleanup stages built from the cluster config.

use std::path::Path;

use super::types::{NodeSelector, Stage, Step, StepAction};
use crate::config::{expand_tilde, Config};
use crate::node::{Node, NodeRole};
use crate::os::{capability_for, Package};
use crate::utils::shell_quote;

const MUNGE_KEY_PATH: &str = "/etc/munge/munge.key";

fn scheduler_packages(node: &Node) -> Vec<Package> {
    match node.role {
        NodeRole::Controller => vec![Package::SchedulerController, Package::SchedulerClient],
        NodeRole::Compute => vec![Package::SchedulerCompute],
    }
}

fn daemon_for(role: NodeRole) -> &'static str {
    match role {
        NodeRole::Controller => "slurmctld",
        NodeRole::Compute => "slurmd",
    }
}

fn remote_parent(path: &str) -> Option<&str> {
    path.rsplit_once('/')
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

/// Stages 1 to 3 of a cluster bring-up.
pub fn bringup_stages(config: &Config) -> Vec<Stage> {
    vec![
        base_system_stage(config),
        scheduler_install_stage(config),
        services_stage(),
    ]
}

fn base_system_stage(config: &Config) -> Stage {
    let features = &config.features;
    let mut stage = Stage::new(1, "Base system")
        .step(
            Step::new(
                "update_system",
                NodeSelector::All,
                StepAction::per_node(|node| capability_for(node.os_family).update_system()),
            )
            .advisory(),
        );

    let base_packages = features.base_packages.clone();
    stage = stage.step(
        Step::new(
            "install_base_packages",
            NodeSelector::All,
            StepAction::per_node(move |node| {
                let cap = capability_for(node.os_family);
                let mut packages: Vec<&str> = base_packages.iter().map(String::as_str).collect();
                packages.push(cap.package_name(Package::TimeSync));
                cap.install_packages(&packages)
            }),
        )
        .with_retries(1),
    );

    if let Some(user) = features.service_user.clone() {
        stage = stage.step(Step::new(
            "create_service_user",
            NodeSelector::All,
            StepAction::per_node(move |node| capability_for(node.os_family).create_user(&user)),
        ));
    }

    if features.firewall.enabled {
        let ports = features.firewall.ports.clone();
        stage = stage.step(
            Step::new(
                "configure_firewall",
                NodeSelector::All,
                StepAction::per_node(move |node| {
                    capability_for(node.os_family).configure_firewall(node.port, &ports)
                }),
            )
            .advisory(),
        );
    }

    if let Some(mount) = features.nfs.clone() {
        stage = stage.step(Step::new(
            "configure_nfs_client",
            NodeSelector::All,
            StepAction::per_node(move |node| {
                capability_for(node.os_family).configure_nfs_client(&mount)
            }),
        ));
    }

    stage
}

fn scheduler_install_stage(config: &Config) -> Stage {
    let scheduler = &config.features.scheduler;
    let extra = scheduler.extra_packages.clone();
    let mut stage = Stage::new(2, "Scheduler install")
        .with_snapshot()
        .step(
            Step::new(
                "install_scheduler_packages",
                NodeSelector::All,
                StepAction::per_node(move |node| {
                    let cap = capability_for(node.os_family);
                    let mut packages = vec![cap.package_name(Package::Munge)];
                    packages.extend(scheduler_packages(node).into_iter().map(|p| cap.package_name(p)));
                    packages.extend(extra.iter().map(String::as_str));
                    cap.install_packages(&packages)
                }),
            )
            .with_retries(1),
        );

    let mut dirs: Vec<&str> = scheduler
        .config_files
        .iter()
        .filter_map(|upload| remote_parent(&upload.remote))
        .collect();
    if scheduler.munge_key.is_some() {
        dirs.push("/etc/munge");
    }
    dirs.sort_unstable();
    dirs.dedup();
    if !dirs.is_empty() {
        let quoted: Vec<String> = dirs.iter().map(|d| shell_quote(d)).collect();
        stage = stage.step(Step::new(
            "create_config_dirs",
            NodeSelector::All,
            StepAction::Command(format!("mkdir -p {}", quoted.join(" "))),
        ));
    }

    for upload in &scheduler.config_files {
        stage = stage.step(Step::new(
            format!("upload {}", upload.remote),
            NodeSelector::All,
            StepAction::Upload {
                local: expand_tilde(Path::new(&upload.local)),
                remote: upload.remote.clone(),
            },
        ));
    }

    if let Some(key) = &scheduler.munge_key {
        let remote = shell_quote(MUNGE_KEY_PATH);
        stage = stage
            .step(Step::new(
                "distribute_munge_key",
                NodeSelector::All,
                StepAction::Upload {
                    local: expand_tilde(Path::new(key)),
                    remote: MUNGE_KEY_PATH.to_string(),
                },
            ))
            .step(Step::new(
                "secure_munge_key",
                NodeSelector::All,
                StepAction::Command(format!(
                    "chown munge:munge {remote} && chmod 400 {remote}"
                )),
            ));
    }

    stage
}

fn services_stage() -> Stage {
    Stage::new(3, "Services")
        .with_snapshot()
        .step(Step::new(
            "start_munge",
            NodeSelector::All,
            StepAction::Command("systemctl enable munge && systemctl restart munge".to_string()),
        ))
        .step(Step::new(
            "start_controller_daemon",
            NodeSelector::Controllers,
            StepAction::Command(
                "systemctl enable slurmctld && systemctl restart slurmctld".to_string(),
            ),
        ))
        .step(Step::new(
            "start_compute_daemon",
            NodeSelector::Computes,
            StepAction::Command("systemctl enable slurmd && systemctl restart slurmd".to_string()),
        ))
        .step(
            Step::new(
                "verify_daemons",
                NodeSelector::All,
                StepAction::per_node(|node| {
                    format!(
                        "systemctl is-active --quiet munge && systemctl is-active --quiet {}",
                        daemon_for(node.role)
                    )
                }),
            )
            .with_retries(2),
        )
        .step(
            Step::new(
                "scheduler_reachable",
                NodeSelector::Controllers,
                StepAction::Command("sinfo -h".to_string()),
            )
            .advisory(),
        )
}

/// Teardown of a prior install.
pub fn cleanup_stages(config: &Config) -> Vec<Stage> {
    let scheduler = &config.features.scheduler;
    let extra = scheduler.extra_packages.clone();
    let mut stage = Stage::new(1, "Cleanup")
        .step(
            Step::new(
                "stop_services",
                NodeSelector::All,
                StepAction::per_node(|node| {
                    let daemon = daemon_for(node.role);
                    format!(
                        "(systemctl disable --now {daemon} || true) && (systemctl disable --now munge || true)"
                    )
                }),
            )
            .advisory(),
        )
        .step(Step::new(
            "remove_scheduler_packages",
            NodeSelector::All,
            StepAction::per_node(move |node| {
                let cap = capability_for(node.os_family);
                let mut packages: Vec<&str> = scheduler_packages(node)
                    .into_iter()
                    .map(|p| cap.package_name(p))
                    .collect();
                packages.push(cap.package_name(Package::Munge));
                packages.extend(extra.iter().map(String::as_str));
                cap.remove_packages(&packages)
            }),
        ));

    let mut files: Vec<String> = scheduler
        .config_files
        .iter()
        .map(|upload| shell_quote(&upload.remote))
        .collect();
    if scheduler.munge_key.is_some() {
        files.push(shell_quote(MUNGE_KEY_PATH));
    }
    if !files.is_empty() {
        stage = stage.step(Step::new(
            "remove_config_files",
            NodeSelector::All,
            StepAction::Command(format!("rm -f {}", files.join(" "))),
        ));
    }

    vec![stage]
}
