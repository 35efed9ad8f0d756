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

use super::{OsCapability, OsFamily, Package};
use crate::utils::shell_quote;

/// RHEL, Rocky, AlmaLinux and Fedora hosts (dnf, firewalld).
#[derive(Debug, Clone, Copy, Default)]
pub struct RedHat;

impl OsCapability for RedHat {
    fn family(&self) -> OsFamily {
        OsFamily::RedHat
    }

    fn package_name(&self, package: Package) -> &'static str {
        match package {
            Package::Munge => "munge",
            Package::SchedulerController => "slurm-slurmctld",
            Package::SchedulerCompute => "slurm-slurmd",
            Package::SchedulerClient => "slurm",
            Package::NfsClient => "nfs-utils",
            Package::TimeSync => "chrony",
        }
    }

    fn update_system(&self) -> String {
        "dnf -y makecache && dnf -y upgrade".to_string()
    }

    fn install_packages(&self, packages: &[&str]) -> String {
        let names: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        format!("dnf -y install {}", names.join(" "))
    }

    fn remove_packages(&self, packages: &[&str]) -> String {
        let names: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        format!("dnf -y remove {}", names.join(" "))
    }

    fn list_packages(&self) -> String {
        "rpm -qa --qf '%{NAME}\\n'".to_string()
    }

    fn configure_firewall(&self, ssh_port: u16, ports: &[u16]) -> String {
        let mut parts = vec![
            "(rpm -q firewalld >/dev/null 2>&1 || dnf -y install firewalld)".to_string(),
            // Offline rules apply before firewalld first starts.
            format!("firewall-offline-cmd --add-port={ssh_port}/tcp"),
            "systemctl enable --now firewalld".to_string(),
            format!("firewall-cmd --permanent --add-port={ssh_port}/tcp"),
        ];
        parts.extend(
            ports
                .iter()
                .filter(|port| **port != ssh_port)
                .map(|port| format!("firewall-cmd --permanent --add-port={port}/tcp")),
        );
        parts.push("firewall-cmd --reload".to_string());
        parts.join(" && ")
    }
}
