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

const APT: &str = "DEBIAN_FRONTEND=noninteractive apt-get";

/// Debian and Ubuntu hosts (apt, ufw).
#[derive(Debug, Clone, Copy, Default)]
pub struct Debian;

impl OsCapability for Debian {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn package_name(&self, package: Package) -> &'static str {
        match package {
            Package::Munge => "munge",
            Package::SchedulerController => "slurmctld",
            Package::SchedulerCompute => "slurmd",
            Package::SchedulerClient => "slurm-client",
            Package::NfsClient => "nfs-common",
            Package::TimeSync => "chrony",
        }
    }

    fn update_system(&self) -> String {
        format!("{APT} update -y && {APT} upgrade -y")
    }

    fn install_packages(&self, packages: &[&str]) -> String {
        let names: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        format!("{APT} install -y {}", names.join(" "))
    }

    fn remove_packages(&self, packages: &[&str]) -> String {
        let names: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        format!("{APT} remove -y {}", names.join(" "))
    }

    fn list_packages(&self) -> String {
        "dpkg-query -W -f='${Package}\\n'".to_string()
    }

    fn configure_firewall(&self, ssh_port: u16, ports: &[u16]) -> String {
        let mut parts = vec![
            format!("(command -v ufw >/dev/null 2>&1 || {APT} install -y ufw)"),
            format!("ufw allow {ssh_port}/tcp"),
        ];
        parts.extend(
            ports
                .iter()
                .filter(|port| **port != ssh_port)
                .map(|port| format!("ufw allow {port}/tcp")),
        );
        parts.push("ufw --force enable".to_string());
        parts.join(" && ")
    }
}
