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

//! OS capability providers.
//!
//! Pipeline steps never spell out package managers or firewall tools. They ask
//! the [`OsCapability`] for the node's declared [`OsFamily`] to render an
//! idempotent shell command. Adding a family means adding a provider and a
//! match arm in [`capability_for`]; pipeline code is untouched.

mod debian;
mod redhat;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::{NfsMount, ServiceUser};
use crate::utils::shell_quote;

pub use debian::Debian;
pub use redhat::RedHat;

/// Command that prints the OS identification file.
pub const DETECT_OS_COMMAND: &str = "cat /etc/os-release";

/// Supported operating system families.
///
/// Accepts distribution names too, so `ubuntu` or `rocky` work in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OsFamily {
    Debian,
    RedHat,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Debian => write!(f, "debian"),
            OsFamily::RedHat => write!(f, "redhat"),
        }
    }
}

impl FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debian" | "ubuntu" => Ok(OsFamily::Debian),
            "redhat" | "rhel" | "centos" | "rocky" | "almalinux" | "fedora" => {
                Ok(OsFamily::RedHat)
            }
            other => Err(format!("unsupported OS family '{other}'")),
        }
    }
}

impl TryFrom<String> for OsFamily {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OsFamily> for String {
    fn from(family: OsFamily) -> Self {
        family.to_string()
    }
}

/// Logical packages the pipeline needs, mapped per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Package {
    Munge,
    SchedulerController,
    SchedulerCompute,
    SchedulerClient,
    NfsClient,
    TimeSync,
}

/// Renders OS-specific shell commands.
pub trait OsCapability: Send + Sync {
    fn family(&self) -> OsFamily;

    fn package_name(&self, package: Package) -> &'static str;

    fn update_system(&self) -> String;

    fn install_packages(&self, packages: &[&str]) -> String;

    fn remove_packages(&self, packages: &[&str]) -> String;

    /// Prints one installed package name per line.
    fn list_packages(&self) -> String;

    /// Open `ssh_port` before the firewall is enabled, then `ports`.
    fn configure_firewall(&self, ssh_port: u16, ports: &[u16]) -> String;

    fn create_user(&self, user: &ServiceUser) -> String {
        let name = shell_quote(&user.name);
        let mut useradd = String::from("useradd --system --create-home");
        if let Some(uid) = user.uid {
            useradd.push_str(&format!(" --uid {uid}"));
        }
        if let Some(home) = &user.home {
            useradd.push_str(&format!(" --home-dir {}", shell_quote(home)));
        }
        useradd.push_str(" --shell /bin/bash ");
        useradd.push_str(&name);
        format!("id -u {name} >/dev/null 2>&1 || {useradd}")
    }

    fn configure_nfs_client(&self, mount: &NfsMount) -> String {
        let source = format!("{}:{}", mount.server, mount.export);
        let fstab_line = format!(
            "{} {} nfs {} 0 0",
            source,
            mount.mount_point,
            mount.options.as_deref().unwrap_or("defaults,_netdev")
        );
        format!(
            "{install} && mkdir -p {mp} && (grep -qsF {src} /etc/fstab || echo {line} >> /etc/fstab) && (mountpoint -q {mp} || mount {mp})",
            install = self.install_packages(&[self.package_name(Package::NfsClient)]),
            mp = shell_quote(&mount.mount_point),
            src = shell_quote(&source),
            line = shell_quote(&fstab_line),
        )
    }
}

/// Factory keyed by declared OS family.
pub fn capability_for(family: OsFamily) -> Box<dyn OsCapability> {
    match family {
        OsFamily::Debian => Box::new(Debian),
        OsFamily::RedHat => Box::new(RedHat),
    }
}

/// Detect the OS family from `/etc/os-release` contents.
///
/// `ID` is consulted first, then each entry of `ID_LIKE`.
pub fn detect_os_family(os_release: &str) -> Option<OsFamily> {
    let mut id = None;
    let mut id_like = None;

    for line in os_release.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key.trim() {
            "ID" => id = Some(value.to_string()),
            "ID_LIKE" => id_like = Some(value.to_string()),
            _ => {}
        }
    }

    id.iter()
        .chain(id_like.iter())
        .flat_map(|v| v.split_whitespace())
        .find_map(|candidate| candidate.parse().ok())
}
