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

//! Input checks for values that end up in remote shells or connect calls.

use anyhow::{bail, ensure, Result};
use std::net::Ipv6Addr;

const MAX_COMMAND_BYTES: usize = 16 * 1024;
const MAX_HOSTNAME_BYTES: usize = 253;

fn check_length(what: &str, value: &str, max: usize) -> Result<()> {
    ensure!(!value.trim().is_empty(), "{what} must not be empty");
    ensure!(
        value.len() <= max,
        "{what} is {} bytes, limit is {max}",
        value.len()
    );
    Ok(())
}

/// Reject commands a remote shell cannot receive intact.
pub fn sanitize_command(command: &str) -> Result<String> {
    check_length("command", command, MAX_COMMAND_BYTES)?;
    ensure!(!command.contains('\0'), "command contains a NUL byte");
    Ok(command.to_owned())
}

/// Accept DNS names, IPv4 literals and bracketed IPv6 literals.
pub fn sanitize_hostname(hostname: &str) -> Result<String> {
    check_length("hostname", hostname, MAX_HOSTNAME_BYTES)?;

    if let Some(inner) = hostname.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        if inner.parse::<Ipv6Addr>().is_err() {
            bail!("'{hostname}' is not a valid IPv6 literal");
        }
    } else if let Some(bad) = hostname
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
    {
        bail!("hostname '{hostname}' contains '{bad}'");
    }
    Ok(hostname.to_owned())
}

/// Quote a value for POSIX `sh`, wrapping it in single quotes.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,@+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Turn an absolute remote path into a single local file name.
///
/// `/etc/slurm/slurm.conf` becomes `etc__slurm__slurm.conf`.
pub fn flatten_remote_path(remote_path: &str) -> String {
    remote_path
        .trim_start_matches('/')
        .split('/')
        .filter(|part| !part.is_empty() && *part != "..")
        .collect::<Vec<_>>()
        .join("__")
}
