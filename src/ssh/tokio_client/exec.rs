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


//! Remote command execution over a session channel.

use russh::ChannelMsg;

use super::connection::Client;
use super::Error;

/// Output of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// Unix exit status of the remote shell.
    pub exit_status: u32,
}

/// Collects channel messages until the channel closes.
#[derive(Default)]
struct ExecCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl ExecCollector {
    fn absorb(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(&data),
            // Extended data type 1 is stderr.
            ChannelMsg::ExtendedData { data, ext: 1 } => self.stderr.extend_from_slice(&data),
            // May arrive before the final data packets.
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            _ => {}
        }
    }

    fn finish(self) -> Result<ExecResult, Error> {
        let exit_status = self.exit_status.ok_or(Error::CommandDidntExit)?;
        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_status,
        })
    }
}

impl Client {
    /// Run `command` in a fresh remote shell.
    ///
    /// Nothing carries over between calls and stdin is never attached.
    pub async fn run_command(&self, command: &str) -> Result<ExecResult, Error> {
        let command = crate::utils::sanitize_command(command)
            .map_err(|e| Error::CommandValidationFailed(e.to_string()))?;

        let mut channel = self.connection_handle.channel_open_session().await?;
        channel.exec(true, command.as_str()).await?;

        let mut collector = ExecCollector::default();
        while let Some(msg) = channel.wait().await {
            collector.absorb(msg);
        }
        collector.finish()
    }
}
