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


//! Single-file transfers over the sftp subsystem.

use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::connection::Client;
use super::Error;

impl Client {
    async fn sftp(&self) -> Result<SftpSession, Error> {
        let channel = self.connection_handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        Ok(SftpSession::new(channel.into_stream()).await?)
    }

    /// Copy a local file to `remote`, replacing any existing file.
    pub async fn push_file(&self, local: &Path, remote: &str) -> Result<u64, Error> {
        let mut source = tokio::fs::File::open(local).await?;
        let sftp = self.sftp().await?;
        let mut target = sftp
            .open_with_flags(
                remote,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await?;

        let written = tokio::io::copy(&mut source, &mut target).await?;
        target.shutdown().await?;
        Ok(written)
    }

    /// Copy `remote` to a local path, creating local parent directories.
    pub async fn pull_file(&self, remote: &str, local: &Path) -> Result<u64, Error> {
        let sftp = self.sftp().await?;
        let mut source = sftp.open_with_flags(remote, OpenFlags::READ).await?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut target = tokio::fs::File::create(local).await?;
        let read = tokio::io::copy(&mut source, &mut target).await?;
        target.flush().await?;
        Ok(read)
    }
}
