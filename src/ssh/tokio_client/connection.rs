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


//! Connection setup and host key verification.

use russh::client::{Config, Handle, Handler};
use russh::keys::known_hosts::{check_known_hosts_path, learn_known_hosts_path};
use russh::keys::PublicKey;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use super::authentication::{authenticate, AuthMethod, HostKeyCheck};
use super::Error;
use crate::ssh::known_hosts::known_hosts_path;

/// An authenticated SSH connection to one host.
///
/// Commands and transfers each open their own channel, so a `Client` can be
/// reused for any number of operations until it is disconnected.
pub struct Client {
    pub(super) connection_handle: Arc<Handle<HostKeyVerifier>>,
    address: SocketAddr,
}

impl Client {
    /// Resolve `host`, connect to the first address that accepts, then
    /// authenticate as `username`.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        auth: AuthMethod,
        host_key_check: HostKeyCheck,
    ) -> Result<Self, Error> {
        let config = Arc::new(Config::default());
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(Error::AddressInvalid)?
            .collect();

        let mut last_error = Error::AddressInvalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{host} did not resolve to any address"),
        ));
        for address in addrs {
            let verifier = HostKeyVerifier {
                host: host.to_string(),
                port,
                check: host_key_check,
                known_hosts: known_hosts_path(),
            };
            match russh::client::connect(config.clone(), address, verifier).await {
                Ok(mut handle) => {
                    authenticate(&mut handle, username, auth).await?;
                    return Ok(Self {
                        connection_handle: Arc::new(handle),
                        address,
                    });
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", address, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_closed(&self) -> bool {
        self.connection_handle.is_closed()
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        self.connection_handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await?;
        Ok(())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// russh handler that applies a [`HostKeyCheck`] to the server key.
#[derive(Debug, Clone)]
pub struct HostKeyVerifier {
    host: String,
    port: u16,
    check: HostKeyCheck,
    known_hosts: Option<PathBuf>,
}

impl HostKeyVerifier {
    fn verify(&self, key: &PublicKey) -> Result<bool, Error> {
        if self.check == HostKeyCheck::Skip {
            return Ok(true);
        }
        let Some(path) = &self.known_hosts else {
            tracing::warn!("No known_hosts file to verify {} against", self.host);
            return Err(Error::ServerCheckFailed);
        };
        let known = |key: &PublicKey| check_known_hosts_path(&self.host, self.port, key, path);
        match self.check {
            HostKeyCheck::Skip => Ok(true),
            HostKeyCheck::Strict => known(key).map_err(|_| Error::ServerCheckFailed),
            HostKeyCheck::AcceptNew => match known(key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    tracing::info!("Recording host key for {} in {:?}", self.host, path);
                    learn_known_hosts_path(&self.host, self.port, key, path)
                        .map_err(|_| Error::ServerCheckFailed)?;
                    Ok(true)
                }
                // Known host, different key.
                Err(_) => Err(Error::ServerCheckFailed),
            },
        }
    }
}

impl Handler for HostKeyVerifier {
    type Error = Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Error> {
        self.verify(server_public_key)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const CN01_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIM4s/IOClk0KY5vsxSPXtOaHhazVC6SkDpcdugmFm/rN";
    const OTHER_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIOL3MTvOv6G6ZJlIwD+nJI1ay0elSdCNtGBmcGNssfzs";

    fn verifier(check: HostKeyCheck, known_hosts: &std::path::Path) -> HostKeyVerifier {
        HostKeyVerifier {
            host: "cn01".to_string(),
            port: 2222,
            check,
            known_hosts: Some(known_hosts.to_path_buf()),
        }
    }

    fn key(base64: &str) -> PublicKey {
        russh::keys::parse_public_key_base64(base64).unwrap()
    }

    #[test]
    fn test_accept_new_records_key_then_rejects_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ssh").join("known_hosts");

        assert!(verifier(HostKeyCheck::AcceptNew, &path)
            .verify(&key(CN01_KEY))
            .unwrap());
        let recorded = std::fs::read_to_string(&path).unwrap();
        assert!(recorded.contains("[cn01]:2222 ssh-ed25519 "));

        assert!(verifier(HostKeyCheck::Strict, &path)
            .verify(&key(CN01_KEY))
            .unwrap());
        assert!(verifier(HostKeyCheck::AcceptNew, &path)
            .verify(&key(OTHER_KEY))
            .is_err());
        assert!(verifier(HostKeyCheck::Strict, &path)
            .verify(&key(OTHER_KEY))
            .is_err());
    }

    #[test]
    fn test_strict_does_not_trust_unknown_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");

        let verdict = verifier(HostKeyCheck::Strict, &path).verify(&key(CN01_KEY));
        assert!(!matches!(verdict, Ok(true)));
        assert!(!path.exists());
        assert!(verifier(HostKeyCheck::Skip, &path)
            .verify(&key(CN01_KEY))
            .unwrap());
    }
}
