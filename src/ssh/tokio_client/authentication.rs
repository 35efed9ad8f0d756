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


//! Client authentication against a connected handle.

use russh::client::{Handle, Handler};
use russh::keys::PrivateKeyWithHashAlg;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

use super::Error;

/// Credential presented to the server after the key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(Zeroizing<String>),
    KeyFile {
        path: PathBuf,
        passphrase: Option<Zeroizing<String>>,
    },
    /// Every identity held by the agent at `SSH_AUTH_SOCK`.
    #[cfg(not(target_os = "windows"))]
    Agent,
}

impl AuthMethod {
    pub fn with_password(password: &str) -> Self {
        Self::Password(Zeroizing::new(password.to_string()))
    }

    pub fn with_key_file(path: impl AsRef<Path>, passphrase: Option<&str>) -> Self {
        Self::KeyFile {
            path: path.as_ref().to_path_buf(),
            passphrase: passphrase.map(|p| Zeroizing::new(p.to_string())),
        }
    }
}

/// How the server's host key is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKeyCheck {
    /// Trust whatever key the server presents.
    Skip,
    /// The key must already be in `~/.ssh/known_hosts`.
    Strict,
    /// Record unknown keys in `~/.ssh/known_hosts`, reject changed ones.
    AcceptNew,
}

pub(super) async fn authenticate<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    auth: AuthMethod,
) -> Result<(), Error> {
    match auth {
        AuthMethod::Password(password) => with_password(handle, username, &password).await,
        AuthMethod::KeyFile { path, passphrase } => {
            with_key_file(handle, username, &path, passphrase.as_deref().map(String::as_str))
                .await
        }
        #[cfg(not(target_os = "windows"))]
        AuthMethod::Agent => with_agent(handle, username).await,
    }
}

async fn with_password<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    password: &str,
) -> Result<(), Error> {
    let outcome = handle.authenticate_password(username, password).await?;
    if outcome.success() {
        Ok(())
    } else {
        Err(Error::PasswordWrong)
    }
}

async fn with_key_file<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    path: &Path,
    passphrase: Option<&str>,
) -> Result<(), Error> {
    let key = russh::keys::load_secret_key(path, passphrase).map_err(Error::KeyInvalid)?;
    let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
    let outcome = handle
        .authenticate_publickey(username, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
        .await?;
    if outcome.success() {
        Ok(())
    } else {
        Err(Error::KeyAuthFailed)
    }
}

#[cfg(not(target_os = "windows"))]
async fn with_agent<H: Handler>(handle: &mut Handle<H>, username: &str) -> Result<(), Error> {
    let mut agent = russh::keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|_| Error::AgentConnectionFailed)?;
    let identities = agent
        .request_identities()
        .await
        .map_err(|_| Error::AgentRequestIdentitiesFailed)?;
    if identities.is_empty() {
        return Err(Error::AgentNoIdentities);
    }

    let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
    for identity in identities {
        match handle
            .authenticate_publickey_with(username, identity, hash_alg, &mut agent)
            .await
        {
            Ok(outcome) if outcome.success() => return Ok(()),
            Ok(_) => {}
            Err(e) => tracing::debug!("Agent identity rejected: {:?}", e),
        }
    }
    Err(Error::AgentAuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_file_keeps_passphrase() {
        match AuthMethod::with_key_file("/keys/id_ed25519", Some("pass")) {
            AuthMethod::KeyFile { path, passphrase } => {
                assert_eq!(path, PathBuf::from("/keys/id_ed25519"));
                assert_eq!(passphrase.as_deref().map(String::as_str), Some("pass"));
            }
            _ => panic!("Expected KeyFile auth method"),
        }
    }

    #[test]
    fn test_password_method() {
        assert_eq!(
            AuthMethod::with_password("secret"),
            AuthMethod::Password(Zeroizing::new("secret".to_string()))
        );
    }
}
