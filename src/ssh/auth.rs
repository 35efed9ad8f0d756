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

//! Resolution of node credentials into an SSH authentication method.

use directories::BaseDirs;
use std::path::{Path, PathBuf};

use super::tokio_client::AuthMethod;
use crate::node::Credential;

/// Key files tried, in order, for [`Credential::DefaultKeys`].
const DEFAULT_KEY_NAMES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// Turn a node credential into something the SSH client can use.
///
/// Never prompts: clusterup runs unattended, so encrypted keys need their
/// passphrase in the configuration.
pub fn resolve_auth_method(credential: &Credential) -> Result<AuthMethod, String> {
    match credential {
        Credential::Password(password) => {
            tracing::debug!("Using password authentication");
            Ok(AuthMethod::Password(password.clone()))
        }
        Credential::KeyFile { path, passphrase } => {
            key_file_auth(path, passphrase.as_ref().map(|p| p.as_str()))
        }
        Credential::Agent => agent_auth(),
        Credential::DefaultKeys => default_key_auth(),
    }
}

#[cfg(not(target_os = "windows"))]
fn agent_auth() -> Result<AuthMethod, String> {
    if std::env::var("SSH_AUTH_SOCK").is_ok() {
        tracing::debug!("Using SSH agent for authentication");
        Ok(AuthMethod::Agent)
    } else {
        Err("SSH agent requested but SSH_AUTH_SOCK is not set".to_string())
    }
}

#[cfg(target_os = "windows")]
fn agent_auth() -> Result<AuthMethod, String> {
    Err("SSH agent authentication is not supported on Windows".to_string())
}

fn key_file_auth(key_path: &Path, passphrase: Option<&str>) -> Result<AuthMethod, String> {
    if !key_path.is_file() {
        return Err(format!("SSH key file not found: {}", key_path.display()));
    }
    tracing::debug!("Authenticating with key: {:?}", key_path);
    Ok(AuthMethod::with_key_file(key_path, passphrase))
}

fn ssh_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh"))
}

fn default_key_auth() -> Result<AuthMethod, String> {
    let ssh_dir = ssh_dir().ok_or("could not determine home directory")?;
    DEFAULT_KEY_NAMES
        .iter()
        .map(|name| ssh_dir.join(name))
        .find(|path| path.is_file())
        .map(|path| {
            tracing::debug!("Using default key: {:?}", path);
            AuthMethod::with_key_file(path, None)
        })
        .ok_or_else(|| {
            format!(
                "no credential configured and no default key ({}) in {}",
                DEFAULT_KEY_NAMES.join(", "),
                ssh_dir.display()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;
    use zeroize::Zeroizing;

    #[test]
    fn test_key_file_must_exist() {
        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("test_key");

        let credential = Credential::KeyFile {
            path: key_path.clone(),
            passphrase: None,
        };
        assert!(resolve_auth_method(&credential).is_err());

        std::fs::write(&key_path, "fake key content").unwrap();
        match resolve_auth_method(&credential).unwrap() {
            AuthMethod::KeyFile { path, .. } => {
                assert_eq!(path, key_path);
            }
            _ => panic!("Expected KeyFile auth method"),
        }
    }

    #[test]
    fn test_password_passes_through() {
        let credential = Credential::Password(Zeroizing::new("pw".to_string()));
        assert_eq!(
            resolve_auth_method(&credential).unwrap(),
            AuthMethod::with_password("pw")
        );
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    #[serial]
    fn test_agent_requires_socket() {
        let original = std::env::var("SSH_AUTH_SOCK").ok();

        std::env::remove_var("SSH_AUTH_SOCK");
        assert!(resolve_auth_method(&Credential::Agent).is_err());

        std::env::set_var("SSH_AUTH_SOCK", "/tmp/test-ssh-agent.sock");
        assert_eq!(
            resolve_auth_method(&Credential::Agent).unwrap(),
            AuthMethod::Agent
        );

        match original {
            Some(sock) => std::env::set_var("SSH_AUTH_SOCK", sock),
            None => std::env::remove_var("SSH_AUTH_SOCK"),
        }
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_default_keys_fallback() {
        let original_home = std::env::var("HOME").ok();

        let temp_dir = TempDir::new().unwrap();
        let ssh_dir = temp_dir.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        let default_key = ssh_dir.join("id_rsa");
        std::fs::write(&default_key, "fake key").unwrap();

        std::env::set_var("HOME", temp_dir.path());
        let auth = resolve_auth_method(&Credential::DefaultKeys);

        match original_home {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }

        match auth.unwrap() {
            AuthMethod::KeyFile { path, .. } => {
                assert_eq!(path, default_key);
            }
            _ => panic!("Expected KeyFile auth method"),
        }
    }
}
