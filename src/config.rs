//! Vault configuration and per-user defaults.

use directories::BaseDirs;
use std::path::PathBuf;

use crate::crypto::KdfParams;
use crate::error::{Result, VaultError};

/// Environment variable consulted for the master password.
pub const DEFAULT_PASSWORD_ENV: &str = "KEYSAFE_PASSWORD";
/// OS keychain service holding the master password.
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "keysafe";
/// OS keychain account holding the master password.
pub const DEFAULT_KEYCHAIN_ACCOUNT: &str = "master-password";

const VAULT_DIR: &str = ".keysafe";
const VAULT_FILE: &str = "vault.ksf";

/// Identifies the keychain entry the master password may be stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeychainTarget {
    pub service: String,
    pub account: String,
}

impl Default for KeychainTarget {
    fn default() -> Self {
        Self {
            service: DEFAULT_KEYCHAIN_SERVICE.to_string(),
            account: DEFAULT_KEYCHAIN_ACCOUNT.to_string(),
        }
    }
}

/// Everything a [`CredentialStore`](crate::CredentialStore) needs to locate
/// its vault and resolve the master password.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Location of the vault file.
    pub path: PathBuf,
    /// Parameters for newly wrapped keys. Existing vaults keep the count
    /// stored in their header.
    pub kdf: KdfParams,
    /// Environment variable holding the master password.
    pub password_env: String,
    /// Keychain entry to consult first; `None` skips the keychain.
    pub keychain: Option<KeychainTarget>,
    /// Whether an interactive prompt may be used when a terminal is attached.
    pub prompt: bool,
}

impl VaultConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kdf: KdfParams::default(),
            password_env: DEFAULT_PASSWORD_ENV.to_string(),
            keychain: Some(KeychainTarget::default()),
            prompt: true,
        }
    }

    /// Configuration for the vault in the current user's home directory.
    pub fn for_current_user() -> Result<Self> {
        Ok(Self::new(default_vault_path()?))
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn without_keychain(mut self) -> Self {
        self.keychain = None;
        self
    }

    pub fn without_prompt(mut self) -> Self {
        self.prompt = false;
        self
    }
}

/// `~/.keysafe/vault.ksf`
pub fn default_vault_path() -> Result<PathBuf> {
    let dirs = BaseDirs::new().ok_or_else(|| {
        VaultError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not determine the home directory",
        ))
    })?;

    Ok(dirs.home_dir().join(VAULT_DIR).join(VAULT_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VaultConfig::new("/tmp/vault.ksf");
        assert_eq!(config.password_env, "KEYSAFE_PASSWORD");
        assert_eq!(config.keychain, Some(KeychainTarget::default()));
        assert!(config.prompt);
        assert_eq!(config.kdf, KdfParams::default());
    }

    #[test]
    fn builders_disable_sources() {
        let config = VaultConfig::new("/tmp/vault.ksf")
            .without_keychain()
            .without_prompt()
            .with_kdf(KdfParams::new(1_000).unwrap());
        assert!(config.keychain.is_none());
        assert!(!config.prompt);
        assert_eq!(config.kdf.iterations(), 1_000);
    }

    #[test]
    fn default_path_is_under_home() {
        let path = default_vault_path().unwrap();
        assert!(path.ends_with(".keysafe/vault.ksf"));
    }
}
