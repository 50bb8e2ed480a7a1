use std::path::PathBuf;

/// Errors reported by the vault.
///
/// Every cryptographic and I/O failure surfaces here; nothing in the vault
/// layer swallows an error or falls back to an unencrypted path.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// No password source produced a master password.
    #[error(
        "no master password source available: store one in the OS keychain, \
         set the password environment variable, or run interactively"
    )]
    KeyringUnavailable,

    /// Wrong password, or ciphertext that failed authentication.
    #[error("vault could not be opened: wrong password or corrupted data")]
    DecryptionFailed,

    #[error("vault file is corrupt: {0}")]
    VaultCorrupt(String),

    #[error("secret '{0}' not found")]
    NotFound(String),

    #[error("vault is locked; unlock it first")]
    Locked,

    #[error("no vault found at {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("vault already exists at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("invalid password: {0}")]
    InvalidPassword(String),

    #[error("invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),

    #[error("keychain error: {0}")]
    Keychain(String),

    #[error("cryptographic failure: {0}")]
    Crypto(&'static str),

    #[error("OS random generator unavailable")]
    Random,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        VaultError::VaultCorrupt(msg.into())
    }
}

pub type Result<T, E = VaultError> = std::result::Result<T, E>;
