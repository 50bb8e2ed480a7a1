//! File format handling for the vault.
//!
//! Provides version-aware parsing and serialization of the vault file. The
//! version byte alone selects the reader; a version this build does not know
//! is rejected rather than guessed at.

use crate::crypto::{KdfParams, SALT_LEN};
use crate::error::{Result, VaultError};
use crate::store::SecretTable;

pub mod v1;

/// Magic bytes identifying a keysafe vault file ("KSAF").
pub const MAGIC: &[u8; 4] = b"KSAF";
/// Length of magic bytes.
pub const MAGIC_LEN: usize = 4;
/// Length of version field.
pub const VER_LEN: usize = 1;
/// Latest format version
pub const CURRENT_VERSION: u8 = v1::VERSION_V1;

/// A parsed vault file: the key-wrapping header plus the sealed secrets.
#[derive(Debug, Clone)]
pub(crate) struct VaultFile {
    version: u8,
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
    wrapped_key: Vec<u8>,
    secrets: SecretTable,
}

impl VaultFile {
    /// Creates a new vault file in the current format.
    pub fn new(
        kdf: KdfParams,
        salt: [u8; SALT_LEN],
        wrapped_key: Vec<u8>,
        secrets: SecretTable,
    ) -> Self {
        Self {
            version: CURRENT_VERSION,
            kdf,
            salt,
            wrapped_key,
            secrets,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// KDF parameters the wrapping key must be derived with.
    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// The application key, sealed under the wrapping key.
    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }

    pub fn set_wrapped_key(&mut self, wrapped_key: Vec<u8>) {
        self.wrapped_key = wrapped_key;
    }

    pub fn secrets(&self) -> &SecretTable {
        &self.secrets
    }

    pub fn secrets_mut(&mut self) -> &mut SecretTable {
        &mut self.secrets
    }

    /// Associated data authenticated with the wrapped application key.
    pub fn key_aad(&self) -> Result<Vec<u8>> {
        match self.version {
            v1::VERSION_V1 => Ok(v1::header_prefix(self.kdf, &self.salt)),
            v => Err(unsupported(v)),
        }
    }

    /// Associated data authenticated with the secret stored under `name`.
    pub fn entry_aad(&self, name: &str) -> Result<Vec<u8>> {
        match self.version {
            v1::VERSION_V1 => Ok(v1::entry_aad(name)),
            v => Err(unsupported(v)),
        }
    }
}

fn unsupported(version: u8) -> VaultError {
    VaultError::corrupt(format!("unsupported format version {version}"))
}

/// Parses a vault file.
///
/// Automatically dispatches to the appropriate version parser.
///
/// # Errors
///
/// Returns [`VaultError::VaultCorrupt`] if:
/// - The file is too short
/// - The magic bytes are invalid
/// - The version is unsupported
/// - The version-specific layout is malformed
pub(crate) fn parse(data: &[u8]) -> Result<VaultFile> {
    if data.len() < MAGIC_LEN + VER_LEN {
        return Err(VaultError::corrupt("file too short"));
    }

    if &data[..MAGIC_LEN] != MAGIC {
        return Err(VaultError::corrupt("invalid magic"));
    }

    match data[MAGIC_LEN] {
        v1::VERSION_V1 => v1::parse(data),
        v => Err(unsupported(v)),
    }
}

/// Serializes a vault file to bytes.
pub(crate) fn serialize(file: &VaultFile) -> Result<Vec<u8>> {
    match file.version() {
        v1::VERSION_V1 => v1::serialize(file),
        v => Err(unsupported(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_version_fails_closed() {
        let mut data = vec![0u8; 200];
        data[..MAGIC_LEN].copy_from_slice(MAGIC);
        data[MAGIC_LEN] = 0;
        assert!(matches!(parse(&data), Err(VaultError::VaultCorrupt(_))));

        data[MAGIC_LEN] = 2;
        match parse(&data) {
            Err(VaultError::VaultCorrupt(msg)) => assert!(msg.contains("version 2")),
            other => panic!("expected VaultCorrupt, got: {other:?}"),
        }
    }

    #[test]
    fn invalid_magic_fails() {
        let mut data = vec![0u8; 200];
        data[..4].copy_from_slice(b"KNST");
        data[4] = CURRENT_VERSION;
        assert!(matches!(parse(&data), Err(VaultError::VaultCorrupt(_))));
    }

    #[test]
    fn empty_file_fails() {
        assert!(matches!(parse(&[]), Err(VaultError::VaultCorrupt(_))));
    }
}
