//! File format v1 for the vault.
//!
//! V1 File Format:
//! ```text
//! MAGIC (4) | VERSION (1) | ITERATIONS (4) | SALT (32) | WRAPPED_KEY (96) | ENTRY TABLE (JSON)
//! ```
//! Everything before `WRAPPED_KEY` is authenticated as associated data of the
//! wrapped key. Each entry token is bound to its name.

use super::{MAGIC, VaultFile};
use crate::{
    crypto::{KdfParams, SALT_LEN, WRAPPED_KEY_LEN},
    error::{Result, VaultError},
    format::{MAGIC_LEN, VER_LEN},
    store::SecretTable,
};

/// Version byte of this layout.
pub const VERSION_V1: u8 = 1;

const ITER_LEN: usize = 4;

const PREFIX_LEN: usize = MAGIC_LEN + VER_LEN + ITER_LEN + SALT_LEN;
const HEADER_LEN: usize = PREFIX_LEN + WRAPPED_KEY_LEN;

const ENTRY_LABEL: &[u8] = b"entry:";

/// Header bytes preceding the wrapped key.
pub(crate) fn header_prefix(kdf: KdfParams, salt: &[u8; SALT_LEN]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PREFIX_LEN);
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION_V1);
    buf.extend_from_slice(&kdf.iterations().to_le_bytes());
    buf.extend_from_slice(salt);
    buf
}

pub(crate) fn entry_aad(name: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(VER_LEN + ENTRY_LABEL.len() + name.len());
    aad.push(VERSION_V1);
    aad.extend_from_slice(ENTRY_LABEL);
    aad.extend_from_slice(name.as_bytes());
    aad
}

/// Parses a v1 vault file.
///
/// # Errors
///
/// Returns [`VaultError::VaultCorrupt`] if the file is too short, the stored
/// iteration count is out of range, or the entry table is not valid JSON.
pub(crate) fn parse(data: &[u8]) -> Result<VaultFile> {
    if data.len() < HEADER_LEN {
        return Err(VaultError::corrupt("file too short for v1"));
    }

    let mut offset = MAGIC_LEN + VER_LEN;

    let iterations = u32::from_le_bytes(
        data[offset..offset + ITER_LEN]
            .try_into()
            .map_err(|_| VaultError::corrupt("invalid iteration field"))?,
    );
    offset += ITER_LEN;

    let salt: [u8; SALT_LEN] = data[offset..offset + SALT_LEN]
        .try_into()
        .map_err(|_| VaultError::corrupt("invalid salt length"))?;
    offset += SALT_LEN;

    let wrapped_key = data[offset..offset + WRAPPED_KEY_LEN].to_vec();
    offset += WRAPPED_KEY_LEN;

    let kdf = KdfParams::new(iterations)
        .map_err(|e| VaultError::corrupt(format!("stored KDF parameters rejected: {e}")))?;

    let secrets: SecretTable = serde_json::from_slice(&data[offset..])
        .map_err(|e| VaultError::corrupt(format!("invalid entry table: {e}")))?;

    Ok(VaultFile::new(kdf, salt, wrapped_key, secrets))
}

/// Serializes a VaultFile to v1 format bytes.
///
/// # Errors
///
/// Returns an error if the version is not v1 or the wrapped key has the
/// wrong length.
pub(crate) fn serialize(file: &VaultFile) -> Result<Vec<u8>> {
    if file.version() != VERSION_V1 {
        return Err(VaultError::corrupt("wrong version for v1 serializer"));
    }

    if file.wrapped_key().len() != WRAPPED_KEY_LEN {
        return Err(VaultError::corrupt("invalid wrapped key length for v1"));
    }

    let table = serde_json::to_vec(file.secrets())
        .map_err(|e| VaultError::corrupt(format!("failed to encode entry table: {e}")))?;

    let mut buf = header_prefix(file.kdf(), file.salt());
    buf.reserve(WRAPPED_KEY_LEN + table.len());
    buf.extend_from_slice(file.wrapped_key());
    buf.extend_from_slice(&table);

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VaultFile {
        let mut secrets = SecretTable::new();
        secrets.upsert("openai", vec![5u8; 64]);
        VaultFile::new(
            KdfParams::new(480_000).unwrap(),
            [1u8; SALT_LEN],
            vec![2u8; WRAPPED_KEY_LEN],
            secrets,
        )
    }

    #[test]
    fn header_roundtrip() {
        let file = sample();

        let bytes = serialize(&file).unwrap();
        let parsed = super::super::parse(&bytes).unwrap();

        assert_eq!(&bytes[..MAGIC_LEN], MAGIC);
        assert_eq!(parsed.version(), VERSION_V1);
        assert_eq!(parsed.kdf().iterations(), 480_000);
        assert_eq!(parsed.salt(), file.salt());
        assert_eq!(parsed.wrapped_key(), file.wrapped_key());
        assert_eq!(parsed.secrets().get("openai").unwrap().token(), &[5u8; 64][..]);
    }

    #[test]
    fn key_aad_is_header_prefix() {
        let file = sample();
        let bytes = serialize(&file).unwrap();
        assert_eq!(file.key_aad().unwrap(), bytes[..PREFIX_LEN]);
    }

    #[test]
    fn entry_aad_differs_per_name() {
        assert_ne!(entry_aad("openai"), entry_aad("gemini"));
    }

    #[test]
    fn too_short_fails() {
        let bytes = serialize(&sample()).unwrap();
        assert!(matches!(
            parse(&bytes[..HEADER_LEN - 1]),
            Err(VaultError::VaultCorrupt(_))
        ));
    }

    #[test]
    fn zero_iterations_is_corrupt() {
        let mut bytes = serialize(&sample()).unwrap();
        bytes[MAGIC_LEN + VER_LEN..MAGIC_LEN + VER_LEN + ITER_LEN].copy_from_slice(&[0; 4]);
        assert!(matches!(parse(&bytes), Err(VaultError::VaultCorrupt(_))));
    }

    #[test]
    fn missing_entry_table_is_corrupt() {
        let bytes = serialize(&sample()).unwrap();
        assert!(matches!(
            parse(&bytes[..HEADER_LEN]),
            Err(VaultError::VaultCorrupt(_))
        ));
    }
}
