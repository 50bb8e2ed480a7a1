use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{KEY_LEN, SecretKey};
use crate::error::{Result, VaultError};

/// Iteration count used for new vaults.
pub const DEFAULT_ITERATIONS: u32 = 600_000;
/// Lowest iteration count considered adequate for a real vault.
pub const MIN_RECOMMENDED_ITERATIONS: u32 = 480_000;
/// Upper bound accepted when reading a vault, so a hostile header cannot
/// stall unlock indefinitely.
pub const MAX_ITERATIONS: u32 = 100_000_000;

/// PBKDF2-HMAC-SHA256 parameters.
///
/// The iteration count is stored in every vault header and the stored value
/// is what unlock uses, so raising the default never breaks older vaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// True when the iteration count is below current guidance.
    pub fn is_weak(&self) -> bool {
        self.iterations < MIN_RECOMMENDED_ITERATIONS
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations < 1 {
            return Err(VaultError::InvalidKdfParams(
                "iteration count must be >= 1".into(),
            ));
        }
        if self.iterations > MAX_ITERATIONS {
            return Err(VaultError::InvalidKdfParams(format!(
                "iteration count must be <= {MAX_ITERATIONS}"
            )));
        }
        Ok(())
    }
}

/// Derive a wrapping key from a master password.
///
/// Deterministic for identical inputs. A wrong password still derives a key;
/// it is rejected later when the wrapped application key fails to
/// authenticate.
pub fn derive_key(password: &[u8], salt: &[u8], kdf: KdfParams) -> SecretKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password, salt, kdf.iterations, key.as_mut());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams::new(1_000).unwrap()
    }

    #[test]
    fn kdf_is_deterministic() {
        let salt = [42u8; 32];

        let k1 = derive_key(b"password", &salt, fast());
        let k2 = derive_key(b"password", &salt, fast());

        assert_eq!(*k1, *k2);
    }

    #[test]
    fn iterations_affect_output() {
        let salt = [7u8; 32];

        let k1 = derive_key(b"pw", &salt, KdfParams::new(1_000).unwrap());
        let k2 = derive_key(b"pw", &salt, KdfParams::new(1_001).unwrap());

        assert_ne!(*k1, *k2);
    }

    #[test]
    fn salt_and_password_affect_output() {
        let base = derive_key(b"pw", &[1u8; 32], fast());

        assert_ne!(*base, *derive_key(b"pw", &[2u8; 32], fast()));
        assert_ne!(*base, *derive_key(b"other", &[1u8; 32], fast()));
    }

    #[test]
    fn matches_rfc7914_vector() {
        // PBKDF2-HMAC-SHA256 test vector from RFC 7914 section 11.
        let key = derive_key(
            b"passwd",
            b"salt",
            KdfParams::new(1).unwrap(),
        );
        assert_eq!(
            key[..16],
            [
                0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f, 0xec, 0x16, 0x91, 0xc2, 0x25,
                0x44, 0xb6, 0x05
            ]
        );
    }

    #[test]
    fn default_meets_guidance() {
        let kdf = KdfParams::default();
        assert!(kdf.iterations() >= MIN_RECOMMENDED_ITERATIONS);
        assert!(!kdf.is_weak());
        assert!(fast().is_weak());
    }

    #[test]
    fn invalid_params_fail_gracefully() {
        assert!(KdfParams::new(0).is_err());
        assert!(KdfParams::new(MAX_ITERATIONS + 1).is_err());
    }
}
