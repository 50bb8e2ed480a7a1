//! Encrypt-then-MAC tokens.
//!
//! Token layout:
//! ```text
//! IV (16) | AES-256-CBC ciphertext, PKCS#7 padded | HMAC-SHA256 tag (32)
//! ```
//! The tag covers `len(aad) (u32 LE) | aad | IV | ciphertext`. Encryption and
//! MAC keys are separate subkeys derived from the caller's 256-bit key.

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use getrandom::fill;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{IV_LEN, KEY_LEN, SALT_LEN, SecretKey, TAG_LEN};
use crate::error::{Result, VaultError};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK_LEN: usize = 16;
const ENC_LABEL: &[u8] = b"keysafe token v1 encryption";
const MAC_LABEL: &[u8] = b"keysafe token v1 authentication";

/// Fill buffer with cryptographically secure random bytes
fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|_| VaultError::Random)
}

/// Generate a KDF salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}

/// Generate a random 256-bit key
pub fn generate_key() -> Result<SecretKey> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    secure_random(key.as_mut())?;
    Ok(key)
}

fn new_mac(key: &[u8]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| VaultError::Crypto("invalid MAC key"))
}

struct Subkeys {
    enc: SecretKey,
    mac: SecretKey,
}

impl Subkeys {
    fn derive(key: &[u8; KEY_LEN]) -> Result<Self> {
        Ok(Self {
            enc: Self::label(key, ENC_LABEL)?,
            mac: Self::label(key, MAC_LABEL)?,
        })
    }

    fn label(key: &[u8; KEY_LEN], label: &[u8]) -> Result<SecretKey> {
        let mut mac = new_mac(key)?;
        mac.update(label);
        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn tagger(&self, aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256> {
        let aad_len =
            u32::try_from(aad.len()).map_err(|_| VaultError::Crypto("associated data too long"))?;
        let mut mac = new_mac(self.mac.as_ref())?;
        mac.update(&aad_len.to_le_bytes());
        mac.update(aad);
        mac.update(iv);
        mac.update(ciphertext);
        Ok(mac)
    }
}

/// Encrypt plaintext under a fresh random IV, binding `aad` into the tag.
pub fn seal(key: &[u8; KEY_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let keys = Subkeys::derive(key)?;

    let mut iv = [0u8; IV_LEN];
    secure_random(&mut iv)?;

    let ciphertext = Aes256CbcEnc::new_from_slices(keys.enc.as_ref(), &iv)
        .map_err(|_| VaultError::Crypto("encryption failed"))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let tag = keys.tagger(aad, &iv, &ciphertext)?.finalize().into_bytes();

    let mut token = Vec::with_capacity(IV_LEN + ciphertext.len() + TAG_LEN);
    token.extend_from_slice(&iv);
    token.extend_from_slice(&ciphertext);
    token.extend_from_slice(&tag);
    Ok(token)
}

/// Authenticate and decrypt a token.
///
/// Any tag mismatch, padding error or malformed length yields
/// [`VaultError::DecryptionFailed`]; plaintext is never returned unless the
/// tag verified.
pub fn open(key: &[u8; KEY_LEN], aad: &[u8], token: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if token.len() < IV_LEN + BLOCK_LEN + TAG_LEN
        || (token.len() - IV_LEN - TAG_LEN) % BLOCK_LEN != 0
    {
        return Err(VaultError::DecryptionFailed);
    }

    let (iv, rest) = token.split_at(IV_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

    let keys = Subkeys::derive(key)?;
    keys.tagger(aad, iv, ciphertext)?
        .verify_slice(tag)
        .map_err(|_| VaultError::DecryptionFailed)?;

    let plaintext = Aes256CbcDec::new_from_slices(keys.enc.as_ref(), iv)
        .map_err(|_| VaultError::Crypto("decryption failed"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| VaultError::DecryptionFailed)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn seal_open_roundtrip() {
        let token = seal(&key(1), b"aad", b"sk-abc123").unwrap();
        let plaintext = open(&key(1), b"aad", &token).unwrap();
        assert_eq!(plaintext.as_slice(), b"sk-abc123");
    }

    #[test]
    fn empty_plaintext_is_one_padded_block() {
        let token = seal(&key(1), b"", b"").unwrap();
        assert_eq!(token.len(), IV_LEN + BLOCK_LEN + TAG_LEN);
        assert!(open(&key(1), b"", &token).unwrap().is_empty());
    }

    #[test]
    fn fresh_iv_per_seal() {
        let a = seal(&key(1), b"", b"same").unwrap();
        let b = seal(&key(1), b"", b"same").unwrap();
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn any_flipped_bit_is_rejected() {
        let token = seal(&key(3), b"entry:openai", b"sk-abc123").unwrap();

        for byte in 0..token.len() {
            for bit in 0..8 {
                let mut tampered = token.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        open(&key(3), b"entry:openai", &tampered),
                        Err(VaultError::DecryptionFailed)
                    ),
                    "bit {bit} of byte {byte} went undetected"
                );
            }
        }
    }

    #[test]
    fn wrong_key_fails() {
        let token = seal(&key(1), b"", b"secret").unwrap();
        assert!(matches!(
            open(&key(2), b"", &token),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn wrong_associated_data_fails() {
        let token = seal(&key(1), b"entry:openai", b"secret").unwrap();
        assert!(matches!(
            open(&key(1), b"entry:gemini", &token),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_token_fails() {
        let token = seal(&key(1), b"", b"secret").unwrap();
        for len in [0, IV_LEN, token.len() - 1, token.len() - TAG_LEN] {
            assert!(matches!(
                open(&key(1), b"", &token[..len]),
                Err(VaultError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn generated_values_are_random() {
        assert_ne!(generate_salt().unwrap(), generate_salt().unwrap());
        assert_ne!(*generate_key().unwrap(), *generate_key().unwrap());
    }

    #[test]
    fn wrapped_key_has_fixed_length() {
        let app_key = generate_key().unwrap();
        let token = seal(&key(9), b"header", app_key.as_ref()).unwrap();
        assert_eq!(token.len(), crate::crypto::WRAPPED_KEY_LEN);
    }
}
