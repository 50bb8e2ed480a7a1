//! Cryptographic primitives for the vault.
//!
//! Provides password-based key derivation and encrypt-then-MAC tokens.

pub mod kdf;
pub mod token;

pub use kdf::{KdfParams, derive_key};
pub use token::{generate_key, generate_salt, open, seal};

/// Length of the KDF salt (32 bytes / 256 bits).
pub const SALT_LEN: usize = 32;
/// Length of the CBC initialisation vector (16 bytes).
pub const IV_LEN: usize = 16;
/// Length of every symmetric key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the HMAC-SHA256 tag (32 bytes).
pub const TAG_LEN: usize = 32;
/// Length of a sealed application key: IV, two padded AES blocks, tag.
pub const WRAPPED_KEY_LEN: usize = IV_LEN + KEY_LEN + 16 + TAG_LEN;

/// A 256-bit symmetric key that is zeroed on drop.
pub type SecretKey = zeroize::Zeroizing<[u8; KEY_LEN]>;
