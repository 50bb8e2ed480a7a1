//! Local, password-protected vault for third-party API keys.
//!
//! A random application key encrypts every secret. That key is stored wrapped
//! under a key derived from the master password (PBKDF2-HMAC-SHA256), so the
//! password can change without re-encrypting the secrets.

mod config;
mod crypto;
mod error;
mod format;
mod resolver;
mod storage;
mod store;

pub use crate::config::{
    DEFAULT_KEYCHAIN_ACCOUNT, DEFAULT_KEYCHAIN_SERVICE, DEFAULT_PASSWORD_ENV, KeychainTarget,
    VaultConfig, default_vault_path,
};
pub use crate::crypto::KdfParams;
pub use crate::crypto::kdf::{DEFAULT_ITERATIONS, MIN_RECOMMENDED_ITERATIONS};
pub use crate::error::{Result, VaultError};
pub use crate::resolver::{
    EnvSource, KeychainSource, MasterPassword, PasswordResolver, PasswordSource, PromptSource,
    ProvidedPassword, Purpose,
};
pub use crate::storage::Storage;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{KEY_LEN, SecretKey};
use crate::format::VaultFile;
use crate::store::SecretTable;

/// Header summary of a vault, readable without unlocking it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultInfo {
    pub path: PathBuf,
    pub format_version: u8,
    pub iterations: u32,
    pub secrets: usize,
    /// When a secret was last stored, if any are.
    pub last_updated: Option<String>,
}

struct Unlocked {
    app_key: SecretKey,
    file: VaultFile,
}

enum State {
    Locked,
    Unlocked(Unlocked),
}

/// Handle to one vault file.
///
/// Starts locked. [`unlock`](Self::unlock) is the only call that resolves the
/// master password; every operation on an individual secret fails with
/// [`VaultError::Locked`] until it has succeeded. The unwrapped application
/// key lives only in memory and is zeroed on [`lock`](Self::lock) or drop.
///
/// Writes are serialized by an internal lock and replace the vault file
/// atomically. Reads run concurrently with each other and wait for an
/// in-flight write.
pub struct CredentialStore {
    storage: Storage,
    resolver: PasswordResolver,
    kdf: KdfParams,
    state: RwLock<State>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.storage.path())
            .field("kdf", &self.kdf)
            .field("resolver", &self.resolver)
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

impl CredentialStore {
    pub fn new(storage: Storage, resolver: PasswordResolver, kdf: KdfParams) -> Self {
        Self {
            storage,
            resolver,
            kdf,
            state: RwLock::new(State::Locked),
        }
    }

    pub fn from_config(config: &VaultConfig) -> Self {
        Self::new(
            Storage::new(config.path.clone()),
            PasswordResolver::from_config(config),
            config.kdf,
        )
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn exists(&self) -> bool {
        self.storage.exists()
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(*self.read_state(), State::Unlocked(_))
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_unlocked<T>(&self, f: impl FnOnce(&Unlocked) -> Result<T>) -> Result<T> {
        match &*self.read_state() {
            State::Unlocked(unlocked) => f(unlocked),
            State::Locked => Err(VaultError::Locked),
        }
    }

    /// Creates a new vault: fresh salt, fresh application key, wrapped under
    /// the master password. Leaves the store unlocked.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.write_state();
        if self.storage.exists() {
            return Err(VaultError::AlreadyInitialized(self.path().to_path_buf()));
        }

        let password = self.resolver.resolve(Purpose::Create)?;
        resolver::ensure_not_empty(&password)?;
        if self.kdf.is_weak() {
            warn!(
                iterations = self.kdf.iterations(),
                "creating vault below the recommended PBKDF2 iteration count"
            );
        }

        let app_key = crypto::generate_key()?;
        let file = wrap_app_key(&password, self.kdf, &app_key, SecretTable::new())?;
        drop(password);

        self.storage.save(&format::serialize(&file)?)?;
        info!(path = %self.path().display(), "vault initialized");

        *state = State::Unlocked(Unlocked { app_key, file });
        Ok(())
    }

    /// Resolves the master password and unwraps the application key.
    ///
    /// Does nothing if the store is already unlocked.
    pub fn unlock(&self) -> Result<()> {
        if self.is_unlocked() {
            return Ok(());
        }

        let mut state = self.write_state();
        if matches!(*state, State::Unlocked(_)) {
            return Ok(());
        }

        let file = format::parse(&self.storage.load()?)?;

        let password = self.resolver.resolve(Purpose::Unlock)?;
        let wrapping_key = crypto::derive_key(password.as_bytes(), file.salt(), file.kdf());
        drop(password);

        let app_key = unwrap_app_key(&wrapping_key, &file)?;
        info!(secrets = file.secrets().len(), "vault unlocked");

        *state = State::Unlocked(Unlocked { app_key, file });
        Ok(())
    }

    /// Forgets the application key.
    pub fn lock(&self) {
        *self.write_state() = State::Locked;
        debug!("vault locked");
    }

    /// Decrypts the secret stored under `name`.
    pub fn get_key(&self, name: &str) -> Result<Zeroizing<String>> {
        self.with_unlocked(|unlocked| decrypt_entry(unlocked, name))
    }

    /// Encrypts `value` under a fresh IV and stores it under `name`,
    /// replacing any previous value.
    pub fn set_key(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.write_state();
        let State::Unlocked(unlocked) = &mut *state else {
            return Err(VaultError::Locked);
        };

        let aad = unlocked.file.entry_aad(name)?;
        let token = crypto::seal(&unlocked.app_key, &aad, value.as_bytes())?;

        let mut next = unlocked.file.clone();
        next.secrets_mut().upsert(name, token);
        self.storage.save(&format::serialize(&next)?)?;

        unlocked.file = next;
        debug!(name, "secret stored");
        Ok(())
    }

    /// Reports whether the secret stored under `name` decrypts, without
    /// returning it.
    ///
    /// A locked store reports `false`, the same as a missing or damaged
    /// entry. Callers that must tell these apart should check
    /// [`is_unlocked`](Self::is_unlocked) first, or use
    /// [`get_key`](Self::get_key), which returns [`VaultError::Locked`].
    pub fn validate_key(&self, name: &str) -> bool {
        match self.with_unlocked(|unlocked| decrypt_entry(unlocked, name).map(drop)) {
            Ok(()) => true,
            Err(e @ (VaultError::NotFound(_) | VaultError::Locked)) => {
                debug!(name, error = %e, "secret not validated");
                false
            }
            Err(e) => {
                warn!(name, error = %e, "secret failed validation");
                false
            }
        }
    }

    /// Removes the secret stored under `name`. Absent names are not an error
    /// and leave the vault file untouched.
    pub fn delete_key(&self, name: &str) -> Result<()> {
        let mut state = self.write_state();
        let State::Unlocked(unlocked) = &mut *state else {
            return Err(VaultError::Locked);
        };

        if !unlocked.file.secrets().contains(name) {
            return Ok(());
        }

        let mut next = unlocked.file.clone();
        next.secrets_mut().remove(name);
        self.storage.save(&format::serialize(&next)?)?;

        unlocked.file = next;
        debug!(name, "secret deleted");
        Ok(())
    }

    /// Names of all stored secrets, sorted.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        self.with_unlocked(|unlocked| Ok(unlocked.file.secrets().names().cloned().collect()))
    }

    /// Reads the vault header from disk.
    pub fn info(&self) -> Result<VaultInfo> {
        let file = format::parse(&self.storage.load()?)?;
        Ok(VaultInfo {
            path: self.path().to_path_buf(),
            format_version: file.version(),
            iterations: file.kdf().iterations(),
            secrets: file.secrets().len(),
            last_updated: file.secrets().last_updated().map(|t| t.to_rfc3339()),
        })
    }

    /// Re-wraps the application key under `new_password`, a new salt and the
    /// configured iteration count. Stored secrets are not re-encrypted.
    pub fn change_password(&self, new_password: MasterPassword) -> Result<()> {
        resolver::ensure_not_empty(&new_password)?;

        let mut state = self.write_state();
        let State::Unlocked(unlocked) = &mut *state else {
            return Err(VaultError::Locked);
        };

        let next = wrap_app_key(
            &new_password,
            self.kdf,
            &unlocked.app_key,
            unlocked.file.secrets().clone(),
        )?;
        drop(new_password);
        self.storage.save(&format::serialize(&next)?)?;

        unlocked.file = next;
        info!(iterations = self.kdf.iterations(), "master password changed");
        Ok(())
    }

    /// Full rotation: generates a new application key and salt, then
    /// re-encrypts every stored secret under the new key.
    ///
    /// If any secret fails to decrypt the rotation is abandoned and the vault
    /// file is left as it was.
    pub fn reinitialize(&self, new_password: MasterPassword) -> Result<()> {
        resolver::ensure_not_empty(&new_password)?;

        let mut state = self.write_state();
        let State::Unlocked(unlocked) = &mut *state else {
            return Err(VaultError::Locked);
        };

        let app_key = crypto::generate_key()?;
        let mut next = wrap_app_key(&new_password, self.kdf, &app_key, SecretTable::new())?;
        drop(new_password);

        for (name, entry) in unlocked.file.secrets().entries() {
            let plaintext = crypto::open(
                &unlocked.app_key,
                &unlocked.file.entry_aad(name)?,
                entry.token(),
            )?;
            let token = crypto::seal(&app_key, &next.entry_aad(name)?, &plaintext)?;
            next.secrets_mut().upsert(name, token);
        }

        self.storage.save(&format::serialize(&next)?)?;
        info!(
            secrets = next.secrets().len(),
            "vault re-initialized with a new application key"
        );

        *unlocked = Unlocked {
            app_key,
            file: next,
        };
        Ok(())
    }
}

/// Builds a vault file whose header wraps `app_key` under `password`.
fn wrap_app_key(
    password: &str,
    kdf: KdfParams,
    app_key: &SecretKey,
    secrets: SecretTable,
) -> Result<VaultFile> {
    let salt = crypto::generate_salt()?;
    let mut file = VaultFile::new(kdf, salt, Vec::new(), secrets);

    let wrapping_key = crypto::derive_key(password.as_bytes(), &salt, kdf);
    let wrapped = crypto::seal(&wrapping_key, &file.key_aad()?, app_key.as_ref())?;
    file.set_wrapped_key(wrapped);
    Ok(file)
}

fn unwrap_app_key(wrapping_key: &SecretKey, file: &VaultFile) -> Result<SecretKey> {
    let plaintext = crypto::open(wrapping_key, &file.key_aad()?, file.wrapped_key())?;
    if plaintext.len() != KEY_LEN {
        return Err(VaultError::corrupt("unwrapped application key has wrong length"));
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}

fn decrypt_entry(unlocked: &Unlocked, name: &str) -> Result<Zeroizing<String>> {
    let entry = unlocked
        .file
        .secrets()
        .get(name)
        .ok_or_else(|| VaultError::NotFound(name.to_string()))?;

    let plaintext = crypto::open(
        &unlocked.app_key,
        &unlocked.file.entry_aad(name)?,
        entry.token(),
    )?;
    let value = std::str::from_utf8(&plaintext)
        .map_err(|_| VaultError::corrupt(format!("secret '{name}' is not valid UTF-8")))?;

    Ok(Zeroizing::new(value.to_owned()))
}
