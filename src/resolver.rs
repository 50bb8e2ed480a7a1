//! Master password resolution.
//!
//! A [`PasswordResolver`] tries an ordered list of [`PasswordSource`]s and
//! returns the first password produced. The default order is the OS keychain,
//! then an environment variable, then an interactive prompt. If every source
//! is skipped the resolver fails with [`VaultError::KeyringUnavailable`];
//! there is no unencrypted fallback.

use std::fmt;
use std::io::{self, IsTerminal};

use keyring::Entry;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::{KeychainTarget, VaultConfig};
use crate::error::{Result, VaultError};

/// A master password, zeroed when dropped.
pub type MasterPassword = Zeroizing<String>;

/// Why a password is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Opening an existing vault.
    Unlock,
    /// Setting the password of a new vault; prompts ask for confirmation.
    Create,
}

/// One way of obtaining the master password.
pub trait PasswordSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Returns `Ok(None)` when this source has nothing to offer, so the next
    /// source is tried. An `Err` aborts resolution.
    fn fetch(&self, purpose: Purpose) -> Result<Option<MasterPassword>>;
}

/// Ordered list of password sources; first success wins.
pub struct PasswordResolver {
    sources: Vec<Box<dyn PasswordSource>>,
}

impl PasswordResolver {
    pub fn new(sources: Vec<Box<dyn PasswordSource>>) -> Self {
        Self { sources }
    }

    /// Keychain, environment variable and prompt, as enabled in `config`.
    pub fn from_config(config: &VaultConfig) -> Self {
        let mut sources: Vec<Box<dyn PasswordSource>> = Vec::new();
        if let Some(target) = &config.keychain {
            sources.push(Box::new(KeychainSource::new(target.clone())));
        }
        sources.push(Box::new(EnvSource::new(&config.password_env)));
        if config.prompt {
            sources.push(Box::new(PromptSource::new()));
        }
        Self::new(sources)
    }

    pub fn resolve(&self, purpose: Purpose) -> Result<MasterPassword> {
        for source in &self.sources {
            match source.fetch(purpose)? {
                Some(password) => {
                    debug!(source = source.name(), "master password resolved");
                    return Ok(password);
                }
                None => debug!(source = source.name(), "password source skipped"),
            }
        }
        Err(VaultError::KeyringUnavailable)
    }
}

impl fmt::Debug for PasswordResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|s| s.name()))
            .finish()
    }
}

/// Master password stored in the platform credential manager.
#[derive(Debug, Clone)]
pub struct KeychainSource {
    target: KeychainTarget,
}

impl KeychainSource {
    pub fn new(target: KeychainTarget) -> Self {
        Self { target }
    }

    fn entry(&self) -> keyring::Result<Entry> {
        Entry::new(&self.target.service, &self.target.account)
    }

    /// Saves `password` so later unlocks can resolve it without prompting.
    pub fn store(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(VaultError::InvalidPassword("password cannot be empty".into()));
        }
        self.entry()
            .and_then(|entry| entry.set_password(password))
            .map_err(|e| VaultError::Keychain(e.to_string()))
    }

    /// Removes the stored password. Returns `false` if there was none.
    pub fn forget(&self) -> Result<bool> {
        match self.entry().and_then(|entry| entry.delete_credential()) {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(VaultError::Keychain(e.to_string())),
        }
    }
}

impl PasswordSource for KeychainSource {
    fn name(&self) -> &str {
        "keychain"
    }

    fn fetch(&self, _purpose: Purpose) -> Result<Option<MasterPassword>> {
        let password = match self.entry().and_then(|entry| entry.get_password()) {
            Ok(password) => password,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => {
                // A missing or locked credential manager is a skipped source.
                debug!(error = %e, "keychain unavailable");
                return Ok(None);
            }
        };
        if password.is_empty() {
            return Ok(None);
        }
        Ok(Some(Zeroizing::new(password)))
    }
}

/// Master password taken from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvSource {
    var: String,
}

impl EnvSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl PasswordSource for EnvSource {
    fn name(&self) -> &str {
        "environment"
    }

    fn fetch(&self, _purpose: Purpose) -> Result<Option<MasterPassword>> {
        match std::env::var(&self.var) {
            Ok(password) if !password.is_empty() => Ok(Some(Zeroizing::new(password))),
            _ => Ok(None),
        }
    }
}

/// Interactive prompt without echo, only attempted on a terminal.
pub struct PromptSource {
    is_terminal: fn() -> bool,
}

impl PromptSource {
    pub fn new() -> Self {
        Self {
            is_terminal: || io::stdin().is_terminal(),
        }
    }

    /// Replaces the terminal check, e.g. to simulate a headless process.
    pub fn with_terminal_check(is_terminal: fn() -> bool) -> Self {
        Self { is_terminal }
    }
}

impl Default for PromptSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordSource for PromptSource {
    fn name(&self) -> &str {
        "prompt"
    }

    fn fetch(&self, purpose: Purpose) -> Result<Option<MasterPassword>> {
        if !(self.is_terminal)() {
            return Ok(None);
        }

        match purpose {
            Purpose::Unlock => {
                let password = Zeroizing::new(rpassword::prompt_password("Master password: ")?);
                ensure_not_empty(&password)?;
                Ok(Some(password))
            }
            Purpose::Create => {
                let pw1 = Zeroizing::new(rpassword::prompt_password("New master password: ")?);
                let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm master password: ")?);
                ensure_not_empty(&pw1)?;
                if pw1 != pw2 {
                    return Err(VaultError::InvalidPassword("passwords do not match".into()));
                }
                Ok(Some(pw1))
            }
        }
    }
}

/// A password handed in by the host application.
pub struct ProvidedPassword {
    password: MasterPassword,
}

impl ProvidedPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
        }
    }
}

impl PasswordSource for ProvidedPassword {
    fn name(&self) -> &str {
        "provided"
    }

    fn fetch(&self, _purpose: Purpose) -> Result<Option<MasterPassword>> {
        if self.password.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.password.clone()))
    }
}

pub(crate) fn ensure_not_empty(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(VaultError::InvalidPassword("password cannot be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const TEST_VAR: &str = "KEYSAFE_RESOLVER_TEST_PASSWORD";

    struct Fixed(Option<&'static str>);

    impl PasswordSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch(&self, _purpose: Purpose) -> Result<Option<MasterPassword>> {
            Ok(self.0.map(|p| Zeroizing::new(p.to_string())))
        }
    }

    struct Failing;

    impl PasswordSource for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn fetch(&self, _purpose: Purpose) -> Result<Option<MasterPassword>> {
            Err(VaultError::InvalidPassword("passwords do not match".into()))
        }
    }

    #[test]
    fn first_success_wins() {
        let resolver = PasswordResolver::new(vec![
            Box::new(Fixed(None)),
            Box::new(Fixed(Some("second"))),
            Box::new(Fixed(Some("third"))),
        ]);
        assert_eq!(resolver.resolve(Purpose::Unlock).unwrap().as_str(), "second");
    }

    #[test]
    fn all_skipped_is_keyring_unavailable() {
        let resolver = PasswordResolver::new(vec![Box::new(Fixed(None)), Box::new(Fixed(None))]);
        assert!(matches!(
            resolver.resolve(Purpose::Unlock),
            Err(VaultError::KeyringUnavailable)
        ));
    }

    #[test]
    fn empty_resolver_is_keyring_unavailable() {
        let resolver = PasswordResolver::new(Vec::new());
        assert!(matches!(
            resolver.resolve(Purpose::Create),
            Err(VaultError::KeyringUnavailable)
        ));
    }

    #[test]
    fn source_error_aborts_resolution() {
        let resolver =
            PasswordResolver::new(vec![Box::new(Failing), Box::new(Fixed(Some("later")))]);
        assert!(matches!(
            resolver.resolve(Purpose::Create),
            Err(VaultError::InvalidPassword(_))
        ));
    }

    #[test]
    #[serial]
    fn env_source_reads_variable() {
        // SAFETY: test-only env mutation, serialized with #[serial].
        unsafe { std::env::set_var(TEST_VAR, "from-env") };
        let result = EnvSource::new(TEST_VAR).fetch(Purpose::Unlock);
        unsafe { std::env::remove_var(TEST_VAR) };

        assert_eq!(result.unwrap().unwrap().as_str(), "from-env");
    }

    #[test]
    #[serial]
    fn env_source_skips_unset_and_empty() {
        unsafe { std::env::remove_var(TEST_VAR) };
        assert!(EnvSource::new(TEST_VAR).fetch(Purpose::Unlock).unwrap().is_none());

        unsafe { std::env::set_var(TEST_VAR, "") };
        let result = EnvSource::new(TEST_VAR).fetch(Purpose::Unlock);
        unsafe { std::env::remove_var(TEST_VAR) };

        assert!(result.unwrap().is_none());
    }

    fn use_mock_keychain() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
    }

    #[test]
    #[serial]
    fn missing_keychain_entry_falls_through_to_env() {
        use_mock_keychain();
        let keychain = KeychainSource::new(KeychainTarget::default());
        assert!(keychain.fetch(Purpose::Unlock).unwrap().is_none());

        // SAFETY: test-only env mutation, serialized with #[serial].
        unsafe { std::env::set_var(TEST_VAR, "from-env") };
        let resolver =
            PasswordResolver::new(vec![Box::new(keychain), Box::new(EnvSource::new(TEST_VAR))]);
        let result = resolver.resolve(Purpose::Unlock);
        unsafe { std::env::remove_var(TEST_VAR) };

        assert_eq!(result.unwrap().as_str(), "from-env");
    }

    #[test]
    #[serial]
    fn forget_without_entry_reports_nothing_removed() {
        use_mock_keychain();
        let keychain = KeychainSource::new(KeychainTarget::default());
        assert!(!keychain.forget().unwrap());
    }

    #[test]
    fn keychain_store_rejects_empty_password() {
        let keychain = KeychainSource::new(KeychainTarget::default());
        assert!(matches!(
            keychain.store(""),
            Err(VaultError::InvalidPassword(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_keychain_survives_reboot() {
        use keyring::credential::CredentialPersistence;

        let persistence = keyring::default::default_credential_builder().persistence();
        assert!(
            !matches!(
                persistence,
                CredentialPersistence::UntilReboot | CredentialPersistence::ProcessOnly
            ),
            "stored master password would not persist (UntilReboot or ProcessOnly)"
        );
    }

    #[test]
    fn prompt_is_skipped_without_terminal() {
        let prompt = PromptSource::with_terminal_check(|| false);
        assert!(prompt.fetch(Purpose::Unlock).unwrap().is_none());
        assert!(prompt.fetch(Purpose::Create).unwrap().is_none());
    }

    #[test]
    fn provided_password_is_returned() {
        let source = ProvidedPassword::new("correct-horse");
        assert_eq!(
            source.fetch(Purpose::Unlock).unwrap().unwrap().as_str(),
            "correct-horse"
        );
        assert!(ProvidedPassword::new("").fetch(Purpose::Unlock).unwrap().is_none());
    }

    #[test]
    fn from_config_respects_disabled_sources() {
        let config = VaultConfig::new("/tmp/vault.ksf")
            .without_keychain()
            .without_prompt();
        let resolver = PasswordResolver::from_config(&config);
        assert_eq!(format!("{resolver:?}"), r#"["environment"]"#);

        let full = PasswordResolver::from_config(&VaultConfig::new("/tmp/vault.ksf"));
        assert_eq!(
            format!("{full:?}"),
            r#"["keychain", "environment", "prompt"]"#
        );
    }
}
