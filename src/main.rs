use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use keysafe::{
    CredentialStore, EnvSource, KdfParams, KeychainSource, MIN_RECOMMENDED_ITERATIONS,
    MasterPassword, PasswordResolver, PromptSource, Purpose, VaultConfig, VaultError,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the new password for `passwd` and `rotate`.
const NEW_PASSWORD_ENV: &str = "KEYSAFE_NEW_PASSWORD";
const LOG_ENV: &str = "KEYSAFE_LOG";

#[derive(Debug, Parser)]
#[command(name = "keysafe")]
#[command(
    version,
    about = "Offline, password-protected vault for third-party API keys."
)]
struct Cli {
    /// Path to the vault file
    #[arg(long, global = true, value_name = "PATH", env = "KEYSAFE_PATH")]
    store: Option<PathBuf>,

    /// Do not look up the master password in the OS keychain
    #[arg(long, global = true, env = "KEYSAFE_NO_KEYCHAIN")]
    no_keychain: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
struct KdfArgs {
    /// PBKDF2 iteration count (default: 600000)
    #[arg(long, value_name = "N")]
    iterations: Option<u32>,

    /// Accept an iteration count below the recommended minimum
    #[arg(long, requires = "iterations")]
    allow_weak_kdf: bool,
}

impl KdfArgs {
    fn apply(&self, config: VaultConfig) -> Result<VaultConfig> {
        let Some(iterations) = self.iterations else {
            return Ok(config);
        };
        let kdf = KdfParams::new(iterations)?;
        if kdf.is_weak() && !self.allow_weak_kdf {
            bail!(
                "{iterations} iterations is below the recommended minimum of \
                 {MIN_RECOMMENDED_ITERATIONS}; pass --allow-weak-kdf to use it anyway"
            );
        }
        Ok(config.with_kdf(kdf))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Creates a new vault
    Init {
        #[command(flatten)]
        kdf: KdfArgs,
    },

    /// Stores a secret by name, replacing any previous value
    #[command(arg_required_else_help = true)]
    Set { name: String, value: String },

    /// Prints a secret by name
    #[command(arg_required_else_help = true)]
    Get { name: String },

    /// Checks that a secret decrypts, without printing it
    #[command(arg_required_else_help = true)]
    Validate { name: String },

    /// Removes a secret by name
    #[command(arg_required_else_help = true)]
    Delete { name: String },

    /// Lists the names of all stored secrets
    List,

    /// Shows information about the vault
    Info,

    /// Changes the master password
    Passwd {
        #[command(flatten)]
        kdf: KdfArgs,
    },

    /// Generates a new application key and re-encrypts every secret
    Rotate {
        #[command(flatten)]
        kdf: KdfArgs,
    },

    /// Manages the master password kept in the OS keychain
    #[command(subcommand)]
    Keychain(KeychainCommand),
}

#[derive(Debug, Subcommand)]
enum KeychainCommand {
    /// Saves the master password in the OS keychain
    Store,
    /// Removes the master password from the OS keychain
    Forget,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Reads a password that is about to become the master password.
fn read_new_password(env_var: &str) -> Result<MasterPassword> {
    let resolver = PasswordResolver::new(vec![
        Box::new(EnvSource::new(env_var)),
        Box::new(PromptSource::new()),
    ]);
    resolver.resolve(Purpose::Create).map_err(|e| match e {
        VaultError::KeyringUnavailable => {
            anyhow!("no new master password provided; set {env_var} or run interactively")
        }
        e => e.into(),
    })
}

fn unlocked(config: &VaultConfig) -> Result<CredentialStore> {
    let store = CredentialStore::from_config(config);
    store.unlock()?;
    Ok(store)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match cli.store {
        Some(path) => VaultConfig::new(path),
        None => VaultConfig::for_current_user()?,
    };
    if cli.no_keychain {
        config = config.without_keychain();
    }

    match cli.command {
        Commands::Init { kdf } => {
            config = kdf.apply(config)?;
            let store = CredentialStore::from_config(&config);
            store.initialize()?;
            println!("vault initialized at {}", store.path().display());
        }
        Commands::Set { name, value } => {
            unlocked(&config)?.set_key(&name, &value)?;
            println!("stored secret '{name}'");
        }
        Commands::Get { name } => {
            let value = unlocked(&config)?.get_key(&name)?;
            println!("{}", value.as_str());
        }
        Commands::Validate { name } => {
            if unlocked(&config)?.validate_key(&name) {
                println!("secret '{name}' is valid");
            } else {
                println!("secret '{name}' is missing or could not be decrypted");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Delete { name } => {
            unlocked(&config)?.delete_key(&name)?;
            println!("secret '{name}' deleted");
        }
        Commands::List => {
            let names = unlocked(&config)?.list_keys()?;
            if names.is_empty() {
                println!("No secrets stored.");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Info => {
            let info = CredentialStore::from_config(&config).info()?;
            println!("path:              {}", info.path.display());
            println!("format version:    {}", info.format_version);
            println!("pbkdf2 iterations: {}", info.iterations);
            println!("secrets:           {}", info.secrets);
            if let Some(updated) = &info.last_updated {
                println!("last updated:      {updated}");
            }
            if info.iterations < MIN_RECOMMENDED_ITERATIONS {
                println!(
                    "note: below the recommended {} iterations; run `keysafe passwd` to upgrade",
                    MIN_RECOMMENDED_ITERATIONS
                );
            }
        }
        Commands::Passwd { kdf } => {
            let store = unlocked(&kdf.apply(config)?)?;
            store.change_password(read_new_password(NEW_PASSWORD_ENV)?)?;
            println!("master password changed");
        }
        Commands::Rotate { kdf } => {
            let store = unlocked(&kdf.apply(config)?)?;
            store.reinitialize(read_new_password(NEW_PASSWORD_ENV)?)?;
            println!("vault re-encrypted under a new application key");
        }
        Commands::Keychain(command) => {
            let Some(target) = config.keychain.clone() else {
                bail!("the keychain is disabled by --no-keychain");
            };
            let keychain = KeychainSource::new(target);
            match command {
                KeychainCommand::Store => {
                    keychain.store(&read_new_password(&config.password_env)?)?;
                    println!("master password stored in the OS keychain");
                }
                KeychainCommand::Forget => {
                    if keychain.forget()? {
                        println!("master password removed from the OS keychain");
                    } else {
                        println!("no master password stored in the OS keychain");
                    }
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    init_logging();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
