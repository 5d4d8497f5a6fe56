//! Strongbox CLI
//!
//! Terminal front end for the local encrypted credential vault.
//! Every command opens the vault, performs one operation, and closes it.

use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strongbox_core::{
    is_strong_passphrase, load_config, CharClasses, VaultConfig, VaultError, VaultSession,
    DEFAULT_VAULT_DIR, MIN_PASSPHRASE_LENGTH, SPECIAL,
};

#[derive(Parser)]
#[command(name = "strongbox")]
#[command(version)]
#[command(about = "Strongbox - a local encrypted password vault")]
#[command(after_help = "EXAMPLES:
  strongbox add mail -u alice@example.com        Generate a 16-char password
  strongbox add bank -u bob --length 24 --digits Digits only
  strongbox list                                 List login names
  strongbox show mail                            Print a login
  strongbox remove mail                          Delete a login")]
struct Cli {
    /// Vault directory
    #[arg(long, global = true, env = "STRONGBOX_DIR")]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all logins (names only)
    List,

    /// Generate a password for a new login and store it
    #[command(after_help = "When no class flag is given, all four classes are used.")]
    Add {
        /// Name of the login
        name: String,
        /// Username or email for the login
        #[arg(short, long)]
        username: String,
        /// Password length (1-64)
        #[arg(short, long, default_value = "16")]
        length: usize,
        /// Include lowercase letters
        #[arg(long)]
        lower: bool,
        /// Include uppercase letters
        #[arg(long)]
        upper: bool,
        /// Include digits
        #[arg(long)]
        digits: bool,
        /// Include special characters
        #[arg(long)]
        special: bool,
    },

    /// Show the username and password of a login
    Show {
        /// Name of the login
        name: String,
    },

    /// Remove a login from the vault
    Remove {
        /// Name of the login
        name: String,
    },

    /// Delete every login in the vault
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Check whether a passphrase is strong enough for a master passphrase
    CheckPassphrase,
}

/// Initialize logging
fn init_logging() {
    // stdout carries command output; logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .compact(),
        )
        .with(filter)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        None => {
            println!("Strongbox - a local encrypted password vault");
            println!();
            println!("Run 'strongbox --help' for usage information.");
        }
        Some(cmd) => {
            let vault_dir = cli.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_VAULT_DIR));
            if let Err(e) = handle_command(&vault_dir, cmd) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn handle_command(vault_dir: &Path, cmd: Commands) -> Result<(), Box<dyn std::error::Error>> {
    if matches!(cmd, Commands::CheckPassphrase) {
        return handle_check_passphrase();
    }

    let config = load_config(vault_dir)?;
    let mut session = VaultSession::new(vault_dir, config)?;
    open_session(&mut session)?;

    let result = match cmd {
        Commands::List => handle_list(&session),
        Commands::Add {
            name,
            username,
            length,
            lower,
            upper,
            digits,
            special,
        } => {
            let mut classes = CharClasses::new(lower, upper, digits, special);
            if classes.is_empty() {
                classes = CharClasses::ALL;
            }
            handle_add(&mut session, &name, &username, length, classes)
        }
        Commands::Show { name } => handle_show(&session, &name),
        Commands::Remove { name } => handle_remove(&mut session, &name),
        Commands::Clear { yes } => handle_clear(&mut session, yes),
        Commands::CheckPassphrase => Ok(()),
    };

    if let Err(e) = &result {
        if e.is_fatal() {
            error!("Fatal vault error, closing session: {}", e);
        }
    }
    session.close();
    result.map_err(Into::into)
}

/// Open the vault, creating a new one on first use.
fn open_session(session: &mut VaultSession) -> Result<(), Box<dyn std::error::Error>> {
    let passphrase = if session.persistence().vault_exists() {
        prompt_password("Enter master passphrase: ")?
    } else {
        println!(
            "Creating new vault at {}",
            session.persistence().paths().base_dir.display()
        );
        let passphrase = prompt_password("Choose master passphrase: ")?;
        if passphrase.expose_secret().trim().is_empty() {
            return Err("Master passphrase must not be blank".into());
        }
        if !session.is_strong_passphrase(passphrase.expose_secret()) {
            return Err(weak_passphrase_message(session.config().min_passphrase_length).into());
        }
        let confirm = prompt_password("Confirm master passphrase: ")?;
        if passphrase.expose_secret() != confirm.expose_secret() {
            return Err("Passphrases do not match".into());
        }
        passphrase
    };

    let result = session.open(passphrase);
    if matches!(result, Err(VaultError::WrongPassphrase)) {
        let iterations = session.config().kdf_iterations;
        if iterations != VaultConfig::default().kdf_iterations {
            warn!(
                "kdf_iterations is set to {}; it must match the value the vault was created with",
                iterations
            );
        }
    }
    result?;
    Ok(())
}

fn handle_list(session: &VaultSession) -> Result<(), VaultError> {
    let names = session.list_names()?;

    if names.is_empty() {
        println!("No logins stored.");
        println!();
        println!("Add your first login with: strongbox add <name> -u <username>");
        return Ok(());
    }

    println!("Logins in vault:");
    println!();
    for name in &names {
        println!("  {}", name);
    }
    println!();
    println!("{} login(s)", names.len());

    Ok(())
}

fn handle_add(
    session: &mut VaultSession,
    name: &str,
    username: &str,
    length: usize,
    classes: CharClasses,
) -> Result<(), VaultError> {
    session.generate_and_save(name, username, length, classes)?;

    println!("Login '{}' generated and saved", name);
    println!("Use 'strongbox show {}' to view it.", name);
    Ok(())
}

fn handle_show(session: &VaultSession, name: &str) -> Result<(), VaultError> {
    let text = session.read_entry(name)?;
    print!("{}", text.as_str());
    Ok(())
}

fn handle_remove(session: &mut VaultSession, name: &str) -> Result<(), VaultError> {
    if !session.list_names()?.contains(name) {
        return Err(VaultError::NotFound(name.to_string()));
    }

    if !confirm(&format!("Delete login '{}'? [y/N]: ", name))? {
        println!("Cancelled.");
        return Ok(());
    }

    session.remove_entry(name)?;
    println!("Login '{}' removed", name);
    Ok(())
}

fn handle_clear(session: &mut VaultSession, yes: bool) -> Result<(), VaultError> {
    if !yes && !confirm("Delete ALL logins? This cannot be undone. [y/N]: ")? {
        println!("Cancelled.");
        return Ok(());
    }

    session.clear_all()?;
    println!("All logins deleted.");
    Ok(())
}

fn handle_check_passphrase() -> Result<(), Box<dyn std::error::Error>> {
    let passphrase = prompt_password("Passphrase to check: ")?;

    if is_strong_passphrase(passphrase.expose_secret()) {
        println!("[OK] Passphrase is strong");
    } else {
        println!("[--] {}", weak_passphrase_message(MIN_PASSPHRASE_LENGTH));
    }
    Ok(())
}

fn weak_passphrase_message(min_length: usize) -> String {
    format!(
        "Passphrase is not strong enough. It needs at least {} characters with a \
         lowercase letter, an uppercase letter, a digit and one of {}",
        min_length, SPECIAL
    )
}

fn prompt_password(prompt: &str) -> Result<SecretString, Box<dyn std::error::Error>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let password = rpassword::read_password()?;
    Ok(SecretString::new(password))
}

fn confirm(prompt: &str) -> Result<bool, VaultError> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
