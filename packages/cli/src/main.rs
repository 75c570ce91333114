//! DocVault operator CLI.
//!
//! Talks to the database directly, using the same configuration as the server.

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use console::style;
use tracing_subscriber::{EnvFilter, fmt};

use docvault_server::config::AppConfig;
use docvault_server::error::AppError;
use docvault_server::models::auth::validate_password;
use docvault_server::services::UserDirectory;
use docvault_server::utils::hash::PasswordHasher;
use docvault_server::{database, seed};

/// DocVault account administration.
#[derive(Parser, Debug)]
#[command(name = "docvault", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account (or reuse an existing one with the same email).
    CreateUser(CreateUserArgs),
    /// Set the password of an existing account.
    SetPassword(SetPasswordArgs),
}

#[derive(Args, Debug)]
struct CreateUserArgs {
    /// Email address of the account.
    #[arg(long)]
    email: String,
    /// Display name.
    #[arg(long, default_value = "Administrator")]
    name: String,
    /// Grant admin (and reactivate the account if needed).
    #[arg(long)]
    admin: bool,
    /// Password. Prompted for when omitted.
    #[arg(long, env = "DOCVAULT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Args, Debug)]
struct SetPasswordArgs {
    /// Email address of the account.
    #[arg(long)]
    email: String,
    /// New password. Prompted for when omitted.
    #[arg(long, env = "DOCVAULT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

fn read_password(given: Option<String>) -> anyhow::Result<String> {
    let password = match given {
        Some(p) => p,
        None => dialoguer::Password::new()
            .with_prompt("Password")
            .with_confirmation("Repeat password", "Passwords do not match")
            .interact()
            .context("failed to read password")?,
    };
    validate_password(&password).map_err(describe)?;
    Ok(password)
}

/// `AppError` carries no `std::error::Error` impl; render it for the terminal.
fn describe(err: AppError) -> anyhow::Error {
    match err {
        AppError::Validation(msg) => anyhow::anyhow!(msg),
        AppError::NotFound(msg) => anyhow::anyhow!(msg),
        AppError::EmailTaken => anyhow::anyhow!("email is already registered"),
        other => anyhow::anyhow!("{other:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load().context("failed to load configuration")?;
    let db = database::init_db(&config.database.url)
        .await
        .context("failed to open database")?;
    let blobs = common::storage::connect(&config.storage)
        .await
        .context("failed to open blob storage")?;
    let hasher =
        PasswordHasher::new(config.auth.argon2).context("invalid auth.argon2 settings")?;
    let users = UserDirectory::new(&db, hasher, &*blobs);

    match cli.command {
        Command::CreateUser(args) => {
            let password = read_password(args.password)?;
            let (user, created) =
                seed::ensure_account(&users, &args.email, &args.name, &password, args.admin)
                    .await
                    .map_err(describe)?;
            if created {
                println!(
                    "{} Created user {} (id {})",
                    style("✔").green(),
                    style(&user.email).bold(),
                    user.id
                );
            } else {
                println!(
                    "{} User {} (id {}) already exists, password left unchanged",
                    style("!").yellow(),
                    style(&user.email).bold(),
                    user.id
                );
            }
            if user.is_admin {
                println!("  {} is an admin", user.email);
            }
        }
        Command::SetPassword(args) => {
            let Some(user) = users.find_by_email(&args.email).await? else {
                bail!("no user with email {}", args.email);
            };
            let password = read_password(args.password)?;
            users
                .set_password(user.id, &password)
                .await
                .map_err(describe)?;
            println!(
                "{} Password updated for {}",
                style("✔").green(),
                style(&user.email).bold()
            );
        }
    }

    Ok(())
}
