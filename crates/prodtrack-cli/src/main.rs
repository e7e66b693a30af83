//! Productivity Tracker CLI - database administration
//!
//! Usage:
//!   prodtrack migrate
//!   prodtrack create-superuser --username <name> --email <email> [--password <pw>]
//!   prodtrack seed-rbac

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use prodtrack_api::{
    auth::password::{CredentialHasher, PasswordConfig},
    logging::init_tracing,
    seed::{seed_rbac, DEFAULT_ADMIN_USERNAME},
    services::{AccountDraft, UserService},
};
use prodtrack_core::{AppConfig, PgStore, Repositories};
use std::sync::Arc;
use validator::ValidateEmail;

#[derive(Parser)]
#[command(name = "prodtrack")]
#[command(about = "Productivity Tracker administration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the database schema
    Migrate,
    /// Create an active superuser account
    CreateSuperuser {
        /// 3-50 characters, letters, digits and underscores
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "PRODTRACK_SUPERUSER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create the default permissions, roles and admin user
    SeedRbac {
        /// Password for the default admin account, if it gets created
        #[arg(
            long,
            env = "PRODTRACK_ADMIN_PASSWORD",
            hide_env_values = true,
            default_value = "admin123"
        )]
        admin_password: String,
    },
}

/// Configuration without the server-only checks (no signing secret needed)
fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("PRODTRACK_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    Ok(config)
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgStore> {
    PgStore::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to database")
}

fn validate_username(username: &str) -> Result<(), &'static str> {
    let length = username.chars().count();
    if !(3..=50).contains(&length) {
        return Err("Username must be 3-50 characters long");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("Username may only contain letters, digits and underscores");
    }
    Ok(())
}

fn validate_superuser(username: &str, email: &str, password: &str) -> Result<(), &'static str> {
    validate_username(username)?;
    if !email.validate_email() {
        return Err("Invalid email format");
    }
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters long");
    }
    Ok(())
}

fn confirm_password(password: String, confirmation: &str) -> Result<String, &'static str> {
    if password != confirmation {
        return Err("Passwords do not match");
    }
    Ok(password)
}

/// Prompt twice without echo
fn read_password() -> anyhow::Result<String> {
    let password = rpassword::prompt_password("Password (minimum 8 characters): ")?;
    let confirmation = rpassword::prompt_password("Confirm password: ")?;
    confirm_password(password, &confirmation).map_err(anyhow::Error::msg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config()?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Migrate => {
            connect(&config).await?.migrate().await?;
            println!("Migrations applied");
        }
        Commands::CreateSuperuser {
            username,
            email,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            if let Err(reason) = validate_superuser(&username, &email, &password) {
                bail!(reason);
            }

            let repos = Repositories::from_store(Arc::new(connect(&config).await?));
            let hasher = CredentialHasher::new(PasswordConfig::from(&config.auth));
            let user = UserService::new(&repos, &hasher)
                .create_user(
                    AccountDraft {
                        email,
                        username,
                        password,
                    },
                    true,
                )
                .await
                .map_err(|e| anyhow::anyhow!("Could not create superuser: {e}"))?;

            println!("Superuser created");
            println!("ID:         {}", user.id);
            println!("Username:   {}", user.username);
            println!("Email:      {}", user.email);
            println!("Created At: {}", user.created_at);
        }
        Commands::SeedRbac { admin_password } => {
            let repos = Repositories::from_store(Arc::new(connect(&config).await?));
            let hasher = CredentialHasher::new(PasswordConfig::from(&config.auth));
            let report = seed_rbac(&repos, &hasher, &admin_password)
                .await
                .map_err(|e| anyhow::anyhow!("Seeding failed: {e}"))?;

            println!("Permissions created: {}", report.permissions_created);
            println!("Roles created:       {}", report.roles_created);
            if report.admin_created {
                println!("Created default user '{DEFAULT_ADMIN_USERNAME}'; change its password");
            } else {
                println!("User '{DEFAULT_ADMIN_USERNAME}' already exists");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("admin_2").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
        assert!(validate_username("bad-name").is_err());
        assert!(validate_username("spaced name").is_err());
    }

    #[test]
    fn test_superuser_rules() {
        assert!(validate_superuser("root", "root@x.com", "RootPass1").is_ok());
        assert_eq!(
            validate_superuser("root", "not-an-email", "RootPass1"),
            Err("Invalid email format")
        );
        assert_eq!(
            validate_superuser("root", "root@x.com", "short"),
            Err("Password must be at least 8 characters long")
        );
    }

    #[test]
    fn test_password_confirmation() {
        assert_eq!(
            confirm_password("RootPass1".to_string(), "RootPass1"),
            Ok("RootPass1".to_string())
        );
        assert_eq!(
            confirm_password("RootPass1".to_string(), "RootPass2"),
            Err("Passwords do not match")
        );
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::parse_from([
            "prodtrack",
            "create-superuser",
            "--username",
            "root",
            "--email",
            "root@x.com",
            "--password",
            "RootPass1",
        ]);
        match cli.command {
            Commands::CreateSuperuser { username, password, .. } => {
                assert_eq!(username, "root");
                assert_eq!(password.as_deref(), Some("RootPass1"));
            }
            _ => panic!("expected create-superuser"),
        }
    }
}
