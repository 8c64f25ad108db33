//! # Command Line Interface
//!
//! Operator tooling over the member database. Commands run as the local
//! operator against storage only: no identity provider or role ledger is
//! reachable from here, so provider sign-outs are logged and skipped.

use crate::auth::{password_violations, Actor, AuthCore};
use crate::config::{AppConfig, CONFIG_PATH_ENV};
use crate::domain::{MemberNumber, NewMember};
use crate::errors::ErrorContext;
use crate::observability::{init_observability, log_config_info};
use crate::storage::{create_pool, run_migrations, MemberRepository, SqlxMemberRepository};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::BufRead;
use std::process;
use tracing::Instrument;

#[derive(Parser)]
#[command(name = "memberauth")]
#[command(about = "Member credential and session security tooling")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (TOML), defaults to `$MEMBERAUTH_CONFIG`
    #[arg(short, long)]
    pub config: Option<String>,

    /// Database URL override
    #[arg(long)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Member records
    Member {
        #[command(subcommand)]
        command: MemberCommands,
    },

    /// Clear the failure counter and any lock on a member
    Unlock { member_number: String },

    /// Issue an admin magic link for a member
    MagicLink { member_number: String },

    /// Show or end the sessions of a member
    Sessions {
        member_number: String,

        /// Terminate every active session
        #[arg(long)]
        terminate: bool,
    },

    /// Show the security overview of a member
    Overview { member_number: String },

    /// Check a password read from stdin against the password policy
    CheckPassword,

    /// Toggle maintenance mode
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },
}

#[derive(Subcommand)]
pub enum MemberCommands {
    /// Register an active member
    Add {
        member_number: String,

        /// Require a new password at first sign-in
        #[arg(long)]
        require_reset: bool,
    },

    /// Set or clear the password reset requirement
    RequireReset {
        member_number: String,

        /// Clear the requirement instead of setting it
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand)]
pub enum MaintenanceCommands {
    /// Block member sign-in
    On {
        /// Message shown to blocked members
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Allow member sign-in again
    Off,

    /// Show the current state
    Status,
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config.or_else(|| std::env::var(CONFIG_PATH_ENV).ok());
    let mut config = AppConfig::load_from(path.as_deref())?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    if cli.json_logs {
        config.observability.json_logging = true;
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    init_observability(&config.observability)?;
    log_config_info(&config);

    match cli.command {
        Commands::CheckPassword => check_password_from_stdin(),
        Commands::Migrate => {
            let mut database = config.database.clone();
            database.auto_migrate = false;
            let pool = create_pool(&database).await?;
            run_migrations(&pool).await?;
            println!("Migrations completed successfully");
            Ok(())
        }
        command => {
            let pool = create_pool(&config.database).await.context("Opening member database")?;
            let core = AuthCore::offline(pool.clone(), &config.auth)?;
            let result = match command {
                Commands::Member { command } => {
                    handle_member_command(command, &SqlxMemberRepository::new(pool), &core)
                        .instrument(crate::auth_span!("cli_member"))
                        .await
                }
                other => {
                    handle_admin_command(other, &core)
                        .instrument(crate::auth_span!("cli_admin"))
                        .await
                }
            };
            core.shutdown();
            result
        }
    }
}

async fn handle_member_command(
    command: MemberCommands,
    members: &SqlxMemberRepository,
    core: &AuthCore,
) -> anyhow::Result<()> {
    match command {
        MemberCommands::Add { member_number, require_reset } => {
            let mut member = NewMember::active(MemberNumber::parse(&member_number)?);
            member.password_reset_required = require_reset;
            let created = members.create(member).await?;
            print_json(&created)
        }
        MemberCommands::RequireReset { member_number, clear } => {
            core.admin.require_password_reset(&Actor::Operator, &member_number, !clear).await?;
            println!(
                "Password reset {} for {}",
                if clear { "cleared" } else { "required" },
                member_number.trim().to_uppercase()
            );
            Ok(())
        }
    }
}

async fn handle_admin_command(command: Commands, core: &AuthCore) -> anyhow::Result<()> {
    let actor = Actor::Operator;

    match command {
        Commands::Unlock { member_number } => {
            core.admin.reset_login_state(&actor, &member_number).await?;
            println!("Login state reset for {}", member_number.trim().to_uppercase());
        }

        Commands::MagicLink { member_number } => {
            let result = core.resets.issue_magic_link(&actor, &member_number).await;
            print_json(&result)?;
            if !result.success {
                process::exit(1);
            }
        }

        Commands::Sessions { member_number, terminate } => {
            if terminate {
                let ended = core.admin.terminate_all(&actor, &member_number).await?;
                println!("Terminated {} session(s)", ended);
            } else {
                print_json(&core.admin.session_info(&actor, &member_number).await?)?;
            }
        }

        Commands::Overview { member_number } => {
            print_json(&core.admin.security_overview(&actor, &member_number).await?)?;
        }

        Commands::Maintenance { command } => match command {
            MaintenanceCommands::On { message } => {
                core.admin.set_maintenance(&actor, true, message).await?;
                println!("Maintenance mode enabled");
            }
            MaintenanceCommands::Off => {
                core.admin.set_maintenance(&actor, false, None).await?;
                println!("Maintenance mode disabled");
            }
            MaintenanceCommands::Status => {
                print_json(&core.admin.maintenance_status().await?)?;
            }
        },

        Commands::Migrate | Commands::CheckPassword | Commands::Member { .. } => {
            unreachable!("handled before the auth core is built")
        }
    }

    Ok(())
}

fn check_password_from_stdin() -> anyhow::Result<()> {
    let mut password = String::new();
    std::io::stdin().lock().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']);

    let violations = password_violations(password);
    if violations.is_empty() {
        println!("Password satisfies the policy");
        return Ok(());
    }

    for violation in &violations {
        let message = violation.message.as_deref().unwrap_or("invalid password");
        println!("{:<28} {}", violation.code, message);
    }
    process::exit(1);
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
