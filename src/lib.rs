//! # memberauth
//!
//! Credential and session security core for a membership platform. Members
//! sign in with a member number and password checked against an external
//! identity provider; this crate owns everything around that check.
//!
//! ## Architecture
//!
//! ```text
//! CredentialVerifier ──► LockoutPolicy ──► members table (versioned lockout)
//!        │                                        ▲
//!        ├──► SessionManager ◄── PasswordResetCoordinator ──► ResetTokenIssuer
//!        │          │
//!        └──► RoleSyncEngine ──► RoleLedger (external)
//! ```
//!
//! ## Core Components
//!
//! - **Lockout Policy**: counts consecutive failures and locks for a window
//! - **Credential Verifier**: maintenance gate, lookup, lockout, provider check
//! - **Password Reset Coordinator**: self-service change, token reset, magic links
//! - **Session Manager**: establishment, idempotent invalidation, sign-out
//! - **Role Sync Engine**: cached role sets with bounded retry and stale fallback
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use memberauth::{auth::AuthCore, storage::create_pool, AppConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load()?;
//!     let pool = create_pool(&config.database).await?;
//!     let core = AuthCore::offline(pool, &config.auth)?;
//!     core.admin.maintenance_status().await?;
//!     core.shutdown();
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod storage;
pub mod utils;

// Re-export commonly used types and traits
pub use auth::AuthCore;
pub use config::{AppConfig, AuthConfig};
pub use errors::{Error, MemberAuthError, Result};
pub use observability::init_observability;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
