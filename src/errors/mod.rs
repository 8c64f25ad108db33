//! # Error Handling
//!
//! Crate-wide error taxonomy. See [`types::MemberAuthError`].

pub mod types;

pub use types::{ErrorContext, MemberAuthError, Result};

/// Short alias used throughout the crate
pub type Error = MemberAuthError;
