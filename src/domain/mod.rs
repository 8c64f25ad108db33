//! Domain layer
//!
//! Plain entities with no infrastructure dependencies beyond the SQLx type
//! impls on identifiers.
//!
//! ## Module Organization
//!
//! - `id`: Type-safe identifiers with NewType pattern
//! - `member`: Member identity, member numbers and lockout state
//! - `role`: Roles, role sets and capabilities
//! - `token`: Reset tokens and magic links
//! - `session`: Sessions and invalidation reasons

pub mod id;
pub mod member;
pub mod role;
pub mod session;
pub mod token;

pub use id::{MemberId, SessionId, TokenId};
pub use member::{LockoutState, MemberIdentity, MemberNumber, MemberStatus, NewMember};
pub use role::{Capability, Role, RoleAssignment, RoleSet};
pub use session::{InvalidationReason, InvalidationTarget, Session, SessionInfo};
pub use token::{digest_token, IssuedToken, ResetToken, ResetTokenStatus, TokenKind};
