//! Repository traits and their SQLx implementations

pub mod maintenance;
pub mod member;
pub mod reset_token;
pub mod session;

pub use maintenance::{MaintenanceRepository, MaintenanceStatus, SqlxMaintenanceRepository};
pub use member::{LockoutStore, MemberRepository, SqlxMemberRepository, VersionedLockout};
pub use reset_token::{ResetTokenRepository, SqlxResetTokenRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
