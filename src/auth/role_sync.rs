//! Role synchronization engine.
//!
//! Mirrors the authoritative role ledger into an in-process cache. Each entry
//! is an immutable `Arc` snapshot swapped in whole, so a reader either sees the
//! previous set or the new one and never a mix. Syncs for the same member are
//! serialized; different members sync in parallel.
//!
//! Authorization decisions go through [`RoleSyncEngine::resolve`] or
//! [`RoleSyncEngine::authorize`], which force a fresh sync whenever the cached
//! entry is missing or flagged stale.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::identity::{Actor, RoleLedger};
use crate::config::AuthConfig;
use crate::domain::{Capability, MemberId, RoleSet};
use crate::errors::{MemberAuthError, Result};
use crate::observability::{recorder, AUDIT_TARGET};
use crate::utils::{retry, with_timeout, KeyedLock, RetryPolicy};

/// One member's cached role snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCacheEntry {
    pub member_id: MemberId,
    pub roles: RoleSet,
    pub last_synced_at: DateTime<Utc>,
    /// Set when a sync failed or the ledger is known to have changed
    pub stale: bool,
}

#[derive(Debug, Default)]
pub struct RoleCache {
    entries: DashMap<MemberId, Arc<RoleCacheEntry>>,
}

impl RoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, member_id: &MemberId) -> Option<Arc<RoleCacheEntry>> {
        self.entries.get(member_id).map(|entry| entry.value().clone())
    }

    /// Swap in a fresh snapshot for the member
    pub fn replace(
        &self,
        member_id: &MemberId,
        roles: RoleSet,
        at: DateTime<Utc>,
    ) -> Arc<RoleCacheEntry> {
        let entry = Arc::new(RoleCacheEntry {
            member_id: member_id.clone(),
            roles,
            last_synced_at: at,
            stale: false,
        });
        self.entries.insert(member_id.clone(), entry.clone());
        entry
    }

    /// Flag the current snapshot as stale. Returns false when nothing is cached.
    pub fn mark_stale(&self, member_id: &MemberId) -> bool {
        match self.entries.get_mut(member_id) {
            Some(mut entry) => {
                if !entry.stale {
                    let mut next = RoleCacheEntry::clone(entry.value());
                    next.stale = true;
                    *entry = Arc::new(next);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, member_id: &MemberId) -> bool {
        self.entries.remove(member_id).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Roles as seen by an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoles {
    pub roles: RoleSet,
    /// True when the last sync failed and this is the last known set
    pub stale: bool,
    pub last_synced_at: DateTime<Utc>,
}

impl ResolvedRoles {
    fn from_entry(entry: &RoleCacheEntry) -> Self {
        Self {
            roles: entry.roles.clone(),
            stale: entry.stale,
            last_synced_at: entry.last_synced_at,
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.roles.allows(capability)
    }
}

#[derive(Clone)]
pub struct RoleSyncEngine {
    ledger: Arc<dyn RoleLedger>,
    cache: Arc<RoleCache>,
    policy: RetryPolicy,
    call_timeout: Duration,
    locks: Arc<KeyedLock<MemberId>>,
}

impl RoleSyncEngine {
    pub fn new(
        ledger: Arc<dyn RoleLedger>,
        cache: Arc<RoleCache>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self { ledger, cache, policy, call_timeout, locks: Arc::new(KeyedLock::new()) }
    }

    pub fn from_config(
        ledger: Arc<dyn RoleLedger>,
        cache: Arc<RoleCache>,
        config: &AuthConfig,
    ) -> Self {
        Self::new(
            ledger,
            cache,
            RetryPolicy::exponential(config.sync_max_attempts, config.sync_backoff_base()),
            config.call_timeout(),
        )
    }

    pub fn cache(&self) -> &Arc<RoleCache> {
        &self.cache
    }

    /// Fetch the member's roles from the ledger and replace the cache entry.
    ///
    /// After the retry budget is spent the entry (if any) is flagged stale and
    /// `RoleSync` is returned; a stale set is never reported as a success.
    #[instrument(skip(self), fields(member_id = %member_id), name = "role_sync")]
    pub async fn sync(&self, member_id: &MemberId) -> Result<RoleSet> {
        let _guard = self.locks.lock(member_id).await;
        let started = Instant::now();
        let mut attempts = 0;

        let fetched = retry(&self.policy, "fetch_roles", |attempt| {
            attempts = attempt;
            let ledger = self.ledger.clone();
            let member_id = member_id.clone();
            let limit = self.call_timeout;
            async move {
                with_timeout(limit, "fetch_roles", async { ledger.fetch_roles(&member_id).await })
                    .await
            }
        })
        .await;

        let elapsed = started.elapsed().as_secs_f64();
        match fetched {
            Ok(assignments) => {
                let roles: RoleSet = assignments
                    .into_iter()
                    .filter(|assignment| &assignment.member_id == member_id)
                    .map(|assignment| assignment.role)
                    .collect();
                self.cache.replace(member_id, roles.clone(), Utc::now());
                recorder().record_role_sync(true, attempts, elapsed);
                info!(
                    target: AUDIT_TARGET,
                    event = "roles_synced",
                    member_id = %member_id,
                    roles = %roles,
                    attempts,
                    "Role cache refreshed"
                );
                Ok(roles)
            }
            Err(e) => {
                let had_entry = self.cache.mark_stale(member_id);
                recorder().record_role_sync(false, attempts, elapsed);
                warn!(
                    member_id = %member_id,
                    attempts,
                    error = %e,
                    last_known_available = had_entry,
                    "Role sync failed, cache entry marked stale"
                );
                Err(MemberAuthError::role_sync(attempts, e.to_string()))
            }
        }
    }

    /// Run a sync in the background. The caller decides whether to await it.
    pub fn spawn_sync(&self, member_id: MemberId) -> JoinHandle<Result<RoleSet>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.sync(&member_id).await })
    }

    /// Roles for an authorization decision.
    ///
    /// A fresh cache entry is used as is. Otherwise a sync is forced; if that
    /// fails the last known set is returned flagged stale, and with no last
    /// known set the sync error is returned.
    pub async fn resolve(&self, member_id: &MemberId) -> Result<ResolvedRoles> {
        if let Some(entry) = self.cache.get(member_id).filter(|entry| !entry.stale) {
            return Ok(ResolvedRoles::from_entry(&entry));
        }

        match self.sync(member_id).await {
            Ok(roles) => Ok(self
                .cache
                .get(member_id)
                .map(|entry| ResolvedRoles::from_entry(&entry))
                .unwrap_or(ResolvedRoles { roles, stale: false, last_synced_at: Utc::now() })),
            Err(e) => match self.cache.get(member_id) {
                Some(entry) => {
                    warn!(
                        member_id = %member_id,
                        last_synced_at = %entry.last_synced_at,
                        "Using last known role set after failed sync"
                    );
                    Ok(ResolvedRoles::from_entry(&entry))
                }
                None => Err(e),
            },
        }
    }

    /// Require `capability` of the actor. The local operator is always allowed.
    pub async fn authorize(&self, actor: &Actor, capability: Capability) -> Result<()> {
        let member_id = match actor {
            Actor::Operator => return Ok(()),
            Actor::Member(id) => id,
        };

        let resolved = self.resolve(member_id).await?;
        if resolved.allows(capability) {
            return Ok(());
        }

        warn!(
            target: AUDIT_TARGET,
            event = "authorization_denied",
            member_id = %member_id,
            capability = ?capability,
            roles = %resolved.roles,
            "Actor lacks required capability"
        );
        Err(MemberAuthError::unauthorized(format!("Missing capability {:?}", capability)))
    }

    /// The ledger changed for this member: flag the entry and refresh it in the background.
    pub fn roles_changed(&self, member_id: &MemberId) -> JoinHandle<Result<RoleSet>> {
        self.cache.mark_stale(member_id);
        self.spawn_sync(member_id.clone())
    }

    pub fn cached(&self, member_id: &MemberId) -> Option<Arc<RoleCacheEntry>> {
        self.cache.get(member_id)
    }

    /// Drop the member's cached entry
    pub fn invalidate_local(&self, member_id: &MemberId) -> bool {
        self.cache.remove(member_id)
    }
}
