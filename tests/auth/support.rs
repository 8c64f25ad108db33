use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use memberauth::{
    auth::{AuthCore, ExternalSession, IdentityProvider, RoleLedger},
    config::{AuthConfig, DatabaseConfig},
    domain::{LockoutState, MemberId, MemberIdentity, MemberNumber, NewMember, Role, RoleAssignment},
    errors::{MemberAuthError, Result},
    storage::{create_pool, DbPool, LockoutStore, MemberRepository, SqlxMemberRepository},
};
use uuid::Uuid;

pub const DOMAIN: &str = "members.test";
pub const PASSWORD: &str = "Valid1Pass!";

/// In-memory identity provider keyed by login identifier.
#[derive(Default)]
pub struct FakeIdentityProvider {
    passwords: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashMap<String, String>>,
    signed_out_all: Mutex<HashSet<String>>,
    /// Upcoming `update_password` calls that fail with a transient error
    update_failures: AtomicU32,
    /// Upcoming `update_password` calls that commit, then hang past any call timeout
    update_stalls: AtomicU32,
    applied_updates: Mutex<Vec<String>>,
    fail_sign_out: AtomicBool,
    verify_calls: AtomicU32,
}

impl FakeIdentityProvider {
    pub fn set_password(&self, identifier: &str, password: &str) {
        self.passwords.lock().unwrap().insert(identifier.to_string(), password.to_string());
    }

    pub fn password_of(&self, identifier: &str) -> Option<String> {
        self.passwords.lock().unwrap().get(identifier).cloned()
    }

    pub fn fail_next_updates(&self, count: u32) {
        self.update_failures.store(count, Ordering::SeqCst);
    }

    pub fn stall_next_updates(&self, count: u32) {
        self.update_stalls.store(count, Ordering::SeqCst);
    }

    /// Every password the provider accepted, in order
    pub fn applied_updates(&self) -> Vec<String> {
        self.applied_updates.lock().unwrap().clone()
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn expire_session(&self, reference: &str) {
        self.sessions.lock().unwrap().remove(reference);
    }

    pub fn signed_out_all(&self, identifier: &str) -> bool {
        self.signed_out_all.lock().unwrap().contains(identifier)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn verify_credential(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<Option<ExternalSession>> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let matches = self.passwords.lock().unwrap().get(identifier).is_some_and(|p| p == secret);
        if !matches {
            return Ok(None);
        }
        let reference = Uuid::new_v4().to_string();
        self.sessions.lock().unwrap().insert(reference.clone(), identifier.to_string());
        Ok(Some(ExternalSession { reference, subject: identifier.to_string() }))
    }

    async fn update_password(&self, identifier: &str, new_secret: &str) -> Result<()> {
        let pending = self.update_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.update_failures.store(pending - 1, Ordering::SeqCst);
            return Err(MemberAuthError::transient("update_password", "provider busy"));
        }
        self.set_password(identifier, new_secret);
        self.applied_updates.lock().unwrap().push(new_secret.to_string());

        let stalls = self.update_stalls.load(Ordering::SeqCst);
        if stalls > 0 {
            self.update_stalls.store(stalls - 1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        Ok(())
    }

    async fn sign_out(&self, reference: &str) -> Result<()> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(MemberAuthError::transient("sign_out", "provider unreachable"));
        }
        self.sessions.lock().unwrap().remove(reference);
        Ok(())
    }

    async fn sign_out_all(&self, identifier: &str) -> Result<()> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(MemberAuthError::transient("sign_out_all", "provider unreachable"));
        }
        self.sessions.lock().unwrap().retain(|_, owner| owner != identifier);
        self.signed_out_all.lock().unwrap().insert(identifier.to_string());
        Ok(())
    }

    async fn session_alive(&self, reference: &str) -> Result<bool> {
        Ok(self.sessions.lock().unwrap().contains_key(reference))
    }
}

/// Role ledger with injectable transient failures.
#[derive(Default)]
pub struct FakeRoleLedger {
    roles: Mutex<HashMap<MemberId, Vec<Role>>>,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FakeRoleLedger {
    pub fn assign(&self, member_id: &MemberId, roles: &[Role]) {
        self.roles.lock().unwrap().insert(member_id.clone(), roles.to_vec());
    }

    /// The next `count` fetches fail with a transient error
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleLedger for FakeRoleLedger {
    async fn fetch_roles(&self, member_id: &MemberId) -> Result<Vec<RoleAssignment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(MemberAuthError::transient("fetch_roles", "ledger contention"));
        }
        let roles = self.roles.lock().unwrap().get(member_id).cloned().unwrap_or_default();
        Ok(roles
            .into_iter()
            .map(|role| RoleAssignment {
                member_id: member_id.clone(),
                role,
                assigned_at: Utc::now(),
            })
            .collect())
    }
}

pub struct TestCore {
    pub core: AuthCore,
    pub pool: DbPool,
    pub members: SqlxMemberRepository,
    pub provider: Arc<FakeIdentityProvider>,
    pub ledger: Arc<FakeRoleLedger>,
    pub config: AuthConfig,
}

pub fn test_config() -> AuthConfig {
    AuthConfig {
        sync_backoff_base_ms: 10,
        call_timeout_seconds: 5,
        public_base_url: "https://portal.example.org".to_string(),
        auth_email_domain: DOMAIN.to_string(),
        ..AuthConfig::default()
    }
}

pub async fn setup() -> TestCore {
    setup_with(test_config()).await
}

pub async fn setup_with(config: AuthConfig) -> TestCore {
    let pool = create_pool(&DatabaseConfig::in_memory()).await.expect("create sqlite pool");
    let provider = Arc::new(FakeIdentityProvider::default());
    let ledger = Arc::new(FakeRoleLedger::default());
    let core = AuthCore::new(pool.clone(), &config, provider.clone(), ledger.clone())
        .expect("build auth core");

    TestCore {
        core,
        members: SqlxMemberRepository::new(pool.clone()),
        pool,
        provider,
        ledger,
        config,
    }
}

impl TestCore {
    /// Register an active member with a provider password and the member role.
    pub async fn add_member(&self, number: &str, password: &str) -> MemberIdentity {
        let member = self
            .members
            .create(NewMember::active(MemberNumber::parse(number).expect("member number")))
            .await
            .expect("create member");
        self.provider.set_password(&self.identifier(&member), password);
        self.ledger.assign(&member.id, &[Role::Member]);
        member
    }

    pub async fn add_admin(&self, number: &str) -> MemberIdentity {
        let admin = self.add_member(number, PASSWORD).await;
        self.ledger.assign(&admin.id, &[Role::Admin]);
        admin
    }

    pub fn identifier(&self, member: &MemberIdentity) -> String {
        member.login_identifier(DOMAIN)
    }

    pub async fn reload(&self, member: &MemberIdentity) -> MemberIdentity {
        self.members.get(&member.id).await.expect("load member").expect("member exists")
    }

    /// Overwrite the stored lockout state, bypassing the policy
    pub async fn force_lockout(&self, member: &MemberIdentity, state: LockoutState) {
        let current = self.members.load(&member.id).await.expect("load lockout").expect("member");
        assert!(self
            .members
            .compare_and_set(&member.id, current.version, state)
            .await
            .expect("write lockout"));
    }
}

/// Raw token carried in the `token` query parameter of a reset link
pub fn token_from_link(link: &str) -> String {
    let url = url::Url::parse(link).expect("reset link is a URL");
    url.query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .expect("reset link carries a token")
}
