//! In-process session vault with version-checked expiry.
//!
//! Each `unlock` stamps its session with a fresh version and spawns one
//! eviction task carrying that version. When the task fires it takes the write
//! lock and removes the session only if the stored version still matches, so a
//! timer left over from a superseded session can never evict its successor.
//! Aborting the old task on supersession is only an optimisation; correctness
//! rests on the version check.
//!
//! The lock guards nothing but map updates and key-sized copies. KDF work and
//! storage I/O happen before `unlock` / after `peek`, never under it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use passportier_core::UserId;
use passportier_crypto::KeyMaterial;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use super::SessionStore;
use crate::error::{VaultError, VaultResult};

type SessionMap = RwLock<HashMap<UserId, Session>>;

struct Session {
    material: KeyMaterial,
    version: u64,
    expires_at: Instant,
    eviction: Option<AbortHandle>,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(timer) = self.eviction.take() {
            timer.abort();
        }
        self.material.wipe();
        #[cfg(test)]
        tests::record_wipe(&self.material);
    }
}

/// Thread-safe, TTL-bounded map of user → unlocked key material.
///
/// Must be used from within a Tokio runtime (eviction timers are spawned tasks).
pub struct SessionVault {
    sessions: Arc<SessionMap>,
    next_version: AtomicU64,
}

impl SessionVault {
    pub fn new() -> Self {
        SessionVault {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_version: AtomicU64::new(1),
        }
    }

    /// Install a new session, wiping and replacing any existing one.
    /// Returns the version token assigned to the new session.
    pub fn install(&self, user_id: UserId, material: KeyMaterial, ttl: Duration) -> u64 {
        let weak = Arc::downgrade(&self.sessions);

        let mut map = write(&self.sessions);
        // Versions are drawn under the lock so install order matches version order.
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        // Spawned under the lock: even a zero TTL cannot fire before the insert.
        let timer = tokio::spawn(evict_after(weak, user_id, version, ttl));
        let session = Session {
            material,
            version,
            expires_at: deadline(ttl),
            eviction: Some(timer.abort_handle()),
        };
        if let Some(previous) = map.insert(user_id, session) {
            debug!(user_id, old_version = previous.version, "session superseded");
            drop(previous);
        }
        version
    }

    /// Copy of the live material, if any. Never extends the TTL.
    pub fn get(&self, user_id: UserId) -> Option<KeyMaterial> {
        let map = read(&self.sessions);
        map.get(&user_id)
            .filter(|s| s.expires_at > Instant::now())
            .map(|s| s.material.clone())
    }

    /// Remove and wipe the user's session. Returns whether one was live.
    pub fn remove(&self, user_id: UserId) -> bool {
        let removed = write(&self.sessions).remove(&user_id);
        match removed {
            Some(session) => {
                let live = session.expires_at > Instant::now();
                drop(session);
                live
            }
            None => false,
        }
    }

    /// Version token of the user's current session.
    pub fn version(&self, user_id: UserId) -> Option<u64> {
        read(&self.sessions).get(&user_id).map(|s| s.version)
    }

    /// Number of sessions currently held (including any whose timer is due).
    pub fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionVault {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionVault {
    fn drop(&mut self) {
        write(&self.sessions).clear();
    }
}

#[async_trait]
impl SessionStore for SessionVault {
    async fn unlock(
        &self,
        user_id: UserId,
        material: KeyMaterial,
        ttl: Duration,
    ) -> VaultResult<()> {
        self.install(user_id, material, ttl);
        Ok(())
    }

    async fn peek(&self, user_id: UserId) -> VaultResult<KeyMaterial> {
        self.get(user_id).ok_or(VaultError::SessionNotFound)
    }

    async fn lock(&self, user_id: UserId) -> VaultResult<bool> {
        Ok(self.remove(user_id))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// `now + ttl`, saturating at a far-future instant instead of overflowing.
fn deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

async fn evict_after(sessions: Weak<SessionMap>, user_id: UserId, version: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;
    if let Some(sessions) = sessions.upgrade() {
        expire(&sessions, user_id, version);
    }
}

/// Timer callback: drop the session only if it is still the one this timer was armed for.
fn expire(sessions: &SessionMap, user_id: UserId, version: u64) {
    let mut map = write(sessions);
    match map.get_mut(&user_id) {
        Some(current) if current.version == version => {
            // This task is the eviction; nothing left to abort.
            current.eviction = None;
            map.remove(&user_id);
            debug!(user_id, version, "session expired");
        }
        Some(current) => {
            debug!(
                user_id,
                stale_version = version,
                live_version = current.version,
                "stale eviction timer ignored"
            );
        }
        None => {}
    }
}

// Every mutation is a single insert or remove, so a poisoned map is still consistent.
fn read(lock: &SessionMap) -> RwLockReadGuard<'_, HashMap<UserId, Session>> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(lock: &SessionMap) -> RwLockWriteGuard<'_, HashMap<UserId, Session>> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use passportier_crypto::DerivedKey;
    use secrecy::SecretString;

    fn pass(s: &str) -> KeyMaterial {
        KeyMaterial::from_passphrase(&SecretString::from(s))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_then_peek_returns_material() {
        let vault = SessionVault::new();
        vault.install(42, pass("pw"), Duration::from_secs(60));
        let material = vault.peek(42).await.unwrap();
        assert_eq!(material.expose_bytes(), b"pw");
    }

    #[tokio::test(start_paused = true)]
    async fn peek_unknown_user_is_session_not_found() {
        let vault = SessionVault::new();
        assert!(matches!(
            vault.peek(7).await,
            Err(VaultError::SessionNotFound)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn session_expires_after_ttl() {
        let vault = SessionVault::new();
        vault.install(1, pass("pw"), ms(100));

        tokio::time::sleep(ms(99)).await;
        assert!(vault.get(1).is_some());

        tokio::time::sleep(ms(5)).await;
        assert!(vault.get(1).is_none());
        assert!(vault.is_empty(), "timer must remove the entry, not just hide it");
    }

    #[tokio::test(start_paused = true)]
    async fn reunlock_before_expiry_survives_old_timer() {
        let vault = SessionVault::new();
        vault.install(1, pass("pw1"), ms(100));

        tokio::time::sleep(ms(50)).await;
        vault.install(1, pass("pw2"), ms(100));

        // 120ms total: the first timer (due at 100ms) has fired and must have been ignored.
        tokio::time::sleep(ms(70)).await;
        let material = vault.get(1).expect("second session must survive the first timer");
        assert_eq!(material.expose_bytes(), b"pw2");

        // Second timer (due at 150ms) still applies.
        tokio::time::sleep(ms(40)).await;
        assert!(vault.get(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_is_ignored_even_if_not_aborted() {
        let vault = SessionVault::new();
        let old = vault.install(1, pass("old"), ms(100));
        let new = vault.install(1, pass("new"), ms(1000));
        assert!(new > old);

        // Simulate the abort losing the race: fire the old timer's callback directly.
        expire(&vault.sessions, 1, old);
        assert_eq!(vault.get(1).unwrap().expose_bytes(), b"new");

        expire(&vault.sessions, 1, new);
        assert!(vault.get(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn versions_are_monotonic() {
        let vault = SessionVault::new();
        let a = vault.install(1, pass("a"), ms(100));
        let b = vault.install(2, pass("b"), ms(100));
        let c = vault.install(1, pass("c"), ms(100));
        assert!(a < b && b < c);
        assert_eq!(vault.version(1), Some(c));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_reports_whether_session_existed() {
        let vault = SessionVault::new();
        assert!(!vault.lock(1).await.unwrap(), "nothing to lock");

        vault.install(1, pass("pw"), Duration::from_secs(60));
        assert!(vault.lock(1).await.unwrap());
        assert!(vault.get(1).is_none());

        assert!(!vault.lock(1).await.unwrap(), "lock is idempotent");
    }

    #[tokio::test(start_paused = true)]
    async fn lock_then_old_timer_does_nothing() {
        let vault = SessionVault::new();
        let version = vault.install(1, pass("pw"), ms(100));
        vault.remove(1);
        vault.install(2, pass("other"), Duration::from_secs(60));

        expire(&vault.sessions, 1, version);
        tokio::time::sleep(ms(200)).await;
        assert!(vault.get(2).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn peek_returns_independent_copy() {
        let vault = SessionVault::new();
        vault.install(1, pass("pw"), Duration::from_secs(60));

        let mut copy = vault.get(1).unwrap();
        copy.wipe();

        assert_eq!(vault.get(1).unwrap().expose_bytes(), b"pw");
    }

    #[tokio::test(start_paused = true)]
    async fn peek_does_not_refresh_ttl() {
        let vault = SessionVault::new();
        vault.install(1, pass("pw"), ms(100));
        for _ in 0..9 {
            tokio::time::sleep(ms(10)).await;
            assert!(vault.get(1).is_some());
        }
        tokio::time::sleep(ms(20)).await;
        assert!(vault.get(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_saturates_instead_of_panicking() {
        let vault = SessionVault::new();
        vault
            .unlock(1, pass("pw"), Duration::from_secs(u64::MAX))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(365 * 86400)).await;
        assert_eq!(vault.peek(1).await.unwrap().expose_bytes(), b"pw");
        assert!(vault.lock(1).await.unwrap());
    }

    thread_local! {
        static WIPED: Cell<usize> = const { Cell::new(0) };
    }

    /// Counts sessions whose buffer is all zeros when they are dropped.
    pub(super) fn record_wipe(material: &KeyMaterial) {
        if material.expose_bytes().iter().all(|b| *b == 0) {
            WIPED.with(|w| w.set(w.get() + 1));
        }
    }

    fn wiped() -> usize {
        WIPED.with(Cell::get)
    }

    fn key(byte: u8) -> KeyMaterial {
        KeyMaterial::from_key(DerivedKey::from_bytes([byte; 32]))
    }

    #[tokio::test(start_paused = true)]
    async fn supersession_wipes_previous_session() {
        let vault = SessionVault::new();
        vault.install(1, key(0xA1), Duration::from_secs(60));
        let before = wiped();

        vault.install(1, key(0xA2), Duration::from_secs(60));
        assert_eq!(wiped(), before + 1);
        assert_eq!(vault.get(1).unwrap().expose_bytes(), &[0xA2; 32]);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_wipes_session() {
        let vault = SessionVault::new();
        vault.install(1, key(0xB1), Duration::from_secs(60));
        let before = wiped();

        assert!(vault.remove(1));
        assert_eq!(wiped(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_wipes_session() {
        let vault = SessionVault::new();
        vault.install(1, key(0xC1), ms(100));
        let before = wiped();

        tokio::time::sleep(ms(150)).await;
        assert!(vault.is_empty());
        assert_eq!(wiped(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_session_carries_the_highest_version() {
        let vault = SessionVault::new();
        let mut last = 0;
        for i in 0..5u8 {
            let version = vault.install(1, key(i + 1), Duration::from_secs(60));
            assert!(version > last);
            assert_eq!(vault.version(1), Some(version));
            last = version;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn users_are_independent() {
        let vault = SessionVault::new();
        vault.install(1, pass("one"), ms(100));
        vault.install(2, pass("two"), Duration::from_secs(60));

        tokio::time::sleep(ms(150)).await;
        assert!(vault.get(1).is_none());
        assert_eq!(vault.get(2).unwrap().expose_bytes(), b"two");
    }

    #[tokio::test(start_paused = true)]
    async fn derived_key_material_roundtrips() {
        let vault = SessionVault::new();
        let key = KeyMaterial::from_key(DerivedKey::from_bytes([5u8; 32]));
        vault.install(1, key, Duration::from_secs(60));
        let material = vault.get(1).unwrap();
        assert!(material.is_derived_key());
        assert_eq!(material.expose_bytes(), &[5u8; 32]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_unlocks_leave_exactly_one_session() {
        let vault = Arc::new(SessionVault::new());
        let mut handles = Vec::new();
        for i in 0..32u8 {
            let vault = vault.clone();
            handles.push(tokio::spawn(async move {
                let key = KeyMaterial::from_key(DerivedKey::from_bytes([i; 32]));
                vault.install(9, key, Duration::from_secs(60))
            }));
        }
        let mut highest = 0;
        for h in handles {
            highest = highest.max(h.await.unwrap());
        }
        assert_eq!(vault.len(), 1);
        assert_eq!(vault.version(9), Some(highest), "last install must hold the newest version");
        let live = vault.get(9).unwrap();
        let byte = live.expose_bytes()[0];
        assert!(live.expose_bytes().iter().all(|b| *b == byte));
    }
}
