use crate::handlers::authorizer::Authorizer;
use crate::handlers::clock::Clock;
use crate::handlers::storage::{Storage, REVOKED_KEY, TOKEN_KEY, USER_KEY};
use crate::handlers::token::{
    decode_identity, decode_subject, is_structurally_valid, TokenError, TokenVerifier,
};
use crate::models::identity::Identity;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
const FINGERPRINT_LEN: usize = 16;

/// Settings shared by every store the process builds.
#[derive(Clone)]
pub struct StoreSettings {
    pub clock: Arc<dyn Clock>,
    /// Stored tokens older than this are evicted on read.
    pub max_age_secs: i64,
    pub verifier: Option<TokenVerifier>,
}

impl StoreSettings {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        StoreSettings {
            clock,
            max_age_secs: DEFAULT_MAX_AGE_DAYS * SECONDS_PER_DAY,
            verifier: None,
        }
    }

    /// Non-positive values leave nothing restorable; huge ones saturate.
    pub fn with_max_age_days(mut self, days: i64) -> Self {
        self.max_age_secs = days.max(0).saturating_mul(SECONDS_PER_DAY);
        self
    }

    pub fn with_verifier(mut self, verifier: Option<TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }
}

/// Wrapped form of the persisted token.
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    timestamp: i64,
    fingerprint: String,
}

/// Truncated SHA-1 of whatever identifies the client (its user agent).
pub fn fingerprint(source: &str) -> String {
    let digest = Sha1::digest(source.as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Reasons persisted data is thrown away instead of restored.
#[derive(Debug, Error)]
enum Discard {
    #[error("stored token entry is unreadable")]
    Unreadable,
    #[error("stored token is older than the maximum age")]
    TooOld,
    #[error("stored token belongs to a different client")]
    FingerprintMismatch,
    #[error("token expired")]
    Expired,
    #[error("token was signed out")]
    Revoked,
    #[error(transparent)]
    Token(#[from] TokenError),
}

struct Current {
    token: String,
    identity: Identity,
}

/// The one identity slot of a client.
///
/// Every failure inside the store degrades to "no identity"; nothing is
/// returned as an error to callers.
pub struct IdentityStore<S: Storage> {
    storage: S,
    settings: Arc<StoreSettings>,
    fingerprint: String,
    cookie_tokens: Vec<String>,
    current: Option<Current>,
    initialized: bool,
}

impl<S: Storage> IdentityStore<S> {
    pub fn new(storage: S, settings: Arc<StoreSettings>, fingerprint_source: &str) -> Self {
        IdentityStore {
            storage,
            settings,
            fingerprint: fingerprint(fingerprint_source),
            cookie_tokens: Vec::new(),
            current: None,
            initialized: false,
        }
    }

    /// Tokens from the `authToken`/`accessToken` cookies in order of
    /// preference. When primary storage holds nothing, `load` adopts the first
    /// one that restores.
    pub fn with_cookie_tokens<I>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.cookie_tokens = tokens.into_iter().filter(|t| !t.is_empty()).collect();
        self
    }

    /// Restores the persisted identity, or leaves the store empty.
    pub fn load(&mut self) -> Option<&Identity> {
        self.initialized = true;
        self.current = None;
        match self.restore() {
            Ok(Some(current)) => {
                debug!(
                    "[AUTH] restored identity {} ({})",
                    current.identity.id, current.identity.role
                );
                self.current = Some(current);
            }
            Ok(None) => {}
            Err(reason) => {
                warn!("[AUTH] discarding persisted identity: {}", reason);
                self.wipe();
            }
        }
        self.current.as_ref().map(|c| &c.identity)
    }

    /// Replaces the current identity and persists it. Call only after the
    /// backend accepted a login or registration.
    pub fn set(&mut self, token: impl Into<String>, identity: Identity) {
        let token = token.into();
        let now = self.settings.clock.now();
        self.persist_token(&token, now);
        self.persist_user(&identity);
        self.storage.remove(REVOKED_KEY);
        self.current = Some(Current { token, identity });
        self.initialized = true;
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.initialized = true;
        self.wipe();
    }

    /// Clears like [`clear`](Self::clear) and remembers the token in use, so
    /// an auth cookie still carrying it cannot sign the client back in.
    pub fn sign_out(&mut self) {
        let token = self.current.take().map(|c| c.token);
        self.clear();
        if let Some(token) = token {
            if let Err(e) = self.storage.set(REVOKED_KEY, &token) {
                warn!("[AUTH] {}", e);
            }
        }
    }

    pub fn now(&self) -> i64 {
        self.settings.clock.now()
    }

    pub fn verifier(&self) -> Option<&TokenVerifier> {
        self.settings.verifier.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_authenticated(&self) -> bool {
        let now = self.settings.clock.now();
        self.current
            .as_ref()
            .is_some_and(|c| !c.identity.is_expired(now))
    }

    /// Current identity; an expired one is cleared on the way out.
    pub fn identity(&mut self) -> Option<&Identity> {
        self.expire_if_due();
        self.current.as_ref().map(|c| &c.identity)
    }

    pub fn token(&mut self) -> Option<&str> {
        self.expire_if_due();
        self.current.as_ref().map(|c| c.token.as_str())
    }

    pub fn authorizer(&mut self) -> Authorizer<'_> {
        Authorizer::new(self.identity())
    }

    /// Owned copy of the current state, for readers that outlive the store.
    pub fn snapshot(&mut self) -> AuthSnapshot {
        self.expire_if_due();
        AuthSnapshot {
            identity: self.current.as_ref().map(|c| c.identity.clone()),
            token: self.current.as_ref().map(|c| c.token.clone()),
        }
    }

    fn expire_if_due(&mut self) {
        let now = self.settings.clock.now();
        if self.current.as_ref().is_some_and(|c| c.identity.is_expired(now)) {
            debug!("[AUTH] identity expired, clearing");
            self.clear();
        }
    }

    fn restore(&mut self) -> Result<Option<Current>, Discard> {
        let now = self.settings.clock.now();

        let raw = match self.storage.get(TOKEN_KEY) {
            Some(raw) => raw,
            None => return Ok(self.adopt_cookie_token(now)),
        };
        let (token, migrated) = match serde_json::from_str::<StoredToken>(&raw) {
            Ok(stored) => {
                if now.saturating_sub(stored.timestamp) > self.settings.max_age_secs {
                    return Err(Discard::TooOld);
                }
                if stored.fingerprint != self.fingerprint {
                    return Err(Discard::FingerprintMismatch);
                }
                (stored.token, false)
            }
            Err(_) if is_structurally_valid(&raw) => {
                debug!("[AUTH] migrating legacy token entry");
                (raw, true)
            }
            Err(_) => return Err(Discard::Unreadable),
        };

        let identity = self.resolve(&token, now)?;
        if migrated {
            self.persist_token(&token, now);
        }
        Ok(Some(Current { token, identity }))
    }

    fn adopt_cookie_token(&self, now: i64) -> Option<Current> {
        let revoked = self.storage.get(REVOKED_KEY);
        for token in &self.cookie_tokens {
            let outcome = if revoked.as_deref() == Some(token.as_str()) {
                Err(Discard::Revoked)
            } else {
                self.resolve(token, now)
            };
            match outcome {
                Ok(identity) => {
                    debug!("[AUTH] adopting cookie token");
                    self.persist_token(token, now);
                    return Some(Current {
                        token: token.clone(),
                        identity,
                    });
                }
                Err(reason) => debug!("[AUTH] ignoring cookie token: {}", reason),
            }
        }
        None
    }

    /// The identity behind `token`: the stored user object when it belongs to
    /// the same subject, otherwise the token's own claims.
    fn resolve(&self, token: &str, now: i64) -> Result<Identity, Discard> {
        let verifier = self.settings.verifier.as_ref();
        let subject = decode_subject(token, verifier)?;
        if subject.expires_at <= now {
            return Err(Discard::Expired);
        }

        let stored_user = self
            .storage
            .get(USER_KEY)
            .and_then(|raw| serde_json::from_str::<Identity>(&raw).ok())
            .filter(|user| user.id == subject.id && user.expires_at == subject.expires_at);
        if let Some(user) = stored_user {
            return Ok(user);
        }

        let decoded = decode_identity(token, verifier)?;
        self.persist_user(&decoded);
        Ok(decoded)
    }

    fn persist_token(&self, token: &str, now: i64) {
        let stored = StoredToken {
            token: token.to_string(),
            timestamp: now,
            fingerprint: self.fingerprint.clone(),
        };
        match serde_json::to_string(&stored) {
            Ok(raw) => {
                if let Err(e) = self.storage.set(TOKEN_KEY, &raw) {
                    warn!("[AUTH] {}", e);
                }
            }
            Err(e) => warn!("[AUTH] failed to serialize token entry: {}", e),
        }
    }

    fn persist_user(&self, identity: &Identity) {
        match serde_json::to_string(identity) {
            Ok(raw) => {
                if let Err(e) = self.storage.set(USER_KEY, &raw) {
                    warn!("[AUTH] {}", e);
                }
            }
            Err(e) => warn!("[AUTH] failed to serialize identity: {}", e),
        }
    }

    fn wipe(&self) {
        self.storage.remove(TOKEN_KEY);
        self.storage.remove(USER_KEY);
    }
}

/// Read-only copy of a store's state at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    identity: Option<Identity>,
    token: Option<String>,
}

impl AuthSnapshot {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn authorizer(&self) -> Authorizer<'_> {
        Authorizer::new(self.identity.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::clock::FixedClock;
    use crate::handlers::storage::MemoryStorage;
    use crate::models::identity::{Permission, PermissionGrant, Role};
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde_json::{json, Value};

    const NOW: i64 = 1_700_000_000;
    const UA: &str = "Mozilla/5.0 test";

    fn token(claims: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{body}.sig")
    }

    fn staff_token(exp: i64) -> String {
        token(json!({
            "id": "u1", "iat": NOW - 10, "exp": exp,
            "role": "staff", "branchId": "B1",
            "permissions": [{ "permission": "MANAGE_BRANCH_ORDERS", "branchId": "B1" }]
        }))
    }

    fn setup() -> (Arc<FixedClock>, Arc<StoreSettings>, MemoryStorage) {
        let clock = Arc::new(FixedClock::new(NOW));
        let settings = Arc::new(StoreSettings::new(clock.clone()));
        (clock, settings, MemoryStorage::new())
    }

    #[test]
    fn empty_storage_loads_nothing() {
        let (_, settings, storage) = setup();
        let mut store = IdentityStore::new(storage, settings, UA);
        assert!(!store.is_initialized());
        assert!(store.load().is_none());
        assert!(store.is_initialized());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn set_then_load_round_trips() {
        let (_, settings, storage) = setup();
        let tok = staff_token(NOW + 3600);
        let identity = decode_identity(&tok, None).unwrap();

        let mut first = IdentityStore::new(storage.clone(), settings.clone(), UA);
        first.set(tok.clone(), identity.clone());
        assert!(first.is_authenticated());

        let mut restarted = IdentityStore::new(storage, settings, UA);
        assert_eq!(restarted.load(), Some(&identity));
        assert_eq!(restarted.token(), Some(tok.as_str()));
    }

    #[test]
    fn stored_user_object_wins_over_token_claims() {
        let (_, settings, storage) = setup();
        let tok = staff_token(NOW + 3600);
        let mut identity = decode_identity(&tok, None).unwrap();
        identity.branch_name = Some("Downtown".into());
        identity
            .permissions
            .push(PermissionGrant::global(Permission::ViewReports));

        IdentityStore::new(storage.clone(), settings.clone(), UA).set(tok, identity.clone());
        let mut restarted = IdentityStore::new(storage, settings, UA);
        assert_eq!(restarted.load(), Some(&identity));
    }

    #[test]
    fn clear_is_idempotent() {
        let (_, settings, storage) = setup();
        let tok = staff_token(NOW + 3600);
        let mut store = IdentityStore::new(storage.clone(), settings, UA);
        store.set(tok.clone(), decode_identity(&tok, None).unwrap());

        store.clear();
        assert!(!store.is_authenticated());
        assert!(storage.is_empty());
        store.clear();
        assert!(!store.is_authenticated());
        assert!(storage.is_empty());
        assert!(store.identity().is_none());
    }

    #[test]
    fn token_expiring_now_is_expired() {
        let (_, settings, storage) = setup();
        storage.set(TOKEN_KEY, &staff_token(NOW)).unwrap();
        let mut store = IdentityStore::new(storage.clone(), settings, UA);
        assert!(store.load().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn expiry_is_checked_lazily_on_read() {
        let (clock, settings, storage) = setup();
        let tok = staff_token(NOW + 60);
        let mut store = IdentityStore::new(storage.clone(), settings, UA);
        store.set(tok.clone(), decode_identity(&tok, None).unwrap());
        assert!(store.identity().is_some());

        clock.advance(60);
        assert!(!store.is_authenticated());
        assert!(store.identity().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn legacy_raw_token_is_migrated() {
        let (_, settings, storage) = setup();
        let tok = staff_token(NOW + 3600);
        storage.set(TOKEN_KEY, &tok).unwrap();

        let mut store = IdentityStore::new(storage.clone(), settings, UA);
        let identity = store.load().cloned().unwrap();
        assert_eq!(identity.role, Role::Staff);

        let raw = storage.get(TOKEN_KEY).unwrap();
        let wrapped: StoredToken = serde_json::from_str(&raw).unwrap();
        assert_eq!(wrapped.token, tok);
        assert_eq!(wrapped.timestamp, NOW);
        assert_eq!(wrapped.fingerprint, fingerprint(UA));
        assert!(storage.get(USER_KEY).is_some());
    }

    #[test]
    fn garbage_entry_clears_storage() {
        let (_, settings, storage) = setup();
        storage.set(TOKEN_KEY, "{not json").unwrap();
        storage.set(USER_KEY, "{}").unwrap();
        let mut store = IdentityStore::new(storage.clone(), settings, UA);
        assert!(store.load().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn undecodable_token_clears_storage() {
        let (_, settings, storage) = setup();
        storage.set(TOKEN_KEY, "a.bm90IGpzb24.c").unwrap();
        let mut store = IdentityStore::new(storage.clone(), settings, UA);
        assert!(store.load().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn old_entries_are_evicted() {
        let (clock, settings, storage) = setup();
        let tok = staff_token(NOW + 30 * 24 * 3600);
        IdentityStore::new(storage.clone(), settings.clone(), UA)
            .set(tok.clone(), decode_identity(&tok, None).unwrap());

        clock.advance(DEFAULT_MAX_AGE_DAYS * 24 * 3600);
        assert!(IdentityStore::new(storage.clone(), settings.clone(), UA)
            .load()
            .is_some());

        clock.advance(1);
        assert!(IdentityStore::new(storage.clone(), settings, UA)
            .load()
            .is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn other_client_fingerprint_is_rejected() {
        let (_, settings, storage) = setup();
        let tok = staff_token(NOW + 3600);
        IdentityStore::new(storage.clone(), settings.clone(), UA)
            .set(tok.clone(), decode_identity(&tok, None).unwrap());

        let mut other = IdentityStore::new(storage.clone(), settings, "curl/8.0");
        assert!(other.load().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn cookie_token_is_a_fallback_and_gets_adopted() {
        let (_, settings, storage) = setup();
        let tok = staff_token(NOW + 3600);
        let mut store = IdentityStore::new(storage.clone(), settings.clone(), UA)
            .with_cookie_tokens([tok.clone()]);
        assert_eq!(store.load().map(|i| i.id.as_str()), Some("u1"));

        let mut restarted = IdentityStore::new(storage, settings, UA);
        assert!(restarted.load().is_some());
    }

    #[test]
    fn stale_first_cookie_falls_through_to_the_next() {
        let (_, settings, storage) = setup();
        let stale = staff_token(NOW - 1);
        let fresh = staff_token(NOW + 3600);
        let mut store = IdentityStore::new(storage.clone(), settings, UA)
            .with_cookie_tokens(["garbage".to_string(), stale, fresh.clone()]);
        assert!(store.load().is_some());
        assert_eq!(store.token(), Some(fresh.as_str()));
    }

    #[test]
    fn thin_token_restores_from_stored_user() {
        let (_, settings, storage) = setup();
        let tok = token(json!({ "id": "u1", "iat": NOW, "exp": NOW + 3600 }));
        assert!(decode_identity(&tok, None).is_err());
        let identity = Identity {
            id: "u1".into(),
            role: Role::Staff,
            user_type: Role::Staff.default_type(),
            mobile: None,
            branch_id: Some("B1".into()),
            branch_name: None,
            permissions: vec![],
            is_active: true,
            issued_at: NOW,
            expires_at: NOW + 3600,
        };

        IdentityStore::new(storage.clone(), settings.clone(), UA).set(tok.clone(), identity.clone());
        let mut restarted = IdentityStore::new(storage.clone(), settings.clone(), UA);
        assert_eq!(restarted.load(), Some(&identity));

        // without the stored user the token alone cannot say who this is
        storage.remove(USER_KEY);
        let mut bare = IdentityStore::new(storage.clone(), settings, UA);
        assert!(bare.load().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn stored_user_of_another_token_is_not_reused() {
        let (_, settings, storage) = setup();
        let old = staff_token(NOW + 60);
        let mut identity = decode_identity(&old, None).unwrap();
        identity.branch_name = Some("Downtown".into());
        IdentityStore::new(storage.clone(), settings.clone(), UA).set(old, identity);

        storage.remove(TOKEN_KEY);
        let renewed = staff_token(NOW + 3600);
        let mut store = IdentityStore::new(storage, settings, UA).with_cookie_tokens([renewed]);
        let loaded = store.load().cloned().unwrap();
        assert_eq!(loaded.expires_at, NOW + 3600);
        assert_eq!(loaded.branch_name, None);
    }

    #[test]
    fn signed_out_token_is_not_readopted_from_cookie() {
        let (_, settings, storage) = setup();
        let tok = staff_token(NOW + 3600);
        let mut store = IdentityStore::new(storage.clone(), settings.clone(), UA)
            .with_cookie_tokens([tok.clone()]);
        assert!(store.load().is_some());

        store.sign_out();
        assert!(!store.is_authenticated());
        assert_eq!(storage.get(TOKEN_KEY), None);
        assert_eq!(storage.get(USER_KEY), None);

        let mut again = IdentityStore::new(storage.clone(), settings.clone(), UA)
            .with_cookie_tokens([tok.clone()]);
        assert!(again.load().is_none());

        // a fresh login lifts the block
        again.set(tok.clone(), decode_identity(&tok, None).unwrap());
        assert_eq!(storage.get(REVOKED_KEY), None);
    }

    #[test]
    fn max_age_days_saturates_and_floors_at_zero() {
        let clock = Arc::new(FixedClock::new(NOW));
        assert_eq!(
            StoreSettings::new(clock.clone()).with_max_age_days(i64::MAX).max_age_secs,
            i64::MAX
        );
        assert_eq!(StoreSettings::new(clock).with_max_age_days(-3).max_age_secs, 0);
    }

    #[test]
    fn snapshot_carries_identity_and_token() {
        let (_, settings, storage) = setup();
        let tok = staff_token(NOW + 3600);
        let mut store = IdentityStore::new(storage, settings, UA);
        assert_eq!(store.snapshot(), AuthSnapshot::anonymous());

        store.set(tok.clone(), decode_identity(&tok, None).unwrap());
        let snapshot = store.snapshot();
        assert!(snapshot.is_authenticated());
        assert_eq!(snapshot.token(), Some(tok.as_str()));
        assert!(snapshot
            .authorizer()
            .has_permission(Permission::ManageBranchOrders, Some("B1")));
    }

    #[test]
    fn fingerprint_is_truncated_hex() {
        let fp = fingerprint("agent");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(fp, fingerprint("other agent"));
    }
}
