use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::biometrics::Biometrics;
use super::pin::{check_pin, hash_pin, PinCheck};
use super::secrets::{SecretKey, SecretStore};
use crate::api::TokenRefresher;
use crate::models::{TokenPair, User};

/// Value persisted under `SecretKey::BiometryEnabled` when enabled
const FLAG_TRUE: &str = "true";

const BIOMETRIC_ENROLL_REASON: &str = "Confirm to enable biometric unlock";
const BIOMETRIC_UNLOCK_REASON: &str = "Unlock hrdesk";

/// In-memory view of the session and the local unlock gate.
#[derive(Clone, Default, PartialEq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
    pub has_pin: bool,
    pub biometry_enabled: bool,
    pub is_unlocked: bool,
    /// True until `bootstrap` has finished
    pub is_hydrating: bool,
    pub signed_in_at: Option<DateTime<Utc>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn hydrating() -> Self {
        Self {
            is_hydrating: true,
            ..Self::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Signed in but behind the PIN/biometric gate
    pub fn is_locked(&self) -> bool {
        self.is_authenticated() && !self.is_unlocked
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("authenticated", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("user", &self.user.as_ref().map(|u| u.id.as_str()))
            .field("has_pin", &self.has_pin)
            .field("biometry_enabled", &self.biometry_enabled)
            .field("is_unlocked", &self.is_unlocked)
            .field("is_hydrating", &self.is_hydrating)
            .finish()
    }
}

/// Owner of the session lifecycle and of every persisted secret.
///
/// Construct once at startup and share through `Arc`. Mutations are
/// serialized by `writer`; each one persists first and then swaps the
/// in-memory state, so readers see either the old or the new session.
pub struct SessionStore {
    secrets: Arc<dyn SecretStore>,
    biometrics: Arc<dyn Biometrics>,
    state: RwLock<SessionState>,
    writer: Mutex<()>,
}

impl SessionStore {
    pub fn new(secrets: Arc<dyn SecretStore>, biometrics: Arc<dyn Biometrics>) -> Self {
        Self {
            secrets,
            biometrics,
            state: RwLock::new(SessionState::hydrating()),
            writer: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state.read().await.refresh_token.clone()
    }

    pub async fn user(&self) -> Option<User> {
        self.state.read().await.user.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_authenticated()
    }

    pub async fn is_biometrics_available(&self) -> bool {
        self.biometrics.is_available()
    }

    // ===== Lifecycle =====

    /// Restore the persisted session at process start.
    ///
    /// A stored refresh token is always exchanged once; if that fails every
    /// secret is erased. Never leaves the store hydrating.
    pub async fn bootstrap(&self, refresher: &dyn TokenRefresher) {
        let _guard = self.writer.lock().await;
        let next = match self.hydrate(refresher).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Session bootstrap failed, starting signed out");
                SessionState::default()
            }
        };
        debug!(state = ?next, "Session hydrated");
        *self.state.write().await = next;
    }

    async fn hydrate(&self, refresher: &dyn TokenRefresher) -> Result<SessionState> {
        let access_token = self.get_secret(SecretKey::AccessToken)?;
        let refresh_token = self.get_secret(SecretKey::RefreshToken)?;
        let user = self.load_user()?;
        let has_pin = self.get_secret(SecretKey::Pin)?.is_some();
        let biometry_enabled =
            self.get_secret(SecretKey::BiometryEnabled)?.as_deref() == Some(FLAG_TRUE);

        let Some(refresh_token) = refresh_token else {
            let is_unlocked = !has_pin && access_token.is_some();
            return Ok(SessionState {
                access_token,
                refresh_token: None,
                user,
                has_pin,
                biometry_enabled,
                is_unlocked,
                ..SessionState::default()
            });
        };

        match refresher.refresh_tokens(&refresh_token).await {
            Ok(tokens) => {
                self.persist_tokens(&tokens)?;
                info!("Stored session refreshed");
                Ok(SessionState {
                    access_token: Some(tokens.access_token),
                    refresh_token: tokens.refresh_token,
                    user,
                    has_pin,
                    biometry_enabled,
                    is_unlocked: !has_pin,
                    refreshed_at: Some(Utc::now()),
                    ..SessionState::default()
                })
            }
            Err(e) => {
                warn!(error = %e, "Stored session could not be refreshed, signing out");
                self.erase_secrets()?;
                Ok(SessionState::default())
            }
        }
    }

    /// Install a freshly issued session (login). Always unlocks.
    pub async fn set_session(&self, tokens: TokenPair, user: User) -> Result<()> {
        let _guard = self.writer.lock().await;
        let user_json = serde_json::to_string(&user).context("Failed to serialize user")?;
        self.persist_tokens(&tokens)?;
        self.secrets.set(SecretKey::User, &user_json)?;

        let mut state = self.state.write().await;
        state.access_token = Some(tokens.access_token);
        state.refresh_token = tokens.refresh_token;
        state.user = Some(user);
        state.is_unlocked = true;
        state.is_hydrating = false;
        state.signed_in_at = Some(Utc::now());
        state.refreshed_at = None;
        info!(user_id = ?state.user.as_ref().map(|u| &u.id), "Session started");
        Ok(())
    }

    /// Apply a refreshed token pair, keeping the user and the unlock state.
    ///
    /// Returns `false` without writing when the session no longer holds
    /// `used_refresh_token` (signed out or rotated while the refresh was in
    /// flight).
    pub async fn update_tokens(&self, used_refresh_token: &str, tokens: TokenPair) -> Result<bool> {
        let _guard = self.writer.lock().await;
        if self.state.read().await.refresh_token.as_deref() != Some(used_refresh_token) {
            debug!("Session changed during refresh, discarding new tokens");
            return Ok(false);
        }
        self.persist_tokens(&tokens)?;

        let mut state = self.state.write().await;
        state.access_token = Some(tokens.access_token);
        state.refresh_token = tokens.refresh_token;
        state.refreshed_at = Some(Utc::now());
        debug!("Session tokens updated");
        Ok(true)
    }

    /// Sign out after `used_refresh_token` was rejected.
    ///
    /// Returns `false` without touching anything when the session no longer
    /// holds that token, so a late failure cannot end a newer session.
    pub async fn clear_session_if(&self, used_refresh_token: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        if self.state.read().await.refresh_token.as_deref() != Some(used_refresh_token) {
            debug!("Session changed during refresh, keeping it");
            return Ok(false);
        }
        let result = self.erase_secrets();
        *self.state.write().await = SessionState::default();
        info!("Session cleared after refresh failure");
        result.map(|_| true)
    }

    /// Erase every secret and reset to signed out. Safe to call repeatedly.
    ///
    /// The in-memory state is reset even when a keychain delete fails; the
    /// first failure is returned.
    pub async fn clear_session(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        let result = self.erase_secrets();
        *self.state.write().await = SessionState::default();
        info!("Session cleared");
        result
    }

    // ===== PIN =====

    pub async fn set_pin(&self, pin: &str) -> Result<()> {
        anyhow::ensure!(!pin.is_empty(), "PIN must not be empty");
        let pin = pin.to_string();
        let hashed = tokio::task::spawn_blocking(move || hash_pin(&pin))
            .await
            .context("PIN hashing task failed")??;

        let _guard = self.writer.lock().await;
        self.secrets.set(SecretKey::Pin, &hashed)?;
        self.state.write().await.has_pin = true;
        debug!("PIN configured");
        Ok(())
    }

    /// Unlocks on an exact match. A wrong PIN is `Ok(false)` and changes
    /// nothing.
    pub async fn verify_pin(&self, pin: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let Some(stored) = self.get_secret(SecretKey::Pin)? else {
            return Ok(false);
        };

        let candidate = pin.to_string();
        let (check, rehashed) = tokio::task::spawn_blocking(move || {
            let check = check_pin(&candidate, &stored);
            let rehashed = match check {
                PinCheck::MatchNeedsRehash => Some(hash_pin(&candidate)),
                _ => None,
            };
            (check, rehashed)
        })
        .await
        .context("PIN check task failed")?;

        if !check.is_match() {
            debug!("Incorrect PIN");
            return Ok(false);
        }
        if let Some(rehashed) = rehashed {
            if let Err(e) = rehashed.and_then(|h| self.secrets.set(SecretKey::Pin, &h)) {
                warn!(error = %e, "Failed to upgrade stored PIN");
            }
        }
        self.state.write().await.is_unlocked = true;
        Ok(true)
    }

    pub async fn set_unlocked(&self, value: bool) {
        let _guard = self.writer.lock().await;
        self.state.write().await.is_unlocked = value;
    }

    // ===== Biometrics =====

    /// Enroll biometric unlock. Every platform failure is `false`.
    pub async fn enable_biometrics(&self) -> bool {
        if !self.biometrics.is_available() {
            debug!("Biometrics unavailable");
            return false;
        }
        if let Err(e) = self.biometrics.authenticate(BIOMETRIC_ENROLL_REASON).await {
            debug!(error = %e, "Biometric enrollment not confirmed");
            return false;
        }

        let marker = new_marker();
        let _guard = self.writer.lock().await;
        let persisted = self
            .secrets
            .set(SecretKey::BiometryMarker, &marker)
            .and_then(|_| self.secrets.set(SecretKey::BiometryEnabled, FLAG_TRUE));
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to store biometric marker");
            let _ = self.secrets.delete(SecretKey::BiometryMarker);
            return false;
        }
        self.state.write().await.biometry_enabled = true;
        info!("Biometric unlock enabled");
        true
    }

    pub async fn disable_biometrics(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        let flag = self.secrets.delete(SecretKey::BiometryEnabled);
        let marker = self.secrets.delete(SecretKey::BiometryMarker);
        self.state.write().await.biometry_enabled = false;
        flag.and(marker)
    }

    /// Unlock behind the biometric prompt. Cancellation and every other
    /// failure are `false` with the state untouched.
    pub async fn unlock_with_biometrics(&self) -> bool {
        let enabled = self.state.read().await.biometry_enabled;
        if !enabled {
            return false;
        }
        if let Err(e) = self.biometrics.authenticate(BIOMETRIC_UNLOCK_REASON).await {
            debug!(error = %e, "Biometric unlock failed");
            return false;
        }

        let _guard = self.writer.lock().await;
        match self.get_secret(SecretKey::BiometryMarker) {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Biometric marker missing");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read biometric marker");
                return false;
            }
        }
        self.state.write().await.is_unlocked = true;
        true
    }

    // ===== Persistence helpers =====

    /// Empty values count as never set
    fn get_secret(&self, key: SecretKey) -> Result<Option<String>> {
        Ok(self.secrets.get(key)?.filter(|v| !v.is_empty()))
    }

    fn load_user(&self) -> Result<Option<User>> {
        let Some(raw) = self.get_secret(SecretKey::User)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable stored user");
                Ok(None)
            }
        }
    }

    fn persist_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.secrets.set(SecretKey::AccessToken, &tokens.access_token)?;
        match tokens.refresh_token {
            Some(ref refresh) => self.secrets.set(SecretKey::RefreshToken, refresh),
            None => self.secrets.delete(SecretKey::RefreshToken),
        }
    }

    fn erase_secrets(&self) -> Result<()> {
        let mut first_error = None;
        for key in SecretKey::ALL {
            if let Err(e) = self.secrets.delete(key) {
                warn!(key = key.name(), error = %e, "Failed to erase secret");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn new_marker() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::api::ApiError;
    use crate::auth::biometrics::{BiometricError, NoBiometrics};
    use crate::auth::secrets::MemorySecretStore;
    use crate::testing::FakeBiometrics;

    struct StaticRefresher {
        result: Result<TokenPair, ApiError>,
        calls: AtomicUsize,
    }

    impl StaticRefresher {
        fn ok(access: &str, refresh: &str) -> Self {
            Self {
                result: Ok(TokenPair::new(access, Some(refresh.to_string()))),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(err: ApiError) -> Self {
            Self {
                result: Err(err),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh_tokens(&self, _refresh_token: &str) -> Result<TokenPair, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    /// Store whose reads always fail
    struct BrokenSecretStore;

    impl SecretStore for BrokenSecretStore {
        fn get(&self, _key: SecretKey) -> Result<Option<String>> {
            Err(anyhow::anyhow!("keychain locked"))
        }
        fn set(&self, _key: SecretKey, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("keychain locked"))
        }
        fn delete(&self, _key: SecretKey) -> Result<()> {
            Err(anyhow::anyhow!("keychain locked"))
        }
    }

    fn user() -> User {
        User {
            id: "7".to_string(),
            name: "Ama Mensah".to_string(),
            email: "ama@acme.co".to_string(),
            role: Some("employee".to_string()),
        }
    }

    fn store_with(secrets: Arc<MemorySecretStore>) -> SessionStore {
        SessionStore::new(secrets, Arc::new(NoBiometrics))
    }

    fn seed(secrets: &MemorySecretStore, access: Option<&str>, refresh: Option<&str>) {
        if let Some(a) = access {
            secrets.set(SecretKey::AccessToken, a).unwrap();
        }
        if let Some(r) = refresh {
            secrets.set(SecretKey::RefreshToken, r).unwrap();
        }
        secrets
            .set(SecretKey::User, &serde_json::to_string(&user()).unwrap())
            .unwrap();
    }

    #[tokio::test]
    async fn test_new_store_is_hydrating() {
        let store = store_with(Arc::new(MemorySecretStore::new()));
        let state = store.snapshot().await;
        assert!(state.is_hydrating);
        assert!(!state.is_authenticated());
    }

    #[tokio::test]
    async fn test_bootstrap_without_refresh_token_restores_as_is() {
        let secrets = Arc::new(MemorySecretStore::new());
        seed(&secrets, Some("at-1"), None);
        let store = store_with(secrets);
        let refresher = StaticRefresher::ok("at-2", "rt-2");

        store.bootstrap(&refresher).await;

        let state = store.snapshot().await;
        assert_eq!(refresher.calls(), 0);
        assert!(!state.is_hydrating);
        assert_eq!(state.access_token.as_deref(), Some("at-1"));
        assert_eq!(state.user, Some(user()));
        // No PIN means no lock screen
        assert!(!state.has_pin);
        assert!(state.is_unlocked);
    }

    #[tokio::test]
    async fn test_bootstrap_refreshes_and_locks_when_pin_set() {
        let secrets = Arc::new(MemorySecretStore::new());
        seed(&secrets, Some("at-1"), Some("rt-1"));
        secrets.set(SecretKey::Pin, &hash_pin("123456").unwrap()).unwrap();
        let store = store_with(secrets.clone());
        let refresher = StaticRefresher::ok("at-2", "rt-2");

        store.bootstrap(&refresher).await;

        let state = store.snapshot().await;
        assert_eq!(refresher.calls(), 1);
        assert_eq!(state.access_token.as_deref(), Some("at-2"));
        assert_eq!(state.refresh_token.as_deref(), Some("rt-2"));
        assert_eq!(state.user, Some(user()));
        assert!(state.has_pin);
        assert!(!state.is_unlocked);
        assert!(state.is_locked());
        assert_eq!(secrets.get(SecretKey::AccessToken).unwrap().as_deref(), Some("at-2"));
        assert_eq!(secrets.get(SecretKey::RefreshToken).unwrap().as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn test_bootstrap_rejected_refresh_clears_everything() {
        let secrets = Arc::new(MemorySecretStore::new());
        seed(&secrets, Some("at-1"), Some("rt-1"));
        secrets.set(SecretKey::Pin, &hash_pin("123456").unwrap()).unwrap();
        secrets.set(SecretKey::BiometryEnabled, FLAG_TRUE).unwrap();
        let store = store_with(secrets.clone());
        let refresher = StaticRefresher::failing(ApiError::Unauthorized);

        store.bootstrap(&refresher).await;

        let state = store.snapshot().await;
        assert!(!state.is_hydrating);
        assert!(!state.is_authenticated());
        assert!(!state.has_pin);
        assert!(!state.biometry_enabled);
        assert!(secrets.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_storage_failure_still_finishes() {
        let store = SessionStore::new(Arc::new(BrokenSecretStore), Arc::new(NoBiometrics));
        store.bootstrap(&StaticRefresher::ok("at", "rt")).await;

        let state = store.snapshot().await;
        assert!(!state.is_hydrating);
        assert!(!state.is_authenticated());
    }

    #[tokio::test]
    async fn test_clear_then_bootstrap_is_signed_out() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = store_with(secrets.clone());
        store.set_session(TokenPair::new("at-1", None), user()).await.unwrap();
        store.set_pin("123456").await.unwrap();

        store.clear_session().await.unwrap();
        store.bootstrap(&StaticRefresher::ok("at-2", "rt-2")).await;

        let state = store.snapshot().await;
        assert_eq!(state.access_token, None);
        assert!(!state.has_pin);
        assert!(secrets.is_empty());
    }

    #[tokio::test]
    async fn test_set_session_persists_and_unlocks() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = store_with(secrets.clone());
        store.set_pin("123456").await.unwrap();
        store.set_unlocked(false).await;

        store
            .set_session(TokenPair::new("at-1", Some("rt-1".to_string())), user())
            .await
            .unwrap();

        let state = store.snapshot().await;
        assert!(state.is_unlocked);
        assert!(state.signed_in_at.is_some());
        assert_eq!(secrets.get(SecretKey::AccessToken).unwrap().as_deref(), Some("at-1"));
        assert_eq!(secrets.get(SecretKey::RefreshToken).unwrap().as_deref(), Some("rt-1"));
        let stored_user: User =
            serde_json::from_str(&secrets.get(SecretKey::User).unwrap().unwrap()).unwrap();
        assert_eq!(stored_user, user());
    }

    #[tokio::test]
    async fn test_clear_session_is_idempotent() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = store_with(secrets.clone());
        store.clear_session().await.unwrap();
        store.clear_session().await.unwrap();
        assert_eq!(store.snapshot().await, SessionState::default());
    }

    #[tokio::test]
    async fn test_pin_verification() {
        let store = store_with(Arc::new(MemorySecretStore::new()));
        store.set_session(TokenPair::new("at-1", None), user()).await.unwrap();
        store.set_pin("123456").await.unwrap();
        store.set_unlocked(false).await;

        assert!(!store.verify_pin("000000").await.unwrap());
        assert!(!store.snapshot().await.is_unlocked);

        assert!(store.verify_pin("123456").await.unwrap());
        assert!(store.snapshot().await.is_unlocked);
    }

    #[tokio::test]
    async fn test_wrong_pin_leaves_unlocked_session_unlocked() {
        let store = store_with(Arc::new(MemorySecretStore::new()));
        store.set_session(TokenPair::new("at-1", None), user()).await.unwrap();
        store.set_pin("123456").await.unwrap();

        assert!(!store.verify_pin("000000").await.unwrap());
        let state = store.snapshot().await;
        assert!(state.is_unlocked);
        assert!(state.is_authenticated());
    }

    #[tokio::test]
    async fn test_verify_pin_without_pin_fails() {
        let store = store_with(Arc::new(MemorySecretStore::new()));
        assert!(!store.verify_pin("123456").await.unwrap());
        assert!(store.set_pin("").await.is_err());
    }

    #[tokio::test]
    async fn test_plaintext_pin_is_upgraded() {
        let secrets = Arc::new(MemorySecretStore::new());
        secrets.set(SecretKey::Pin, "123456").unwrap();
        let store = store_with(secrets.clone());

        assert!(store.verify_pin("123456").await.unwrap());
        let stored = secrets.get(SecretKey::Pin).unwrap().unwrap();
        assert!(stored.starts_with("$argon2"));
        assert_eq!(check_pin("123456", &stored), PinCheck::Match);
    }

    #[tokio::test]
    async fn test_update_tokens_keeps_user_and_lock() {
        let store = store_with(Arc::new(MemorySecretStore::new()));
        store
            .set_session(TokenPair::new("at-1", Some("rt-1".to_string())), user())
            .await
            .unwrap();
        store.set_unlocked(false).await;

        let applied = store
            .update_tokens("rt-1", TokenPair::new("at-2", Some("rt-2".to_string())))
            .await
            .unwrap();

        let state = store.snapshot().await;
        assert!(applied);
        assert_eq!(state.access_token.as_deref(), Some("at-2"));
        assert_eq!(state.user, Some(user()));
        assert!(!state.is_unlocked);
        assert!(state.refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_update_tokens_after_logout_is_discarded() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = store_with(secrets.clone());
        store
            .set_session(TokenPair::new("at-1", Some("rt-1".to_string())), user())
            .await
            .unwrap();
        store.clear_session().await.unwrap();

        let applied = store
            .update_tokens("rt-1", TokenPair::new("at-2", Some("rt-2".to_string())))
            .await
            .unwrap();

        assert!(!applied);
        assert!(!store.is_authenticated().await);
        assert!(secrets.is_empty());
    }

    #[tokio::test]
    async fn test_clear_session_if_spares_newer_session() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = store_with(secrets.clone());
        store
            .set_session(TokenPair::new("at-2", Some("rt-2".to_string())), user())
            .await
            .unwrap();

        let cleared = store.clear_session_if("rt-1").await.unwrap();

        assert!(!cleared);
        assert_eq!(store.access_token().await.as_deref(), Some("at-2"));
        assert_eq!(secrets.get(SecretKey::RefreshToken).unwrap().as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn test_clear_session_if_current_token() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = store_with(secrets.clone());
        store
            .set_session(TokenPair::new("at-1", Some("rt-1".to_string())), user())
            .await
            .unwrap();

        assert!(store.clear_session_if("rt-1").await.unwrap());
        assert!(!store.is_authenticated().await);
        assert!(secrets.is_empty());
    }

    #[tokio::test]
    async fn test_set_unlocked_waits_for_pending_mutation() {
        let store = Arc::new(store_with(Arc::new(MemorySecretStore::new())));
        let guard = store.writer.lock().await;

        let unlock = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.set_unlocked(true).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!store.snapshot().await.is_unlocked);

        drop(guard);
        unlock.await.unwrap();
        assert!(store.snapshot().await.is_unlocked);
    }

    #[tokio::test]
    async fn test_biometric_enroll_and_unlock() {
        let secrets = Arc::new(MemorySecretStore::new());
        let bio = Arc::new(FakeBiometrics::succeeding());
        let store = SessionStore::new(secrets.clone(), bio.clone());
        store.set_session(TokenPair::new("at-1", None), user()).await.unwrap();
        store.set_pin("123456").await.unwrap();
        store.set_unlocked(false).await;

        assert!(store.enable_biometrics().await);
        assert!(store.snapshot().await.biometry_enabled);
        assert_eq!(secrets.get(SecretKey::BiometryEnabled).unwrap().as_deref(), Some(FLAG_TRUE));
        assert!(secrets.get(SecretKey::BiometryMarker).unwrap().is_some());

        assert!(store.unlock_with_biometrics().await);
        assert!(store.snapshot().await.is_unlocked);
        assert_eq!(bio.prompts(), 2);
    }

    #[tokio::test]
    async fn test_biometric_cancel_leaves_state_unchanged() {
        let bio = Arc::new(FakeBiometrics::succeeding());
        let store = SessionStore::new(Arc::new(MemorySecretStore::new()), bio.clone());
        store.set_session(TokenPair::new("at-1", None), user()).await.unwrap();
        assert!(store.enable_biometrics().await);
        store.set_unlocked(false).await;

        bio.set_outcome(Err(BiometricError::Cancelled));
        assert!(!store.unlock_with_biometrics().await);
        let state = store.snapshot().await;
        assert!(!state.is_unlocked);
        assert!(state.biometry_enabled);
    }

    #[tokio::test]
    async fn test_biometrics_unavailable_or_disabled() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = SessionStore::new(
            secrets.clone(),
            Arc::new(FakeBiometrics::failing(BiometricError::Unavailable)),
        );
        assert!(!store.enable_biometrics().await);
        assert!(secrets.get(SecretKey::BiometryEnabled).unwrap().is_none());

        // Not enrolled: never prompts
        let bio = Arc::new(FakeBiometrics::succeeding());
        let store = SessionStore::new(Arc::new(MemorySecretStore::new()), bio.clone());
        assert!(!store.unlock_with_biometrics().await);
        assert_eq!(bio.prompts(), 0);
    }

    #[tokio::test]
    async fn test_disable_biometrics_erases_marker() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = SessionStore::new(secrets.clone(), Arc::new(FakeBiometrics::succeeding()));
        assert!(store.enable_biometrics().await);

        store.disable_biometrics().await.unwrap();
        assert!(!store.snapshot().await.biometry_enabled);
        assert!(secrets.get(SecretKey::BiometryEnabled).unwrap().is_none());
        assert!(secrets.get(SecretKey::BiometryMarker).unwrap().is_none());
        assert!(!store.unlock_with_biometrics().await);
    }

    #[tokio::test]
    async fn test_clear_session_erases_biometry() {
        let secrets = Arc::new(MemorySecretStore::new());
        let store = SessionStore::new(secrets.clone(), Arc::new(FakeBiometrics::succeeding()));
        store.set_session(TokenPair::new("at-1", None), user()).await.unwrap();
        assert!(store.enable_biometrics().await);

        store.clear_session().await.unwrap();
        assert!(secrets.is_empty());
        assert!(!store.snapshot().await.biometry_enabled);
    }
}
