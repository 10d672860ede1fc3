//! Token manager: cache, refresh decision, single-flight coalescing
//!
//! The manager is the only component that mutates the token cache. All
//! state lives behind one mutex so cache reads/writes and the in-flight
//! marker stay atomic with respect to each other. The exchange itself runs
//! on a spawned task whose outcome is a shared future: every caller that
//! requests a refresh while one is outstanding awaits that same future, so
//! there is never more than one exchange call in flight per manager.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use garmin_auth::{OAuth1Credential, OAuth2Token, now_epoch};

use crate::error::{Error, Result};
use crate::exchanger::TokenExchanger;
use crate::storage::TokenStorage;

/// Proactive refresh margin: a token this close to expiry is re-exchanged
/// before use.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(60);

type SharedRefresh = Shared<BoxFuture<'static, Result<OAuth2Token>>>;

/// Point-in-time snapshot of what is cached, for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub oauth1_present: bool,
    pub oauth2_present: bool,
    /// True when the cached OAuth2 token is expired, and also when none is
    /// cached at all
    pub oauth2_expired: bool,
    pub oauth2_expires_at: Option<u64>,
    pub domain: Option<String>,
}

impl TokenStatus {
    /// Collapse the snapshot into the three meaningful states.
    pub fn state(&self) -> AuthState {
        if !self.oauth1_present {
            AuthState::NeedsReauthentication
        } else if self.oauth2_present && !self.oauth2_expired {
            AuthState::Authenticated
        } else {
            AuthState::NeedsRefresh
        }
    }
}

/// Derived authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Both tokens present, OAuth2 not expired
    Authenticated,
    /// OAuth1 present; the OAuth2 token is expired or missing and a refresh
    /// will succeed
    NeedsRefresh,
    /// OAuth1 absent; only a new SSO login helps
    NeedsReauthentication,
}

struct State {
    oauth1: Option<OAuth1Credential>,
    oauth2: Option<OAuth2Token>,
    loaded: bool,
    in_flight: Option<SharedRefresh>,
    /// Bumped by `clear_tokens` so a refresh finishing after a logout does
    /// not resurrect the cleared tokens
    epoch: u64,
}

/// Owner of the in-memory token cache.
///
/// Storage is read lazily, exactly once per manager; afterwards the cache
/// is authoritative and every save writes through to storage. The state is
/// behind an `Arc` so the detached refresh task can reach it after every
/// waiter has gone away.
pub struct TokenManager {
    storage: Arc<dyn TokenStorage>,
    exchanger: Option<Arc<dyn TokenExchanger>>,
    refresh_buffer: Duration,
    state: Arc<Mutex<State>>,
}

impl TokenManager {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            storage,
            exchanger: None,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            state: Arc::new(Mutex::new(State {
                oauth1: None,
                oauth2: None,
                loaded: false,
                in_flight: None,
                epoch: 0,
            })),
        }
    }

    /// Attach the exchanger used for refreshes. Without one, any operation
    /// that needs a refresh fails with `ExchangerNotConfigured`.
    pub fn with_exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Get an OAuth2 token that is valid right now.
    ///
    /// With `auto_refresh` the manager refreshes whenever the cached token
    /// is missing or inside the refresh window. Without it, a missing token
    /// is `NoOAuth2Token`, an expired one is `OAuth2Expired`, and a token
    /// that is merely inside the buffer window is returned as-is.
    pub async fn get_valid_oauth2_token(&self, auto_refresh: bool) -> Result<OAuth2Token> {
        let cached = {
            let mut state = self.state.lock().await;
            self.ensure_loaded(&mut state).await?;
            state.oauth2.clone()
        };

        let Some(token) = cached else {
            if auto_refresh {
                debug!("no oauth2 token cached, refreshing");
                return self.refresh_oauth2_token().await;
            }
            return Err(Error::NoOAuth2Token);
        };

        let now = now_epoch();
        if token.needs_refresh_at(now, self.refresh_buffer) {
            if auto_refresh {
                debug!(expires_at = token.expires_at, "oauth2 token inside refresh window, refreshing");
                return self.refresh_oauth2_token().await;
            }
            if token.is_expired_at(now) {
                return Err(Error::OAuth2Expired);
            }
        }
        Ok(token)
    }

    /// Refresh the OAuth2 token by re-exchanging the OAuth1 credential.
    ///
    /// Single-flight: if a refresh is already outstanding, this call awaits
    /// the same outcome instead of starting a second exchange. The marker is
    /// cleared on completion (success or failure) so the next call starts
    /// fresh.
    pub async fn refresh_oauth2_token(&self) -> Result<OAuth2Token> {
        let refresh = {
            let mut state = self.state.lock().await;
            self.ensure_loaded(&mut state).await?;

            if let Some(in_flight) = state.in_flight.clone() {
                debug!("refresh already in flight, awaiting shared outcome");
                in_flight
            } else {
                let credential = state.oauth1.clone().ok_or(Error::NoOAuth1Token)?;
                let exchanger = self
                    .exchanger
                    .clone()
                    .ok_or(Error::ExchangerNotConfigured)?;
                let refresh = self.start_refresh(credential, exchanger, state.epoch);
                state.in_flight = Some(refresh.clone());
                refresh
            }
        };
        refresh.await
    }

    /// Spawn the exchange on its own task and wrap its handle in a shared
    /// future. Running detached means a cancelled waiter cannot abandon the
    /// exchange with the in-flight marker still set: the task itself always
    /// clears the marker when it completes.
    fn start_refresh(
        &self,
        credential: OAuth1Credential,
        exchanger: Arc<dyn TokenExchanger>,
        epoch: u64,
    ) -> SharedRefresh {
        let state = Arc::clone(&self.state);
        let storage = Arc::clone(&self.storage);
        let handle = tokio::spawn(async move {
            let result = exchanger.exchange(&credential).await;

            let mut state = state.lock().await;
            state.in_flight = None;
            match result {
                Ok(token) => {
                    if state.epoch == epoch {
                        if let Err(e) = storage.save_oauth2(&token).await {
                            warn!(error = %e, "failed to persist refreshed token");
                        }
                        state.oauth2 = Some(token.clone());
                        info!("oauth2 token refreshed");
                    } else {
                        debug!("tokens cleared during refresh, discarding result");
                    }
                    Ok(token)
                }
                Err(e) => {
                    warn!(error = %e, "oauth2 refresh failed");
                    Err(Error::from(e))
                }
            }
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::RefreshTask(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }

    /// Store both tokens, write-through.
    pub async fn save_tokens(&self, credential: OAuth1Credential, token: OAuth2Token) -> Result<()> {
        self.storage.save_both(&credential, &token).await?;
        let mut state = self.state.lock().await;
        state.oauth1 = Some(credential);
        state.oauth2 = Some(token);
        state.loaded = true;
        Ok(())
    }

    /// Store the OAuth1 credential, write-through.
    pub async fn save_oauth1_token(&self, credential: OAuth1Credential) -> Result<()> {
        self.storage.save_oauth1(&credential).await?;
        let mut state = self.state.lock().await;
        state.oauth1 = Some(credential);
        state.loaded = true;
        Ok(())
    }

    /// Store the OAuth2 token, write-through.
    pub async fn save_oauth2_token(&self, token: OAuth2Token) -> Result<()> {
        self.storage.save_oauth2(&token).await?;
        let mut state = self.state.lock().await;
        state.oauth2 = Some(token);
        state.loaded = true;
        Ok(())
    }

    /// Delete both tokens from storage and cache.
    pub async fn clear_tokens(&self) -> Result<()> {
        self.storage.delete_all().await?;
        let mut state = self.state.lock().await;
        state.oauth1 = None;
        state.oauth2 = None;
        state.loaded = false;
        state.epoch += 1;
        info!("tokens cleared");
        Ok(())
    }

    /// Snapshot of the current cache state (loading it if necessary).
    pub async fn get_token_status(&self) -> Result<TokenStatus> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let now = now_epoch();
        Ok(TokenStatus {
            oauth1_present: state.oauth1.is_some(),
            oauth2_present: state.oauth2.is_some(),
            oauth2_expired: state
                .oauth2
                .as_ref()
                .map(|token| token.is_expired_at(now))
                .unwrap_or(true),
            oauth2_expires_at: state.oauth2.as_ref().map(|token| token.expires_at),
            domain: state.oauth1.as_ref().map(|credential| credential.domain.clone()),
        })
    }

    /// Lazy load-on-first-use: storage is consulted once, then the cache is
    /// authoritative.
    async fn ensure_loaded(&self, state: &mut State) -> Result<()> {
        if state.loaded {
            return Ok(());
        }
        let (oauth1, oauth2) = self.storage.get_both().await?;
        debug!(
            oauth1 = oauth1.is_some(),
            oauth2 = oauth2.is_some(),
            "loaded tokens from storage"
        );
        state.oauth1 = oauth1;
        state.oauth2 = oauth2;
        state.loaded = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTokenStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn test_credential() -> OAuth1Credential {
        OAuth1Credential {
            token: "oauth1-t".into(),
            token_secret: "oauth1-s".into(),
            mfa_token: None,
            mfa_expiration_timestamp: None,
            domain: "garmin.com".into(),
        }
    }

    fn test_token(access: &str, expires_at: u64, refresh_expires_at: u64) -> OAuth2Token {
        OAuth2Token {
            scope: "CONNECT_READ CONNECT_WRITE".into(),
            jti: "jti".into(),
            token_type: "Bearer".into(),
            access_token: access.into(),
            refresh_token: "rt".into(),
            expires_in: 3600,
            expires_at,
            refresh_token_expires_in: 7200,
            refresh_token_expires_at: refresh_expires_at,
        }
    }

    /// Exchanger returning a numbered token per call, optionally delayed,
    /// optionally failing.
    struct FakeExchanger {
        calls: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
    }

    impl FakeExchanger {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: AtomicBool::new(false),
            }
        }

        fn delayed(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchanger for FakeExchanger {
        async fn exchange(&self, _credential: &OAuth1Credential) -> garmin_auth::Result<OAuth2Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(garmin_auth::Error::Exchange(
                    "exchange endpoint returned 401 Unauthorized: credential expired".into(),
                ));
            }
            Ok(test_token(&format!("at_{n}"), now_epoch() + 3600, now_epoch() + 7200))
        }
    }

    struct Fixture {
        manager: Arc<TokenManager>,
        storage: Arc<MemoryTokenStorage>,
        exchanger: Arc<FakeExchanger>,
    }

    async fn fixture(
        exchanger: FakeExchanger,
        oauth1: Option<OAuth1Credential>,
        oauth2: Option<OAuth2Token>,
    ) -> Fixture {
        let storage = Arc::new(MemoryTokenStorage::new());
        if let Some(credential) = &oauth1 {
            storage.save_oauth1(credential).await.unwrap();
        }
        if let Some(token) = &oauth2 {
            storage.save_oauth2(token).await.unwrap();
        }
        let exchanger = Arc::new(exchanger);
        let storage_dyn: Arc<dyn TokenStorage> = storage.clone();
        let exchanger_dyn: Arc<dyn TokenExchanger> = exchanger.clone();
        let manager = Arc::new(TokenManager::new(storage_dyn).with_exchanger(exchanger_dyn));
        Fixture {
            manager,
            storage,
            exchanger,
        }
    }

    #[tokio::test]
    async fn single_flight_coalesces_concurrent_refreshes() {
        let f = fixture(
            FakeExchanger::delayed(Duration::from_millis(100)),
            Some(test_credential()),
            None,
        )
        .await;

        let mut handles = vec![];
        for _ in 0..10 {
            let manager = f.manager.clone();
            handles.push(tokio::spawn(
                async move { manager.refresh_oauth2_token().await },
            ));
        }

        let mut tokens = vec![];
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(f.exchanger.call_count(), 1, "exactly one exchange call");
        for token in &tokens {
            assert_eq!(token.access_token, tokens[0].access_token);
        }
    }

    #[tokio::test]
    async fn refresh_after_completion_starts_a_new_exchange() {
        let f = fixture(FakeExchanger::new(), Some(test_credential()), None).await;

        let first = f.manager.refresh_oauth2_token().await.unwrap();
        let second = f.manager.refresh_oauth2_token().await.unwrap();

        assert_eq!(f.exchanger.call_count(), 2);
        assert_ne!(first.access_token, second.access_token);
    }

    #[tokio::test]
    async fn failed_refresh_reaches_all_waiters_and_next_attempt_retries() {
        let exchanger = FakeExchanger::delayed(Duration::from_millis(100));
        exchanger.fail.store(true, Ordering::SeqCst);
        let f = fixture(exchanger, Some(test_credential()), None).await;

        let mut handles = vec![];
        for _ in 0..5 {
            let manager = f.manager.clone();
            handles.push(tokio::spawn(
                async move { manager.refresh_oauth2_token().await },
            ));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::Auth(_)), "got: {err:?}");
        }
        assert_eq!(f.exchanger.call_count(), 1, "failure shared, not repeated");

        // The marker was cleared, so the next attempt hits the exchanger again
        f.exchanger.fail.store(false, Ordering::SeqCst);
        let token = f.manager.refresh_oauth2_token().await.unwrap();
        assert_eq!(f.exchanger.call_count(), 2);
        assert_eq!(token.access_token, "at_2");
    }

    #[tokio::test]
    async fn expired_token_is_replaced_and_persisted() {
        let now = now_epoch();
        let expired = test_token("at_old", now - 10, now + 7200);
        let f = fixture(FakeExchanger::new(), Some(test_credential()), Some(expired)).await;

        let token = f.manager.get_valid_oauth2_token(true).await.unwrap();
        assert_ne!(token.access_token, "at_old");

        // Write-through: storage has the replacement
        let stored = f.storage.get_oauth2().await.unwrap().unwrap();
        assert_eq!(stored.access_token, token.access_token);
    }

    #[tokio::test]
    async fn missing_oauth1_fails_with_no_credential_not_no_token() {
        let now = now_epoch();
        let expired = test_token("at_old", now - 10, now + 7200);
        let f = fixture(FakeExchanger::new(), None, Some(expired)).await;

        let err = f.manager.get_valid_oauth2_token(true).await.unwrap_err();
        assert!(matches!(err, Error::NoOAuth1Token), "got: {err:?}");
        assert_eq!(f.exchanger.call_count(), 0);
    }

    #[tokio::test]
    async fn expired_refresh_token_does_not_block_refresh() {
        // Both the access token and its (unused) refresh token are expired;
        // refresh still succeeds because the OAuth1 credential exists
        let now = now_epoch();
        let dead = test_token("at_old", now - 7200, now - 3600);
        let f = fixture(FakeExchanger::new(), Some(test_credential()), Some(dead)).await;

        let token = f.manager.get_valid_oauth2_token(true).await.unwrap();
        assert_ne!(token.access_token, "at_old");
    }

    #[tokio::test]
    async fn token_inside_buffer_window_triggers_refresh() {
        let now = now_epoch();
        // Valid for another 10 seconds, but the 60-second buffer applies
        let expiring = test_token("at_old", now + 10, now + 7200);
        let f = fixture(FakeExchanger::new(), Some(test_credential()), Some(expiring)).await;

        let token = f.manager.get_valid_oauth2_token(true).await.unwrap();
        assert_ne!(token.access_token, "at_old");
        assert_eq!(f.exchanger.call_count(), 1);
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_exchange() {
        let now = now_epoch();
        let fresh = test_token("at_fresh", now + 3600, now + 7200);
        let f = fixture(FakeExchanger::new(), Some(test_credential()), Some(fresh)).await;

        let token = f.manager.get_valid_oauth2_token(true).await.unwrap();
        assert_eq!(token.access_token, "at_fresh");
        assert_eq!(f.exchanger.call_count(), 0);
    }

    #[tokio::test]
    async fn auto_refresh_disabled_fails_on_missing_or_expired() {
        let f = fixture(FakeExchanger::new(), Some(test_credential()), None).await;
        let err = f.manager.get_valid_oauth2_token(false).await.unwrap_err();
        assert!(matches!(err, Error::NoOAuth2Token), "got: {err:?}");

        let now = now_epoch();
        let expired = test_token("at_old", now - 10, now + 7200);
        let f = fixture(FakeExchanger::new(), Some(test_credential()), Some(expired)).await;
        let err = f.manager.get_valid_oauth2_token(false).await.unwrap_err();
        assert!(matches!(err, Error::OAuth2Expired), "got: {err:?}");
        assert_eq!(f.exchanger.call_count(), 0);
    }

    #[tokio::test]
    async fn auto_refresh_disabled_returns_token_inside_buffer_window() {
        let now = now_epoch();
        // Inside the 60-second buffer but not yet expired
        let expiring = test_token("at_soon", now + 30, now + 7200);
        let f = fixture(FakeExchanger::new(), Some(test_credential()), Some(expiring)).await;

        let token = f.manager.get_valid_oauth2_token(false).await.unwrap();
        assert_eq!(token.access_token, "at_soon");
    }

    #[tokio::test]
    async fn refresh_without_exchanger_fails() {
        let storage = Arc::new(MemoryTokenStorage::new());
        storage.save_oauth1(&test_credential()).await.unwrap();
        let manager = Arc::new(TokenManager::new(storage));

        let err = manager.refresh_oauth2_token().await.unwrap_err();
        assert!(matches!(err, Error::ExchangerNotConfigured), "got: {err:?}");
    }

    #[tokio::test]
    async fn status_snapshot_is_idempotent_and_defaults_expired() {
        let f = fixture(FakeExchanger::new(), None, None).await;

        let first = f.manager.get_token_status().await.unwrap();
        let second = f.manager.get_token_status().await.unwrap();
        assert_eq!(first, second);
        assert!(!first.oauth1_present);
        assert!(!first.oauth2_present);
        assert!(first.oauth2_expired, "no token counts as expired");
        assert_eq!(first.state(), AuthState::NeedsReauthentication);
    }

    #[tokio::test]
    async fn status_states_cover_all_three_cases() {
        let now = now_epoch();

        let f = fixture(
            FakeExchanger::new(),
            Some(test_credential()),
            Some(test_token("at", now + 3600, now + 7200)),
        )
        .await;
        let status = f.manager.get_token_status().await.unwrap();
        assert_eq!(status.state(), AuthState::Authenticated);
        assert_eq!(status.domain.as_deref(), Some("garmin.com"));
        assert_eq!(status.oauth2_expires_at, Some(now + 3600));

        let f = fixture(
            FakeExchanger::new(),
            Some(test_credential()),
            Some(test_token("at", now - 10, now + 7200)),
        )
        .await;
        assert_eq!(
            f.manager.get_token_status().await.unwrap().state(),
            AuthState::NeedsRefresh
        );

        let f = fixture(FakeExchanger::new(), None, Some(test_token("at", now + 3600, now + 7200))).await;
        assert_eq!(
            f.manager.get_token_status().await.unwrap().state(),
            AuthState::NeedsReauthentication
        );
    }

    #[tokio::test]
    async fn save_tokens_writes_through_and_clear_removes_everything() {
        let f = fixture(FakeExchanger::new(), None, None).await;
        let now = now_epoch();

        f.manager
            .save_tokens(test_credential(), test_token("at", now + 3600, now + 7200))
            .await
            .unwrap();
        let (oauth1, oauth2) = f.storage.get_both().await.unwrap();
        assert!(oauth1.is_some());
        assert!(oauth2.is_some());

        f.manager.clear_tokens().await.unwrap();
        let (oauth1, oauth2) = f.storage.get_both().await.unwrap();
        assert!(oauth1.is_none());
        assert!(oauth2.is_none());
        let status = f.manager.get_token_status().await.unwrap();
        assert_eq!(status.state(), AuthState::NeedsReauthentication);
    }

    #[tokio::test]
    async fn storage_is_read_exactly_once() {
        /// Wrapper counting `get_both` calls.
        struct CountingStorage {
            inner: MemoryTokenStorage,
            reads: AtomicUsize,
        }

        #[async_trait]
        impl TokenStorage for CountingStorage {
            async fn save_oauth1(&self, c: &OAuth1Credential) -> Result<()> {
                self.inner.save_oauth1(c).await
            }
            async fn get_oauth1(&self) -> Result<Option<OAuth1Credential>> {
                self.inner.get_oauth1().await
            }
            async fn delete_oauth1(&self) -> Result<()> {
                self.inner.delete_oauth1().await
            }
            async fn save_oauth2(&self, t: &OAuth2Token) -> Result<()> {
                self.inner.save_oauth2(t).await
            }
            async fn get_oauth2(&self) -> Result<Option<OAuth2Token>> {
                self.inner.get_oauth2().await
            }
            async fn delete_oauth2(&self) -> Result<()> {
                self.inner.delete_oauth2().await
            }
            async fn get_both(&self) -> Result<(Option<OAuth1Credential>, Option<OAuth2Token>)> {
                self.reads.fetch_add(1, Ordering::SeqCst);
                self.inner.get_both().await
            }
        }

        let storage = Arc::new(CountingStorage {
            inner: MemoryTokenStorage::new(),
            reads: AtomicUsize::new(0),
        });
        storage.inner.save_oauth1(&test_credential()).await.unwrap();

        let storage_dyn: Arc<dyn TokenStorage> = storage.clone();
        let manager = Arc::new(TokenManager::new(storage_dyn));
        manager.get_token_status().await.unwrap();
        manager.get_token_status().await.unwrap();
        let _ = manager.get_valid_oauth2_token(false).await;

        assert_eq!(storage.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_during_refresh_discards_the_result() {
        let f = fixture(
            FakeExchanger::delayed(Duration::from_millis(100)),
            Some(test_credential()),
            None,
        )
        .await;

        let manager = f.manager.clone();
        let refresh = tokio::spawn(async move { manager.refresh_oauth2_token().await });

        // Let the exchange start, then log out mid-flight
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.manager.clear_tokens().await.unwrap();

        // The waiter still gets its token, but nothing is re-persisted
        refresh.await.unwrap().unwrap();
        assert!(f.storage.get_oauth2().await.unwrap().is_none());
        let status = f.manager.get_token_status().await.unwrap();
        assert!(!status.oauth2_present);
    }
}
