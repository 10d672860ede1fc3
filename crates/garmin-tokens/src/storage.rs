//! Storage collaborator contracts and the in-memory implementation
//!
//! `TokenStorage` is the durable backing store for the two token kinds. It
//! holds no cache of its own: the token manager's cache is authoritative
//! and reads fall back to storage exactly once per process lifetime. Every
//! call must be atomic; a concurrent reader never sees a partial write.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use garmin_auth::{OAuth1Credential, OAuth2Token};

use crate::error::Result;

/// Durable storage for the OAuth1 credential and OAuth2 token.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn save_oauth1(&self, credential: &OAuth1Credential) -> Result<()>;
    async fn get_oauth1(&self) -> Result<Option<OAuth1Credential>>;
    async fn delete_oauth1(&self) -> Result<()>;

    async fn save_oauth2(&self, token: &OAuth2Token) -> Result<()>;
    async fn get_oauth2(&self) -> Result<Option<OAuth2Token>>;
    async fn delete_oauth2(&self) -> Result<()>;

    async fn save_both(&self, credential: &OAuth1Credential, token: &OAuth2Token) -> Result<()> {
        self.save_oauth1(credential).await?;
        self.save_oauth2(token).await
    }

    async fn get_both(&self) -> Result<(Option<OAuth1Credential>, Option<OAuth2Token>)> {
        Ok((self.get_oauth1().await?, self.get_oauth2().await?))
    }

    async fn delete_all(&self) -> Result<()> {
        self.delete_oauth1().await?;
        self.delete_oauth2().await
    }
}

/// Saved username/password pair for convenience re-login.
///
/// Entirely separate lifecycle from tokens; owned by the `CredentialStore`
/// collaborator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for SavedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavedCredentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Storage for saved login credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, credentials: &SavedCredentials) -> Result<()>;
    async fn get(&self) -> Result<Option<SavedCredentials>>;
    async fn delete(&self) -> Result<()>;
}

/// In-memory token storage for tests and embedded use.
#[derive(Default)]
pub struct MemoryTokenStorage {
    state: Mutex<(Option<OAuth1Credential>, Option<OAuth2Token>)>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn save_oauth1(&self, credential: &OAuth1Credential) -> Result<()> {
        self.state.lock().await.0 = Some(credential.clone());
        Ok(())
    }

    async fn get_oauth1(&self) -> Result<Option<OAuth1Credential>> {
        Ok(self.state.lock().await.0.clone())
    }

    async fn delete_oauth1(&self) -> Result<()> {
        self.state.lock().await.0 = None;
        Ok(())
    }

    async fn save_oauth2(&self, token: &OAuth2Token) -> Result<()> {
        self.state.lock().await.1 = Some(token.clone());
        Ok(())
    }

    async fn get_oauth2(&self) -> Result<Option<OAuth2Token>> {
        Ok(self.state.lock().await.1.clone())
    }

    async fn delete_oauth2(&self) -> Result<()> {
        self.state.lock().await.1 = None;
        Ok(())
    }

    async fn save_both(&self, credential: &OAuth1Credential, token: &OAuth2Token) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = (Some(credential.clone()), Some(token.clone()));
        Ok(())
    }

    async fn get_both(&self) -> Result<(Option<OAuth1Credential>, Option<OAuth2Token>)> {
        Ok(self.state.lock().await.clone())
    }

    async fn delete_all(&self) -> Result<()> {
        *self.state.lock().await = (None, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> OAuth1Credential {
        OAuth1Credential {
            token: "t".into(),
            token_secret: "s".into(),
            mfa_token: None,
            mfa_expiration_timestamp: None,
            domain: "garmin.com".into(),
        }
    }

    #[test]
    fn saved_credentials_debug_redacts_password() {
        let saved = SavedCredentials {
            email: "user@example.com".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{saved:?}");
        assert!(debug.contains("user@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn memory_storage_roundtrips_oauth1() {
        let storage = MemoryTokenStorage::new();
        assert!(storage.get_oauth1().await.unwrap().is_none());

        storage.save_oauth1(&credential()).await.unwrap();
        assert_eq!(storage.get_oauth1().await.unwrap(), Some(credential()));

        storage.delete_oauth1().await.unwrap();
        assert!(storage.get_oauth1().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_all_clears_both_kinds() {
        let storage = MemoryTokenStorage::new();
        storage.save_oauth1(&credential()).await.unwrap();
        storage.delete_all().await.unwrap();
        let (oauth1, oauth2) = storage.get_both().await.unwrap();
        assert!(oauth1.is_none());
        assert!(oauth2.is_none());
    }
}
