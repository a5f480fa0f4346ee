use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::storage::SessionStorage;
use super::types::{token_preview, Session, TokenData, UserIdentity};
use crate::error::ApiError;

/// Session manager
/// Owns the current session and keeps it in step with durable storage
pub struct SessionManager {
    /// Current session, `None` when logged out
    current: RwLock<Option<Session>>,

    /// Durable storage backend
    storage: Arc<dyn SessionStorage>,
}

impl SessionManager {
    /// Create an empty manager (nothing is read from storage)
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            current: RwLock::new(None),
            storage,
        }
    }

    /// Create a manager holding the session persisted in `storage`, if any
    pub fn restore(storage: Arc<dyn SessionStorage>) -> Result<Self> {
        let session = match storage.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Discarding unreadable stored session: {:#}", e);
                storage.remove()?;
                None
            }
        };

        if let Some(ref s) = session {
            tracing::debug!(
                user_id = s.user.user_id,
                expires_at = %s.expires_at.to_rfc3339(),
                "Restored stored session"
            );
        }

        Ok(Self {
            current: RwLock::new(session),
            storage,
        })
    }

    /// Snapshot of the current session
    pub async fn get(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    /// Current access token, if logged in
    pub async fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// Persist and install a new session
    pub async fn set(&self, session: Session) -> Result<(), ApiError> {
        let mut current = self.current.write().await;
        self.storage
            .save(&session)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;

        tracing::info!(
            user_id = session.user.user_id,
            token = token_preview(&session.access_token),
            "Session stored"
        );
        *current = Some(session);
        Ok(())
    }

    /// Drop the session from memory and storage
    pub async fn clear(&self) -> Result<(), ApiError> {
        let mut current = self.current.write().await;
        let had_session = current.take().is_some();

        self.storage
            .remove()
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;

        if had_session {
            tracing::info!("Session terminated");
        }
        Ok(())
    }

    /// Merge refreshed tokens into the current session
    /// The user identity is kept as is. Fails with `NoSession` if the
    /// session was cleared while the refresh was in flight.
    pub async fn apply_refresh(&self, tokens: TokenData) -> Result<Session, ApiError> {
        let mut current = self.current.write().await;
        let updated = match current.as_ref() {
            Some(session) => session.with_tokens(tokens),
            None => return Err(ApiError::NoSession),
        };

        // The old refresh token may already be spent, so the new tokens
        // go in memory even when they cannot be persisted
        if let Err(e) = self.storage.save(&updated) {
            tracing::error!("Failed to persist refreshed session: {:#}", e);
        }

        tracing::debug!(
            token = token_preview(&updated.access_token),
            expires_at = %updated.expires_at.to_rfc3339(),
            "Session tokens replaced"
        );
        *current = Some(updated.clone());
        Ok(updated)
    }

    /// Edit the user identity of the current session in place
    /// Tokens are left as they are under the lock, so a concurrent refresh
    /// is never rolled back.
    pub async fn update_identity<F>(&self, edit: F) -> Result<Session, ApiError>
    where
        F: FnOnce(&mut UserIdentity),
    {
        let mut current = self.current.write().await;
        let mut updated = current.clone().ok_or(ApiError::NoSession)?;
        edit(&mut updated.user);

        self.storage
            .save(&updated)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;

        tracing::debug!(user_id = updated.user.user_id, "Session identity updated");
        *current = Some(updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemorySessionStorage;
    use crate::auth::types::expiry_from_now;

    fn session(access: &str, refresh: &str) -> Session {
        Session {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_in: 3600,
            expires_at: expiry_from_now(3600),
            user: UserIdentity {
                user_id: 3,
                full_name: Some("Luis Arce".to_string()),
                profile: None,
            },
        }
    }

    #[tokio::test]
    async fn test_set_get_clear() {
        let storage = Arc::new(MemorySessionStorage::new());
        let manager = SessionManager::new(storage.clone());
        assert!(manager.get().await.is_none());

        manager.set(session("A1", "R1")).await.unwrap();
        assert_eq!(manager.access_token().await.as_deref(), Some("A1"));
        assert!(storage.raw().is_some());

        manager.clear().await.unwrap();
        assert!(manager.get().await.is_none());
        assert!(storage.raw().is_none());

        // clearing twice is fine
        manager.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_from_storage() {
        let storage = Arc::new(MemorySessionStorage::new());
        let stored = session("A1", "R1");
        storage.save(&stored).unwrap();

        let manager = SessionManager::restore(storage).unwrap();
        assert_eq!(manager.get().await, Some(stored));
    }

    #[tokio::test]
    async fn test_restore_discards_corrupt_entry() {
        struct UnreadableStorage {
            removed: std::sync::atomic::AtomicBool,
        }

        impl SessionStorage for UnreadableStorage {
            fn load(&self) -> Result<Option<Session>> {
                anyhow::bail!("garbage")
            }
            fn save(&self, _session: &Session) -> Result<()> {
                Ok(())
            }
            fn remove(&self) -> Result<()> {
                self.removed
                    .store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }

        let storage = Arc::new(UnreadableStorage {
            removed: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = SessionManager::restore(storage.clone()).unwrap();
        assert!(manager.get().await.is_none());
        assert!(storage.removed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_apply_refresh_preserves_identity() {
        let storage = Arc::new(MemorySessionStorage::new());
        let manager = SessionManager::new(storage.clone());
        let original = session("A1", "R1");
        manager.set(original.clone()).await.unwrap();

        let updated = manager
            .apply_refresh(TokenData {
                access_token: "A2".to_string(),
                refresh_token: "R2".to_string(),
                expires_in: 1800,
                expires_at: expiry_from_now(1800),
            })
            .await
            .unwrap();

        assert_eq!(updated.access_token, "A2");
        assert_eq!(updated.refresh_token, "R2");
        assert_eq!(updated.user, original.user);
        assert_eq!(manager.get().await, Some(updated.clone()));
        assert_eq!(storage.load().unwrap(), Some(updated));
    }

    fn tokens(access: &str, refresh: &str) -> TokenData {
        TokenData {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_in: 1800,
            expires_at: expiry_from_now(1800),
        }
    }

    /// Accepts the first save, fails every later one
    struct FlakyStorage {
        inner: MemorySessionStorage,
        saves: std::sync::atomic::AtomicUsize,
    }

    impl SessionStorage for FlakyStorage {
        fn load(&self) -> Result<Option<Session>> {
            self.inner.load()
        }
        fn save(&self, session: &Session) -> Result<()> {
            if self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                anyhow::bail!("disk full");
            }
            self.inner.save(session)
        }
        fn remove(&self) -> Result<()> {
            self.inner.remove()
        }
    }

    #[tokio::test]
    async fn test_apply_refresh_keeps_new_tokens_when_save_fails() {
        let storage = Arc::new(FlakyStorage {
            inner: MemorySessionStorage::new(),
            saves: std::sync::atomic::AtomicUsize::new(0),
        });
        let manager = SessionManager::new(storage.clone());
        manager.set(session("A1", "R1")).await.unwrap();

        let updated = manager.apply_refresh(tokens("A2", "R2")).await.unwrap();

        assert_eq!(updated.access_token, "A2");
        assert_eq!(manager.access_token().await.as_deref(), Some("A2"));
        assert_eq!(manager.get().await.unwrap().refresh_token, "R2");
        // storage still holds the last session it accepted
        assert_eq!(storage.load().unwrap().unwrap().access_token, "A1");
    }

    #[tokio::test]
    async fn test_update_identity_keeps_current_tokens() {
        let storage = Arc::new(MemorySessionStorage::new());
        let manager = SessionManager::new(storage.clone());
        manager.set(session("A1", "R1")).await.unwrap();

        // the refresh lands between reading the session and writing the profile
        let stale = manager.get().await.unwrap();
        manager.apply_refresh(tokens("A2", "R2")).await.unwrap();

        let updated = manager
            .update_identity(|user| {
                user.full_name = Some("Luis Arce Vega".to_string());
                user.profile = Some(serde_json::json!({"id": stale.user.user_id}));
            })
            .await
            .unwrap();

        assert_eq!(updated.access_token, "A2");
        assert_eq!(updated.refresh_token, "R2");
        assert_eq!(updated.user.full_name.as_deref(), Some("Luis Arce Vega"));
        assert_eq!(manager.get().await, Some(updated.clone()));
        assert_eq!(storage.load().unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_update_identity_without_session() {
        let manager = SessionManager::new(Arc::new(MemorySessionStorage::new()));
        let result = manager.update_identity(|user| user.full_name = None).await;
        assert!(matches!(result, Err(ApiError::NoSession)));
    }

    #[tokio::test]
    async fn test_apply_refresh_after_clear() {
        let manager = SessionManager::new(Arc::new(MemorySessionStorage::new()));
        let result = manager
            .apply_refresh(TokenData {
                access_token: "A2".to_string(),
                refresh_token: "R2".to_string(),
                expires_in: 60,
                expires_at: expiry_from_now(60),
            })
            .await;

        assert!(matches!(result, Err(ApiError::NoSession)));
        assert!(manager.get().await.is_none());
    }
}
