use super::{Session, SessionKey};
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;
use time::OffsetDateTime;

#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Stores a new session; fails with `Conflict` if the id is taken.
    async fn create(&self, session: Session) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, StorageError>;

    /// Replaces an existing session as a whole; fails with `NotFound` if absent.
    async fn update(&self, session: Session) -> Result<(), StorageError>;

    /// Removes and returns the session. At most one caller observes `Some`.
    async fn remove(&self, id: &str) -> Result<Option<Session>, StorageError>;

    /// Drops every session expired at `now`; returns how many were removed.
    async fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, StorageError>;
}

#[async_trait]
pub trait SessionKeyRepo: Send + Sync {
    async fn push(&self, key: SessionKey) -> Result<(), StorageError>;

    /// Removes and returns the key. At most one caller observes `Some`.
    async fn pop(&self, code: &str) -> Result<Option<SessionKey>, StorageError>;

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, StorageError>;
}

#[derive(Clone, Default)]
pub struct MemSessionRepo {
    sessions: Arc<DashMap<String, Session>>,
}

impl MemSessionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionRepo for MemSessionRepo {
    async fn create(&self, session: Session) -> Result<(), StorageError> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(e) => Err(StorageError::Conflict(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(session);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StorageError> {
        Ok(self.sessions.get(id).map(|s| s.value().clone()))
    }

    async fn update(&self, session: Session) -> Result<(), StorageError> {
        match self.sessions.get_mut(&session.id) {
            Some(mut existing) => {
                *existing = session;
                Ok(())
            }
            None => Err(StorageError::NotFound(session.id)),
        }
    }

    async fn remove(&self, id: &str) -> Result<Option<Session>, StorageError> {
        Ok(self.sessions.remove(id).map(|(_, s)| s))
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, StorageError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

#[derive(Clone, Default)]
pub struct MemSessionKeyRepo {
    keys: Arc<DashMap<String, SessionKey>>,
}

impl MemSessionKeyRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl SessionKeyRepo for MemSessionKeyRepo {
    async fn push(&self, key: SessionKey) -> Result<(), StorageError> {
        match self.keys.entry(key.code.clone()) {
            Entry::Occupied(e) => Err(StorageError::Conflict(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(key);
                Ok(())
            }
        }
    }

    async fn pop(&self, code: &str) -> Result<Option<SessionKey>, StorageError> {
        Ok(self.keys.remove(code).map(|(_, k)| k))
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, StorageError> {
        let before = self.keys.len();
        self.keys.retain(|_, k| !k.is_expired(now));
        Ok(before.saturating_sub(self.keys.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use time::{Duration, macros::datetime};
    use url::Url;

    fn session(id: &str, expires_at: OffsetDateTime) -> Session {
        Session {
            id: id.into(),
            state: SessionState::Created,
            connector_id: "fake".into(),
            client_id: "XXX".into(),
            client_state: String::new(),
            redirect_uri: Url::parse("http://client.example.com/callback").unwrap(),
            nonce: None,
            register: false,
            scopes: vec!["openid".into()],
            identity: None,
            user_id: None,
            code: None,
            created_at: expires_at - Duration::minutes(15),
            expires_at,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_update_requires_existing() {
        let repo = MemSessionRepo::new();
        let exp = datetime!(2024-01-01 00:15:00 UTC);
        repo.create(session("a", exp)).await.unwrap();
        assert!(matches!(
            repo.create(session("a", exp)).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            repo.update(session("b", exp)).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_returns_session_once() {
        let repo = MemSessionRepo::new();
        repo.create(session("a", datetime!(2024-01-01 00:15:00 UTC)))
            .await
            .unwrap();
        assert!(repo.remove("a").await.unwrap().is_some());
        assert!(repo.remove("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let repo = MemSessionRepo::new();
        repo.create(session("old", datetime!(2024-01-01 00:10:00 UTC)))
            .await
            .unwrap();
        repo.create(session("new", datetime!(2024-01-01 00:30:00 UTC)))
            .await
            .unwrap();
        let removed = repo
            .purge_expired(datetime!(2024-01-01 00:20:00 UTC))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get("new").await.unwrap().is_some());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn pop_is_single_shot() {
        let repo = MemSessionKeyRepo::new();
        repo.push(SessionKey {
            code: "code-1".into(),
            session_id: "a".into(),
            expires_at: datetime!(2024-01-01 00:10:00 UTC),
        })
        .await
        .unwrap();
        assert!(repo.pop("code-1").await.unwrap().is_some());
        assert!(repo.pop("code-1").await.unwrap().is_none());
        assert!(repo.is_empty());
    }
}
