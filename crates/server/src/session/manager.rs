use super::{
    MemSessionKeyRepo, MemSessionRepo, NewSession, RemoteIdentity, Session, SessionError,
    SessionKey, SessionKeyRepo, SessionRepo, SessionState, generate_token,
};
use crate::clock::SharedClock;
use crate::error::StorageError;
use std::sync::Arc;
use time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Lifetime of a session from its creation.
    pub session_ttl: Duration,
    /// Lifetime of a one-time code from its issuance.
    pub code_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::minutes(15),
            code_ttl: Duration::minutes(10),
        }
    }
}

/// Owns the session and code tables.
///
/// Read-modify-write operations are serialised through an internal lock so
/// concurrent attachments never lose each other's changes. Redemption claims
/// the code through an atomic removal and then takes the same lock to consume
/// the session, so a code minted meanwhile is either revoked with the session
/// or left redeemable.
///
/// Issuing a new code for a session revokes the code issued before it: at most
/// one code per session can be redeemed at any time.
pub struct SessionManager {
    sessions: Arc<dyn SessionRepo>,
    keys: Arc<dyn SessionKeyRepo>,
    clock: SharedClock,
    config: SessionConfig,
    writes: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionRepo>,
        keys: Arc<dyn SessionKeyRepo>,
        clock: SharedClock,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions,
            keys,
            clock,
            config,
            writes: Mutex::new(()),
        }
    }

    pub fn in_memory(clock: SharedClock, config: SessionConfig) -> Self {
        Self::new(
            Arc::new(MemSessionRepo::new()),
            Arc::new(MemSessionKeyRepo::new()),
            clock,
            config,
        )
    }

    #[tracing::instrument(skip(self, req), fields(client_id = %req.client_id, connector_id = %req.connector_id))]
    pub async fn new_session(&self, req: NewSession) -> Result<String, SessionError> {
        let now = self.clock.now();
        let session = Session {
            id: generate_token(),
            state: SessionState::Created,
            connector_id: req.connector_id,
            client_id: req.client_id,
            client_state: req.client_state,
            redirect_uri: req.redirect_uri,
            nonce: req.nonce,
            register: req.register,
            scopes: req.scopes,
            identity: None,
            user_id: None,
            code: None,
            created_at: now,
            expires_at: now + self.config.session_ttl,
        };
        let id = session.id.clone();
        self.sessions.create(session).await?;
        tracing::debug!("Session created");
        Ok(id)
    }

    /// Returns a live session, or `NotFound` if it is missing, expired or redeemed.
    pub async fn get(&self, session_id: &str) -> Result<Session, SessionError> {
        let Some(session) = self.sessions.get(session_id).await? else {
            return Err(SessionError::NotFound(session_id.to_string()));
        };
        if session.state == SessionState::Redeemed {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        if session.is_expired(self.clock.now()) {
            self.sessions.remove(session_id).await?;
            tracing::debug!(session_id, "Dropped expired session");
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        Ok(session)
    }

    /// Records the federated identity. Attaching again overwrites the previous identity.
    #[tracing::instrument(skip(self, identity))]
    pub async fn attach_remote_identity(
        &self,
        session_id: &str,
        identity: RemoteIdentity,
    ) -> Result<String, SessionError> {
        self.modify(session_id, |s| {
            s.identity = Some(identity);
            s.state = s.state.max(SessionState::IdentityAttached);
        })
        .await
    }

    /// Records the verified local user. Attaching again overwrites the previous user.
    #[tracing::instrument(skip(self))]
    pub async fn attach_user(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<String, SessionError> {
        self.modify(session_id, |s| {
            s.user_id = Some(user_id.to_string());
            s.state = s.state.max(SessionState::UserAttached);
        })
        .await
    }

    /// Mints a fresh one-time code for the session, revoking any earlier one.
    #[tracing::instrument(skip(self))]
    pub async fn new_session_key(&self, session_id: &str) -> Result<String, SessionError> {
        let _guard = self.writes.lock().await;
        let mut session = self.get(session_id).await?;

        if let Some(previous) = session.code.take() {
            self.keys.pop(&previous).await?;
            tracing::debug!("Revoked previous code");
        }

        let key = SessionKey {
            code: generate_token(),
            session_id: session.id.clone(),
            expires_at: self.clock.now() + self.config.code_ttl,
        };
        let code = key.code.clone();
        self.keys.push(key).await?;

        session.code = Some(code.clone());
        session.state = session.state.max(SessionState::CodeIssued);
        match self.sessions.update(session).await {
            Ok(()) => Ok(code),
            Err(StorageError::NotFound(_)) => {
                // Redeemed or purged concurrently.
                self.keys.pop(&code).await?;
                Err(SessionError::NotFound(session_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Exchanges a code for its session. Succeeds at most once per code; the
    /// session is consumed on success.
    #[tracing::instrument(skip(self, code))]
    pub async fn redeem(&self, code: &str) -> Result<Session, SessionError> {
        let now = self.clock.now();

        let Some(key) = self.keys.pop(code).await? else {
            tracing::debug!("Unknown or already redeemed code");
            return Err(SessionError::InvalidCode);
        };
        if key.is_expired(now) {
            tracing::debug!(session_id = %key.session_id, "Expired code");
            return Err(SessionError::InvalidCode);
        }

        let _guard = self.writes.lock().await;
        let bound = |s: &Session| s.code.as_deref() == Some(code);
        match self.sessions.get(&key.session_id).await? {
            Some(s) if bound(&s) => {}
            _ => return Err(SessionError::InvalidCode),
        }
        let Some(mut session) = self.sessions.remove(&key.session_id).await? else {
            return Err(SessionError::InvalidCode);
        };
        if !bound(&session) || session.is_expired(now) {
            return Err(SessionError::InvalidCode);
        }

        session.state = SessionState::Redeemed;
        tracing::info!(session_id = %session.id, client_id = %session.client_id, "Code redeemed");
        Ok(session)
    }

    /// Removes expired sessions and codes; returns `(sessions, codes)` removed.
    pub async fn purge_expired(&self) -> Result<(usize, usize), SessionError> {
        let now = self.clock.now();
        let sessions = self.sessions.purge_expired(now).await?;
        let codes = self.keys.purge_expired(now).await?;
        Ok((sessions, codes))
    }

    async fn modify<F>(&self, session_id: &str, f: F) -> Result<String, SessionError>
    where
        F: FnOnce(&mut Session) + Send,
    {
        let _guard = self.writes.lock().await;
        let mut session = self.get(session_id).await?;
        f(&mut session);
        let id = session.id.clone();
        match self.sessions.update(session).await {
            Ok(()) => Ok(id),
            Err(StorageError::NotFound(_)) => Err(SessionError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}
