//! # Session store
//!
//! Holds who is signed in and broadcasts changes through an explicit
//! [`tokio::sync::watch`] subject. Downstream code either reads
//! [`SessionStore::current`] or keeps a receiver from
//! [`SessionStore::subscribe`]; repositories never reach for the session on
//! their own and take the acting identity as an argument instead.
//!
//! ## Lifecycle
//!
//! [`SessionStore::start`] loads any persisted session (clearing `loading`),
//! installs it into the auth service, then spawns a listener on the service's
//! [`AuthEvent`] stream for the rest of the store's life. The listener is
//! aborted by [`SessionStore::shutdown`] or when the store is dropped.
//!
//! Sign-in, sign-up and sign-out return the auth service's raw result; a
//! successful call updates the subject immediately. The service also queues an
//! event for that call, and the listener skips it when it arrives, so a late
//! `SignedIn` cannot bring back a session the store has already signed out.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::backend::{AuthEvent, AuthService, SignUpOutcome};
use crate::error::{Error, Result};
use crate::file_store::SessionPersistence;
use crate::models::{AuthSession, Identity};

/// Snapshot published to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            identity: None,
            loading: true,
        }
    }
}

/// Most own-session echoes remembered at once.
const MAX_ECHOES: usize = 8;

/// Events the store expects to see from its own calls.
#[derive(Debug, Default)]
struct Echoes {
    access_tokens: VecDeque<String>,
    sign_outs: usize,
}

impl Echoes {
    fn expect_session(&mut self, session: &AuthSession) {
        if self.access_tokens.len() == MAX_ECHOES {
            self.access_tokens.pop_front();
        }
        self.access_tokens.push_back(session.access_token.clone());
    }

    /// Consume the expectation matching `event`, if any.
    fn take(&mut self, event: &AuthEvent) -> bool {
        match event.session() {
            Some(session) => {
                match self
                    .access_tokens
                    .iter()
                    .position(|token| *token == session.access_token)
                {
                    Some(i) => {
                        self.access_tokens.remove(i);
                        true
                    }
                    None => false,
                }
            }
            None if self.sign_outs > 0 => {
                self.sign_outs -= 1;
                true
            }
            None => false,
        }
    }
}

/// State shared between the store and its event listener.
struct Shared {
    subject: watch::Sender<SessionState>,
    session: Mutex<Option<AuthSession>>,
    echoes: Mutex<Echoes>,
    persistence: Arc<dyn SessionPersistence>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Option<AuthSession>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn echoes(&self) -> MutexGuard<'_, Echoes> {
        self.echoes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a session obtained by the store's own call.
    fn apply_own(&self, session: AuthSession) {
        self.echoes().expect_session(&session);
        self.apply(Some(session));
    }

    /// Record `session` as current, persist it and publish the identity.
    fn apply(&self, session: Option<AuthSession>) {
        match &session {
            Some(s) => self.persistence.save(s),
            None => self.persistence.clear(),
        }
        let identity = session.as_ref().map(|s| s.user.clone());
        *self.session() = session;
        self.subject.send_if_modified(|state| {
            if state.identity == identity && !state.loading {
                return false;
            }
            state.identity = identity;
            state.loading = false;
            true
        });
    }
}

pub struct SessionStore<A> {
    auth: A,
    shared: Arc<Shared>,
    listener: Option<JoinHandle<()>>,
}

impl<A: AuthService> SessionStore<A> {
    /// Restore the persisted session and start following auth events.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(auth: A, persistence: Arc<dyn SessionPersistence>) -> Self {
        let (subject, _) = watch::channel(SessionState::default());
        let shared = Arc::new(Shared {
            subject,
            session: Mutex::new(None),
            echoes: Mutex::new(Echoes::default()),
            persistence,
        });

        let restored = shared.persistence.load();
        if let Some(session) = &restored {
            tracing::debug!(user_id = %session.user.id, "restored persisted session");
        }
        auth.set_session(restored.clone());
        shared.apply(restored);

        let events = auth.auth_events();
        let listener = tokio::spawn(follow_auth_events(events, Arc::clone(&shared)));

        Self {
            auth,
            shared,
            listener: Some(listener),
        }
    }

    pub fn current(&self) -> SessionState {
        self.shared.subject.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.current().identity
    }

    pub fn is_caregiver(&self) -> bool {
        self.identity().is_some_and(|i| i.is_caregiver())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.subject.subscribe()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let session = self.auth.sign_in_with_password(email, password).await?;
        self.shared.apply_own(session.clone());
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUpOutcome> {
        let outcome = self.auth.sign_up(email, password, metadata).await?;
        if let Some(session) = &outcome.session {
            self.shared.apply_own(session.clone());
        }
        Ok(outcome)
    }

    pub async fn sign_out(&self) -> Result<()> {
        // Counted before the call: the event may be handled before it returns.
        self.shared.echoes().sign_outs += 1;
        if let Err(e) = self.auth.sign_out().await {
            let mut echoes = self.shared.echoes();
            echoes.sign_outs = echoes.sign_outs.saturating_sub(1);
            return Err(e);
        }
        self.shared.apply(None);
        Ok(())
    }

    /// Exchange the refresh token for a fresh session.
    pub async fn refresh(&self) -> Result<AuthSession> {
        let refresh_token = self
            .shared
            .session()
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(Error::Unauthenticated)?;
        let session = self.auth.refresh_session(&refresh_token).await?;
        self.shared.apply_own(session.clone());
        Ok(session)
    }

    /// Stop following auth events. Subscribers see the subject close once the
    /// store itself is dropped.
    pub fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl<A> Drop for SessionStore<A> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn follow_auth_events(mut events: broadcast::Receiver<AuthEvent>, shared: Arc<Shared>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if shared.echoes().take(&event) {
                    continue;
                }
                tracing::debug!(signed_in = event.session().is_some(), "auth state changed");
                shared.apply(event.session().cloned());
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "auth listener lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
