//! # Profile synchronizer
//!
//! Every distinct signed-in identity gets a normalized row in `users`. The
//! reaction is an explicit pipeline: [`ProfileSync::run`] consumes the session
//! subject and hands each identity to [`ProfileSync::handle`], which derives the
//! profile with [`derive_profile`] and upserts it keyed on `id`.
//!
//! The sync is best-effort. A failed upsert is logged and the session carries
//! on.

use serde_json::json;
use tokio::sync::watch;

use crate::backend::{Table, Tables};
use crate::models::{Identity, IdentitySignature, Role, UserProfile};
use crate::session::SessionState;

/// Name stored when neither the metadata nor the email yields one.
pub const PLACEHOLDER_NAME: &str = "Unnamed";

/// Normalize raw identity metadata into the stored profile.
pub fn derive_profile(identity: &Identity) -> UserProfile {
    let email = identity.email.clone().unwrap_or_default();

    let name = identity
        .metadata_str("name")
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| {
            email
                .split('@')
                .next()
                .map(str::trim)
                .filter(|local| !local.is_empty())
        })
        .or_else(|| Some(email.trim()).filter(|e| !e.is_empty()))
        .unwrap_or(PLACEHOLDER_NAME)
        .to_string();

    UserProfile {
        id: identity.id.clone(),
        name,
        role: Role::from_metadata(identity.metadata_str("role")),
        affiliation: identity.affiliation().map(String::from),
        email,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    /// Nobody signed in, or this identity was already synced.
    Skipped,
    Synced(UserProfile),
    /// The upsert failed; the error was logged.
    Failed,
}

/// Upserts a profile once per distinct identity.
pub struct ProfileSync<T> {
    tables: T,
    last: Option<IdentitySignature>,
}

impl<T: Tables> ProfileSync<T> {
    pub fn new(tables: T) -> Self {
        Self { tables, last: None }
    }

    pub async fn handle(&mut self, identity: Option<&Identity>) -> SyncOutcome {
        let Some(identity) = identity else {
            self.last = None;
            return SyncOutcome::Skipped;
        };

        let signature = identity.signature();
        if self.last.as_ref() == Some(&signature) {
            return SyncOutcome::Skipped;
        }
        self.last = Some(signature);

        let profile = derive_profile(identity);
        let row = json!({
            "id": profile.id,
            "email": profile.email,
            "name": profile.name,
            "role": profile.role.as_str(),
            "affiliation": profile.affiliation,
        });

        match self.tables.upsert(Table::Users, row, "id").await {
            Ok(()) => {
                tracing::debug!(user_id = %profile.id, role = profile.role.as_str(), "profile synced");
                SyncOutcome::Synced(profile)
            }
            Err(e) => {
                tracing::warn!(user_id = %profile.id, error = %e, "profile sync failed");
                SyncOutcome::Failed
            }
        }
    }

    /// Follow the session subject until its sender goes away.
    pub async fn run(mut self, mut sessions: watch::Receiver<SessionState>) {
        loop {
            let identity = sessions.borrow_and_update().identity.clone();
            self.handle(identity.as_ref()).await;
            if sessions.changed().await.is_err() {
                break;
            }
        }
    }
}
