//! Password auth against `/auth/v1`.

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use store::backend::decode;
use store::{AuthEvent, AuthService, AuthSession, Identity, Result, SignUpOutcome};
use tokio::sync::broadcast;

use super::{json_body, send, SupabaseBackend};

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: Identity,
}

impl From<TokenResponse> for AuthSession {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| chrono::Utc::now().timestamp() + secs));
        AuthSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user,
        }
    }
}

/// Sign-up answers with a full session when confirmation is off, and with the
/// bare user (or `{ user }`) when an email confirmation is pending.
pub fn parse_sign_up(body: Value) -> Result<SignUpOutcome> {
    if body.get("access_token").is_some() {
        let session: AuthSession = decode::<TokenResponse>(body, "sign-up session")?.into();
        return Ok(SignUpOutcome {
            identity: session.user.clone(),
            session: Some(session),
        });
    }
    let user = match body.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => body,
    };
    Ok(SignUpOutcome {
        identity: decode(user, "sign-up user")?,
        session: None,
    })
}

impl SupabaseBackend {
    async fn token(&self, grant_type: &str, body: Value, action: &'static str) -> Result<AuthSession> {
        let request = self
            .request(Method::POST, &format!("/auth/v1/token?grant_type={grant_type}"))?
            .json(&body);
        let response = send(request, action).await?;
        let token: TokenResponse = decode(json_body(response, "session").await?, "session")?;
        Ok(token.into())
    }
}

impl AuthService for SupabaseBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession> {
        let session = self
            .token("password", json!({ "email": email, "password": password }), "sign in")
            .await?;
        self.publish(Some(session.clone()), AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUpOutcome> {
        let request = self
            .request(Method::POST, "/auth/v1/signup")?
            .json(&json!({ "email": email, "password": password, "data": metadata }));
        let response = send(request, "sign up").await?;
        let outcome = parse_sign_up(json_body(response, "sign-up").await?)?;
        if let Some(session) = &outcome.session {
            self.publish(Some(session.clone()), AuthEvent::SignedIn(session.clone()));
        }
        Ok(outcome)
    }

    async fn sign_out(&self) -> Result<()> {
        if self.access_token().is_some() {
            let request = self.request(Method::POST, "/auth/v1/logout")?;
            send(request, "sign out").await?;
        }
        self.publish(None, AuthEvent::SignedOut);
        Ok(())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession> {
        let session = self
            .token(
                "refresh_token",
                json!({ "refresh_token": refresh_token }),
                "refresh session",
            )
            .await?;
        self.publish(Some(session.clone()), AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    fn set_session(&self, session: Option<AuthSession>) {
        *self.session() = session;
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
