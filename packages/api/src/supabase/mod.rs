//! # Hosted backend client
//!
//! [`SupabaseBackend`] implements the three `store::backend` traits over the
//! backend-as-a-service HTTP API:
//!
//! | Trait | Endpoint |
//! |-------|----------|
//! | `AuthService` ([`auth`]) | `/auth/v1/token`, `/auth/v1/signup`, `/auth/v1/logout` |
//! | `Tables` ([`rest`]) | `/rest/v1/{table}` with query-string filters |
//! | `ObjectStorage` ([`storage`]) | `/storage/v1/object/{bucket}/{key}` |
//!
//! Every request carries the anon key as `apikey` and, once signed in, the
//! session's access token as the bearer. Without credentials every call fails
//! with [`Error::Config`]; nothing is sent.

pub mod auth;
pub mod rest;
pub mod storage;

use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use store::{AuthEvent, AuthSession, Error, Result};
use tokio::sync::broadcast;

use crate::config::{AppConfig, BackendCredentials};

#[derive(Clone, Debug)]
pub struct SupabaseBackend {
    http: Client,
    credentials: Option<BackendCredentials>,
    session: Arc<Mutex<Option<AuthSession>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseBackend {
    pub fn new(config: &AppConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            http: Client::new(),
            credentials: config.backend().ok(),
            session: Arc::new(Mutex::new(None)),
            events,
        }
    }

    fn credentials(&self) -> Result<&BackendCredentials> {
        self.credentials.as_ref().ok_or_else(|| {
            Error::Config("SUPABASE_URL and SUPABASE_ANON_KEY must both be set".into())
        })
    }

    fn session(&self) -> MutexGuard<'_, Option<AuthSession>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn access_token(&self) -> Option<String> {
        self.session().as_ref().map(|s| s.access_token.clone())
    }

    /// Store the session and tell listeners about it.
    fn publish(&self, session: Option<AuthSession>, event: AuthEvent) {
        *self.session() = session;
        // no receivers is fine
        let _ = self.events.send(event);
    }

    /// A request to `{url}{path}` with the key and bearer headers set.
    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let credentials = self.credentials()?;
        let bearer = self
            .access_token()
            .unwrap_or_else(|| credentials.anon_key.clone());
        Ok(self
            .http
            .request(method, format!("{}{}", credentials.url, path))
            .header("apikey", &credentials.anon_key)
            .header("Authorization", format!("Bearer {}", bearer)))
    }
}

/// Send, and turn transport failures and non-2xx answers into [`Error::Remote`].
async fn send(request: RequestBuilder, action: &'static str) -> Result<Response> {
    let response = request.send().await.map_err(|e| {
        tracing::error!(action, error = %e, "request failed");
        Error::remote(e.to_string())
    })?;

    let status = response.status();
    if status.is_success() {
        tracing::debug!(action, status = status.as_u16(), "request succeeded");
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = remote_message(&body);
    tracing::error!(action, status = status.as_u16(), message = %message, "request rejected");
    Err(Error::remote(message))
}

async fn json_body(response: Response, what: &'static str) -> Result<Value> {
    let bytes = response.bytes().await.map_err(|e| Error::remote(e.to_string()))?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|source| Error::Decode { what, source })
}

/// The human-readable part of an error body.
pub fn remote_message(body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        for key in ["msg", "message", "error_description", "error"] {
            if let Some(text) = fields.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    return text.trim().to_string();
                }
            }
        }
    }
    body.trim().to_string()
}
