use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

use crate::backend::{AuthEvent, AuthService, ObjectStorage, Query, SignUpOutcome, Table, Tables};
use crate::error::{Error, Result};
use crate::models::{AuthSession, Identity};
use crate::photos::{FetchedResource, ResourceFetcher};

#[derive(Debug)]
struct Account {
    password: String,
    identity: Identity,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<Table, Vec<Value>>,
    accounts: HashMap<String, Account>,
    refresh_tokens: HashMap<String, String>,
    session: Option<AuthSession>,
    objects: HashMap<String, StoredObject>,
    rejected: HashMap<Table, String>,
    upload_rejection: Option<String>,
    requests: usize,
    ticks: i64,
}

/// In-memory backend for tests and offline demos.
///
/// Generates `id` and `created_at` on insert the way the hosted database does,
/// with strictly increasing timestamps so creation-time ordering is stable.
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    events: broadcast::Sender<AuthEvent>,
    epoch: DateTime<Utc>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            events,
            epoch: Utc::now(),
        }
    }

    /// Number of backend calls issued so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests
    }

    /// Current contents of a table.
    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&format!("{bucket}/{key}"))
            .cloned()
    }

    /// Make every operation on `table` fail with `message`.
    pub fn reject(&self, table: Table, message: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert(table, message.to_string());
    }

    pub fn reject_uploads(&self, message: &str) {
        self.state.lock().unwrap().upload_rejection = Some(message.to_string());
    }

    /// Broadcast an auth event as if it came from outside the client.
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.state.lock().unwrap().session.clone()
    }

    fn begin(&self, table: Option<Table>) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        if let Some(message) = table.and_then(|t| state.rejected.get(&t)) {
            return Err(Error::remote(message.clone()));
        }
        Ok(state)
    }

    fn next_timestamp(&self, state: &mut MemoryState) -> String {
        state.ticks += 1;
        (self.epoch + Duration::milliseconds(state.ticks))
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn insert_row(&self, state: &mut MemoryState, table: Table, mut row: Value) -> Result<Value> {
        let created_at = self.next_timestamp(state);
        let Some(fields) = row.as_object_mut() else {
            return Err(Error::remote("row must be a JSON object"));
        };
        fields
            .entry("id")
            .or_insert_with(|| json!(uuid::Uuid::new_v4().to_string()));
        fields.entry("created_at").or_insert_with(|| json!(created_at));
        state.rows.entry(table).or_default().push(row.clone());
        Ok(row)
    }

    fn issue_session(state: &mut MemoryState, identity: Identity) -> AuthSession {
        let refresh_token = format!("refresh-{}", uuid::Uuid::new_v4());
        state
            .refresh_tokens
            .insert(refresh_token.clone(), identity.email.clone().unwrap_or_default());
        let session = AuthSession {
            access_token: format!("access-{}", uuid::Uuid::new_v4()),
            refresh_token,
            expires_at: Some(Utc::now().timestamp() + 3600),
            user: identity,
        };
        state.session = Some(session.clone());
        session
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl AuthService for MemoryBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession> {
        let mut state = self.begin(None)?;
        let identity = match state.accounts.get(&email.to_lowercase()) {
            Some(account) if account.password == password => account.identity.clone(),
            _ => return Err(Error::remote("Invalid login credentials")),
        };
        let session = Self::issue_session(&mut state, identity);
        drop(state);
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUpOutcome> {
        let mut state = self.begin(None)?;
        let key = email.to_lowercase();
        if state.accounts.contains_key(&key) {
            return Err(Error::remote("User already registered"));
        }
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            user_metadata: metadata.as_object().cloned().unwrap_or_else(Map::new),
        };
        state.accounts.insert(
            key,
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        Ok(SignUpOutcome {
            identity,
            session: None,
        })
    }

    async fn sign_out(&self) -> Result<()> {
        let mut state = self.begin(None)?;
        state.session = None;
        drop(state);
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession> {
        let mut state = self.begin(None)?;
        let email = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| Error::remote("Invalid Refresh Token"))?;
        let identity = state
            .accounts
            .get(&email.to_lowercase())
            .map(|a| a.identity.clone())
            .ok_or_else(|| Error::remote("User not found"))?;
        let session = Self::issue_session(&mut state, identity);
        drop(state);
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    fn set_session(&self, session: Option<AuthSession>) {
        self.state.lock().unwrap().session = session;
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

impl Tables for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let state = self.begin(Some(query.table))?;
        let mut rows: Vec<Value> = state
            .rows
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let mut state = self.begin(Some(table))?;
        self.insert_row(&mut state, table, row)
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        let mut state = self.begin(Some(query.table))?;
        let mut updated = Vec::new();
        if let Some(rows) = state.rows.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                merge(row, &patch);
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> Result<usize> {
        let mut state = self.begin(Some(query.table))?;
        let Some(rows) = state.rows.get_mut(&query.table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !query.matches(r));
        Ok(before - rows.len())
    }

    async fn upsert(&self, table: Table, row: Value, on_conflict: &str) -> Result<()> {
        let mut state = self.begin(Some(table))?;
        let key = row.get(on_conflict).cloned();
        let existing = state
            .rows
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|r| key.is_some() && r.get(on_conflict) == key.as_ref());
        match existing {
            Some(target) => merge(target, &row),
            None => {
                self.insert_row(&mut state, table, row)?;
            }
        }
        Ok(())
    }
}

impl ObjectStorage for MemoryBackend {
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut state = self.begin(None)?;
        if let Some(message) = state.upload_rejection.clone() {
            return Err(Error::remote(message));
        }
        let path = format!("{bucket}/{key}");
        if state.objects.contains_key(&path) {
            return Err(Error::remote("The resource already exists"));
        }
        state.objects.insert(
            path,
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> Result<String> {
        Ok(format!("memory://{bucket}/{key}"))
    }
}

/// In-memory [`ResourceFetcher`] keyed by URI.
#[derive(Clone, Debug, Default)]
pub struct MemoryFetcher {
    resources: Arc<Mutex<HashMap<String, FetchedResource>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: &str, bytes: &[u8], content_type: Option<&str>) {
        self.resources.lock().unwrap().insert(
            uri.to_string(),
            FetchedResource {
                bytes: bytes.to_vec(),
                content_type: content_type.map(String::from),
            },
        );
    }
}

impl ResourceFetcher for MemoryFetcher {
    async fn fetch(&self, uri: &str) -> std::result::Result<FetchedResource, String> {
        self.resources
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| format!("no such resource: {uri}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Filter;

    #[tokio::test]
    async fn insert_fills_generated_columns() {
        let backend = MemoryBackend::new();
        let first = backend
            .insert(Table::Comments, json!({ "text": "first" }))
            .await
            .unwrap();
        let second = backend
            .insert(Table::Comments, json!({ "text": "second" }))
            .await
            .unwrap();

        assert!(first["id"].is_string());
        assert_ne!(first["id"], second["id"]);
        assert!(first["created_at"].as_str() < second["created_at"].as_str());
    }

    #[tokio::test]
    async fn select_orders_and_filters() {
        let backend = MemoryBackend::new();
        for (name, owner) in [("Minji", "c1"), ("Andrew", "c1"), ("Zoe", "c2")] {
            backend
                .insert(Table::Wards, json!({ "name": name, "caregiver_id": owner }))
                .await
                .unwrap();
        }

        let query = Query::from(Table::Wards)
            .or(vec![Filter::eq("caregiver_id", "c1"), Filter::eq("guardian_id", "c1")])
            .order_by("name", true);
        let names: Vec<_> = backend
            .select(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Andrew", "Minji"]);
    }

    #[tokio::test]
    async fn update_and_delete_report_effect() {
        let backend = MemoryBackend::new();
        let row = backend
            .insert(Table::Comments, json!({ "user_id": "u1", "text": "hi" }))
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap();

        let miss = Query::from(Table::Comments).eq("id", id).eq("user_id", "u2");
        assert!(backend.update(&miss, json!({ "text": "x" })).await.unwrap().is_empty());
        assert_eq!(backend.delete(&miss).await.unwrap(), 0);

        let hit = Query::from(Table::Comments).eq("id", id).eq("user_id", "u1");
        let updated = backend.update(&hit, json!({ "text": "edited" })).await.unwrap();
        assert_eq!(updated[0]["text"], "edited");
        assert_eq!(backend.delete(&hit).await.unwrap(), 1);
        assert!(backend.rows(Table::Comments).is_empty());
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_column() {
        let backend = MemoryBackend::new();
        let row = json!({ "id": "u1", "name": "Kim", "role": "guardian" });
        backend.upsert(Table::Users, row.clone(), "id").await.unwrap();
        backend
            .upsert(Table::Users, json!({ "id": "u1", "role": "caregiver" }), "id")
            .await
            .unwrap();

        let rows = backend.rows(Table::Users);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Kim");
        assert_eq!(rows[0]["role"], "caregiver");
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn rejected_table_fails_every_call() {
        let backend = MemoryBackend::new();
        backend.reject(Table::Notes, "permission denied");
        let err = backend.select(&Query::from(Table::Notes)).await.unwrap_err();
        assert_eq!(err.user_message(), "permission denied");
    }

    #[tokio::test]
    async fn password_sign_in_checks_credentials() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .sign_up("kim@example.com", "Abcd123!", json!({ "role": "caregiver" }))
            .await
            .unwrap();
        assert!(outcome.session.is_none());

        assert!(backend.sign_in_with_password("kim@example.com", "nope").await.is_err());
        let session = backend
            .sign_in_with_password("KIM@example.com", "Abcd123!")
            .await
            .unwrap();
        assert_eq!(session.user.id, outcome.identity.id);

        let refreshed = backend.refresh_session(&session.refresh_token).await.unwrap();
        assert_ne!(refreshed.access_token, session.access_token);
        assert!(backend.refresh_session(&session.refresh_token).await.is_err());
    }
}
