//! # Backend seams: auth, tables and object storage
//!
//! Every repository in this crate talks to the hosted backend through three
//! async traits, so the same logic runs against the HTTP client in the `api`
//! crate or against [`crate::MemoryBackend`] in tests.
//!
//! ## [`AuthService`]
//!
//! Password sign-in, sign-up with a metadata bag, sign-out, token refresh, and
//! a broadcast of [`AuthEvent`]s for anyone who needs to follow auth-state
//! changes made outside their own calls.
//!
//! ## [`Tables`]
//!
//! Row CRUD against the four tables, driven by a small [`Query`] value:
//!
//! | Builder | Meaning |
//! |---------|---------|
//! | [`Query::eq`] | `column = value` |
//! | [`Query::is_in`] | `column IN (values)` |
//! | [`Query::or`] | any of the nested filters matches |
//! | [`Query::order_by`] | server-side ordering |
//!
//! Rows travel as `serde_json::Value`; [`select_as`] decodes them into the
//! typed models.
//!
//! ## [`ObjectStorage`]
//!
//! Upload bytes under a key with a content type, and resolve the public URL of
//! a key.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::models::{AuthSession, Identity};

/// Tables the client reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Wards,
    Notes,
    Comments,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Wards => "wards",
            Table::Notes => "notes",
            Table::Comments => "comments",
        }
    }
}

/// A row predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    /// Evaluate against a JSON row.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq(column, value) => row.get(column) == Some(value),
            Filter::In(column, values) => row
                .get(column)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A filtered, optionally ordered selection of rows in one table.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn is_in<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn or(mut self, filters: Vec<Filter>) -> Self {
        self.filters.push(Filter::Or(filters));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    /// True when every filter matches the row.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

/// Auth-state change notifications.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    SignedOut,
    TokenRefreshed(AuthSession),
}

impl AuthEvent {
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            AuthEvent::SignedIn(s) | AuthEvent::TokenRefreshed(s) => Some(s),
            AuthEvent::SignedOut => None,
        }
    }
}

/// What sign-up returns: always the new identity, and a session when the
/// backend confirms accounts immediately.
#[derive(Clone, Debug, PartialEq)]
pub struct SignUpOutcome {
    pub identity: Identity,
    pub session: Option<AuthSession>,
}

/// Identity provider operations.
pub trait AuthService {
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthSession>>;
    fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> impl Future<Output = Result<SignUpOutcome>>;
    fn sign_out(&self) -> impl Future<Output = Result<()>>;
    fn refresh_session(&self, refresh_token: &str) -> impl Future<Output = Result<AuthSession>>;
    /// Install a session restored from persistence so later requests carry it.
    fn set_session(&self, session: Option<AuthSession>);
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Row CRUD.
pub trait Tables {
    fn select(&self, query: &Query) -> impl Future<Output = Result<Vec<Value>>>;
    /// Insert one row and return it as stored (with generated columns filled).
    fn insert(&self, table: Table, row: Value) -> impl Future<Output = Result<Value>>;
    /// Patch every matching row; returns the rows as updated.
    fn update(&self, query: &Query, patch: Value) -> impl Future<Output = Result<Vec<Value>>>;
    /// Delete every matching row; returns how many went away.
    fn delete(&self, query: &Query) -> impl Future<Output = Result<usize>>;
    /// Insert, or merge into the row whose `on_conflict` column matches.
    fn upsert(&self, table: Table, row: Value, on_conflict: &str) -> impl Future<Output = Result<()>>;
}

/// Photo storage.
pub trait ObjectStorage {
    fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<()>>;
    fn public_url(&self, bucket: &str, key: &str) -> Result<String>;
}

/// Everything the app needs from the hosted backend.
pub trait Backend: AuthService + Tables + ObjectStorage {}

impl<T: AuthService + Tables + ObjectStorage> Backend for T {}

/// Select and decode rows into `T`.
pub async fn select_as<T, B>(tables: &B, query: &Query, what: &'static str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    B: Tables,
{
    tables
        .select(query)
        .await?
        .into_iter()
        .map(|row| decode(row, what))
        .collect()
}

pub fn decode<T: DeserializeOwned>(row: Value, what: &'static str) -> Result<T> {
    serde_json::from_value(row).map_err(|source| Error::Decode { what, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn or_filter_matches_either_column() {
        let query = Query::from(Table::Wards).or(vec![
            Filter::eq("caregiver_id", "u1"),
            Filter::eq("guardian_id", "u1"),
        ]);
        assert!(query.matches(&json!({ "caregiver_id": "u1", "guardian_id": "g" })));
        assert!(query.matches(&json!({ "caregiver_id": "c", "guardian_id": "u1" })));
        assert!(!query.matches(&json!({ "caregiver_id": "c", "guardian_id": "g" })));
    }

    #[test]
    fn filters_are_conjunctive() {
        let query = Query::from(Table::Comments).eq("id", "c1").eq("user_id", "u1");
        assert!(query.matches(&json!({ "id": "c1", "user_id": "u1" })));
        assert!(!query.matches(&json!({ "id": "c1", "user_id": "u2" })));
    }

    #[test]
    fn in_filter_requires_the_column() {
        let query = Query::from(Table::Notes).is_in("id", ["a", "b"]);
        assert!(query.matches(&json!({ "id": "b" })));
        assert!(!query.matches(&json!({ "id": "c" })));
        assert!(!query.matches(&json!({ "other": "a" })));
    }
}
