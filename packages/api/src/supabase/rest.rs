//! Table access through the REST endpoint.
//!
//! A [`Query`] becomes query-string parameters:
//!
//! | Filter | Parameter |
//! |--------|-----------|
//! | `Eq(col, v)` | `col=eq.v` (`col=is.null` for null) |
//! | `In(col, vs)` | `col=in.(v1,v2)` |
//! | `Or(fs)` | `or=(col.eq.v,other.eq.w)` |
//! | order | `order=col.asc` / `order=col.desc` |
//!
//! Values inside `in.(...)` and `or=(...)` are double-quoted when they contain
//! a reserved character.

use reqwest::Method;
use serde_json::Value;
use store::{Error, Filter, Query, Result, Table, Tables};

use super::{json_body, send, SupabaseBackend};

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// A value inside a list or logic group.
fn quoted(value: &Value) -> String {
    let text = plain(value);
    if text.contains([',', '(', ')', '.', ':', '"', ' ']) {
        format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        text
    }
}

fn list(values: &[Value]) -> String {
    let items: Vec<String> = values.iter().map(quoted).collect();
    format!("({})", items.join(","))
}

/// `col.op.value` form used inside `or=(...)`.
fn condition(filter: &Filter) -> String {
    match filter {
        Filter::Eq(column, Value::Null) => format!("{column}.is.null"),
        Filter::Eq(column, value) => format!("{column}.eq.{}", quoted(value)),
        Filter::In(column, values) => format!("{column}.in.{}", list(values)),
        Filter::Or(filters) => format!("or{}", group(filters)),
    }
}

fn group(filters: &[Filter]) -> String {
    let conditions: Vec<String> = filters.iter().map(condition).collect();
    format!("({})", conditions.join(","))
}

/// Query-string parameters for a query, `select=*` first.
pub fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    for filter in &query.filters {
        params.push(match filter {
            Filter::Eq(column, Value::Null) => (column.clone(), "is.null".to_string()),
            Filter::Eq(column, value) => (column.clone(), format!("eq.{}", plain(value))),
            Filter::In(column, values) => (column.clone(), format!("in.{}", list(values))),
            Filter::Or(filters) => ("or".to_string(), group(filters)),
        });
    }
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    params
}

fn table_path(table: Table) -> String {
    format!("/rest/v1/{}", table.as_str())
}

fn rows(body: Value, what: &'static str) -> Result<Vec<Value>> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value(other).map_err(|source| Error::Decode { what, source }),
    }
}

impl Tables for SupabaseBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let request = self
            .request(Method::GET, &table_path(query.table))?
            .query(&query_params(query));
        let response = send(request, "select").await?;
        rows(json_body(response, "rows").await?, "rows")
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let request = self
            .request(Method::POST, &table_path(table))?
            .header("Prefer", "return=representation")
            .json(&row);
        let response = send(request, "insert").await?;
        rows(json_body(response, "inserted row").await?, "inserted row")?
            .into_iter()
            .next()
            .ok_or_else(|| Error::remote("insert returned no row"))
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        let mut params = query_params(query);
        params.retain(|(key, _)| key != "order");
        let request = self
            .request(Method::PATCH, &table_path(query.table))?
            .header("Prefer", "return=representation")
            .query(&params)
            .json(&patch);
        let response = send(request, "update").await?;
        rows(json_body(response, "updated rows").await?, "updated rows")
    }

    async fn delete(&self, query: &Query) -> Result<usize> {
        let mut params = query_params(query);
        params.retain(|(key, _)| key != "order");
        let request = self
            .request(Method::DELETE, &table_path(query.table))?
            .header("Prefer", "return=representation")
            .query(&params);
        let response = send(request, "delete").await?;
        Ok(rows(json_body(response, "deleted rows").await?, "deleted rows")?.len())
    }

    async fn upsert(&self, table: Table, row: Value, on_conflict: &str) -> Result<()> {
        let request = self
            .request(Method::POST, &table_path(table))?
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", on_conflict)])
            .json(&row);
        send(request, "upsert").await?;
        Ok(())
    }
}
