//! # Comment thread
//!
//! Discussion under a note. Edits and deletes are filtered on both the comment
//! id and the actor's id, so a request from anyone but the author matches no
//! row and reports zero affected rows rather than an error.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use crate::backend::{decode, select_as, Query, Table, Tables};
use crate::error::{Error, Result, ValidationError};
use crate::models::{Comment, CommentAuthor, CommentWithAuthor, Identity};

#[derive(Deserialize)]
struct AuthorRow {
    id: String,
    name: String,
    #[serde(default)]
    role: crate::models::Role,
}

fn non_empty(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyComment.into());
    }
    Ok(text)
}

#[derive(Clone, Debug)]
pub struct CommentThread<T> {
    tables: T,
}

impl<T: Tables> CommentThread<T> {
    pub fn new(tables: T) -> Self {
        Self { tables }
    }

    /// Comments on a note, oldest first, with their authors' name and role.
    pub async fn list(&self, note_id: &str) -> Result<Vec<CommentWithAuthor>> {
        let query = Query::from(Table::Comments)
            .eq("note_id", note_id)
            .order_by("created_at", true);
        let comments: Vec<Comment> = select_as(&self.tables, &query, "comment").await?;
        if comments.is_empty() {
            return Ok(Vec::new());
        }

        let mut author_ids: Vec<&str> = comments.iter().map(|c| c.user_id.as_str()).collect();
        author_ids.sort_unstable();
        author_ids.dedup();
        let authors: Vec<AuthorRow> = select_as(
            &self.tables,
            &Query::from(Table::Users).is_in("id", author_ids),
            "comment author",
        )
        .await?;
        let authors: HashMap<String, CommentAuthor> = authors
            .into_iter()
            .map(|a| (a.id, CommentAuthor { name: a.name, role: a.role }))
            .collect();

        Ok(comments
            .into_iter()
            .map(|comment| {
                let author = authors.get(&comment.user_id).cloned();
                CommentWithAuthor { comment, author }
            })
            .collect())
    }

    pub async fn create(&self, actor: Option<&Identity>, note_id: &str, text: &str) -> Result<Comment> {
        let text = non_empty(text)?;
        let actor = actor.ok_or(Error::Unauthenticated)?;
        let row = json!({ "note_id": note_id, "user_id": actor.id, "text": text });
        let stored = self.tables.insert(Table::Comments, row).await.inspect_err(|e| {
            tracing::error!(note_id, error = %e, "failed to post comment");
        })?;
        decode(stored, "comment")
    }

    /// Change the text of the actor's own comment. Returns the number of rows changed.
    pub async fn update(&self, actor: Option<&Identity>, id: &str, text: &str) -> Result<usize> {
        let text = non_empty(text)?;
        let actor = actor.ok_or(Error::Unauthenticated)?;
        let updated = self
            .tables
            .update(&own_comment(id, actor), json!({ "text": text }))
            .await
            .inspect_err(|e| tracing::error!(comment_id = id, error = %e, "failed to edit comment"))?;
        Ok(updated.len())
    }

    /// Delete the actor's own comment. Returns the number of rows removed.
    pub async fn delete(&self, actor: Option<&Identity>, id: &str) -> Result<usize> {
        let actor = actor.ok_or(Error::Unauthenticated)?;
        self.tables
            .delete(&own_comment(id, actor))
            .await
            .inspect_err(|e| tracing::error!(comment_id = id, error = %e, "failed to delete comment"))
    }
}

fn own_comment(id: &str, actor: &Identity) -> Query {
    Query::from(Table::Comments)
        .eq("id", id)
        .eq("user_id", actor.id.as_str())
}
