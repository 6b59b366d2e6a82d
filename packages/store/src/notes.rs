//! # Note repository
//!
//! Journal entries for one ward. A [`NoteDraft`] is the state of the entry
//! form; it is validated before anything is sent, then its local photos are
//! pushed through the [`PhotoUploader`] and the row is written with
//! `details` and `ai_note` both set to the entry text.
//!
//! Deleting a note removes its comments first. The two deletes are separate
//! requests.

use serde_json::json;

use crate::backend::{decode, select_as, ObjectStorage, Query, Table, Tables};
use crate::config::{JournalConfig, TagCategory, TagVocabulary};
use crate::error::{Error, Result, ValidationError};
use crate::models::{Identity, Note};
use crate::photos::{PhotoUploader, ResourceFetcher};

/// A photo attached to a draft.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhotoRef {
    /// Already uploaded; kept as is.
    Remote(String),
    /// Picked on the device; uploaded on save.
    Local(String),
}

/// The entry form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoteDraft {
    pub ward_id: Option<String>,
    pub text: String,
    pub meal: String,
    pub tags: Vec<String>,
    pub photos: Vec<PhotoRef>,
}

#[derive(Clone, Debug, PartialEq)]
struct ValidNote {
    ward_id: String,
    text: String,
    meal: Option<String>,
    tags: [String; 2],
}

impl NoteDraft {
    pub fn for_ward(ward_id: Option<String>) -> Self {
        Self {
            ward_id,
            ..Self::default()
        }
    }

    /// Hydrate the form from a stored entry.
    pub fn from_note(note: &Note, vocab: &TagVocabulary) -> Self {
        let first = |category| {
            note.tags
                .iter()
                .find(|t| vocab.category_of(t) == Some(category))
                .cloned()
        };
        Self {
            ward_id: Some(note.ward_id.clone()),
            text: note.preview().to_string(),
            meal: note.meal.clone().unwrap_or_default(),
            tags: [first(TagCategory::Activity), first(TagCategory::Health)]
                .into_iter()
                .flatten()
                .collect(),
            photos: note.photos.iter().cloned().map(PhotoRef::Remote).collect(),
        }
    }

    /// Pick `tag`, replacing whatever was picked from the same vocabulary.
    /// Unknown tags are ignored.
    pub fn select_tag(&mut self, vocab: &TagVocabulary, tag: &str) {
        let Some(category) = vocab.category_of(tag) else {
            return;
        };
        self.tags.retain(|t| vocab.category_of(t) != Some(category));
        self.tags.push(tag.to_string());
    }

    pub fn selected(&self, vocab: &TagVocabulary, category: TagCategory) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| vocab.category_of(t) == Some(category))
            .map(String::as_str)
    }

    fn validate(&self, vocab: &TagVocabulary, max_photos: usize) -> Result<ValidNote> {
        let ward_id = self
            .ward_id
            .clone()
            .filter(|w| !w.is_empty())
            .ok_or(ValidationError::MissingWard)?;
        let text = self.text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyNote.into());
        }

        let mut activity = Vec::new();
        let mut health = Vec::new();
        for tag in &self.tags {
            match vocab.category_of(tag) {
                Some(TagCategory::Activity) => activity.push(tag.clone()),
                Some(TagCategory::Health) => health.push(tag.clone()),
                None => return Err(ValidationError::UnknownTag(tag.clone()).into()),
            }
        }
        if activity.len() != 1 {
            return Err(ValidationError::ActivityTagCount(activity.len()).into());
        }
        if health.len() != 1 {
            return Err(ValidationError::HealthTagCount(health.len()).into());
        }

        if self.photos.len() > max_photos {
            return Err(ValidationError::TooManyPhotos {
                max: max_photos,
                actual: self.photos.len(),
            }
            .into());
        }

        let meal = self.meal.trim();
        Ok(ValidNote {
            ward_id,
            text: text.to_string(),
            meal: (!meal.is_empty()).then(|| meal.to_string()),
            tags: [activity.remove(0), health.remove(0)],
        })
    }
}

#[derive(Clone, Debug)]
pub struct NoteRepository<T> {
    tables: T,
    vocab: TagVocabulary,
    max_photos: usize,
}

impl<T: Tables> NoteRepository<T> {
    pub fn new(tables: T, config: &JournalConfig) -> Self {
        Self {
            tables,
            vocab: config.tags.clone(),
            max_photos: config.photos.max_per_note,
        }
    }

    pub fn vocabulary(&self) -> &TagVocabulary {
        &self.vocab
    }

    /// Entries for a ward, newest first.
    pub async fn list(&self, ward_id: &str) -> Result<Vec<Note>> {
        let query = Query::from(Table::Notes)
            .eq("ward_id", ward_id)
            .order_by("created_at", false);
        select_as(&self.tables, &query, "note").await
    }

    pub async fn get(&self, id: &str) -> Result<Note> {
        let query = Query::from(Table::Notes).eq("id", id);
        select_as(&self.tables, &query, "note")
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound("note"))
    }

    pub async fn create<S, F>(
        &self,
        actor: Option<&Identity>,
        draft: &NoteDraft,
        uploader: &PhotoUploader<S, F>,
    ) -> Result<Note>
    where
        S: ObjectStorage,
        F: ResourceFetcher,
    {
        let valid = draft.validate(&self.vocab, self.max_photos)?;
        let actor = actor.ok_or(Error::Unauthenticated)?;
        let photos = upload_photos(&draft.photos, &valid.ward_id, uploader).await?;

        let row = json!({
            "ward_id": valid.ward_id,
            "caregiver_id": actor.id,
            "details": valid.text,
            "meal": valid.meal,
            "ai_note": valid.text,
            "tags": valid.tags,
            "photos": photos,
        });
        let stored = self.tables.insert(Table::Notes, row).await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to save note");
        })?;
        decode(stored, "note")
    }

    pub async fn update<S, F>(
        &self,
        actor: Option<&Identity>,
        id: &str,
        draft: &NoteDraft,
        uploader: &PhotoUploader<S, F>,
    ) -> Result<Note>
    where
        S: ObjectStorage,
        F: ResourceFetcher,
    {
        let valid = draft.validate(&self.vocab, self.max_photos)?;
        let actor = actor.ok_or(Error::Unauthenticated)?;
        let existing = self.get(id).await?;
        if !existing.is_owned_by(&actor.id) {
            return Err(Error::Forbidden("note"));
        }
        let photos = upload_photos(&draft.photos, &valid.ward_id, uploader).await?;

        let query = Query::from(Table::Notes)
            .eq("id", id)
            .eq("caregiver_id", actor.id.as_str());
        let patch = json!({
            "ward_id": valid.ward_id,
            "details": valid.text,
            "meal": valid.meal,
            "ai_note": valid.text,
            "tags": valid.tags,
            "photos": photos,
        });
        let updated = self.tables.update(&query, patch).await.inspect_err(|e| {
            tracing::error!(note_id = id, error = %e, "failed to update note");
        })?;
        updated
            .into_iter()
            .next()
            .ok_or(Error::NotFound("note"))
            .and_then(|row| decode(row, "note"))
    }

    /// Delete a note and its comments.
    pub async fn delete(&self, actor: Option<&Identity>, id: &str) -> Result<()> {
        let actor = actor.ok_or(Error::Unauthenticated)?;
        let note = self.get(id).await?;
        if !note.is_owned_by(&actor.id) {
            return Err(Error::Forbidden("note"));
        }

        let comments = self
            .tables
            .delete(&Query::from(Table::Comments).eq("note_id", id))
            .await
            .inspect_err(|e| tracing::error!(note_id = id, error = %e, "failed to delete comments"))?;
        self.tables
            .delete(
                &Query::from(Table::Notes)
                    .eq("id", id)
                    .eq("caregiver_id", actor.id.as_str()),
            )
            .await
            .inspect_err(|e| tracing::error!(note_id = id, error = %e, "failed to delete note"))?;
        tracing::debug!(note_id = id, comments, "note deleted");
        Ok(())
    }
}

/// Upload local photos in order, keeping remote ones where they are.
async fn upload_photos<S, F>(
    photos: &[PhotoRef],
    ward_id: &str,
    uploader: &PhotoUploader<S, F>,
) -> Result<Vec<String>>
where
    S: ObjectStorage,
    F: ResourceFetcher,
{
    let mut urls = Vec::with_capacity(photos.len());
    for photo in photos {
        match photo {
            PhotoRef::Remote(url) => urls.push(url.clone()),
            PhotoRef::Local(uri) => urls.push(uploader.upload(uri, ward_id).await?),
        }
    }
    Ok(urls)
}
