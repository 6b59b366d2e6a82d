//! # Domain models for the care journal
//!
//! Rows of the four backend tables plus the identity issued by the auth
//! service. All row types are `Serialize + Deserialize` so they can be decoded
//! straight from the JSON the backend returns.
//!
//! ## Types
//!
//! | Struct | Represents |
//! |--------|-----------|
//! | [`UserProfile`] | A row of `users`: the normalized profile derived from identity metadata by [`crate::profile`]. |
//! | [`Ward`] | A dependent person, owned by one caregiver and linked to one guardian. |
//! | [`Note`] | One activity journal entry for a ward, with its tags and photo URLs. |
//! | [`Comment`] / [`CommentWithAuthor`] | A discussion entry on a note, optionally joined with its author. |
//! | [`Identity`] / [`AuthSession`] | What the auth service hands back after sign-in. |
//!
//! Owner checks ([`Ward::is_owned_by`], [`Note::is_owned_by`]) are client-side
//! conveniences used to gate actions before a request is made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role stored on a profile. Anything that is not exactly `"caregiver"` is a guardian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guardian,
    Caregiver,
}

impl Role {
    pub fn from_metadata(raw: Option<&str>) -> Self {
        match raw {
            Some("caregiver") => Role::Caregiver,
            _ => Role::Guardian,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guardian => "guardian",
            Role::Caregiver => "caregiver",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// Rows that can be picked from a list by id.
pub trait Identified {
    fn id(&self) -> &str;
}

/// A row of the `users` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub affiliation: Option<String>,
}

impl Identified for UserProfile {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A row of the `wards` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ward {
    pub id: String,
    pub name: String,
    /// ISO date, `YYYY-MM-DD`.
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub guardian_id: Option<String>,
    pub caregiver_id: String,
}

impl Ward {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.caregiver_id == user_id
    }
}

impl Identified for Ward {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A row of the `notes` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub ward_id: String,
    pub caregiver_id: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub meal: Option<String>,
    #[serde(default)]
    pub ai_note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

impl Note {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.caregiver_id == user_id
    }

    /// The text shown in lists: the polished note when present, else the raw details.
    pub fn preview(&self) -> &str {
        match self.ai_note.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ => &self.details,
        }
    }
}

impl Identified for Note {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A row of the `comments` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub note_id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Author columns joined onto a comment for display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommentAuthor {
    pub name: String,
    pub role: Role,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommentWithAuthor {
    pub comment: Comment,
    pub author: Option<CommentAuthor>,
}

impl CommentWithAuthor {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.comment.user_id == user_id
    }
}

/// The authenticated identity as the auth service reports it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl Identity {
    /// A string value from the metadata bag, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).and_then(Value::as_str)
    }

    /// Trimmed affiliation from the metadata bag, `None` when blank.
    pub fn affiliation(&self) -> Option<&str> {
        self.metadata_str("affiliation")
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    pub fn is_caregiver(&self) -> bool {
        Role::from_metadata(self.metadata_str("role")) == Role::Caregiver
    }

    /// Value-equality key used to decide whether a profile sync is due.
    pub fn signature(&self) -> IdentitySignature {
        IdentitySignature {
            id: self.id.clone(),
            email: self.email.clone(),
            metadata: Value::Object(self.user_metadata.clone()).to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentitySignature {
    id: String,
    email: Option<String>,
    metadata: String,
}

/// Tokens plus identity returned by a successful sign-in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: Identity,
}
