//! # Care journal client core
//!
//! Everything the caregiver and guardian screens need short of rendering: the
//! domain models, the backend seams, and the repositories and view-models that
//! sit on top of them. The concrete HTTP backend lives in the `api` crate;
//! [`MemoryBackend`] stands in for it in tests.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`backend`] | `AuthService`, `Tables` and `ObjectStorage` traits plus the `Query` model |
//! | [`session`] | Current identity as a `watch` subject, sign-in/up/out, refresh |
//! | [`profile`] | Identity → `users` row synchronizer |
//! | [`directory`] | Wards and guardians, ward form, selection policy |
//! | [`notes`] | Journal entries with tags and photos |
//! | [`comments`] | Per-note discussion |
//! | [`photos`] | Local image → public URL pipeline |
//! | [`signup`] | Signup wizard and sign-in form validation |
//! | [`feed`] | Main-screen view-model with stale-response guards |
//! | [`file_store`] | On-disk session persistence |
//! | [`config`] | `carejournal.toml` |

pub mod backend;
pub mod comments;
pub mod config;
pub mod directory;
pub mod error;
pub mod feed;
pub mod file_store;
pub mod models;
pub mod notes;
pub mod photos;
pub mod profile;
pub mod session;
pub mod signup;

mod memory;
pub use memory::{MemoryBackend, MemoryFetcher, StoredObject};

pub use backend::{AuthEvent, AuthService, Backend, Filter, ObjectStorage, Query, SignUpOutcome, Table, Tables};
pub use comments::CommentThread;
pub use config::{JournalConfig, TagCategory, TagVocabulary};
pub use directory::{reconcile_selection, WardDirectory, WardDraft};
pub use error::{Error, Result, ValidationError};
pub use feed::{FeedSnapshot, JournalFeed, Liveness};
pub use file_store::{FileSessionStore, MemorySessionStore, SessionPersistence};
pub use models::{
    AuthSession, Comment, CommentAuthor, CommentWithAuthor, Gender, Identity, Note, Role, UserProfile, Ward,
};
pub use notes::{NoteDraft, NoteRepository, PhotoRef};
pub use photos::{FetchedResource, PhotoUploader, ResourceFetcher};
pub use profile::{derive_profile, ProfileSync, SyncOutcome};
pub use session::{SessionState, SessionStore};
pub use signup::{Consent, SignupStep, SignupWizard};
