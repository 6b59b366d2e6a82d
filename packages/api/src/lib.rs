//! # API crate: remote adapters for the care journal
//!
//! The `store` crate holds the journal's logic behind the `AuthService`,
//! `Tables` and `ObjectStorage` traits. This crate supplies the real
//! implementations and wires everything into one [`CareJournal`] handle that a
//! UI shell keeps for its lifetime.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | `SUPABASE_URL`, `SUPABASE_ANON_KEY`, `OPENAI_API_KEY` via `dotenvy` |
//! | [`supabase`] | HTTP backend: auth, REST tables, object storage |
//! | [`composer`] | Chat-completion note polishing |
//! | [`fetch`] | Reads picked photos from disk or the network |
//! | [`logging`] | `tracing-subscriber` setup |
//!
//! ## Startup
//!
//! [`CareJournal::from_env`] reads the environment, warns about anything
//! missing, restores the persisted session and starts the profile
//! synchronizer as a background task following the session subject. Missing
//! credentials do not stop startup; each action then fails with
//! `store::Error::Config`.

use std::sync::Arc;

use store::{
    CommentThread, FileSessionStore, JournalConfig, JournalFeed, NoteRepository, PhotoUploader,
    ProfileSync, Result, SessionPersistence, SessionStore, WardDirectory,
};
use tokio::task::JoinHandle;

pub mod composer;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod supabase;

pub use composer::NoteComposer;
pub use config::AppConfig;
pub use fetch::LocalResourceFetcher;
pub use supabase::SupabaseBackend;

/// Everything a screen needs, built once at startup.
pub struct CareJournal {
    pub config: AppConfig,
    pub journal: JournalConfig,
    pub backend: SupabaseBackend,
    pub session: SessionStore<SupabaseBackend>,
    pub directory: WardDirectory<SupabaseBackend>,
    pub notes: NoteRepository<SupabaseBackend>,
    pub comments: CommentThread<SupabaseBackend>,
    pub uploader: PhotoUploader<SupabaseBackend, LocalResourceFetcher>,
    pub composer: NoteComposer,
    profile_sync: Option<JoinHandle<()>>,
}

impl CareJournal {
    /// Start from the process environment with the session kept under the
    /// platform data directory.
    pub async fn from_env() -> Result<Self> {
        let config = AppConfig::from_env();
        Self::start(config, Arc::new(FileSessionStore::default_location())).await
    }

    pub async fn start(config: AppConfig, persistence: Arc<dyn SessionPersistence>) -> Result<Self> {
        config.log_warnings();
        let journal = config.journal()?;
        let backend = SupabaseBackend::new(&config);

        let session = SessionStore::start(backend.clone(), persistence).await;
        let profile_sync = tokio::spawn(ProfileSync::new(backend.clone()).run(session.subscribe()));

        Ok(Self {
            directory: WardDirectory::new(backend.clone()),
            notes: NoteRepository::new(backend.clone(), &journal),
            comments: CommentThread::new(backend.clone()),
            uploader: PhotoUploader::new(
                backend.clone(),
                LocalResourceFetcher::new(),
                journal.photos.bucket.clone(),
            ),
            composer: NoteComposer::new(config.openai_api_key.clone(), &journal.composer),
            session,
            backend,
            journal,
            config,
            profile_sync: Some(profile_sync),
        })
    }

    /// A fresh view-model for the main screen.
    pub fn feed(&self) -> JournalFeed<SupabaseBackend> {
        JournalFeed::new(self.backend.clone(), &self.journal)
    }

    pub fn shutdown(&mut self) {
        if let Some(task) = self.profile_sync.take() {
            task.abort();
        }
        self.session.shutdown();
    }
}

impl Drop for CareJournal {
    fn drop(&mut self) {
        if let Some(task) = self.profile_sync.take() {
            task.abort();
        }
    }
}
