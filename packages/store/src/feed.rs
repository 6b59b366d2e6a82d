//! # Journal feed
//!
//! The main screen's view-model: the caller's wards, which one is selected,
//! and that ward's notes. Each refresh takes a [`Ticket`] from a [`Liveness`]
//! guard before it awaits the backend; when the response comes back the
//! ticket is checked, and the response is dropped if the feed was torn down
//! or a newer refresh of the same kind has started since.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::Tables;
use crate::config::JournalConfig;
use crate::directory::{reconcile_selection, WardDirectory};
use crate::error::Result;
use crate::models::{Note, Ward};
use crate::notes::NoteRepository;

/// Tracks whether in-flight responses are still wanted.
#[derive(Clone, Debug)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a request, superseding every earlier ticket from this guard.
    pub fn ticket(&self) -> Ticket {
        let issued = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ticket {
            alive: Arc::clone(&self.alive),
            generation: Arc::clone(&self.generation),
            issued,
        }
    }

    /// A guard with its own generation counter that dies with this one.
    pub fn fork(&self) -> Liveness {
        Self {
            alive: Arc::clone(&self.alive),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Ticket {
    alive: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    issued: u64,
}

impl Ticket {
    pub fn is_current(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == self.issued
    }
}

/// What the screen renders.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeedSnapshot {
    pub wards: Vec<Ward>,
    pub selected_ward: Option<String>,
    pub notes: Vec<Note>,
}

impl FeedSnapshot {
    pub fn selected(&self) -> Option<&Ward> {
        let id = self.selected_ward.as_deref()?;
        self.wards.iter().find(|w| w.id == id)
    }
}

#[derive(Debug, Default)]
struct FeedState {
    snapshot: FeedSnapshot,
    preferred: Option<String>,
}

pub struct JournalFeed<T> {
    directory: WardDirectory<T>,
    notes: NoteRepository<T>,
    state: Arc<Mutex<FeedState>>,
    wards_live: Liveness,
    notes_live: Liveness,
}

impl<T: Tables + Clone> JournalFeed<T> {
    pub fn new(tables: T, config: &JournalConfig) -> Self {
        let wards_live = Liveness::new();
        let notes_live = wards_live.fork();
        Self {
            directory: WardDirectory::new(tables.clone()),
            notes: NoteRepository::new(tables, config),
            state: Arc::new(Mutex::new(FeedState::default())),
            wards_live,
            notes_live,
        }
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.state().snapshot.clone()
    }

    /// Ask the next ward refresh to select `ward_id` if the previous selection
    /// is gone, e.g. right after registering a ward.
    pub fn prefer_ward(&self, ward_id: Option<String>) {
        self.state().preferred = ward_id;
    }

    /// Select a listed ward and clear the notes shown for the old one.
    /// Returns false when `ward_id` is not listed.
    pub fn select_ward(&self, ward_id: &str) -> bool {
        let mut state = self.state();
        if !state.snapshot.wards.iter().any(|w| w.id == ward_id) {
            return false;
        }
        if state.snapshot.selected_ward.as_deref() != Some(ward_id) {
            state.snapshot.selected_ward = Some(ward_id.to_string());
            state.snapshot.notes.clear();
        }
        true
    }

    /// Reload the ward list and reconcile the selection. Returns false when the
    /// response was discarded.
    pub async fn refresh_wards(&self, caller_id: &str) -> Result<bool> {
        let ticket = self.wards_live.ticket();
        let wards = self.directory.list_wards(caller_id).await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to load wards");
        })?;
        if !ticket.is_current() {
            tracing::debug!("discarding stale ward list");
            return Ok(false);
        }

        let mut state = self.state();
        let selected = reconcile_selection(
            &wards,
            state.snapshot.selected_ward.as_deref(),
            state.preferred.as_deref(),
        );
        if selected != state.snapshot.selected_ward {
            state.snapshot.notes.clear();
        }
        state.snapshot.wards = wards;
        state.snapshot.selected_ward = selected;
        Ok(true)
    }

    /// Reload the selected ward's notes; with no selection the list is emptied
    /// without a request.
    pub async fn refresh_notes(&self) -> Result<bool> {
        let ticket = self.notes_live.ticket();
        let selected = self.state().snapshot.selected_ward.clone();
        let Some(ward_id) = selected else {
            if !ticket.is_current() {
                return Ok(false);
            }
            self.state().snapshot.notes.clear();
            return Ok(true);
        };

        let notes = self.notes.list(&ward_id).await.inspect_err(|e| {
            tracing::error!(ward_id = %ward_id, error = %e, "failed to load notes");
        })?;
        let mut state = self.state();
        if !ticket.is_current() || state.snapshot.selected_ward.as_deref() != Some(ward_id.as_str()) {
            tracing::debug!(ward_id = %ward_id, "discarding stale notes");
            return Ok(false);
        }
        state.snapshot.notes = notes;
        Ok(true)
    }

    /// Wards, then the selected ward's notes.
    pub async fn refresh(&self, caller_id: &str) -> Result<bool> {
        Ok(self.refresh_wards(caller_id).await? && self.refresh_notes().await?)
    }

    /// Stop applying responses. Requests already in flight complete but are ignored.
    pub fn teardown(&self) {
        self.wards_live.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Query, Table};
    use crate::memory::MemoryBackend;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Delays selected responses so they can be overtaken.
    #[derive(Clone)]
    struct Slow {
        inner: MemoryBackend,
        delays: Arc<Mutex<VecDeque<u64>>>,
    }

    impl Slow {
        fn new(inner: MemoryBackend, delays: &[u64]) -> Self {
            Self {
                inner,
                delays: Arc::new(Mutex::new(delays.iter().copied().collect())),
            }
        }
    }

    impl Tables for Slow {
        async fn select(&self, query: &Query) -> Result<Vec<Value>> {
            let rows = self.inner.select(query).await?;
            let delay = self.delays.lock().unwrap().pop_front().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(rows)
        }

        async fn insert(&self, table: Table, row: Value) -> Result<Value> {
            self.inner.insert(table, row).await
        }

        async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
            self.inner.update(query, patch).await
        }

        async fn delete(&self, query: &Query) -> Result<usize> {
            self.inner.delete(query).await
        }

        async fn upsert(&self, table: Table, row: Value, on_conflict: &str) -> Result<()> {
            self.inner.upsert(table, row, on_conflict).await
        }
    }

    async fn add_ward(backend: &MemoryBackend, name: &str) -> String {
        let row = backend
            .insert(Table::Wards, json!({ "name": name, "caregiver_id": "c1", "guardian_id": "g1" }))
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    async fn add_note(backend: &MemoryBackend, ward_id: &str, details: &str) {
        backend
            .insert(
                Table::Notes,
                json!({ "ward_id": ward_id, "caregiver_id": "c1", "details": details, "tags": ["walk", "stable"] }),
            )
            .await
            .unwrap();
    }

    #[test]
    fn newer_ticket_supersedes_older() {
        let live = Liveness::new();
        let first = live.ticket();
        let second = live.ticket();
        assert!(!first.is_current());
        assert!(second.is_current());

        let forked = live.fork();
        let other = forked.ticket();
        live.ticket();
        assert!(other.is_current());

        live.teardown();
        assert!(!other.is_current());
        assert!(!forked.is_alive());
    }

    #[tokio::test]
    async fn selection_survives_refresh_and_follows_preference() {
        let backend = MemoryBackend::new();
        let andrew = add_ward(&backend, "Andrew").await;
        let minji = add_ward(&backend, "Minji").await;
        add_note(&backend, &minji, "painted a cat").await;
        let feed = JournalFeed::new(backend.clone(), &JournalConfig::default());

        assert!(feed.refresh("c1").await.unwrap());
        assert_eq!(feed.snapshot().selected_ward, Some(andrew.clone()));
        assert!(feed.snapshot().notes.is_empty());

        assert!(feed.select_ward(&minji));
        assert!(!feed.select_ward("nope"));
        feed.refresh("c1").await.unwrap();
        let snapshot = feed.snapshot();
        assert_eq!(snapshot.selected().map(|w| w.name.as_str()), Some("Minji"));
        assert_eq!(snapshot.notes.len(), 1);

        // the selected ward disappears; the preferred one takes over
        let zoe = add_ward(&backend, "Zoe").await;
        backend.delete(&Query::from(Table::Wards).eq("id", minji.as_str())).await.unwrap();
        feed.prefer_ward(Some(zoe.clone()));
        feed.refresh("c1").await.unwrap();
        assert_eq!(feed.snapshot().selected_ward, Some(zoe));
        assert!(feed.snapshot().notes.is_empty());
    }

    #[tokio::test]
    async fn no_wards_means_no_selection_and_no_notes_request() {
        let backend = MemoryBackend::new();
        let feed = JournalFeed::new(backend.clone(), &JournalConfig::default());
        assert!(feed.refresh("c1").await.unwrap());
        assert_eq!(feed.snapshot(), FeedSnapshot::default());
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn responses_after_teardown_are_dropped() {
        let backend = MemoryBackend::new();
        add_ward(&backend, "Minji").await;
        let feed = JournalFeed::new(backend.clone(), &JournalConfig::default());

        feed.teardown();
        assert!(!feed.refresh_wards("c1").await.unwrap());
        assert!(!feed.refresh_notes().await.unwrap());
        assert!(feed.snapshot().wards.is_empty());
    }

    #[tokio::test]
    async fn overtaken_refresh_is_discarded() {
        let backend = MemoryBackend::new();
        add_ward(&backend, "Minji").await;
        let feed = JournalFeed::new(Slow::new(backend.clone(), &[50, 0]), &JournalConfig::default());

        let (slow, fast) = tokio::join!(feed.refresh_wards("c1"), async {
            add_ward(&backend, "Andrew").await;
            feed.refresh_wards("c1").await
        });

        assert!(!slow.unwrap());
        assert!(fast.unwrap());
        let names: Vec<_> = feed.snapshot().wards.into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["Andrew", "Minji"]);
    }

    #[tokio::test]
    async fn notes_for_a_deselected_ward_are_discarded() {
        let backend = MemoryBackend::new();
        let andrew = add_ward(&backend, "Andrew").await;
        let minji = add_ward(&backend, "Minji").await;
        add_note(&backend, &andrew, "read a book").await;
        let feed = JournalFeed::new(Slow::new(backend.clone(), &[0, 50]), &JournalConfig::default());
        feed.refresh_wards("c1").await.unwrap();

        let (stale, _) = tokio::join!(feed.refresh_notes(), async {
            feed.select_ward(&minji);
        });
        assert!(!stale.unwrap());
        assert_eq!(feed.snapshot().selected_ward, Some(minji));
        assert!(feed.snapshot().notes.is_empty());
    }
}
