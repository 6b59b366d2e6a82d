//! # Session persistence
//!
//! The signed-in session has to survive an app restart. [`SessionPersistence`]
//! is the small synchronous seam the session store writes through;
//! [`FileSessionStore`] keeps it as JSON on disk and [`MemorySessionStore`]
//! keeps it in memory for tests.
//!
//! ## Layout
//!
//! ```text
//! <base_dir>/
//! └── session.json       # the serialized AuthSession
//! ```
//!
//! ## Platform data directories
//!
//! [`FileSessionStore::default_location`] uses [`dirs::data_dir()`]:
//!
//! | Platform | Path |
//! |----------|------|
//! | macOS / iOS | `~/Library/Application Support/carejournal/` |
//! | Linux | `~/.local/share/carejournal/` |
//! | Windows | `C:\Users\<user>\AppData\Roaming\carejournal\` |
//! | Android | App-internal storage (via `dirs`) |

use std::path::PathBuf;
use std::sync::Mutex;

use crate::models::AuthSession;

/// Where the current session is kept between runs.
pub trait SessionPersistence: Send + Sync {
    fn load(&self) -> Option<AuthSession>;
    fn save(&self, session: &AuthSession);
    fn clear(&self);
}

/// Filesystem-backed session persistence for desktop and mobile.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    base: PathBuf,
}

impl FileSessionStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn default_location() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("carejournal");
        Self::new(base)
    }

    fn session_path(&self) -> PathBuf {
        self.base.join("session.json")
    }
}

impl SessionPersistence for FileSessionStore {
    fn load(&self) -> Option<AuthSession> {
        let content = std::fs::read_to_string(self.session_path()).ok()?;
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable persisted session");
                None
            }
        }
    }

    fn save(&self, session: &AuthSession) {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let written = serde_json::to_string(session)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(&path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist session");
        }
    }

    fn clear(&self) {
        let _ = std::fs::remove_file(self.session_path());
    }
}

/// In-memory session persistence.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<AuthSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: AuthSession) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl SessionPersistence for MemorySessionStore {
    fn load(&self) -> Option<AuthSession> {
        self.session.lock().unwrap().clone()
    }

    fn save(&self, session: &AuthSession) {
        *self.session.lock().unwrap() = Some(session.clone());
    }

    fn clear(&self) {
        *self.session.lock().unwrap() = None;
    }
}
