//! # Journal configuration: `carejournal.toml`
//!
//! Client-side settings that shape the journal forms: the two tag
//! vocabularies a note must pick from, where photos are stored, and how the
//! AI composer is called.
//!
//! ## Structure
//!
//! ```toml
//! [tags]
//! activity = ["walk", "play", "art", "reading", "sleep"]
//! health = ["meal", "stable", "low-fever", "cough", "medication"]
//!
//! [photos]
//! bucket = "care-photos"
//! max_per_note = 5
//!
//! [composer]
//! model = "gpt-4o-mini"
//! temperature = 0.6
//! ```
//!
//! Every section and field has a default, so a missing or empty file is the
//! default configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration stored in `carejournal.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub tags: TagVocabulary,
    #[serde(default)]
    pub photos: PhotoConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
}

/// The two fixed vocabularies a note draws exactly one tag from each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagVocabulary {
    #[serde(default = "default_activity_tags")]
    pub activity: Vec<String>,
    #[serde(default = "default_health_tags")]
    pub health: Vec<String>,
}

/// Which vocabulary a tag belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagCategory {
    Activity,
    Health,
}

impl TagVocabulary {
    pub fn category_of(&self, tag: &str) -> Option<TagCategory> {
        if self.activity.iter().any(|t| t == tag) {
            Some(TagCategory::Activity)
        } else if self.health.iter().any(|t| t == tag) {
            Some(TagCategory::Health)
        } else {
            None
        }
    }
}

fn default_activity_tags() -> Vec<String> {
    ["walk", "play", "art", "reading", "sleep"]
        .map(String::from)
        .to_vec()
}

fn default_health_tags() -> Vec<String> {
    ["meal", "stable", "low-fever", "cough", "medication"]
        .map(String::from)
        .to_vec()
}

impl Default for TagVocabulary {
    fn default() -> Self {
        Self {
            activity: default_activity_tags(),
            health: default_health_tags(),
        }
    }
}

/// Photo storage settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhotoConfig {
    /// Object storage bucket photos are uploaded to.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_max_photos")]
    pub max_per_note: usize,
}

fn default_bucket() -> String {
    "care-photos".to_string()
}

fn default_max_photos() -> usize {
    5
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            max_per_note: default_max_photos(),
        }
    }
}

/// Parameters for the chat-completion request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComposerConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.6
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
        }
    }
}

impl JournalConfig {
    /// The well-known filename for the config file.
    pub fn filename() -> &'static str {
        "carejournal.toml"
    }

    /// Parse from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Read the config from a file, falling back to defaults when it is absent.
    pub fn load(path: &std::path::Path) -> Result<Self, crate::Error> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(crate::Error::Config(format!("{}: {}", path.display(), e))),
        }
    }
}
