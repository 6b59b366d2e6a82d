//! Runtime configuration from environment variables.
//!
//! | Variable | Required | Used by |
//! |----------|----------|---------|
//! | `SUPABASE_URL` | yes (with the key) | every backend call |
//! | `SUPABASE_ANON_KEY` | yes (with the URL) | every backend call |
//! | `OPENAI_API_KEY` | no | the note composer |
//! | `CAREJOURNAL_CONFIG` | no | path of `carejournal.toml` |
//!
//! Missing values are not fatal: [`AppConfig::warnings`] lists them for a
//! startup warning and the affected actions fail with [`store::Error::Config`].

use std::path::PathBuf;

use store::{Error, JournalConfig, Result};

/// Project URL and public key of the hosted backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCredentials {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub journal_config: Option<PathBuf>,
}

impl AppConfig {
    /// Read the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            supabase_url: get("SUPABASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            supabase_anon_key: get("SUPABASE_ANON_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            journal_config: get("CAREJOURNAL_CONFIG").map(PathBuf::from),
        }
    }

    pub fn backend(&self) -> Result<BackendCredentials> {
        match (&self.supabase_url, &self.supabase_anon_key) {
            (Some(url), Some(anon_key)) => Ok(BackendCredentials {
                url: url.clone(),
                anon_key: anon_key.clone(),
            }),
            _ => Err(Error::Config(
                "SUPABASE_URL and SUPABASE_ANON_KEY must both be set".into(),
            )),
        }
    }

    pub fn openai_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".into()))
    }

    /// Load `carejournal.toml` from `CAREJOURNAL_CONFIG`, or the defaults.
    pub fn journal(&self) -> Result<JournalConfig> {
        match &self.journal_config {
            Some(path) => JournalConfig::load(path),
            None => Ok(JournalConfig::default()),
        }
    }

    /// What is missing, one line per gap.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.supabase_url.is_none() || self.supabase_anon_key.is_none() {
            warnings.push(
                "SUPABASE_URL / SUPABASE_ANON_KEY not set; backend requests will fail".to_string(),
            );
        }
        if self.openai_api_key.is_none() {
            warnings.push("OPENAI_API_KEY not set; note composition is unavailable".to_string());
        }
        warnings
    }

    pub fn log_warnings(&self) {
        for warning in self.warnings() {
            tracing::warn!("{}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn complete_environment() {
        let config = config(&[
            ("SUPABASE_URL", "https://abc.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("OPENAI_API_KEY", "sk-test"),
        ]);
        assert_eq!(
            config.backend().unwrap(),
            BackendCredentials {
                url: "https://abc.supabase.co".into(),
                anon_key: "anon".into()
            }
        );
        assert_eq!(config.openai_api_key().unwrap(), "sk-test");
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn missing_values_are_reported() {
        let config = config(&[("SUPABASE_URL", "https://abc.supabase.co"), ("OPENAI_API_KEY", "  ")]);
        assert!(matches!(config.backend(), Err(Error::Config(_))));
        assert!(matches!(config.openai_api_key(), Err(Error::Config(_))));
        assert_eq!(config.warnings().len(), 2);
    }

    #[test]
    fn journal_config_defaults_without_a_path() {
        let journal = AppConfig::default().journal().unwrap();
        assert_eq!(journal.photos.bucket, "care-photos");
    }
}
