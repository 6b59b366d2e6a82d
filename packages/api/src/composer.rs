//! # AI note composer
//!
//! Turns a caregiver's rough note into warm prose a guardian can read, with a
//! single chat-completion request. No retries and no streaming.

use reqwest::Client;
use serde_json::{json, Value};
use store::config::ComposerConfig;
use store::{Error, Result};

pub const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_INSTRUCTION: &str = "You are an assistant who polishes the activity notes a caregiver sends \
to a guardian, keeping them natural and warm.";

/// The user message: fixed guidance followed by the trimmed raw note.
pub fn instruction(raw_text: &str) -> String {
    format!(
        "Below is a short activity record a caregiver jotted down. Rewrite it so it can be shared \
with a guardian in any care setting (day centre, nursing home, nursery), in a kind and warm \
tone that is not overly formal.

Guidelines:
- Do not change the facts; convey the key points clearly.
- Avoid wordiness and exaggerated exclamations; let genuine care come through.
- Two or three paragraphs work well: what happened, what the caregiver observed or felt, \
then a word of advice or encouragement for the guardian.
- Keep sentences easy to read.

Original record:
{}",
        raw_text.trim()
    )
}

/// The first choice's trimmed content.
pub fn extract_completion(body: &Value) -> Result<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(String::from)
        .ok_or_else(|| Error::Compose("the completion was empty".into()))
}

#[derive(Clone, Debug)]
pub struct NoteComposer {
    http: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl NoteComposer {
    pub fn new(api_key: Option<String>, config: &ComposerConfig) -> Self {
        Self {
            http: Client::new(),
            api_key,
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    /// Point at a compatible endpoint instead of the default.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn build_request(&self, raw_text: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_INSTRUCTION },
                { "role": "user", "content": instruction(raw_text) },
            ],
            "temperature": self.temperature,
        })
    }

    pub async fn compose(&self, raw_text: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".into()))?;
        if raw_text.trim().is_empty() {
            return Err(Error::Compose("the note to polish is empty".into()));
        }

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&self.build_request(raw_text))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "composer request failed");
                Error::Compose(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "composer rejected the request");
            return Err(Error::Compose(format!("request failed: {}", body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Compose(e.to_string()))?;
        extract_completion(&body)
    }
}
