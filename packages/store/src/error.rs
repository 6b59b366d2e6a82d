//! Error types shared by every repository in the crate.
//!
//! Validation failures are raised before any request leaves the client, so a
//! [`ValidationError`] always means "nothing was sent". Everything the backend
//! rejects is folded into [`Error::Remote`] with the backend's own message.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Message shown when the backend failed without telling us why.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("sign-in required")]
    Unauthenticated,

    #[error("only the owner may change this {0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("remote error: {message}")]
    Remote { message: String },

    #[error("could not decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not read photo: {0}")]
    PhotoRead(String),

    #[error("photo upload rejected: {0}")]
    PhotoUpload(String),

    #[error("note composition failed: {0}")]
    Compose(String),
}

impl Error {
    pub fn remote(message: impl Into<String>) -> Self {
        Error::Remote {
            message: message.into(),
        }
    }

    /// Text suitable for an alert. Remote errors use the backend's message when
    /// it has one.
    pub fn user_message(&self) -> String {
        match self {
            Error::Remote { message } if message.trim().is_empty() => GENERIC_FAILURE.to_string(),
            Error::Remote { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Client-side form validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("select a ward first")]
    MissingWard,
    #[error("the note text is empty")]
    EmptyNote,
    #[error("pick exactly one activity tag (got {0})")]
    ActivityTagCount(usize),
    #[error("pick exactly one health tag (got {0})")]
    HealthTagCount(usize),
    #[error("unknown tag `{0}`")]
    UnknownTag(String),
    #[error("at most {max} photos can be attached (got {actual})")]
    TooManyPhotos { max: usize, actual: usize },

    #[error("a name is required")]
    MissingName,
    #[error("birth date must be written as YYYY-MM-DD")]
    InvalidBirthDate,
    #[error("choose a gender")]
    MissingGender,
    #[error("choose a guardian to link")]
    MissingGuardian,
    #[error("the caregiver has no affiliation on their profile")]
    MissingAffiliation,

    #[error("the comment is empty")]
    EmptyComment,

    #[error("enter a valid email address")]
    InvalidEmail,
    #[error("check the email address before continuing")]
    EmailNotChecked,
    #[error("this email address is already registered")]
    EmailTaken,
    #[error("enter your password")]
    EmptyPassword,
    #[error("password needs 8+ characters with a letter, a digit and a symbol")]
    WeakPassword,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("all required agreements must be accepted")]
    MissingConsent,
}
