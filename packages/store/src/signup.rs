//! # Signup wizard and sign-in form
//!
//! A three-step state machine that validates everything client-side before a
//! single `sign_up` call:
//!
//! | Step | Collects | Guard to leave |
//! |------|----------|----------------|
//! | [`SignupStep::Email`] | email | a successful [`SignupWizard::check_email`] |
//! | [`SignupStep::Credentials`] | name, password, confirmation | name present, strong password, confirmation equal |
//! | [`SignupStep::Affiliation`] | affiliation, role, agreements | all three agreements accepted |
//!
//! Going back from the first step leaves the wizard for the sign-in screen.

use serde_json::{json, Map, Value};

use crate::backend::{AuthService, Tables};
use crate::directory::WardDirectory;
use crate::error::{Result, ValidationError};
use crate::models::{AuthSession, Role};
use crate::session::SessionStore;

/// Symbols that satisfy the password's punctuation requirement.
pub const PASSWORD_SYMBOLS: &str = r#"!@#$%^&*()_+-=[]{};':"\|,.<>/?"#;

/// `local@domain.tld` with no whitespace and a single `@`.
pub fn validate_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let clean = |part: &str| !part.is_empty() && !part.contains('@') && !part.chars().any(char::is_whitespace);
    clean(local)
        && clean(domain)
        && domain
            .char_indices()
            .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// At least 8 characters with an ASCII letter, a digit and a symbol.
pub fn validate_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SYMBOLS.contains(c))
}

/// Check the sign-in form. Returns the trimmed email.
pub fn validate_sign_in(email: &str, password: &str) -> std::result::Result<String, ValidationError> {
    if !validate_email(email) {
        return Err(ValidationError::InvalidEmail);
    }
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    Ok(email.trim().to_string())
}

/// Validate the sign-in form, then sign in.
pub async fn sign_in<A: AuthService>(session: &SessionStore<A>, email: &str, password: &str) -> Result<AuthSession> {
    let email = validate_sign_in(email, password)?;
    session.sign_in(&email, password).await.inspect_err(|e| {
        tracing::error!(error = %e, "sign-in failed");
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignupStep {
    #[default]
    Email,
    Credentials,
    Affiliation,
}

impl SignupStep {
    pub fn number(&self) -> u8 {
        match self {
            SignupStep::Email => 1,
            SignupStep::Credentials => 2,
            SignupStep::Affiliation => 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EmailStatus {
    #[default]
    Unchecked,
    Invalid,
    Taken,
    Available,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Agreements {
    pub service: bool,
    pub privacy: bool,
    pub location: bool,
}

impl Agreements {
    pub fn all(&self) -> bool {
        self.service && self.privacy && self.location
    }

    pub fn set_all(&mut self, value: bool) {
        self.service = value;
        self.privacy = value;
        self.location = value;
    }
}

/// A checkbox on the agreements step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consent {
    All,
    Service,
    Privacy,
    Location,
}

/// Where [`SignupWizard::back`] leads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackOutcome {
    ExitToSignIn,
    Step(SignupStep),
}

/// Everything `sign_up` needs.
#[derive(Clone, Debug, PartialEq)]
pub struct SignupSubmission {
    pub email: String,
    pub password: String,
    pub metadata: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignupWizard {
    step: SignupStep,
    email: String,
    email_status: EmailStatus,
    name: String,
    password: String,
    confirmation: String,
    affiliation: String,
    role: Role,
    agreements: Agreements,
}

impl SignupWizard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> SignupStep {
        self.step
    }

    pub fn email_status(&self) -> &EmailStatus {
        &self.email_status
    }

    pub fn agreements(&self) -> Agreements {
        self.agreements
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Editing the email invalidates any earlier check.
    pub fn set_email(&mut self, email: &str) {
        if self.email != email {
            self.email = email.to_string();
            self.email_status = EmailStatus::Unchecked;
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    pub fn set_confirmation(&mut self, confirmation: &str) {
        self.confirmation = confirmation.to_string();
    }

    pub fn set_affiliation(&mut self, affiliation: &str) {
        self.affiliation = affiliation.to_string();
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn toggle(&mut self, consent: Consent) {
        let agreements = &mut self.agreements;
        match consent {
            Consent::All => {
                let all = agreements.all();
                agreements.set_all(!all);
            }
            Consent::Service => agreements.service = !agreements.service,
            Consent::Privacy => agreements.privacy = !agreements.privacy,
            Consent::Location => agreements.location = !agreements.location,
        }
    }

    /// Format-check the email. On success the address counts as available
    /// until [`SignupWizard::apply_email_lookup`] says otherwise; the trimmed
    /// address is returned for that lookup.
    pub fn check_email(&mut self) -> std::result::Result<String, ValidationError> {
        if !validate_email(&self.email) {
            self.email_status = EmailStatus::Invalid;
            return Err(ValidationError::InvalidEmail);
        }
        self.email_status = EmailStatus::Available;
        Ok(self.email.trim().to_string())
    }

    /// Record the result of a registration lookup for `email`. Ignored when the
    /// field has changed since the lookup started.
    pub fn apply_email_lookup(&mut self, email: &str, registered: bool) {
        if self.email.trim() != email || self.email_status == EmailStatus::Invalid {
            return;
        }
        self.email_status = if registered {
            EmailStatus::Taken
        } else {
            EmailStatus::Available
        };
    }

    /// Format check followed by a lookup against `users`.
    pub async fn check_email_with<T: Tables>(&mut self, directory: &WardDirectory<T>) -> Result<EmailStatus> {
        let email = self.check_email()?;
        let registered = match directory.email_registered(&email).await {
            Ok(registered) => registered,
            Err(e) => {
                self.email_status = EmailStatus::Unchecked;
                return Err(e);
            }
        };
        self.apply_email_lookup(&email, registered);
        Ok(self.email_status.clone())
    }

    fn email_guard(&self) -> std::result::Result<(), ValidationError> {
        match self.email_status {
            EmailStatus::Available => Ok(()),
            EmailStatus::Taken => Err(ValidationError::EmailTaken),
            EmailStatus::Invalid => Err(ValidationError::InvalidEmail),
            EmailStatus::Unchecked => Err(ValidationError::EmailNotChecked),
        }
    }

    fn credentials_guard(&self) -> std::result::Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if !validate_password(&self.password) {
            return Err(ValidationError::WeakPassword);
        }
        if self.confirmation != self.password {
            return Err(ValidationError::PasswordMismatch);
        }
        Ok(())
    }

    fn consent_guard(&self) -> std::result::Result<(), ValidationError> {
        if self.agreements.all() {
            Ok(())
        } else {
            Err(ValidationError::MissingConsent)
        }
    }

    /// Move forward if the current step's guard passes. On the last step this
    /// only checks the agreements.
    pub fn advance(&mut self) -> std::result::Result<SignupStep, ValidationError> {
        self.step = match self.step {
            SignupStep::Email => {
                self.email_guard()?;
                SignupStep::Credentials
            }
            SignupStep::Credentials => {
                self.credentials_guard()?;
                SignupStep::Affiliation
            }
            SignupStep::Affiliation => {
                self.consent_guard()?;
                SignupStep::Affiliation
            }
        };
        Ok(self.step)
    }

    pub fn back(&mut self) -> BackOutcome {
        match self.step {
            SignupStep::Email => BackOutcome::ExitToSignIn,
            SignupStep::Credentials => {
                self.step = SignupStep::Email;
                BackOutcome::Step(self.step)
            }
            SignupStep::Affiliation => {
                self.step = SignupStep::Credentials;
                BackOutcome::Step(self.step)
            }
        }
    }

    /// Re-check every guard and build the sign-up request.
    pub fn submission(&self) -> std::result::Result<SignupSubmission, ValidationError> {
        self.email_guard()?;
        self.credentials_guard()?;
        self.consent_guard()?;

        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(self.name.trim()));
        let affiliation = self.affiliation.trim();
        if !affiliation.is_empty() {
            metadata.insert("affiliation".into(), json!(affiliation));
        }
        metadata.insert("role".into(), json!(self.role.as_str()));
        metadata.insert(
            "agreements".into(),
            json!({
                "service": self.agreements.service,
                "privacy": self.agreements.privacy,
                "location": self.agreements.location,
            }),
        );

        Ok(SignupSubmission {
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            metadata: Value::Object(metadata),
        })
    }

    /// Sign up. On success the wizard is cleared and the email is returned to
    /// pre-fill the sign-in form; on failure the state is kept for a retry.
    pub async fn submit<A: AuthService>(&mut self, session: &SessionStore<A>) -> Result<String> {
        let submission = self.submission()?;
        session
            .sign_up(&submission.email, &submission.password, submission.metadata)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "sign-up failed"))?;
        tracing::debug!(role = self.role.as_str(), "account created");
        self.reset();
        Ok(submission.email)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Table;
    use crate::error::Error;
    use crate::file_store::MemorySessionStore;
    use crate::memory::MemoryBackend;
    use std::sync::Arc;

    fn filled() -> SignupWizard {
        let mut wizard = SignupWizard::new();
        wizard.set_email(" kim@example.com ");
        wizard.check_email().unwrap();
        wizard.advance().unwrap();
        wizard.set_name("Kim Minji");
        wizard.set_password("Abcd123!");
        wizard.set_confirmation("Abcd123!");
        wizard.advance().unwrap();
        wizard.set_affiliation(" Sunshine Center ");
        wizard.set_role(Role::Caregiver);
        wizard.toggle(Consent::All);
        wizard
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("Abcd123!"));
        assert!(!validate_password("abcdefgh"));
        assert!(!validate_password("Ab1!"));
        assert!(!validate_password("abcd1234"));
        assert!(!validate_password("!!!!1234"));
        assert!(validate_password("pass word 1?"));
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("kim@example.com"));
        assert!(validate_email("  kim@example.co.kr "));
        assert!(!validate_email("kim@example"));
        assert!(!validate_email("kim@.com"));
        assert!(!validate_email("kim@example."));
        assert!(!validate_email("kim@@example.com"));
        assert!(!validate_email("kim lee@example.com"));
        assert!(!validate_email("@example.com"));
    }

    #[test]
    fn sign_in_form() {
        assert_eq!(validate_sign_in(" kim@example.com ", "x"), Ok("kim@example.com".into()));
        assert_eq!(validate_sign_in("kim", "x"), Err(ValidationError::InvalidEmail));
        assert_eq!(validate_sign_in("kim@example.com", ""), Err(ValidationError::EmptyPassword));
    }

    #[test]
    fn email_step_needs_a_check() {
        let mut wizard = SignupWizard::new();
        wizard.set_email("kim@example.com");
        assert_eq!(wizard.advance(), Err(ValidationError::EmailNotChecked));

        wizard.set_email("kim@");
        assert_eq!(wizard.check_email(), Err(ValidationError::InvalidEmail));
        assert_eq!(wizard.advance(), Err(ValidationError::InvalidEmail));

        wizard.set_email("kim@example.com");
        let email = wizard.check_email().unwrap();
        wizard.apply_email_lookup(&email, true);
        assert_eq!(wizard.advance(), Err(ValidationError::EmailTaken));

        // a lookup for an address no longer in the field is ignored
        wizard.set_email("lee@example.com");
        wizard.check_email().unwrap();
        wizard.apply_email_lookup("kim@example.com", true);
        assert_eq!(wizard.advance(), Ok(SignupStep::Credentials));
    }

    #[test]
    fn credentials_step_guards() {
        let mut wizard = SignupWizard::new();
        wizard.set_email("kim@example.com");
        wizard.check_email().unwrap();
        wizard.advance().unwrap();

        assert_eq!(wizard.advance(), Err(ValidationError::MissingName));
        wizard.set_name("Kim");
        wizard.set_password("abcdefgh");
        assert_eq!(wizard.advance(), Err(ValidationError::WeakPassword));
        wizard.set_password("Abcd123!");
        wizard.set_confirmation("Abcd123?");
        assert_eq!(wizard.advance(), Err(ValidationError::PasswordMismatch));
        wizard.set_confirmation("Abcd123!");
        assert_eq!(wizard.advance(), Ok(SignupStep::Affiliation));
    }

    #[test]
    fn agreements_toggle() {
        let mut wizard = SignupWizard::new();
        wizard.toggle(Consent::Service);
        wizard.toggle(Consent::Privacy);
        assert!(!wizard.agreements().all());
        wizard.toggle(Consent::Location);
        assert!(wizard.agreements().all());

        wizard.toggle(Consent::All);
        assert_eq!(wizard.agreements(), Agreements::default());
        wizard.toggle(Consent::All);
        assert!(wizard.agreements().all());
        wizard.toggle(Consent::Privacy);
        assert!(!wizard.agreements().all());
    }

    #[test]
    fn back_walks_down_then_exits() {
        let mut wizard = filled();
        assert_eq!(wizard.step().number(), 3);
        assert_eq!(wizard.back(), BackOutcome::Step(SignupStep::Credentials));
        assert_eq!(wizard.back(), BackOutcome::Step(SignupStep::Email));
        assert_eq!(wizard.back(), BackOutcome::ExitToSignIn);
        assert_eq!(wizard.step(), SignupStep::Email);
    }

    #[test]
    fn submission_metadata() {
        let mut wizard = filled();
        let submission = wizard.submission().unwrap();
        assert_eq!(submission.email, "kim@example.com");
        assert_eq!(
            submission.metadata,
            json!({
                "name": "Kim Minji",
                "affiliation": "Sunshine Center",
                "role": "caregiver",
                "agreements": { "service": true, "privacy": true, "location": true },
            })
        );

        wizard.set_affiliation("  ");
        assert!(wizard.submission().unwrap().metadata.get("affiliation").is_none());
        wizard.toggle(Consent::Location);
        assert_eq!(wizard.advance(), Err(ValidationError::MissingConsent));
    }

    #[tokio::test]
    async fn submit_signs_up_and_resets() {
        let backend = MemoryBackend::new();
        let session = SessionStore::start(backend.clone(), Arc::new(MemorySessionStore::new())).await;
        let mut wizard = filled();

        assert_eq!(wizard.submit(&session).await.unwrap(), "kim@example.com");
        assert_eq!(wizard, SignupWizard::new());

        let mut again = filled();
        let err = again.submit(&session).await.unwrap_err();
        assert_eq!(err.user_message(), "User already registered");
        assert_eq!(again.step(), SignupStep::Affiliation);

        let signed_in = sign_in(&session, " kim@example.com ", "Abcd123!").await.unwrap();
        assert!(signed_in.user.is_caregiver());
        assert!(matches!(
            sign_in(&session, "kim", "Abcd123!").await,
            Err(Error::Validation(ValidationError::InvalidEmail))
        ));
    }

    #[tokio::test]
    async fn email_lookup_against_profiles() {
        let backend = MemoryBackend::new();
        backend
            .upsert(Table::Users, json!({ "id": "u1", "email": "kim@example.com", "name": "Kim" }), "id")
            .await
            .unwrap();
        let directory = WardDirectory::new(backend);

        let mut wizard = SignupWizard::new();
        wizard.set_email("kim@example.com");
        assert_eq!(wizard.check_email_with(&directory).await.unwrap(), EmailStatus::Taken);
        wizard.set_email("lee@example.com");
        assert_eq!(wizard.check_email_with(&directory).await.unwrap(), EmailStatus::Available);
        assert_eq!(wizard.advance(), Ok(SignupStep::Credentials));
    }

    #[tokio::test]
    async fn failed_lookup_leaves_email_unchecked() {
        let backend = MemoryBackend::new();
        backend.reject(Table::Users, "network down");
        let directory = WardDirectory::new(backend.clone());

        let mut wizard = SignupWizard::new();
        wizard.set_email("lee@example.com");
        assert!(matches!(
            wizard.check_email_with(&directory).await,
            Err(Error::Remote { .. })
        ));
        assert_eq!(wizard.email_status(), &EmailStatus::Unchecked);
        assert_eq!(wizard.advance(), Err(ValidationError::EmailNotChecked));
        assert_eq!(wizard.step(), SignupStep::Email);
    }
}
