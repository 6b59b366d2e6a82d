//! # Ward and guardian directory
//!
//! Lists the wards a user can see, the guardians a caregiver may link a ward
//! to, and owns the ward form: [`WardDraft`] validation plus create, update and
//! delete.
//!
//! Deleting a ward removes its notes' comments, then its notes, then the ward.
//! The steps are separate requests; a failure part-way leaves the earlier
//! deletions in place.

use serde_json::json;

use crate::backend::{decode, select_as, Filter, Query, Table, Tables};
use crate::error::{Error, Result, ValidationError};
use crate::models::{Gender, Identified, Identity, Role, UserProfile, Ward};

/// Pick the selection after a list refresh: keep `previous` if it is still
/// listed, else `preferred` if listed, else the first item.
pub fn reconcile_selection<T: Identified>(
    items: &[T],
    previous: Option<&str>,
    preferred: Option<&str>,
) -> Option<String> {
    let listed = |id: &str| items.iter().any(|item| item.id() == id);
    previous
        .filter(|id| listed(id))
        .or_else(|| preferred.filter(|id| listed(id)))
        .map(String::from)
        .or_else(|| items.first().map(|item| item.id().to_string()))
}

/// True for `YYYY-MM-DD` strings naming a real calendar day.
pub fn is_iso_date(value: &str) -> bool {
    let shaped = value.len() == 10
        && value.char_indices().all(|(i, c)| match i {
            4 | 7 => c == '-',
            _ => c.is_ascii_digit(),
        });
    shaped && chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// The ward form's fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WardDraft {
    pub name: String,
    pub birth_date: String,
    pub gender: Option<Gender>,
    pub guardian_id: Option<String>,
    /// Affiliation already stored on the ward being edited.
    pub affiliation: Option<String>,
}

/// A draft that passed validation.
#[derive(Clone, Debug, PartialEq)]
struct ValidWard {
    name: String,
    birth_date: String,
    gender: Gender,
    guardian_id: String,
    affiliation: String,
}

impl WardDraft {
    pub fn from_ward(ward: &Ward) -> Self {
        Self {
            name: ward.name.clone(),
            birth_date: ward.birth_date.clone().unwrap_or_default(),
            gender: ward.gender,
            guardian_id: ward.guardian_id.clone(),
            affiliation: ward.affiliation.clone(),
        }
    }

    /// The caregiver's affiliation wins; the ward's stored one is the fallback.
    pub fn effective_affiliation(&self, caregiver: Option<&Identity>) -> Option<String> {
        caregiver
            .and_then(Identity::affiliation)
            .or_else(|| {
                self.affiliation
                    .as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
            })
            .map(String::from)
    }

    fn validate(&self, caregiver: Option<&Identity>) -> Result<ValidWard> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        let birth_date = self.birth_date.trim();
        if !is_iso_date(birth_date) {
            return Err(ValidationError::InvalidBirthDate.into());
        }
        let gender = self.gender.ok_or(ValidationError::MissingGender)?;
        let guardian_id = self
            .guardian_id
            .clone()
            .filter(|g| !g.is_empty())
            .ok_or(ValidationError::MissingGuardian)?;
        let affiliation = self
            .effective_affiliation(caregiver)
            .ok_or(ValidationError::MissingAffiliation)?;
        if caregiver.is_none() {
            return Err(Error::Unauthenticated);
        }
        Ok(ValidWard {
            name: name.to_string(),
            birth_date: birth_date.to_string(),
            gender,
            guardian_id,
            affiliation,
        })
    }
}

#[derive(Clone, Debug)]
pub struct WardDirectory<T> {
    tables: T,
}

impl<T: Tables> WardDirectory<T> {
    pub fn new(tables: T) -> Self {
        Self { tables }
    }

    /// Wards the caller looks after or is guardian of, by name.
    pub async fn list_wards(&self, caller_id: &str) -> Result<Vec<Ward>> {
        let query = Query::from(Table::Wards)
            .or(vec![
                Filter::eq("caregiver_id", caller_id),
                Filter::eq("guardian_id", caller_id),
            ])
            .order_by("name", true);
        select_as(&self.tables, &query, "ward").await
    }

    /// Guardians sharing `affiliation`, by name. A blank affiliation lists nobody.
    pub async fn list_guardians(&self, affiliation: &str) -> Result<Vec<UserProfile>> {
        let affiliation = affiliation.trim();
        if affiliation.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::from(Table::Users)
            .eq("role", Role::Guardian.as_str())
            .eq("affiliation", affiliation)
            .order_by("name", true);
        select_as(&self.tables, &query, "guardian").await
    }

    /// Whether a profile already uses `email`.
    pub async fn email_registered(&self, email: &str) -> Result<bool> {
        let query = Query::from(Table::Users).eq("email", email.trim());
        Ok(!self.tables.select(&query).await?.is_empty())
    }

    pub async fn get_ward(&self, id: &str) -> Result<Ward> {
        let query = Query::from(Table::Wards).eq("id", id);
        select_as(&self.tables, &query, "ward")
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound("ward"))
    }

    pub async fn create_ward(&self, actor: Option<&Identity>, draft: &WardDraft) -> Result<Ward> {
        let valid = draft.validate(actor)?;
        let actor = actor.ok_or(Error::Unauthenticated)?;
        let row = json!({
            "name": valid.name,
            "birth_date": valid.birth_date,
            "gender": valid.gender,
            "affiliation": valid.affiliation,
            "guardian_id": valid.guardian_id,
            "caregiver_id": actor.id,
        });
        let stored = self.tables.insert(Table::Wards, row).await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to register ward");
        })?;
        decode(stored, "ward")
    }

    pub async fn update_ward(&self, actor: Option<&Identity>, id: &str, draft: &WardDraft) -> Result<Ward> {
        let valid = draft.validate(actor)?;
        let actor = actor.ok_or(Error::Unauthenticated)?;
        let ward = self.get_ward(id).await?;
        if !ward.is_owned_by(&actor.id) {
            return Err(Error::Forbidden("ward"));
        }

        let query = Query::from(Table::Wards).eq("id", id).eq("caregiver_id", actor.id.as_str());
        let patch = json!({
            "name": valid.name,
            "birth_date": valid.birth_date,
            "gender": valid.gender,
            "affiliation": valid.affiliation,
            "guardian_id": valid.guardian_id,
        });
        let updated = self.tables.update(&query, patch).await.inspect_err(|e| {
            tracing::error!(ward_id = id, error = %e, "failed to update ward");
        })?;
        updated
            .into_iter()
            .next()
            .ok_or(Error::NotFound("ward"))
            .and_then(|row| decode(row, "ward"))
    }

    /// Delete a ward with its notes and their comments.
    pub async fn delete_ward(&self, actor: Option<&Identity>, id: &str) -> Result<()> {
        let actor = actor.ok_or(Error::Unauthenticated)?;
        let ward = self.get_ward(id).await?;
        if !ward.is_owned_by(&actor.id) {
            return Err(Error::Forbidden("ward"));
        }

        let notes = self
            .tables
            .select(&Query::from(Table::Notes).eq("ward_id", id))
            .await?;
        let note_ids: Vec<String> = notes
            .iter()
            .filter_map(|n| n.get("id").and_then(|v| v.as_str()).map(String::from))
            .collect();

        if !note_ids.is_empty() {
            let comments = self
                .tables
                .delete(&Query::from(Table::Comments).is_in("note_id", note_ids.clone()))
                .await?;
            let notes = self
                .tables
                .delete(&Query::from(Table::Notes).is_in("id", note_ids))
                .await?;
            tracing::debug!(ward_id = id, notes, comments, "removed ward journal");
        }

        self.tables
            .delete(&Query::from(Table::Wards).eq("id", id))
            .await
            .inspect_err(|e| tracing::error!(ward_id = id, error = %e, "failed to delete ward"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde_json::Value;

    fn caregiver(id: &str, affiliation: Option<&str>) -> Identity {
        let mut metadata = serde_json::Map::new();
        metadata.insert("role".into(), json!("caregiver"));
        if let Some(a) = affiliation {
            metadata.insert("affiliation".into(), json!(a));
        }
        Identity {
            id: id.into(),
            email: Some(format!("{id}@example.com")),
            user_metadata: metadata,
        }
    }

    fn draft() -> WardDraft {
        WardDraft {
            name: " Minji ".into(),
            birth_date: "2019-03-14".into(),
            gender: Some(Gender::Female),
            guardian_id: Some("g1".into()),
            affiliation: None,
        }
    }

    fn ward(id: &str) -> Ward {
        Ward {
            id: id.into(),
            name: id.into(),
            birth_date: None,
            gender: None,
            affiliation: None,
            guardian_id: None,
            caregiver_id: "c1".into(),
        }
    }

    #[test]
    fn selection_keeps_previous_when_still_listed() {
        let wards = vec![ward("a"), ward("b"), ward("c")];
        assert_eq!(reconcile_selection(&wards, Some("b"), None), Some("b".into()));
        assert_eq!(reconcile_selection(&wards, Some("b"), Some("c")), Some("b".into()));
    }

    #[test]
    fn selection_falls_back_to_preferred_then_first() {
        let wards = vec![ward("a"), ward("b"), ward("c")];
        assert_eq!(reconcile_selection(&wards, Some("gone"), Some("c")), Some("c".into()));
        assert_eq!(reconcile_selection(&wards, Some("gone"), Some("gone")), Some("a".into()));
        assert_eq!(reconcile_selection(&wards, None, None), Some("a".into()));
        assert_eq!(reconcile_selection::<Ward>(&[], Some("a"), Some("b")), None);
    }

    #[test]
    fn iso_dates() {
        assert!(is_iso_date("2019-03-14"));
        assert!(!is_iso_date("2019-3-14"));
        assert!(!is_iso_date("2019-02-30"));
        assert!(!is_iso_date("14/03/2019"));
        assert!(!is_iso_date("２０１９-03-14"));
    }

    #[test]
    fn draft_validation_order() {
        let me = caregiver("c1", Some("Sunshine Center"));
        let check = |d: WardDraft| d.validate(Some(&me)).err().map(|e| e.to_string());

        assert_eq!(check(WardDraft { name: " ".into(), ..draft() }), Some(ValidationError::MissingName.to_string()));
        assert_eq!(
            check(WardDraft { birth_date: "2019/03/14".into(), ..draft() }),
            Some(ValidationError::InvalidBirthDate.to_string())
        );
        assert_eq!(check(WardDraft { gender: None, ..draft() }), Some(ValidationError::MissingGender.to_string()));
        assert_eq!(
            check(WardDraft { guardian_id: None, ..draft() }),
            Some(ValidationError::MissingGuardian.to_string())
        );
        assert!(draft().validate(Some(&me)).is_ok());

        let no_affiliation = caregiver("c1", None);
        assert!(matches!(
            draft().validate(Some(&no_affiliation)),
            Err(Error::Validation(ValidationError::MissingAffiliation))
        ));
        let stored = WardDraft { affiliation: Some("Sunshine Center".into()), ..draft() };
        assert_eq!(stored.validate(Some(&no_affiliation)).unwrap().affiliation, "Sunshine Center");
        assert!(matches!(stored.validate(None), Err(Error::Unauthenticated)));
    }

    #[tokio::test]
    async fn lists_wards_for_caregiver_or_guardian() {
        let backend = MemoryBackend::new();
        for (name, caregiver, guardian) in [("Minji", "c1", "g1"), ("Andrew", "c2", "g1"), ("Zoe", "c2", "g2")] {
            backend
                .insert(
                    Table::Wards,
                    json!({ "name": name, "caregiver_id": caregiver, "guardian_id": guardian }),
                )
                .await
                .unwrap();
        }
        let directory = WardDirectory::new(backend);

        let names = |wards: Vec<Ward>| wards.into_iter().map(|w| w.name).collect::<Vec<_>>();
        assert_eq!(names(directory.list_wards("g1").await.unwrap()), vec!["Andrew", "Minji"]);
        assert_eq!(names(directory.list_wards("c2").await.unwrap()), vec!["Andrew", "Zoe"]);
        assert!(directory.list_wards("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn guardians_are_scoped_to_affiliation() {
        let backend = MemoryBackend::new();
        for (id, name, role, affiliation) in [
            ("g1", "Park", "guardian", Some("Sunshine Center")),
            ("g2", "Ahn", "guardian", Some("Sunshine Center")),
            ("g3", "Lee", "guardian", Some("Moonlight Home")),
            ("c1", "Kim", "caregiver", Some("Sunshine Center")),
            ("g4", "Choi", "guardian", None),
        ] {
            backend
                .upsert(
                    Table::Users,
                    json!({ "id": id, "name": name, "role": role, "affiliation": affiliation }),
                    "id",
                )
                .await
                .unwrap();
        }
        let directory = WardDirectory::new(backend.clone());

        let guardians = directory.list_guardians(" Sunshine Center ").await.unwrap();
        let ids: Vec<_> = guardians.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["g2", "g1"]);

        let before = backend.request_count();
        assert!(directory.list_guardians("  ").await.unwrap().is_empty());
        assert_eq!(backend.request_count(), before);
    }

    #[tokio::test]
    async fn create_update_and_owner_gate() {
        let backend = MemoryBackend::new();
        let directory = WardDirectory::new(backend.clone());
        let owner = caregiver("c1", Some("Sunshine Center"));
        let stranger = caregiver("c2", Some("Sunshine Center"));

        let ward = directory.create_ward(Some(&owner), &draft()).await.unwrap();
        assert_eq!(ward.name, "Minji");
        assert_eq!(ward.caregiver_id, "c1");
        assert_eq!(ward.gender, Some(Gender::Female));
        assert_eq!(ward.affiliation.as_deref(), Some("Sunshine Center"));

        let mut edit = WardDraft::from_ward(&ward);
        edit.name = "Minji Kim".into();
        assert!(matches!(
            directory.update_ward(Some(&stranger), &ward.id, &edit).await,
            Err(Error::Forbidden("ward"))
        ));
        let updated = directory.update_ward(Some(&owner), &ward.id, &edit).await.unwrap();
        assert_eq!(updated.name, "Minji Kim");
        assert!(matches!(
            directory.delete_ward(Some(&stranger), &ward.id).await,
            Err(Error::Forbidden("ward"))
        ));
    }

    #[tokio::test]
    async fn invalid_draft_sends_nothing() {
        let backend = MemoryBackend::new();
        let directory = WardDirectory::new(backend.clone());
        let owner = caregiver("c1", Some("Sunshine Center"));
        let bad = WardDraft { birth_date: "yesterday".into(), ..draft() };

        assert!(directory.create_ward(Some(&owner), &bad).await.is_err());
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn delete_cascades_through_notes_and_comments() {
        let backend = MemoryBackend::new();
        let directory = WardDirectory::new(backend.clone());
        let owner = caregiver("c1", Some("Sunshine Center"));
        let ward = directory.create_ward(Some(&owner), &draft()).await.unwrap();
        let other = directory.create_ward(Some(&owner), &draft()).await.unwrap();

        let mut kept_note = Value::Null;
        for ward_id in [&ward.id, &ward.id, &other.id] {
            let note = backend
                .insert(Table::Notes, json!({ "ward_id": ward_id, "caregiver_id": "c1" }))
                .await
                .unwrap();
            backend
                .insert(Table::Comments, json!({ "note_id": note["id"], "user_id": "g1", "text": "thanks" }))
                .await
                .unwrap();
            kept_note = note;
        }

        directory.delete_ward(Some(&owner), &ward.id).await.unwrap();

        let wards = backend.rows(Table::Wards);
        assert_eq!(wards.len(), 1);
        assert_eq!(wards[0]["id"], json!(other.id));
        let notes = backend.rows(Table::Notes);
        assert_eq!(notes, vec![kept_note.clone()]);
        let comments = backend.rows(Table::Comments);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0]["note_id"], kept_note["id"]);
    }

    #[tokio::test]
    async fn email_lookup() {
        let backend = MemoryBackend::new();
        backend
            .upsert(Table::Users, json!({ "id": "u1", "email": "kim@example.com", "name": "Kim" }), "id")
            .await
            .unwrap();
        let directory = WardDirectory::new(backend);
        assert!(directory.email_registered(" kim@example.com ").await.unwrap());
        assert!(!directory.email_registered("lee@example.com").await.unwrap());
    }
}
