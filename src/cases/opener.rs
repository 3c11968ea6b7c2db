/// Case opener: stages a new case plus its initial note
///
/// Nothing touches the database until `save` runs inside the caller's
/// transaction; until then the case and note exist only in memory.
use crate::cases::{Case, CaseNote, CaseState, LinkagePermit, StagedCase, StagedNote};
use crate::content::ContentRef;
use crate::error::{CaseError, CaseResult, ValidationError};
use crate::notify::Notifier;
use chrono::Utc;
use sqlx::{Sqlite, Transaction};

pub struct CaseOpener {
    case: StagedCase,
    note: StagedNote,
    saved: Option<(Case, CaseNote)>,
}

impl CaseOpener {
    /// Stage a new case about `content`, opened by `opened_by`
    ///
    /// The initial note starts out as the report itself; sanction-derived
    /// flows downgrade it to commentary before saving.
    pub fn new(content: &ContentRef, opened_by: i64) -> Self {
        let now = Utc::now();

        let case = StagedCase {
            content_kind: content.kind,
            content_id: content.id,
            content_title: content.title.clone(),
            case_state: CaseState::Open,
            assigned_user_id: None,
            auto_reported: false,
            opened_by,
            opened_at: now,
        };

        let mut note = StagedNote::new(opened_by, now);
        note.is_report = true;

        Self {
            case,
            note,
            saved: None,
        }
    }

    pub fn case(&self) -> &StagedCase {
        &self.case
    }

    pub fn case_mut(&mut self) -> &mut StagedCase {
        &mut self.case
    }

    pub fn comment(&self) -> &StagedNote {
        &self.note
    }

    pub fn comment_mut(&mut self) -> &mut StagedNote {
        &mut self.note
    }

    /// Case and note saved by this opener, once `save` has run
    pub fn saved(&self) -> Option<&(Case, CaseNote)> {
        self.saved.as_ref()
    }

    /// Collect validation failures without stopping at the first
    pub fn validate(&self, errors: &mut Vec<ValidationError>, permit: Option<&LinkagePermit>) {
        if self.case.content_title.trim().is_empty() {
            errors.push(ValidationError::new(
                "Case",
                "content_title",
                "content title may not be empty",
            ));
        }
        if self.case.content_title.chars().count() > 255 {
            errors.push(ValidationError::new(
                "Case",
                "content_title",
                "content title may not be longer than 255 characters",
            ));
        }
        if self.case.opened_by <= 0 {
            errors.push(ValidationError::new(
                "Case",
                "opened_by",
                "opener is required",
            ));
        }

        self.note.validate(errors, permit);
    }

    /// Persist the staged case and its initial note
    pub async fn save(
        &mut self,
        tx: &mut Transaction<'_, Sqlite>,
        permit: Option<&LinkagePermit>,
    ) -> CaseResult<(Case, CaseNote)> {
        if self.saved.is_some() {
            return Err(CaseError::Internal("case already saved".to_string()));
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO cases (content_kind, content_id, content_title, case_state,
                               assigned_user_id, auto_reported, opened_by, opened_at, last_modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.case.content_kind.as_str())
        .bind(self.case.content_id)
        .bind(&self.case.content_title)
        .bind(self.case.case_state.as_str())
        .bind(self.case.assigned_user_id)
        .bind(self.case.auto_reported)
        .bind(self.case.opened_by)
        .bind(self.case.opened_at)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        let case = Case {
            case_id: result.last_insert_rowid(),
            content_kind: self.case.content_kind,
            content_id: self.case.content_id,
            content_title: self.case.content_title.clone(),
            case_state: self.case.case_state,
            assigned_user_id: self.case.assigned_user_id,
            auto_reported: self.case.auto_reported,
            opened_by: self.case.opened_by,
            opened_at: self.case.opened_at,
            last_modified_at: now,
        };

        let note = self.note.insert(case.case_id, &mut **tx, permit).await?;

        self.saved = Some((case.clone(), note.clone()));
        Ok((case, note))
    }

    /// Notify watchers about the new case; call only after a committed save
    pub async fn send_notifications(&self, notifier: &dyn Notifier) -> CaseResult<()> {
        let Some((case, note)) = &self.saved else {
            return Err(CaseError::Internal(
                "cannot send notifications before save".to_string(),
            ));
        };

        notifier.case_opened(case, note).await
    }
}
