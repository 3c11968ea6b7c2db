/// Case commenter: stages an additional note on an existing case
///
/// Captures the case's state and assignment as read at construction time.
/// When the resolve decision is declined, `save` writes those captured
/// values back explicitly, so a concurrent mutation between the read and
/// the write cannot leak through this operation.
use crate::cases::{parse_case, Case, CaseNote, CaseState, LinkagePermit, StagedNote};
use crate::error::{CaseError, CaseResult, ValidationError};
use crate::notify::Notifier;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};

pub struct CaseCommenter {
    case: Case,
    previous_state: CaseState,
    previous_assigned: Option<i64>,
    note: StagedNote,
    resolve_case: bool,
    saved: Option<(Case, CaseNote)>,
}

impl CaseCommenter {
    /// Load the case and stage a note authored by `author`
    pub async fn for_case(db: &SqlitePool, case_id: i64, author: i64) -> CaseResult<Self> {
        let row = sqlx::query(
            r#"
            SELECT case_id, content_kind, content_id, content_title, case_state,
                   assigned_user_id, auto_reported, opened_by, opened_at, last_modified_at
            FROM cases
            WHERE case_id = ?
            "#,
        )
        .bind(case_id)
        .fetch_optional(db)
        .await?;

        let case = row
            .map(parse_case)
            .transpose()?
            .ok_or_else(|| CaseError::NotFound(format!("Case {} not found", case_id)))?;

        let previous_state = case.case_state;
        let previous_assigned = case.assigned_user_id;
        let note = StagedNote::new(author, Utc::now());

        Ok(Self {
            case,
            previous_state,
            previous_assigned,
            note,
            resolve_case: false,
            saved: None,
        })
    }

    pub fn case(&self) -> &Case {
        &self.case
    }

    /// State the case held when this commenter read it
    pub fn previous_state(&self) -> CaseState {
        self.previous_state
    }

    pub fn comment(&self) -> &StagedNote {
        &self.note
    }

    pub fn comment_mut(&mut self) -> &mut StagedNote {
        &mut self.note
    }

    /// Whether `save` moves the case to resolved or restores its
    /// pre-operation state
    pub fn set_resolve(&mut self, resolve: bool) {
        self.resolve_case = resolve;
    }

    /// Case and note saved by this commenter, once `save` has run
    pub fn saved(&self) -> Option<&(Case, CaseNote)> {
        self.saved.as_ref()
    }

    /// Collect validation failures without stopping at the first
    pub fn validate(&self, errors: &mut Vec<ValidationError>, permit: Option<&LinkagePermit>) {
        self.note.validate(errors, permit);
    }

    /// Persist the staged note and the case-state decision
    pub async fn save(
        &mut self,
        tx: &mut Transaction<'_, Sqlite>,
        permit: Option<&LinkagePermit>,
    ) -> CaseResult<(Case, CaseNote)> {
        if self.saved.is_some() {
            return Err(CaseError::Internal("note already saved".to_string()));
        }

        let note = self.note.insert(self.case.case_id, &mut **tx, permit).await?;

        if self.resolve_case {
            let now = Utc::now();
            self.case.case_state = CaseState::Resolved;
            self.case.last_modified_at = now;

            sqlx::query(
                r#"
                UPDATE cases
                SET case_state = ?, last_modified_at = ?
                WHERE case_id = ?
                "#,
            )
            .bind(self.case.case_state.as_str())
            .bind(now)
            .bind(self.case.case_id)
            .execute(&mut **tx)
            .await?;
        } else {
            // Write the captured values back even though nothing in this
            // operation changed them.
            self.case.case_state = self.previous_state;
            self.case.assigned_user_id = self.previous_assigned;

            sqlx::query(
                r#"
                UPDATE cases
                SET case_state = ?, assigned_user_id = ?
                WHERE case_id = ?
                "#,
            )
            .bind(self.case.case_state.as_str())
            .bind(self.case.assigned_user_id)
            .bind(self.case.case_id)
            .execute(&mut **tx)
            .await?;
        }

        self.saved = Some((self.case.clone(), note.clone()));
        Ok((self.case.clone(), note))
    }

    /// Notify watchers about the new note; call only after a committed save
    pub async fn send_notifications(&self, notifier: &dyn Notifier) -> CaseResult<()> {
        let Some((case, note)) = &self.saved else {
            return Err(CaseError::Internal(
                "cannot send notifications before save".to_string(),
            ));
        };

        notifier.case_commented(case, note).await
    }
}
