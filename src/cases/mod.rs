/// Moderation case system
///
/// Cases track open moderation reports about a piece of content. Notes
/// carry moderator commentary and state-change markers, and may point back
/// at a case log entry. The opener and commenter adapters prepare a case
/// plus note (or a note on an existing case) in memory, for the case log
/// creator to persist inside its transaction.
pub mod commenter;
pub mod opener;

pub use commenter::CaseCommenter;
pub use opener::CaseOpener;

use crate::content::ContentKind;
use crate::error::{CaseError, CaseResult, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Case lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseState {
    Open,
    Assigned,
    Resolved,
    Rejected,
}

impl CaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::Open => "open",
            CaseState::Assigned => "assigned",
            CaseState::Resolved => "resolved",
            CaseState::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> CaseResult<Self> {
        match s.to_lowercase().as_str() {
            "open" => Ok(CaseState::Open),
            "assigned" => Ok(CaseState::Assigned),
            "resolved" => Ok(CaseState::Resolved),
            "rejected" => Ok(CaseState::Rejected),
            _ => Err(CaseError::Internal(format!("Invalid case state: {}", s))),
        }
    }

    /// Closed states never get auto-resolved again
    pub fn is_closed(&self) -> bool {
        matches!(self, CaseState::Resolved | CaseState::Rejected)
    }
}

/// Moderation case record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: i64,
    pub content_kind: ContentKind,
    pub content_id: i64,
    pub content_title: String,
    pub case_state: CaseState,
    pub assigned_user_id: Option<i64>,
    pub auto_reported: bool,
    pub opened_by: i64,
    pub opened_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

/// Note attached to a case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseNote {
    pub note_id: i64,
    pub case_id: i64,
    pub user_id: i64,
    pub note_date: DateTime<Utc>,
    pub message: String,
    /// True only for the note that carries the original user report
    pub is_report: bool,
    /// State the note moved the case into, when it did
    pub state_change: Option<CaseState>,
    /// Back-reference to the case log entry this note was created with
    pub warning_log_id: Option<i64>,
}

/// Link from a staged note to a case log entry that may not have a row yet
///
/// Stays `Deferred` while the case log is unsaved; the creator resolves it
/// to `Persisted` right after the log insert, before any dependent row is
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLink {
    None,
    Deferred,
    Persisted(i64),
}

/// Capability to write note fields that are locked on the ordinary path
///
/// The linkage columns (`warning_log_id`, `state_change`) and the
/// empty-message allowance are reserved for sanction-derived notes. The
/// token can only be minted inside the crate and is scoped to the
/// creator's validate-and-save call, so the relaxation cannot leak into
/// unrelated note writes.
#[derive(Debug)]
pub struct LinkagePermit(());

impl LinkagePermit {
    pub(crate) fn new() -> Self {
        LinkagePermit(())
    }
}

/// A note prepared in memory, persisted later in the caller's transaction
#[derive(Debug, Clone)]
pub struct StagedNote {
    pub user_id: i64,
    pub note_date: DateTime<Utc>,
    pub message: String,
    pub is_report: bool,
    pub state_change: Option<CaseState>,
    pub warning_log: LogLink,
}

impl StagedNote {
    pub fn new(user_id: i64, note_date: DateTime<Utc>) -> Self {
        Self {
            user_id,
            note_date,
            message: String::new(),
            is_report: false,
            state_change: None,
            warning_log: LogLink::None,
        }
    }

    /// Field-level validation
    ///
    /// Without a permit the note must carry a message and may not touch
    /// the linkage columns. With one, an empty message is acceptable: the
    /// linked case log entry is the content.
    pub fn validate(
        &self,
        errors: &mut Vec<ValidationError>,
        permit: Option<&LinkagePermit>,
    ) {
        if self.user_id <= 0 {
            errors.push(ValidationError::new(
                "Case note",
                "user_id",
                "author is required",
            ));
        }

        if permit.is_none() {
            if self.message.trim().is_empty() {
                errors.push(ValidationError::new(
                    "Case note",
                    "message",
                    "message may not be empty",
                ));
            }
            if self.warning_log != LogLink::None {
                errors.push(ValidationError::new(
                    "Case note",
                    "warning_log_id",
                    "case log linkage is write-protected",
                ));
            }
            if self.state_change.is_some() {
                errors.push(ValidationError::new(
                    "Case note",
                    "state_change",
                    "state change is write-protected",
                ));
            }
        }
    }

    /// Insert the note for `case_id`
    ///
    /// The linkage columns are stripped unless a permit is supplied. A
    /// still-deferred log link under a permit is a sequencing bug in the
    /// caller and fails the operation.
    pub async fn insert<'e, E>(
        &self,
        case_id: i64,
        executor: E,
        permit: Option<&LinkagePermit>,
    ) -> CaseResult<CaseNote>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let (warning_log_id, state_change) = match permit {
            Some(_) => {
                let warning_log_id = match self.warning_log {
                    LogLink::None => None,
                    LogLink::Persisted(id) => Some(id),
                    LogLink::Deferred => {
                        return Err(CaseError::Internal(
                            "case log link not resolved before note save".to_string(),
                        ))
                    }
                };
                (warning_log_id, self.state_change)
            }
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO case_notes (case_id, user_id, note_date, message, is_report, state_change, warning_log_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(case_id)
        .bind(self.user_id)
        .bind(self.note_date)
        .bind(&self.message)
        .bind(self.is_report)
        .bind(state_change.map(|s| s.as_str()))
        .bind(warning_log_id)
        .execute(executor)
        .await?;

        Ok(CaseNote {
            note_id: result.last_insert_rowid(),
            case_id,
            user_id: self.user_id,
            note_date: self.note_date,
            message: self.message.clone(),
            is_report: self.is_report,
            state_change,
            warning_log_id,
        })
    }
}

/// A case prepared in memory before any row exists
#[derive(Debug, Clone)]
pub struct StagedCase {
    pub content_kind: ContentKind,
    pub content_id: i64,
    pub content_title: String,
    pub case_state: CaseState,
    pub assigned_user_id: Option<i64>,
    pub auto_reported: bool,
    pub opened_by: i64,
    pub opened_at: DateTime<Utc>,
}

impl StagedCase {
    /// State the case held before the current operation. A case that does
    /// not exist yet was never closed.
    pub fn previous_state(&self) -> Option<CaseState> {
        None
    }
}

/// Case manager
#[derive(Clone)]
pub struct CaseManager {
    db: SqlitePool,
}

impl CaseManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Get case by ID
    pub async fn get(&self, case_id: i64) -> CaseResult<Option<Case>> {
        let row = sqlx::query(
            r#"
            SELECT case_id, content_kind, content_id, content_title, case_state,
                   assigned_user_id, auto_reported, opened_by, opened_at, last_modified_at
            FROM cases
            WHERE case_id = ?
            "#,
        )
        .bind(case_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(parse_case).transpose()
    }

    /// Find the case attached to a piece of content, if one exists
    ///
    /// Read-then-decide lookup: two operations against the same content
    /// may both see "no case" and each open one. No lock is taken.
    pub async fn find_for_content(
        &self,
        kind: ContentKind,
        content_id: i64,
    ) -> CaseResult<Option<Case>> {
        let row = sqlx::query(
            r#"
            SELECT case_id, content_kind, content_id, content_title, case_state,
                   assigned_user_id, auto_reported, opened_by, opened_at, last_modified_at
            FROM cases
            WHERE content_kind = ? AND content_id = ?
            ORDER BY case_id DESC
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .bind(content_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(parse_case).transpose()
    }

    /// Append an ordinary moderator note to a case
    ///
    /// No permit is threaded through here, so the linkage columns stay
    /// untouched and an empty message is rejected.
    pub async fn add_note(
        &self,
        case_id: i64,
        user_id: i64,
        message: &str,
    ) -> CaseResult<CaseNote> {
        if self.get(case_id).await?.is_none() {
            return Err(CaseError::NotFound(format!("Case {} not found", case_id)));
        }

        let mut note = StagedNote::new(user_id, Utc::now());
        note.message = message.to_string();

        let mut errors = Vec::new();
        note.validate(&mut errors, None);
        if !errors.is_empty() {
            let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(CaseError::Validation(lines.join(",\n")));
        }

        note.insert(case_id, &self.db, None).await
    }

    /// List notes for a case, oldest first
    pub async fn list_notes(&self, case_id: i64) -> CaseResult<Vec<CaseNote>> {
        let rows = sqlx::query(
            r#"
            SELECT note_id, case_id, user_id, note_date, message, is_report,
                   state_change, warning_log_id
            FROM case_notes
            WHERE case_id = ?
            ORDER BY note_id ASC
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_note).collect()
    }
}

pub(crate) fn parse_case(row: sqlx::sqlite::SqliteRow) -> CaseResult<Case> {
    let kind_str: String = row.get("content_kind");
    let state_str: String = row.get("case_state");

    Ok(Case {
        case_id: row.get("case_id"),
        content_kind: ContentKind::from_str(&kind_str)?,
        content_id: row.get("content_id"),
        content_title: row.get("content_title"),
        case_state: CaseState::from_str(&state_str)?,
        assigned_user_id: row.get("assigned_user_id"),
        auto_reported: row.get("auto_reported"),
        opened_by: row.get("opened_by"),
        opened_at: row.get("opened_at"),
        last_modified_at: row.get("last_modified_at"),
    })
}

pub(crate) fn parse_note(row: sqlx::sqlite::SqliteRow) -> CaseResult<CaseNote> {
    let state_change = row
        .get::<Option<String>, _>("state_change")
        .map(|s| CaseState::from_str(&s))
        .transpose()?;

    Ok(CaseNote {
        note_id: row.get("note_id"),
        case_id: row.get("case_id"),
        user_id: row.get("user_id"),
        note_date: row.get("note_date"),
        message: row.get("message"),
        is_report: row.get("is_report"),
        state_change,
        warning_log_id: row.get("warning_log_id"),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

    /// Pool over one connection; in-memory sqlite databases are
    /// per-connection.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE cases (
                case_id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_kind TEXT NOT NULL,
                content_id INTEGER NOT NULL,
                content_title TEXT NOT NULL,
                case_state TEXT NOT NULL DEFAULT 'open',
                assigned_user_id INTEGER,
                auto_reported INTEGER NOT NULL DEFAULT 0,
                opened_by INTEGER NOT NULL,
                opened_at TEXT NOT NULL,
                last_modified_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE case_notes (
                note_id INTEGER PRIMARY KEY AUTOINCREMENT,
                case_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                note_date TEXT NOT NULL,
                message TEXT NOT NULL,
                is_report INTEGER NOT NULL DEFAULT 0,
                state_change TEXT,
                warning_log_id INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE case_logs (
                case_log_id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation_type TEXT NOT NULL,
                warning_edit_date TEXT,
                content_kind TEXT NOT NULL,
                content_id INTEGER NOT NULL,
                content_title TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                warning_id INTEGER,
                warning_date TEXT NOT NULL,
                warning_user_id INTEGER NOT NULL,
                warning_definition_id INTEGER,
                title TEXT NOT NULL,
                notes TEXT NOT NULL,
                points INTEGER,
                expiry_date TEXT,
                is_expired INTEGER NOT NULL DEFAULT 0,
                extra_user_group_ids TEXT,
                reply_ban_thread_id INTEGER,
                reply_ban_post_id INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    pub async fn seed_case(
        pool: &SqlitePool,
        kind: crate::content::ContentKind,
        content_id: i64,
        state: super::CaseState,
        assigned_user_id: Option<i64>,
    ) -> i64 {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO cases (content_kind, content_id, content_title, case_state,
                               assigned_user_id, auto_reported, opened_by, opened_at, last_modified_at)
            VALUES (?, ?, 'Seeded content', ?, ?, 0, 1, ?, ?)
            "#,
        )
        .bind(kind.as_str())
        .bind(content_id)
        .bind(state.as_str())
        .bind(assigned_user_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();

        result.last_insert_rowid()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{memory_pool, seed_case};
    use super::*;

    #[test]
    fn test_state_from_str() {
        assert_eq!(CaseState::from_str("resolved").unwrap(), CaseState::Resolved);
        assert_eq!(CaseState::from_str("OPEN").unwrap(), CaseState::Open);
        assert!(CaseState::from_str("closed").is_err());
        assert!(CaseState::Rejected.is_closed());
        assert!(!CaseState::Assigned.is_closed());
    }

    #[test]
    fn test_ordinary_note_validation() {
        let mut note = StagedNote::new(7, Utc::now());

        let mut errors = Vec::new();
        note.validate(&mut errors, None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "message");

        note.warning_log = LogLink::Deferred;
        note.state_change = Some(CaseState::Resolved);
        let mut errors = Vec::new();
        note.validate(&mut errors, None);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_permit_relaxes_linkage_fields() {
        let mut note = StagedNote::new(7, Utc::now());
        note.warning_log = LogLink::Deferred;
        note.state_change = Some(CaseState::Resolved);

        let permit = LinkagePermit::new();
        let mut errors = Vec::new();
        note.validate(&mut errors, Some(&permit));
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_ordinary_note_strips_linkage_on_insert() {
        let pool = memory_pool().await;
        let case_id = seed_case(&pool, crate::content::ContentKind::Post, 1, CaseState::Open, None).await;

        let mut note = StagedNote::new(7, Utc::now());
        note.message = "looked into this".to_string();
        note.warning_log = LogLink::Persisted(42);
        note.state_change = Some(CaseState::Resolved);

        let saved = note.insert(case_id, &pool, None).await.unwrap();
        assert_eq!(saved.warning_log_id, None);
        assert_eq!(saved.state_change, None);
    }

    #[tokio::test]
    async fn test_manager_add_and_list_notes() {
        let pool = memory_pool().await;
        let case_id = seed_case(&pool, crate::content::ContentKind::Post, 1, CaseState::Open, None).await;
        let manager = CaseManager::new(pool);

        manager.add_note(case_id, 3, "first").await.unwrap();
        manager.add_note(case_id, 4, "second").await.unwrap();
        assert!(manager.add_note(case_id, 4, "  ").await.is_err());
        assert!(manager.add_note(999, 4, "missing").await.is_err());

        let notes = manager.list_notes(case_id).await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].message, "first");
        assert!(!notes[0].is_report);
        assert_eq!(notes[1].user_id, 4);
    }

    #[tokio::test]
    async fn test_find_for_content() {
        let pool = memory_pool().await;
        seed_case(&pool, crate::content::ContentKind::Post, 10, CaseState::Open, None).await;
        let later = seed_case(&pool, crate::content::ContentKind::Post, 10, CaseState::Resolved, None).await;
        let manager = CaseManager::new(pool);

        let found = manager
            .find_for_content(crate::content::ContentKind::Post, 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.case_id, later);

        let missing = manager
            .find_for_content(crate::content::ContentKind::Thread, 10)
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
