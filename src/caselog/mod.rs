/// Case log audit trail
///
/// Every sanction action lands here as one immutable snapshot row. Edits
/// to a sanction append a new row; nothing in this crate updates or
/// deletes an existing one.
pub mod creator;

pub use creator::{CaseLogCreator, ResolvePolicy, SanctionContext};

use crate::content::ContentKind;
use crate::error::{CaseError, CaseResult, ValidationError};
use crate::notify::Notifier;
use crate::sanctions::Sanction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

/// Operation recorded by a case log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    New,
    Edit,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::New => "new",
            OperationKind::Edit => "edit",
        }
    }

    pub fn from_str(s: &str) -> CaseResult<Self> {
        match s.to_lowercase().as_str() {
            "new" => Ok(OperationKind::New),
            "edit" => Ok(OperationKind::Edit),
            _ => Err(CaseError::Internal(format!("Invalid operation type: {}", s))),
        }
    }
}

/// Immutable audit snapshot of a sanction action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseLog {
    pub case_log_id: i64,
    pub operation_type: OperationKind,
    /// Time of the edit; None for a `new` operation
    pub warning_edit_date: Option<DateTime<Utc>>,
    pub content_kind: ContentKind,
    pub content_id: i64,
    pub content_title: String,
    /// User the sanction targets
    pub user_id: i64,
    /// Present for warning-derived entries
    pub warning_id: Option<i64>,
    pub warning_date: DateTime<Utc>,
    /// Moderator who performed the sanction
    pub warning_user_id: i64,
    pub warning_definition_id: Option<i64>,
    pub title: String,
    pub notes: String,
    pub points: Option<i64>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub extra_user_group_ids: Option<Vec<i64>>,
    /// Populated only for reply-restriction entries
    pub reply_ban_thread_id: Option<i64>,
    pub reply_ban_post_id: Option<i64>,
}

/// A case log entry staged in memory, before it has a row or an id
#[derive(Debug, Clone)]
pub struct PendingCaseLog {
    pub operation_type: OperationKind,
    pub warning_edit_date: Option<DateTime<Utc>>,
    pub content_kind: ContentKind,
    pub content_id: i64,
    pub content_title: String,
    pub user_id: i64,
    pub warning_id: Option<i64>,
    pub warning_date: DateTime<Utc>,
    pub warning_user_id: i64,
    pub warning_definition_id: Option<i64>,
    pub title: String,
    pub notes: String,
    pub points: Option<i64>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub extra_user_group_ids: Option<Vec<i64>>,
    pub reply_ban_thread_id: Option<i64>,
    pub reply_ban_post_id: Option<i64>,
}

impl PendingCaseLog {
    pub fn new(operation_type: OperationKind, now: DateTime<Utc>) -> Self {
        Self {
            operation_type,
            warning_edit_date: match operation_type {
                OperationKind::New => None,
                OperationKind::Edit => Some(now),
            },
            content_kind: ContentKind::User,
            content_id: 0,
            content_title: String::new(),
            user_id: 0,
            warning_id: None,
            warning_date: now,
            warning_user_id: 0,
            warning_definition_id: None,
            title: String::new(),
            notes: String::new(),
            points: None,
            expiry_date: None,
            is_expired: false,
            extra_user_group_ids: None,
            reply_ban_thread_id: None,
            reply_ban_post_id: None,
        }
    }

    /// Field-level validation
    pub fn validate(&self, errors: &mut Vec<ValidationError>) {
        if self.content_title.trim().is_empty() {
            errors.push(ValidationError::new(
                "Case log",
                "content_title",
                "content title may not be empty",
            ));
        }
        if self.content_title.chars().count() > 255 {
            errors.push(ValidationError::new(
                "Case log",
                "content_title",
                "content title may not be longer than 255 characters",
            ));
        }
        if self.title.trim().is_empty() {
            errors.push(ValidationError::new(
                "Case log",
                "title",
                "title may not be empty",
            ));
        }
        if self.user_id <= 0 {
            errors.push(ValidationError::new(
                "Case log",
                "user_id",
                "sanctioned user is required",
            ));
        }
        if self.warning_user_id <= 0 {
            errors.push(ValidationError::new(
                "Case log",
                "warning_user_id",
                "sanctioning moderator is required",
            ));
        }
        if let Some(points) = self.points {
            if points < 0 {
                errors.push(ValidationError::new(
                    "Case log",
                    "points",
                    "points may not be negative",
                ));
            }
        }
    }

    /// Insert the snapshot, finalizing its identifier
    pub async fn insert(&self, tx: &mut Transaction<'_, Sqlite>) -> CaseResult<CaseLog> {
        let extra_group_ids = self
            .extra_user_group_ids
            .as_ref()
            .map(|ids| {
                serde_json::to_string(ids)
                    .map_err(|e| CaseError::Internal(format!("group id encoding failed: {}", e)))
            })
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO case_logs (operation_type, warning_edit_date, content_kind, content_id,
                                   content_title, user_id, warning_id, warning_date, warning_user_id,
                                   warning_definition_id, title, notes, points, expiry_date,
                                   is_expired, extra_user_group_ids, reply_ban_thread_id, reply_ban_post_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.operation_type.as_str())
        .bind(self.warning_edit_date)
        .bind(self.content_kind.as_str())
        .bind(self.content_id)
        .bind(&self.content_title)
        .bind(self.user_id)
        .bind(self.warning_id)
        .bind(self.warning_date)
        .bind(self.warning_user_id)
        .bind(self.warning_definition_id)
        .bind(&self.title)
        .bind(&self.notes)
        .bind(self.points)
        .bind(self.expiry_date)
        .bind(self.is_expired)
        .bind(extra_group_ids)
        .bind(self.reply_ban_thread_id)
        .bind(self.reply_ban_post_id)
        .execute(&mut **tx)
        .await?;

        Ok(CaseLog {
            case_log_id: result.last_insert_rowid(),
            operation_type: self.operation_type,
            warning_edit_date: self.warning_edit_date,
            content_kind: self.content_kind,
            content_id: self.content_id,
            content_title: self.content_title.clone(),
            user_id: self.user_id,
            warning_id: self.warning_id,
            warning_date: self.warning_date,
            warning_user_id: self.warning_user_id,
            warning_definition_id: self.warning_definition_id,
            title: self.title.clone(),
            notes: self.notes.clone(),
            points: self.points,
            expiry_date: self.expiry_date,
            is_expired: self.is_expired,
            extra_user_group_ids: self.extra_user_group_ids.clone(),
            reply_ban_thread_id: self.reply_ban_thread_id,
            reply_ban_post_id: self.reply_ban_post_id,
        })
    }
}

/// Case log manager: read-only queries over the audit trail
#[derive(Clone)]
pub struct CaseLogManager {
    db: SqlitePool,
}

impl CaseLogManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Get a case log entry by ID
    pub async fn get(&self, case_log_id: i64) -> CaseResult<Option<CaseLog>> {
        let row = sqlx::query(
            r#"
            SELECT case_log_id, operation_type, warning_edit_date, content_kind, content_id,
                   content_title, user_id, warning_id, warning_date, warning_user_id,
                   warning_definition_id, title, notes, points, expiry_date,
                   is_expired, extra_user_group_ids, reply_ban_thread_id, reply_ban_post_id
            FROM case_logs
            WHERE case_log_id = ?
            "#,
        )
        .bind(case_log_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(parse_case_log).transpose()
    }

    /// Sanction history for a user, newest first
    pub async fn list_for_user(&self, user_id: i64) -> CaseResult<Vec<CaseLog>> {
        let rows = sqlx::query(
            r#"
            SELECT case_log_id, operation_type, warning_edit_date, content_kind, content_id,
                   content_title, user_id, warning_id, warning_date, warning_user_id,
                   warning_definition_id, title, notes, points, expiry_date,
                   is_expired, extra_user_group_ids, reply_ban_thread_id, reply_ban_post_id
            FROM case_logs
            WHERE user_id = ?
            ORDER BY case_log_id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_case_log).collect()
    }

    /// Sanction history for a piece of content, newest first
    pub async fn list_for_content(
        &self,
        kind: ContentKind,
        content_id: i64,
    ) -> CaseResult<Vec<CaseLog>> {
        let rows = sqlx::query(
            r#"
            SELECT case_log_id, operation_type, warning_edit_date, content_kind, content_id,
                   content_title, user_id, warning_id, warning_date, warning_user_id,
                   warning_definition_id, title, notes, points, expiry_date,
                   is_expired, extra_user_group_ids, reply_ban_thread_id, reply_ban_post_id
            FROM case_logs
            WHERE content_kind = ? AND content_id = ?
            ORDER BY case_log_id DESC
            "#,
        )
        .bind(kind.as_str())
        .bind(content_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_case_log).collect()
    }
}

fn parse_case_log(row: sqlx::sqlite::SqliteRow) -> CaseResult<CaseLog> {
    let operation_str: String = row.get("operation_type");
    let kind_str: String = row.get("content_kind");

    let extra_user_group_ids = row
        .get::<Option<String>, _>("extra_user_group_ids")
        .map(|raw| {
            serde_json::from_str::<Vec<i64>>(&raw)
                .map_err(|e| CaseError::Internal(format!("group id decoding failed: {}", e)))
        })
        .transpose()?;

    Ok(CaseLog {
        case_log_id: row.get("case_log_id"),
        operation_type: OperationKind::from_str(&operation_str)?,
        warning_edit_date: row.get("warning_edit_date"),
        content_kind: ContentKind::from_str(&kind_str)?,
        content_id: row.get("content_id"),
        content_title: row.get("content_title"),
        user_id: row.get("user_id"),
        warning_id: row.get("warning_id"),
        warning_date: row.get("warning_date"),
        warning_user_id: row.get("warning_user_id"),
        warning_definition_id: row.get("warning_definition_id"),
        title: row.get("title"),
        notes: row.get("notes"),
        points: row.get("points"),
        expiry_date: row.get("expiry_date"),
        is_expired: row.get("is_expired"),
        extra_user_group_ids,
        reply_ban_thread_id: row.get("reply_ban_thread_id"),
        reply_ban_post_id: row.get("reply_ban_post_id"),
    })
}

/// Apply a sanction to the audit trail end to end
///
/// Creates, validates, and saves the case log with its case linkage, then
/// dispatches notifications. A notification failure is logged and does not
/// fail the already-committed operation.
pub async fn log_operation(
    db: &SqlitePool,
    ctx: SanctionContext,
    policy: ResolvePolicy,
    sanction: Sanction,
    operation_type: OperationKind,
    notifier: &dyn Notifier,
) -> CaseResult<CaseLog> {
    let mut creator =
        CaseLogCreator::new(db.clone(), ctx, policy, sanction, operation_type).await?;
    creator.validate()?;
    let log = creator.save().await?;

    if let Err(err) = creator.send_notifications(notifier).await {
        tracing::warn!(
            case_log_id = log.case_log_id,
            "failed to send case notifications: {}",
            err
        );
    }

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::test_support::memory_pool;

    #[test]
    fn test_operation_kind_round_trip() {
        assert_eq!(OperationKind::from_str("new").unwrap(), OperationKind::New);
        assert_eq!(OperationKind::from_str("Edit").unwrap(), OperationKind::Edit);
        assert!(OperationKind::from_str("delete").is_err());
    }

    #[test]
    fn test_edit_operations_carry_an_edit_date() {
        let now = Utc::now();
        assert!(PendingCaseLog::new(OperationKind::New, now)
            .warning_edit_date
            .is_none());
        assert_eq!(
            PendingCaseLog::new(OperationKind::Edit, now).warning_edit_date,
            Some(now)
        );
    }

    #[test]
    fn test_pending_log_validation() {
        let mut log = PendingCaseLog::new(OperationKind::New, Utc::now());
        let mut errors = Vec::new();
        log.validate(&mut errors);
        // empty content title, empty title, missing users
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| e.component == "Case log"));

        log.content_title = "Offending post".to_string();
        log.title = "Spam".to_string();
        log.user_id = 1;
        log.warning_user_id = 2;
        log.points = Some(-1);
        let mut errors = Vec::new();
        log.validate(&mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "points");
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let pool = memory_pool().await;
        let now = Utc::now();

        let mut pending = PendingCaseLog::new(OperationKind::New, now);
        pending.content_kind = ContentKind::Post;
        pending.content_id = 9;
        pending.content_title = "Offending post".to_string();
        pending.user_id = 3;
        pending.warning_id = Some(11);
        pending.warning_user_id = 2;
        pending.title = "Spam".to_string();
        pending.points = Some(4);
        pending.extra_user_group_ids = Some(vec![7, 8]);

        let mut tx = pool.begin().await.unwrap();
        let saved = pending.insert(&mut tx).await.unwrap();
        tx.commit().await.unwrap();

        let manager = CaseLogManager::new(pool);
        let loaded = manager.get(saved.case_log_id).await.unwrap().unwrap();
        assert_eq!(loaded.operation_type, OperationKind::New);
        assert_eq!(loaded.warning_edit_date, None);
        assert_eq!(loaded.extra_user_group_ids, Some(vec![7, 8]));
        assert_eq!(loaded.points, Some(4));

        let for_user = manager.list_for_user(3).await.unwrap();
        assert_eq!(for_user.len(), 1);
        let for_content = manager.list_for_content(ContentKind::Post, 9).await.unwrap();
        assert_eq!(for_content.len(), 1);
        assert!(manager.list_for_user(99).await.unwrap().is_empty());
    }
}
