/// Case log creation service
///
/// Orchestrates one sanction event end to end: snapshots the sanction
/// into a pending case log, decides whether to open a new case or comment
/// on the one already attached to the content, applies the auto-resolve
/// policy, and commits the whole (case log, case, note) triple in a
/// single transaction. Validation aggregates every failure across the
/// three records before anything is persisted.
use crate::cases::{CaseCommenter, CaseNote, CaseOpener, CaseState, LinkagePermit, LogLink};
use crate::caselog::{CaseLog, OperationKind, PendingCaseLog};
use crate::content::{ContentKind, ContentRef};
use crate::error::{CaseError, CaseResult, ValidationError};
use crate::notify::Notifier;
use crate::sanctions::{FormalWarning, Loggable, ReplyRestriction, Sanction};
use chrono::Utc;
use sqlx::SqlitePool;

/// Title recorded for reply-restriction log entries
const REPLY_RESTRICTED_TITLE: &str = "Reply restricted";

/// Per-operation resolve policy, resolved by the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolvePolicy {
    /// Close the attached case when the sanction is applied
    pub auto_resolve: bool,
    /// Override for cases opened by this operation; takes precedence over
    /// `auto_resolve` when set. Ignored on the existing-case path.
    pub auto_resolve_new_cases: Option<bool>,
    /// Open a case for a newly warned content that has none yet
    pub open_cases_for_new_warnings: bool,
}

/// Context for one sanction operation
#[derive(Debug, Clone)]
pub struct SanctionContext {
    /// Moderator performing the operation; authors the case note and is
    /// recorded as the sanctioning user for reply restrictions
    pub acting_user_id: i64,
    /// Public base URL used when rendering permalinks into note bodies
    pub base_url: String,
}

/// How the pending case log attaches to the case system
enum CaseAttachment {
    Opened(CaseOpener),
    Commented(CaseCommenter),
}

impl CaseAttachment {
    fn comment_mut(&mut self) -> &mut crate::cases::StagedNote {
        match self {
            CaseAttachment::Opened(opener) => opener.comment_mut(),
            CaseAttachment::Commented(commenter) => commenter.comment_mut(),
        }
    }
}

pub struct CaseLogCreator {
    db: SqlitePool,
    policy: ResolvePolicy,
    sanction: Sanction,
    pending_log: PendingCaseLog,
    attachment: Option<CaseAttachment>,
    validated: bool,
    saved_log: Option<CaseLog>,
}

impl CaseLogCreator {
    /// Build the creator and compute every default for the sanction
    ///
    /// Loads the attached case when the sanction already links to one, so
    /// the commenter captures the case's pre-operation state here and not
    /// at save time.
    pub async fn new(
        db: SqlitePool,
        ctx: SanctionContext,
        policy: ResolvePolicy,
        sanction: Sanction,
        operation_type: OperationKind,
    ) -> CaseResult<Self> {
        let now = Utc::now();
        let mut pending_log = PendingCaseLog::new(operation_type, now);

        let attachment = match &sanction {
            Sanction::Warning(warning) => {
                defaults_for_warning(&db, &ctx, &policy, warning, &mut pending_log).await?
            }
            Sanction::ReplyRestriction(restriction) => {
                defaults_for_restriction(&db, &ctx, restriction, &mut pending_log, now).await?
            }
        };

        let mut creator = Self {
            db,
            policy,
            sanction,
            pending_log,
            attachment,
            validated: false,
            saved_log: None,
        };

        // The staged note gets a placeholder link now; the real id exists
        // only after the log insert inside the transaction.
        if let Some(attachment) = &mut creator.attachment {
            attachment.comment_mut().warning_log = LogLink::Deferred;
        }

        Ok(creator)
    }

    /// Close the attached case when the sanction lands
    pub fn set_auto_resolve(&mut self, auto_resolve: bool) {
        self.policy.auto_resolve = auto_resolve;
    }

    /// Override the resolve decision for cases opened by this operation
    pub fn set_auto_resolve_new_cases(&mut self, auto_resolve: Option<bool>) {
        self.policy.auto_resolve_new_cases = auto_resolve;
    }

    /// The staged snapshot, until `save` persists it
    pub fn case_log(&self) -> &PendingCaseLog {
        &self.pending_log
    }

    /// The persisted snapshot, once `save` has run
    pub fn saved_case_log(&self) -> Option<&CaseLog> {
        self.saved_log.as_ref()
    }

    /// The case this operation wrote, once `save` has run
    pub fn case(&self) -> Option<&crate::cases::Case> {
        match &self.attachment {
            Some(CaseAttachment::Opened(opener)) => opener.saved().map(|(case, _)| case),
            Some(CaseAttachment::Commented(commenter)) => commenter.saved().map(|(case, _)| case),
            None => None,
        }
    }

    /// The note this operation wrote, once `save` has run
    pub fn note(&self) -> Option<&CaseNote> {
        match &self.attachment {
            Some(CaseAttachment::Opened(opener)) => opener.saved().map(|(_, note)| note),
            Some(CaseAttachment::Commented(commenter)) => commenter.saved().map(|(_, note)| note),
            None => None,
        }
    }

    /// Single aggregation pass over the pending log and the active
    /// opener/commenter
    ///
    /// Every failure from every record lands in one ordered list; the
    /// combined message is prefixed with the sanction's identifier when it
    /// has one.
    pub fn validate(&mut self) -> CaseResult<()> {
        let permit = LinkagePermit::new();
        let mut errors = Vec::new();

        self.pending_log.validate(&mut errors);
        match &self.attachment {
            Some(CaseAttachment::Opened(opener)) => opener.validate(&mut errors, Some(&permit)),
            Some(CaseAttachment::Commented(commenter)) => {
                commenter.validate(&mut errors, Some(&permit))
            }
            None => {}
        }

        if !errors.is_empty() {
            return Err(self.validation_failure(errors));
        }

        self.validated = true;
        Ok(())
    }

    fn validation_failure(&self, errors: Vec<ValidationError>) -> CaseError {
        let mut lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        if let Some(identifier) = self.sanction.as_loggable().identifier() {
            lines.insert(0, identifier);
        }
        CaseError::Validation(lines.join(",\n"))
    }

    /// Persist the whole triple in one transaction
    ///
    /// The case log goes first so its identifier exists; the deferred
    /// note link resolves to it before the dependent rows are written.
    /// Any failure rolls the entire operation back.
    pub async fn save(&mut self) -> CaseResult<CaseLog> {
        if self.saved_log.is_some() {
            return Err(CaseError::Internal("case log already saved".to_string()));
        }
        if !self.validated {
            self.validate()?;
        }

        let permit = LinkagePermit::new();
        let effective_auto_resolve = self
            .policy
            .auto_resolve_new_cases
            .unwrap_or(self.policy.auto_resolve);
        let general_auto_resolve = self.policy.auto_resolve;

        let mut tx = self.db.begin().await?;

        let log = self.pending_log.insert(&mut tx).await?;

        match &mut self.attachment {
            Some(CaseAttachment::Opened(opener)) => {
                let resolve =
                    effective_auto_resolve && !was_closed(opener.case().previous_state());

                let note = opener.comment_mut();
                note.warning_log = LogLink::Persisted(log.case_log_id);
                note.is_report = false;
                note.state_change = resolve.then_some(CaseState::Resolved);

                if resolve {
                    let case = opener.case_mut();
                    case.case_state = CaseState::Resolved;
                    case.auto_reported = true;
                }

                opener.save(&mut tx, Some(&permit)).await?;
            }
            Some(CaseAttachment::Commented(commenter)) => {
                let resolve =
                    general_auto_resolve && !was_closed(Some(commenter.previous_state()));

                let note = commenter.comment_mut();
                note.warning_log = LogLink::Persisted(log.case_log_id);
                note.is_report = false;
                note.state_change = resolve.then_some(CaseState::Resolved);

                commenter.set_resolve(resolve);
                commenter.save(&mut tx, Some(&permit)).await?;
            }
            None => {}
        }

        tx.commit().await?;

        self.saved_log = Some(log.clone());
        Ok(log)
    }

    /// Delegate notification dispatch to whichever adapter was used
    ///
    /// Runs outside the transaction; the committed case data stands
    /// whatever happens here.
    pub async fn send_notifications(&self, notifier: &dyn Notifier) -> CaseResult<()> {
        if self.saved_log.is_none() {
            return Err(CaseError::Internal(
                "cannot send notifications before save".to_string(),
            ));
        }

        match &self.attachment {
            Some(CaseAttachment::Opened(opener)) => opener.send_notifications(notifier).await,
            Some(CaseAttachment::Commented(commenter)) => {
                commenter.send_notifications(notifier).await
            }
            None => Ok(()),
        }
    }
}

fn was_closed(previous: Option<CaseState>) -> bool {
    matches!(previous, Some(state) if state.is_closed())
}

/// Snapshot a formal warning and resolve its case attachment
///
/// Optional warning fields simply stay unset on the log; a warning source
/// without extra group ids is normal. A new case is only opened when the
/// policy asks for it and the warned content still exists.
async fn defaults_for_warning(
    db: &SqlitePool,
    ctx: &SanctionContext,
    policy: &ResolvePolicy,
    warning: &FormalWarning,
    log: &mut PendingCaseLog,
) -> CaseResult<Option<CaseAttachment>> {
    log.content_kind = warning.content_kind;
    log.content_id = warning.content_id;
    log.content_title = warning.content_title.clone();
    log.user_id = warning.user_id;
    log.warning_id = Some(warning.warning_id);
    log.warning_date = warning.warning_date;
    log.warning_user_id = warning.warning_user_id;
    log.warning_definition_id = warning.warning_definition_id;
    log.title = warning.title.clone();
    log.notes = warning.notes.clone();
    log.points = Some(warning.points);
    log.expiry_date = warning.expiry_date;
    log.is_expired = warning.is_expired;
    log.extra_user_group_ids = warning.extra_user_group_ids.clone();

    if let Some(case_id) = warning.case_id {
        let commenter = CaseCommenter::for_case(db, case_id, ctx.acting_user_id).await?;
        return Ok(Some(CaseAttachment::Commented(commenter)));
    }

    if policy.open_cases_for_new_warnings {
        if let Some(content) = &warning.content {
            let opener = CaseOpener::new(content, ctx.acting_user_id);
            return Ok(Some(CaseAttachment::Opened(opener)));
        }
    }

    Ok(None)
}

/// Synthesize log fields from a reply restriction and resolve its case
/// attachment
///
/// Content identity defaults to the restricted user and switches to the
/// post when the restriction is scoped to one. Unlike warnings, a
/// restriction without a case always opens one.
async fn defaults_for_restriction(
    db: &SqlitePool,
    ctx: &SanctionContext,
    restriction: &ReplyRestriction,
    log: &mut PendingCaseLog,
    now: chrono::DateTime<Utc>,
) -> CaseResult<Option<CaseAttachment>> {
    log.warning_date = now;

    let mut case_id = restriction.case_id;
    let mut content = ContentRef::new(
        ContentKind::User,
        restriction.user_id,
        restriction.username.clone(),
    );
    if let Some(post) = &restriction.post {
        case_id = post.case_id;
        content = ContentRef::new(
            ContentKind::Post,
            post.post_id,
            format!("Post in thread \"{}\"", post.thread_title),
        );
    }

    log.content_kind = content.kind;
    log.content_id = content.id;
    log.content_title = content.title.clone();
    log.user_id = restriction.user_id;
    log.warning_user_id = ctx.acting_user_id;
    log.warning_definition_id = None;
    log.title = REPLY_RESTRICTED_TITLE.to_string();
    log.notes = format!(
        "{}\n{}",
        restriction_permalink(&ctx.base_url, restriction),
        restriction.reason
    );
    log.expiry_date = restriction.expiry_date;
    // Future-dated expiries set the flag; a permanent restriction never
    // does.
    log.is_expired = restriction.expiry_date.map_or(false, |expiry| expiry > now);
    log.reply_ban_thread_id = Some(restriction.thread_id);
    log.reply_ban_post_id = restriction.post.as_ref().map(|post| post.post_id);

    if let Some(case_id) = case_id {
        let commenter = CaseCommenter::for_case(db, case_id, ctx.acting_user_id).await?;
        Ok(Some(CaseAttachment::Commented(commenter)))
    } else {
        let opener = CaseOpener::new(&content, ctx.acting_user_id);
        Ok(Some(CaseAttachment::Opened(opener)))
    }
}

/// Permalink to the restriction, embedded at the top of the note body
fn restriction_permalink(base_url: &str, restriction: &ReplyRestriction) -> String {
    format!(
        "{}/threads/{}/reply-restrictions/{}",
        base_url.trim_end_matches('/'),
        restriction.thread_id,
        restriction.restriction_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanctions::RestrictedPost;
    use chrono::Duration;

    fn ctx() -> SanctionContext {
        SanctionContext {
            acting_user_id: 2,
            base_url: "https://forum.example.com".to_string(),
        }
    }

    fn restriction() -> ReplyRestriction {
        ReplyRestriction {
            restriction_id: 6,
            user_id: 10,
            username: "banned_user".to_string(),
            thread_id: 77,
            expiry_date: None,
            reason: "flooding the thread".to_string(),
            case_id: None,
            post: None,
        }
    }

    #[test]
    fn test_restriction_permalink() {
        assert_eq!(
            restriction_permalink("https://forum.example.com", &restriction()),
            "https://forum.example.com/threads/77/reply-restrictions/6"
        );
        // a stray trailing slash does not double up
        assert_eq!(
            restriction_permalink("https://forum.example.com/", &restriction()),
            "https://forum.example.com/threads/77/reply-restrictions/6"
        );
    }

    #[test]
    fn test_was_closed() {
        assert!(!was_closed(None));
        assert!(!was_closed(Some(CaseState::Open)));
        assert!(!was_closed(Some(CaseState::Assigned)));
        assert!(was_closed(Some(CaseState::Resolved)));
        assert!(was_closed(Some(CaseState::Rejected)));
    }

    #[tokio::test]
    async fn test_restriction_defaults_target_the_user() {
        let now = Utc::now();
        let pool = crate::cases::test_support::memory_pool().await;
        let mut log = PendingCaseLog::new(OperationKind::New, now);

        let attachment = defaults_for_restriction(&pool, &ctx(), &restriction(), &mut log, now)
            .await
            .unwrap();

        assert!(matches!(attachment, Some(CaseAttachment::Opened(_))));
        assert_eq!(log.content_kind, ContentKind::User);
        assert_eq!(log.content_id, 10);
        assert_eq!(log.content_title, "banned_user");
        assert_eq!(log.title, REPLY_RESTRICTED_TITLE);
        assert_eq!(log.warning_user_id, 2);
        assert_eq!(log.reply_ban_thread_id, Some(77));
        assert_eq!(log.reply_ban_post_id, None);
        assert!(log.notes.starts_with("https://forum.example.com/threads/77/"));
        assert!(log.notes.ends_with("\nflooding the thread"));
    }

    #[tokio::test]
    async fn test_post_scope_switches_content_identity() {
        let now = Utc::now();
        let pool = crate::cases::test_support::memory_pool().await;
        let mut log = PendingCaseLog::new(OperationKind::New, now);

        let mut restriction = restriction();
        restriction.post = Some(RestrictedPost {
            post_id: 400,
            thread_title: "Broken widgets".to_string(),
            case_id: None,
        });

        defaults_for_restriction(&pool, &ctx(), &restriction, &mut log, now)
            .await
            .unwrap();

        assert_eq!(log.content_kind, ContentKind::Post);
        assert_eq!(log.content_id, 400);
        assert_eq!(log.content_title, "Post in thread \"Broken widgets\"");
        assert_eq!(log.reply_ban_post_id, Some(400));
    }

    #[tokio::test]
    async fn test_expiry_flag_is_literal_future_comparison() {
        let now = Utc::now();
        let pool = crate::cases::test_support::memory_pool().await;

        // The flag reads as "expiry is in the future", not "already
        // expired": a restriction with time left is flagged, a lapsed or
        // permanent one is not.
        let cases = [
            (Some(now + Duration::days(3)), true),
            (Some(now - Duration::days(3)), false),
            (None, false),
        ];
        for (expiry_date, expected) in cases {
            let mut log = PendingCaseLog::new(OperationKind::New, now);
            let mut restriction = restriction();
            restriction.expiry_date = expiry_date;
            defaults_for_restriction(&pool, &ctx(), &restriction, &mut log, now)
                .await
                .unwrap();
            assert_eq!(log.is_expired, expected, "expiry {:?}", expiry_date);
        }
    }
}
