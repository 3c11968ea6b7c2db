/// Sanction sources consumed by the case log creator
///
/// Read-only views of the two moderation actions that feed the audit
/// trail: formal warnings and thread reply restrictions. Both funnel into
/// one workflow through the `Sanction` sum type; the `Loggable` capability
/// covers what the creator needs without re-branching on the variant.
use crate::content::{ContentKind, ContentRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A formal, points-bearing warning issued against a piece of content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormalWarning {
    pub warning_id: i64,
    pub content_kind: ContentKind,
    pub content_id: i64,
    pub content_title: String,
    /// User the warning was issued against
    pub user_id: i64,
    pub warning_date: DateTime<Utc>,
    /// Moderator who issued the warning
    pub warning_user_id: i64,
    pub warning_definition_id: Option<i64>,
    pub title: String,
    pub notes: String,
    pub points: i64,
    /// None means the warning never expires
    pub expiry_date: Option<DateTime<Utc>>,
    pub is_expired: bool,
    /// Extra user groups applied with the warning. Some warning sources
    /// never carry this field; absence is not an error.
    pub extra_user_group_ids: Option<Vec<i64>>,
    /// Live content, when it still exists. Required to open a new case.
    pub content: Option<ContentRef>,
    /// Case already linked to the warned content, if any
    pub case_id: Option<i64>,
}

/// A time-bounded restriction preventing a user from replying in a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRestriction {
    pub restriction_id: i64,
    /// User the restriction applies to
    pub user_id: i64,
    pub username: String,
    pub thread_id: i64,
    /// None means the restriction is permanent
    pub expiry_date: Option<DateTime<Utc>>,
    /// Free-text reason entered by the moderator
    pub reason: String,
    /// Case already linked via the thread or the restricted user, if any
    pub case_id: Option<i64>,
    /// Set when the restriction is scoped to one specific post
    pub post: Option<RestrictedPost>,
}

/// The specific post a reply restriction is scoped to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictedPost {
    pub post_id: i64,
    pub thread_title: String,
    /// Case already linked via this post, if any
    pub case_id: Option<i64>,
}

/// A moderation action that can be snapshotted into a case log
pub trait Loggable {
    /// Identifier used to prefix aggregated validation failures, when the
    /// sanction has one
    fn identifier(&self) -> Option<String>;

    /// User the sanction targets
    fn target_user_id(&self) -> i64;

    /// Case already linked to the sanctioned content, if any
    fn linked_case_id(&self) -> Option<i64>;
}

impl Loggable for FormalWarning {
    fn identifier(&self) -> Option<String> {
        Some(format!("Warning:{}", self.warning_id))
    }

    fn target_user_id(&self) -> i64 {
        self.user_id
    }

    fn linked_case_id(&self) -> Option<i64> {
        self.case_id
    }
}

impl Loggable for ReplyRestriction {
    fn identifier(&self) -> Option<String> {
        None
    }

    fn target_user_id(&self) -> i64 {
        self.user_id
    }

    /// A post-scoped restriction takes its linkage from the post, even
    /// when the post itself has no case.
    fn linked_case_id(&self) -> Option<i64> {
        match &self.post {
            Some(post) => post.case_id,
            None => self.case_id,
        }
    }
}

/// A sanction issued by a moderator, in one of its two forms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Sanction {
    Warning(FormalWarning),
    ReplyRestriction(ReplyRestriction),
}

impl Sanction {
    pub fn as_loggable(&self) -> &dyn Loggable {
        match self {
            Sanction::Warning(warning) => warning,
            Sanction::ReplyRestriction(restriction) => restriction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restriction() -> ReplyRestriction {
        ReplyRestriction {
            restriction_id: 5,
            user_id: 10,
            username: "banned_user".to_string(),
            thread_id: 77,
            expiry_date: None,
            reason: "flooding".to_string(),
            case_id: Some(3),
            post: None,
        }
    }

    #[test]
    fn test_restriction_linkage_prefers_post_scope() {
        let mut r = restriction();
        assert_eq!(r.linked_case_id(), Some(3));

        // post scope replaces the thread-level linkage outright
        r.post = Some(RestrictedPost {
            post_id: 400,
            thread_title: "Thread".to_string(),
            case_id: None,
        });
        assert_eq!(r.linked_case_id(), None);

        r.post.as_mut().unwrap().case_id = Some(9);
        assert_eq!(r.linked_case_id(), Some(9));
    }

    #[test]
    fn test_only_warnings_carry_identifiers() {
        assert!(restriction().identifier().is_none());
    }
}
