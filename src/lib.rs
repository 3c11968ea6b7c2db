/// Casework - moderation case linkage
///
/// Builds immutable audit records (case logs) for moderator sanctions,
/// attaches them to moderation cases by opening a new case or commenting
/// on the existing one, and optionally auto-resolves the case, all inside
/// one transaction. Invoked in-process by a caller that has already
/// resolved the sanction and the policy flags.
pub mod caselog;
pub mod cases;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod logging;
pub mod notify;
pub mod sanctions;

pub use caselog::{
    log_operation, CaseLog, CaseLogCreator, CaseLogManager, OperationKind, PendingCaseLog,
    ResolvePolicy, SanctionContext,
};
pub use cases::{
    Case, CaseCommenter, CaseManager, CaseNote, CaseOpener, CaseState, LinkagePermit, LogLink,
    StagedCase, StagedNote,
};
pub use config::CaseworkConfig;
pub use content::{ContentKind, ContentRef};
pub use error::{CaseError, CaseResult, ValidationError};
pub use notify::{LogNotifier, Notifier};
pub use sanctions::{FormalWarning, Loggable, ReplyRestriction, RestrictedPost, Sanction};
