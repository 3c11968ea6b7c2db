/// Notification dispatch for case activity
///
/// Runs strictly after the transactional commit; a delivery failure is
/// reported to the caller and never rolls committed case data back.
/// Retry and delivery guarantees belong to whatever implements `Notifier`.
use crate::cases::{Case, CaseNote};
use crate::error::CaseResult;
use async_trait::async_trait;

/// Delivery channel for case activity
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn case_opened(&self, case: &Case, note: &CaseNote) -> CaseResult<()>;

    async fn case_commented(&self, case: &Case, note: &CaseNote) -> CaseResult<()>;
}

/// Notifier for deployments without a delivery channel configured; only
/// writes to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn case_opened(&self, case: &Case, note: &CaseNote) -> CaseResult<()> {
        tracing::info!(
            case_id = case.case_id,
            note_id = note.note_id,
            "no delivery channel configured, logging case-opened notification"
        );
        Ok(())
    }

    async fn case_commented(&self, case: &Case, note: &CaseNote) -> CaseResult<()> {
        tracing::info!(
            case_id = case.case_id,
            note_id = note.note_id,
            "no delivery channel configured, logging case-commented notification"
        );
        Ok(())
    }
}
