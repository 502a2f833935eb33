use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::ReplacementStatus;
use super::repository::{
    AbsenceRepository, BookingStore, NotificationDispatcher, ProviderDirectory,
    ReplacementRepository,
};
use super::search::AssignmentOutcome;
use super::service::{AbsenceWorkflowError, AbsenceWorkflowService};

/// Tally of one sweep pass, rendered by the CLI and the logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Search attempts run against pending or searching records.
    pub retried: u32,
    /// Attempts that attached a candidate this pass.
    pub proposed: u32,
    /// Records closed as `no_candidate` this pass.
    pub exhausted: u32,
    /// Stale proposals auto-rejected and re-opened for search.
    pub escalated: u32,
}

/// Periodic companion to the synchronous workflow entry points: retries
/// replacements stuck in the search loop and escalates proposals the client
/// never answered. Every write still goes through the state machine and the
/// version check, so sweeping concurrently with API traffic is safe.
pub struct SweepRunner<A, R, B, P, N> {
    service: Arc<AbsenceWorkflowService<A, R, B, P, N>>,
}

impl<A, R, B, P, N> SweepRunner<A, R, B, P, N>
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(service: Arc<AbsenceWorkflowService<A, R, B, P, N>>) -> Self {
        Self { service }
    }

    /// One full pass. Individual records that fail keep the sweep moving;
    /// their errors are logged and the next pass picks them up again.
    pub fn run_once(&self, now: NaiveDateTime) -> Result<SweepReport, AbsenceWorkflowError> {
        let mut report = SweepReport::default();

        let mut due = self
            .service
            .replacements_with_status(ReplacementStatus::Pending)?;
        due.extend(
            self.service
                .replacements_with_status(ReplacementStatus::Searching)?,
        );

        for record in due {
            match self.service.attempt_assignment(&record.id, now) {
                Ok(AssignmentOutcome::Proposed(_)) => {
                    report.retried += 1;
                    report.proposed += 1;
                }
                Ok(AssignmentOutcome::StillSearching(_)) => report.retried += 1,
                Ok(AssignmentOutcome::Exhausted(_)) => {
                    report.retried += 1;
                    report.exhausted += 1;
                }
                Ok(AssignmentOutcome::Unchanged(_)) | Ok(AssignmentOutcome::Discarded) => {}
                Err(err) => {
                    warn!(replacement = %record.id, error = %err, "sweep retry failed");
                }
            }
        }

        let timeout = Duration::hours(self.service.engine_config().proposal_timeout_hours);
        let cutoff = now - timeout;
        let proposed = self
            .service
            .replacements_with_status(ReplacementStatus::Proposed)?;

        for record in proposed {
            let stale = record
                .proposed_at
                .map(|at| at <= cutoff)
                .unwrap_or(false);
            if !stale {
                continue;
            }

            if let Err(err) = self.service.reject_proposal(&record.id, now) {
                warn!(replacement = %record.id, error = %err, "stale proposal auto-reject failed");
                continue;
            }
            match self.service.trigger_search(&record.id, now) {
                Ok(_) => report.escalated += 1,
                Err(err) => {
                    warn!(replacement = %record.id, error = %err, "stale proposal re-search failed");
                }
            }
        }

        info!(
            retried = report.retried,
            proposed = report.proposed,
            exhausted = report.exhausted,
            escalated = report.escalated,
            "sweep pass complete"
        );
        Ok(report)
    }
}
