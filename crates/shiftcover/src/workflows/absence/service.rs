use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use super::domain::{
    Absence, AbsenceId, AbsenceStatus, AbsenceType, BookingStatus, ProviderId, Replacement,
    ReplacementId, ReplacementStatus, StaffId, REASON_ABSENCE_CANCELLED,
    AFFECTED_BOOKING_STATUSES,
};
use super::matching::MatchingConfig;
use super::repository::{
    AbsenceRepository, BookingStore, NotificationDispatcher, NoticeKind, NoticeRecipient,
    ProviderDirectory, ReplacementNotice, ReplacementRepository, RepositoryError,
};
use super::search::{AssignmentOutcome, ReplacementSearch};
use super::state::{
    ClientNotice, ReplacementCommand, ReplacementStateMachine, SideEffect, TransitionError,
};
use crate::config::EngineConfig;

/// Error raised by the absence workflow facade.
#[derive(Debug, thiserror::Error)]
pub enum AbsenceWorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{operation} is not allowed while the record is {status}")]
    State {
        operation: &'static str,
        status: &'static str,
    },
    #[error("replacement {0} was modified concurrently; retry the operation")]
    ConcurrentModification(ReplacementId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

static ABSENCE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static REPLACEMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_absence_id() -> AbsenceId {
    let id = ABSENCE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AbsenceId(format!("abs-{id:06}"))
}

fn next_replacement_id() -> ReplacementId {
    let id = REPLACEMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ReplacementId(format!("rep-{id:06}"))
}

/// Top-level orchestrator for declared absences and the replacements they
/// spawn. Sole writer of absence aggregate counters; every replacement write
/// funnels through the state machine and the repository's version check.
pub struct AbsenceWorkflowService<A, R, B, P, N> {
    absences: Arc<A>,
    replacements: Arc<R>,
    bookings: Arc<B>,
    directory: Arc<P>,
    notifier: Arc<N>,
    search: ReplacementSearch<R, B, P>,
    engine: EngineConfig,
}

impl<A, R, B, P, N> AbsenceWorkflowService<A, R, B, P, N>
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(
        absences: Arc<A>,
        replacements: Arc<R>,
        bookings: Arc<B>,
        directory: Arc<P>,
        notifier: Arc<N>,
        matching: MatchingConfig,
        engine: EngineConfig,
    ) -> Self {
        let search = ReplacementSearch::new(
            replacements.clone(),
            bookings.clone(),
            directory.clone(),
            matching,
            engine.clone(),
        );

        Self {
            absences,
            replacements,
            bookings,
            directory,
            notifier,
            search,
            engine,
        }
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn search(&self) -> &ReplacementSearch<R, B, P> {
        &self.search
    }

    /// Record a provider's unavailability window. Affected bookings are not
    /// computed yet; plans can still be rejected.
    pub fn declare_absence(
        &self,
        provider: ProviderId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        kind: AbsenceType,
        reason: String,
    ) -> Result<Absence, AbsenceWorkflowError> {
        if end_date < start_date {
            return Err(AbsenceWorkflowError::Validation(format!(
                "end date {end_date} precedes start date {start_date}"
            )));
        }

        let existing = self.absences.find_for_provider(&provider)?;
        if let Some(overlap) = existing.iter().find(|absence| {
            !absence.status.is_terminal() && absence.overlaps(start_date, end_date)
        }) {
            return Err(AbsenceWorkflowError::Conflict(format!(
                "absence {} already covers part of {start_date}..{end_date}",
                overlap.id
            )));
        }

        let absence = Absence {
            id: next_absence_id(),
            provider,
            start_date,
            end_date,
            kind,
            status: AbsenceStatus::Pending,
            reason,
            requires_replacement: false,
            affected_bookings_count: 0,
            replacements_found_count: 0,
            approver: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_at: None,
            cancel_reason: None,
        };

        let stored = self.absences.insert(absence)?;
        info!(absence = %stored.id, provider = %stored.provider, "absence declared");
        Ok(stored)
    }

    /// Approve a pending absence: enumerate the bookings its window
    /// invalidates, open one replacement per booking, and queue each for
    /// search. Activates immediately when the window is already open.
    pub fn approve(
        &self,
        id: &AbsenceId,
        approver: StaffId,
        now: NaiveDateTime,
    ) -> Result<Absence, AbsenceWorkflowError> {
        let mut absence = self.fetch_absence(id)?;
        if absence.status != AbsenceStatus::Pending {
            return Err(AbsenceWorkflowError::State {
                operation: "approve",
                status: absence.status.label(),
            });
        }

        let affected = self.bookings.find_in_window(
            &absence.provider,
            absence.start_date,
            absence.end_date,
            &AFFECTED_BOOKING_STATUSES,
        )?;

        absence.status = if absence.start_date <= now.date() {
            AbsenceStatus::Active
        } else {
            AbsenceStatus::Approved
        };
        absence.approver = Some(approver);
        absence.approved_at = Some(now);
        absence.affected_bookings_count = affected.len() as u32;
        absence.requires_replacement = !affected.is_empty();
        self.absences.update(absence.clone())?;

        for booking in &affected {
            let replacement = Replacement::new(
                next_replacement_id(),
                absence.id.clone(),
                booking,
                format!("provider absent {}..{}", absence.start_date, absence.end_date),
                now,
            );
            let stored = self.replacements.insert(replacement)?;
            self.bookings
                .update_status(&booking.id, BookingStatus::ReplacementPending, None)?;
            info!(
                absence = %absence.id,
                replacement = %stored.id,
                booking = %booking.id,
                "replacement opened for affected booking"
            );
        }

        info!(
            absence = %absence.id,
            affected = absence.affected_bookings_count,
            "absence approved"
        );
        Ok(absence)
    }

    /// Reject a pending absence. No bookings are touched.
    pub fn reject(
        &self,
        id: &AbsenceId,
        approver: StaffId,
        reason: String,
        now: NaiveDateTime,
    ) -> Result<Absence, AbsenceWorkflowError> {
        let mut absence = self.fetch_absence(id)?;
        if absence.status != AbsenceStatus::Pending {
            return Err(AbsenceWorkflowError::State {
                operation: "reject",
                status: absence.status.label(),
            });
        }

        absence.status = AbsenceStatus::Rejected;
        absence.approver = Some(approver);
        absence.rejected_at = Some(now);
        absence.rejection_reason = Some(reason);
        self.absences.update(absence.clone())?;
        info!(absence = %absence.id, "absence rejected");
        Ok(absence)
    }

    /// Withdraw an absence and cascade-cancel every replacement it owns that
    /// has not reached a terminal state. Bookings without a confirmed
    /// substitute revert to their prior status.
    pub fn cancel(
        &self,
        id: &AbsenceId,
        reason: String,
        now: NaiveDateTime,
    ) -> Result<Absence, AbsenceWorkflowError> {
        let mut absence = self.fetch_absence(id)?;
        if !matches!(
            absence.status,
            AbsenceStatus::Pending | AbsenceStatus::Approved | AbsenceStatus::Active
        ) {
            return Err(AbsenceWorkflowError::State {
                operation: "cancel",
                status: absence.status.label(),
            });
        }

        absence.status = AbsenceStatus::Cancelled;
        absence.cancelled_at = Some(now);
        absence.cancel_reason = Some(reason);
        self.absences.update(absence.clone())?;

        let owned = self.replacements.find_for_absence(&absence.id)?;
        for replacement in owned {
            if replacement.is_terminal() {
                continue;
            }
            let was_confirmed = replacement.status == ReplacementStatus::Confirmed;
            let cascade = self.commit_transition(
                &replacement.id,
                ReplacementCommand::Cancel {
                    reason: REASON_ABSENCE_CANCELLED.to_string(),
                },
                now,
            );
            let (record, effects) = match cascade {
                Ok(outcome) => outcome,
                // A concurrent writer beat the cascade to a terminal state,
                // which is the outcome the cascade wanted anyway.
                Err(AbsenceWorkflowError::Transition(err)) => {
                    warn!(replacement = %replacement.id, error = %err, "cascade found record already closed");
                    continue;
                }
                Err(other) => return Err(other),
            };
            self.execute_effects(&record, &effects, now)?;
            if was_confirmed {
                absence.replacements_found_count =
                    absence.replacements_found_count.saturating_sub(1);
            }
        }
        self.absences.update(absence.clone())?;

        info!(absence = %absence.id, "absence cancelled, replacements cascaded");
        Ok(absence)
    }

    /// Flip an approved absence to active once its window opens.
    pub fn activate(
        &self,
        id: &AbsenceId,
        today: NaiveDate,
    ) -> Result<Absence, AbsenceWorkflowError> {
        let mut absence = self.fetch_absence(id)?;
        if absence.status != AbsenceStatus::Approved {
            return Err(AbsenceWorkflowError::State {
                operation: "activate",
                status: absence.status.label(),
            });
        }
        if absence.start_date > today {
            return Err(AbsenceWorkflowError::Validation(format!(
                "absence window opens {}, not before",
                absence.start_date
            )));
        }

        absence.status = AbsenceStatus::Active;
        self.absences.update(absence.clone())?;
        Ok(absence)
    }

    /// Run one search attempt for the replacement and carry out whatever
    /// side effects the transition produced.
    pub fn attempt_assignment(
        &self,
        id: &ReplacementId,
        now: NaiveDateTime,
    ) -> Result<AssignmentOutcome, AbsenceWorkflowError> {
        let result = self
            .search
            .attempt_assignment(id, now)
            .map_err(|err| self.map_search_error(id, err))?;

        let record = match &result.outcome {
            AssignmentOutcome::Proposed(record)
            | AssignmentOutcome::StillSearching(record)
            | AssignmentOutcome::Exhausted(record)
            | AssignmentOutcome::Unchanged(record) => Some(record.clone()),
            AssignmentOutcome::Discarded => None,
        };
        if let Some(record) = record {
            self.execute_effects(&record, &result.effects, now)?;
        }

        Ok(result.outcome)
    }

    /// Kick off (or retry) the search for a booking's substitute. A terminal
    /// record opens a successor that skips every provider already tried, so
    /// an operator can walk down the ranking after a decline.
    pub fn trigger_search(
        &self,
        id: &ReplacementId,
        now: NaiveDateTime,
    ) -> Result<AssignmentOutcome, AbsenceWorkflowError> {
        let record = self.fetch_replacement(id)?;
        if !record.is_terminal() {
            return self.attempt_assignment(id, now);
        }

        let successor = self.open_successor(&record, now)?;
        self.attempt_assignment(&successor.id, now)
    }

    /// Client accepted the proposed substitute.
    pub fn accept(
        &self,
        id: &ReplacementId,
        now: NaiveDateTime,
    ) -> Result<Replacement, AbsenceWorkflowError> {
        let (record, effects) = self.commit_transition(id, ReplacementCommand::Accept, now)?;
        self.execute_effects(&record, &effects, now)?;
        Ok(record)
    }

    /// Client turned the proposed substitute down. Terminal; a manual
    /// `trigger_search` opens a successor for the next candidate.
    pub fn reject_proposal(
        &self,
        id: &ReplacementId,
        now: NaiveDateTime,
    ) -> Result<Replacement, AbsenceWorkflowError> {
        let (record, effects) = self.commit_transition(id, ReplacementCommand::Reject, now)?;
        self.execute_effects(&record, &effects, now)?;
        Ok(record)
    }

    /// Substitute provider backed out after the client accepted. Terminal.
    pub fn decline(
        &self,
        id: &ReplacementId,
        now: NaiveDateTime,
    ) -> Result<Replacement, AbsenceWorkflowError> {
        let (record, effects) = self.commit_transition(id, ReplacementCommand::Decline, now)?;
        self.execute_effects(&record, &effects, now)?;
        Ok(record)
    }

    /// Lock the accepted substitute in. The provider's calendar is checked
    /// again here; an answer from search time is stale by now. If the
    /// substitute was booked elsewhere in the interim the record goes back
    /// to `searching` instead.
    pub fn confirm(
        &self,
        id: &ReplacementId,
        now: NaiveDateTime,
    ) -> Result<Replacement, AbsenceWorkflowError> {
        let record = self.fetch_replacement(id)?;
        if record.status == ReplacementStatus::Confirmed {
            return Ok(record);
        }

        let substitute = record
            .substitute_provider
            .clone()
            .ok_or(TransitionError::MissingSubstitute)?;
        let booking = self
            .bookings
            .fetch(&record.booking)?
            .ok_or(RepositoryError::NotFound)?;

        let free = self.directory.is_available(
            &substitute,
            booking.scheduled_at,
            booking.duration_minutes,
        )?;
        if !free {
            warn!(
                replacement = %id,
                substitute = %substitute,
                "substitute no longer available at confirmation; resuming search"
            );
            let (reverted, effects) =
                self.commit_transition(id, ReplacementCommand::RevertToSearch, now)?;
            self.execute_effects(&reverted, &effects, now)?;
            return Ok(reverted);
        }

        let (record, effects) = self.commit_transition(id, ReplacementCommand::Confirm, now)?;
        self.execute_effects(&record, &effects, now)?;

        let mut absence = self.fetch_absence(&record.absence)?;
        absence.replacements_found_count = (absence.replacements_found_count + 1)
            .min(absence.affected_bookings_count);
        self.absences.update(absence)?;

        info!(replacement = %record.id, booking = %record.booking, "substitute confirmed");
        Ok(record)
    }

    /// The substituted booking was carried out.
    pub fn complete(
        &self,
        id: &ReplacementId,
        now: NaiveDateTime,
    ) -> Result<Replacement, AbsenceWorkflowError> {
        let (record, effects) = self.commit_transition(id, ReplacementCommand::Complete, now)?;
        self.execute_effects(&record, &effects, now)?;
        Ok(record)
    }

    /// Close a single replacement without a substitute.
    pub fn cancel_replacement(
        &self,
        id: &ReplacementId,
        reason: String,
        now: NaiveDateTime,
    ) -> Result<Replacement, AbsenceWorkflowError> {
        let before = self.fetch_replacement(id)?;
        let was_confirmed = before.status == ReplacementStatus::Confirmed;
        let (record, effects) =
            self.commit_transition(id, ReplacementCommand::Cancel { reason }, now)?;
        self.execute_effects(&record, &effects, now)?;

        if was_confirmed && record.status == ReplacementStatus::Cancelled {
            let mut absence = self.fetch_absence(&record.absence)?;
            absence.replacements_found_count = absence.replacements_found_count.saturating_sub(1);
            self.absences.update(absence)?;
        }
        Ok(record)
    }

    pub fn absence(&self, id: &AbsenceId) -> Result<Absence, AbsenceWorkflowError> {
        self.fetch_absence(id)
    }

    pub fn replacement(&self, id: &ReplacementId) -> Result<Replacement, AbsenceWorkflowError> {
        self.fetch_replacement(id)
    }

    pub fn replacements_for_absence(
        &self,
        id: &AbsenceId,
    ) -> Result<Vec<Replacement>, AbsenceWorkflowError> {
        Ok(self.replacements.find_for_absence(id)?)
    }

    pub fn replacements_with_status(
        &self,
        status: ReplacementStatus,
    ) -> Result<Vec<Replacement>, AbsenceWorkflowError> {
        Ok(self.replacements.find_with_status(status)?)
    }

    fn fetch_absence(&self, id: &AbsenceId) -> Result<Absence, AbsenceWorkflowError> {
        Ok(self
            .absences
            .fetch(id)?
            .ok_or(RepositoryError::NotFound)?)
    }

    fn fetch_replacement(&self, id: &ReplacementId) -> Result<Replacement, AbsenceWorkflowError> {
        Ok(self
            .replacements
            .fetch(id)?
            .ok_or(RepositoryError::NotFound)?)
    }

    /// Open a fresh replacement for the same booking after the previous one
    /// closed without a substitute, excluding everyone already tried.
    fn open_successor(
        &self,
        predecessor: &Replacement,
        now: NaiveDateTime,
    ) -> Result<Replacement, AbsenceWorkflowError> {
        if matches!(predecessor.status, ReplacementStatus::Completed) {
            return Err(AbsenceWorkflowError::State {
                operation: "retry search",
                status: predecessor.status.label(),
            });
        }
        if let Some(active) = self.replacements.active_for_booking(&predecessor.booking)? {
            return Err(AbsenceWorkflowError::Conflict(format!(
                "booking {} already has active replacement {}",
                predecessor.booking, active.id
            )));
        }
        let absence = self.fetch_absence(&predecessor.absence)?;
        if absence.status.is_terminal() {
            return Err(AbsenceWorkflowError::State {
                operation: "retry search",
                status: absence.status.label(),
            });
        }

        let booking = self
            .bookings
            .fetch(&predecessor.booking)?
            .ok_or(RepositoryError::NotFound)?;

        let mut successor = Replacement::new(
            next_replacement_id(),
            predecessor.absence.clone(),
            &booking,
            predecessor.reason.clone(),
            now,
        );
        // The booking already carries the replacement-pending marker, so the
        // restorable status travels from the predecessor, not the store.
        successor.booking_prior_status = predecessor.booking_prior_status;
        successor.excluded_providers = predecessor.excluded_providers.clone();
        if let Some(tried) = predecessor.substitute_provider.clone() {
            if !successor.excluded_providers.contains(&tried) {
                successor.excluded_providers.push(tried);
            }
        }

        let stored = self.replacements.insert(successor)?;
        info!(
            replacement = %stored.id,
            predecessor = %predecessor.id,
            booking = %stored.booking,
            "successor replacement opened"
        );
        Ok(stored)
    }

    /// Apply one state-machine command under the version check, retrying a
    /// single time after a conflicting writer, as long as the record is
    /// still live.
    fn commit_transition(
        &self,
        id: &ReplacementId,
        command: ReplacementCommand,
        now: NaiveDateTime,
    ) -> Result<(Replacement, Vec<SideEffect>), AbsenceWorkflowError> {
        let mut record = self.fetch_replacement(id)?;

        for attempt in 0..2 {
            let outcome = ReplacementStateMachine::apply(&record, command.clone(), now)?;
            if !outcome.changed {
                return Ok((outcome.replacement, Vec::new()));
            }

            match self
                .replacements
                .update(outcome.replacement.clone(), record.version)
            {
                Ok(()) => return Ok((outcome.replacement, outcome.effects)),
                Err(RepositoryError::VersionConflict { .. }) if attempt == 0 => {
                    record = self.fetch_replacement(id)?;
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    return Err(AbsenceWorkflowError::ConcurrentModification(id.clone()));
                }
                Err(other) => return Err(other.into()),
            }
        }

        unreachable!("transition loop returns within two iterations")
    }

    /// Carry out the intents a transition emitted. Booking writes propagate
    /// failures; notification delivery is best-effort and only logged.
    fn execute_effects(
        &self,
        record: &Replacement,
        effects: &[SideEffect],
        now: NaiveDateTime,
    ) -> Result<(), AbsenceWorkflowError> {
        for effect in effects {
            match effect {
                SideEffect::AssignBookingProvider { booking, provider } => {
                    self.bookings
                        .update_status(booking, BookingStatus::Confirmed, Some(provider))?;
                }
                SideEffect::RestoreBooking {
                    booking,
                    provider,
                    status,
                } => {
                    self.bookings.update_status(booking, *status, Some(provider))?;
                }
                SideEffect::NotifyClient { booking, notice } => {
                    let Some(booking_record) = self.bookings.fetch(booking)? else {
                        warn!(booking = %booking, "skipping client notice for unknown booking");
                        continue;
                    };
                    let kind = match notice {
                        ClientNotice::SubstituteProposed => NoticeKind::SubstituteProposed,
                        ClientNotice::SubstituteConfirmed => NoticeKind::SubstituteConfirmed,
                        ClientNotice::SubstitutionClosed => NoticeKind::SubstitutionClosed,
                    };
                    let mut details = BTreeMap::new();
                    details.insert("status".to_string(), record.status.label().to_string());
                    if let Some(substitute) = &record.substitute_provider {
                        details.insert("substitute".to_string(), substitute.0.clone());
                    }
                    if self.dispatch(ReplacementNotice {
                        recipient: NoticeRecipient::Client(booking_record.client.clone()),
                        kind,
                        replacement: record.id.clone(),
                        booking: booking.clone(),
                        details,
                    }) {
                        self.mark_notified(&record.id, Notified::Client, now);
                    }
                }
                SideEffect::NotifySubstitute { provider, booking } => {
                    let mut details = BTreeMap::new();
                    details.insert("status".to_string(), record.status.label().to_string());
                    if self.dispatch(ReplacementNotice {
                        recipient: NoticeRecipient::Provider(provider.clone()),
                        kind: NoticeKind::SubstituteAssignment,
                        replacement: record.id.clone(),
                        booking: booking.clone(),
                        details,
                    }) {
                        self.mark_notified(&record.id, Notified::Substitute, now);
                    }
                }
            }
        }
        Ok(())
    }

    /// Fire-and-forget dispatch. A delivery failure never unwinds the state
    /// transition that requested it.
    fn dispatch(&self, notice: ReplacementNotice) -> bool {
        match self.notifier.notify(notice) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "notification dispatch failed");
                false
            }
        }
    }

    /// Stamp the notified flag, tolerating racing writers; the flag is
    /// informational and must never fail an operation.
    fn mark_notified(&self, id: &ReplacementId, who: Notified, now: NaiveDateTime) {
        let Ok(Some(mut record)) = self.replacements.fetch(id) else {
            return;
        };
        let slot = match who {
            Notified::Client => &mut record.client_notified_at,
            Notified::Substitute => &mut record.substitute_notified_at,
        };
        if slot.is_some() {
            return;
        }
        *slot = Some(now);
        let expected = record.version;
        record.version += 1;
        if self.replacements.update(record, expected).is_err() {
            warn!(replacement = %id, "skipped notified-flag update after concurrent write");
        }
    }

    fn map_search_error(&self, id: &ReplacementId, err: RepositoryError) -> AbsenceWorkflowError {
        match err {
            RepositoryError::VersionConflict { .. } => {
                AbsenceWorkflowError::ConcurrentModification(id.clone())
            }
            other => other.into(),
        }
    }
}

enum Notified {
    Client,
    Substitute,
}
