use chrono::NaiveDateTime;

use super::domain::{BookingId, BookingStatus, ProviderId, Replacement, ReplacementStatus};

/// Commands accepted by the replacement state machine. Each maps to exactly
/// one target status; the machine validates the source status.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplacementCommand {
    /// Take a pending record into the search loop.
    BeginSearch,
    /// Attach the top-ranked candidate and await the client's answer.
    Propose { candidate: ProviderId, score: u8 },
    /// Client accepted the proposed substitute.
    Accept,
    /// Lock the substitute in and hand the booking over.
    Confirm,
    /// Substitute backed out after the client accepted.
    Decline,
    /// Client turned the proposed substitute down.
    Reject,
    /// Close the record without a substitute.
    Cancel { reason: String },
    /// The substituted booking was carried out.
    Complete,
    /// Confirmation-time availability check failed; resume searching.
    RevertToSearch,
}

impl ReplacementCommand {
    const fn target(&self) -> ReplacementStatus {
        match self {
            Self::BeginSearch | Self::RevertToSearch => ReplacementStatus::Searching,
            Self::Propose { .. } => ReplacementStatus::Proposed,
            Self::Accept => ReplacementStatus::Accepted,
            Self::Confirm => ReplacementStatus::Confirmed,
            Self::Decline => ReplacementStatus::Declined,
            Self::Reject => ReplacementStatus::Rejected,
            Self::Cancel { .. } => ReplacementStatus::Cancelled,
            Self::Complete => ReplacementStatus::Completed,
        }
    }
}

/// Side effects a transition asks the caller to carry out. The machine never
/// performs I/O; the workflow service executes these after the record write
/// lands.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    NotifyClient {
        booking: BookingId,
        notice: ClientNotice,
    },
    NotifySubstitute {
        provider: ProviderId,
        booking: BookingId,
    },
    /// Hand the booking to the substitute and mark it confirmed again.
    AssignBookingProvider {
        booking: BookingId,
        provider: ProviderId,
    },
    /// Put the booking back the way the replacement found it.
    RestoreBooking {
        booking: BookingId,
        provider: ProviderId,
        status: BookingStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientNotice {
    SubstituteProposed,
    SubstituteConfirmed,
    SubstitutionClosed,
}

impl ClientNotice {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SubstituteProposed => "substitute_proposed",
            Self::SubstituteConfirmed => "substitute_confirmed",
            Self::SubstitutionClosed => "substitution_closed",
        }
    }
}

/// Result of applying a command: the successor record (version bumped when
/// anything changed) plus the side-effect intents the transition emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub replacement: Replacement,
    pub effects: Vec<SideEffect>,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid replacement transition {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("cannot confirm a replacement without an assigned substitute")]
    MissingSubstitute,
}

const fn allowed(from: ReplacementStatus, to: ReplacementStatus) -> bool {
    use ReplacementStatus::*;
    matches!(
        (from, to),
        (Pending, Searching)
            | (Pending, Cancelled)
            | (Searching, Proposed)
            | (Searching, Cancelled)
            | (Proposed, Accepted)
            | (Proposed, Rejected)
            | (Proposed, Cancelled)
            | (Accepted, Confirmed)
            | (Accepted, Declined)
            | (Accepted, Searching)
            | (Accepted, Cancelled)
            | (Confirmed, Completed)
            | (Confirmed, Cancelled)
    )
}

/// Sole owner of replacement status. Pure: takes the current record, returns
/// the successor and the intents, touches nothing else.
pub struct ReplacementStateMachine;

impl ReplacementStateMachine {
    pub fn apply(
        record: &Replacement,
        command: ReplacementCommand,
        now: NaiveDateTime,
    ) -> Result<TransitionOutcome, TransitionError> {
        let from = record.status;
        let to = command.target();

        // Re-delivery of an applied transition is a no-op, which keeps every
        // operation idempotent under retries and duplicate dispatch.
        if from == to {
            return Ok(TransitionOutcome {
                replacement: record.clone(),
                effects: Vec::new(),
                changed: false,
            });
        }

        if !allowed(from, to) {
            return Err(TransitionError::InvalidTransition {
                from: from.label(),
                to: to.label(),
            });
        }

        if matches!(command, ReplacementCommand::Confirm) && record.substitute_provider.is_none() {
            return Err(TransitionError::MissingSubstitute);
        }

        let mut next = record.clone();
        next.status = to;
        next.version += 1;

        let mut effects = Vec::new();

        match command {
            ReplacementCommand::BeginSearch => {}
            ReplacementCommand::RevertToSearch => {
                // The accepted substitute turned out to be booked elsewhere;
                // exclude them from the re-run.
                if let Some(substitute) = next.substitute_provider.take() {
                    if !next.excluded_providers.contains(&substitute) {
                        next.excluded_providers.push(substitute);
                    }
                }
                next.matching_score = None;
            }
            ReplacementCommand::Propose { candidate, score } => {
                next.substitute_provider = Some(candidate);
                next.matching_score = Some(score);
                next.proposed_at.get_or_insert(now);
                effects.push(SideEffect::NotifyClient {
                    booking: next.booking.clone(),
                    notice: ClientNotice::SubstituteProposed,
                });
            }
            ReplacementCommand::Accept => {
                next.accepted_at.get_or_insert(now);
            }
            ReplacementCommand::Confirm => {
                next.confirmed_at.get_or_insert(now);
                let substitute = next
                    .substitute_provider
                    .clone()
                    .ok_or(TransitionError::MissingSubstitute)?;
                effects.push(SideEffect::NotifyClient {
                    booking: next.booking.clone(),
                    notice: ClientNotice::SubstituteConfirmed,
                });
                effects.push(SideEffect::NotifySubstitute {
                    provider: substitute.clone(),
                    booking: next.booking.clone(),
                });
                effects.push(SideEffect::AssignBookingProvider {
                    booking: next.booking.clone(),
                    provider: substitute,
                });
            }
            ReplacementCommand::Decline => {
                next.declined_at.get_or_insert(now);
                effects.push(SideEffect::NotifyClient {
                    booking: next.booking.clone(),
                    notice: ClientNotice::SubstitutionClosed,
                });
            }
            ReplacementCommand::Reject => {
                next.rejected_at.get_or_insert(now);
            }
            ReplacementCommand::Cancel { reason } => {
                next.cancelled_at.get_or_insert(now);
                if next.cancel_reason.is_none() {
                    next.cancel_reason = Some(reason);
                }
                effects.push(SideEffect::NotifyClient {
                    booking: next.booking.clone(),
                    notice: ClientNotice::SubstitutionClosed,
                });
                effects.push(SideEffect::RestoreBooking {
                    booking: next.booking.clone(),
                    provider: next.original_provider.clone(),
                    status: next.booking_prior_status,
                });
            }
            ReplacementCommand::Complete => {
                next.completed_at.get_or_insert(now);
            }
        }

        Ok(TransitionOutcome {
            replacement: next,
            effects,
            changed: true,
        })
    }
}
