use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use super::domain::{
    Booking, BookingStatus, Provider, ProviderId, Replacement, ReplacementId, ReplacementStatus,
    REASON_NO_CANDIDATE,
};
use super::geo;
use super::matching::{GeoMatcher, MatchingConfig};
use super::repository::{BookingStore, ProviderDirectory, ReplacementRepository, RepositoryError};
use super::state::{ReplacementCommand, ReplacementStateMachine, SideEffect};
use crate::config::EngineConfig;

/// One candidate surviving eligibility and availability checks, carrying the
/// signals the ranking order is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub provider: Provider,
    pub score: u8,
    pub distance_km: f64,
    pub week_load: usize,
}

/// What a single search attempt did to the replacement record.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    /// Top candidate attached, client notified next.
    Proposed(Replacement),
    /// No candidate this round; the record stays in the search loop.
    StillSearching(Replacement),
    /// Attempt cap reached; closed as `no_candidate`.
    Exhausted(Replacement),
    /// The record was already proposed, accepted, confirmed, or terminal.
    Unchanged(Replacement),
    /// A concurrent writer closed the record first; this attempt's result
    /// was thrown away without touching anything.
    Discarded,
}

/// Outcome of an attempt plus the side-effect intents its transition
/// emitted. The workflow service executes the intents; the search never
/// performs notification or booking I/O itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentResult {
    pub outcome: AssignmentOutcome,
    pub effects: Vec<SideEffect>,
}

impl AssignmentResult {
    fn untouched(outcome: AssignmentOutcome) -> Self {
        Self {
            outcome,
            effects: Vec::new(),
        }
    }
}

/// Ranks substitutes for one affected booking and drives bounded,
/// re-invocable assignment attempts against the replacement repository.
pub struct ReplacementSearch<R, B, P> {
    replacements: Arc<R>,
    bookings: Arc<B>,
    directory: Arc<P>,
    matcher: GeoMatcher,
    engine: EngineConfig,
}

impl<R, B, P> ReplacementSearch<R, B, P>
where
    R: ReplacementRepository,
    B: BookingStore,
    P: ProviderDirectory,
{
    pub fn new(
        replacements: Arc<R>,
        bookings: Arc<B>,
        directory: Arc<P>,
        matching: MatchingConfig,
        engine: EngineConfig,
    ) -> Self {
        Self {
            replacements,
            bookings,
            directory,
            matcher: GeoMatcher::new(matching),
            engine,
        }
    }

    pub fn matcher(&self) -> &GeoMatcher {
        &self.matcher
    }

    /// Eligible, available candidates for the booking, best match first.
    /// Ties on score break toward higher rating, then toward the lighter
    /// schedule that week.
    pub fn find_candidates(
        &self,
        booking: &Booking,
        excluding: &[ProviderId],
        max_results: usize,
    ) -> Result<Vec<RankedCandidate>, RepositoryError> {
        let pool = self.directory.find_eligible(&booking.category, excluding)?;
        let (week_start, week_end) = week_bounds(booking.scheduled_at);

        let mut ranked = Vec::new();
        for provider in pool {
            if !self.matcher.eligible(booking, &provider) {
                continue;
            }
            if !self.directory.is_available(
                &provider.id,
                booking.scheduled_at,
                booking.duration_minutes,
            )? {
                continue;
            }

            let week_load = self
                .bookings
                .find_in_window(
                    &provider.id,
                    week_start,
                    week_end,
                    &[
                        BookingStatus::Confirmed,
                        BookingStatus::Scheduled,
                        BookingStatus::InProgress,
                    ],
                )?
                .len();

            let score = self.matcher.score(booking, &provider);
            let distance_km = geo::distance_km(booking.location, provider.location);
            ranked.push(RankedCandidate {
                provider,
                score,
                distance_km,
                week_load,
            });
        }

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.provider.rating.total_cmp(&a.provider.rating))
                .then_with(|| a.week_load.cmp(&b.week_load))
                .then_with(|| a.provider.id.cmp(&b.provider.id))
        });
        ranked.truncate(max_results);

        debug!(
            booking = %booking.id,
            candidates = ranked.len(),
            "candidate ranking complete"
        );

        Ok(ranked)
    }

    /// Run one search attempt for the replacement. Safe to invoke repeatedly:
    /// records already holding a proposal (or further along, or terminal)
    /// come back `Unchanged` with the same score and attempt count. Writes go
    /// through the repository's version check; when a concurrent cancellation
    /// wins the race the attempt's result is discarded, not forced over it.
    pub fn attempt_assignment(
        &self,
        id: &ReplacementId,
        now: NaiveDateTime,
    ) -> Result<AssignmentResult, RepositoryError> {
        let mut record = self
            .replacements
            .fetch(id)?
            .ok_or(RepositoryError::NotFound)?;

        // One automatic retry after a version conflict, then surface it.
        for attempt in 0..2 {
            match self.try_attempt(&record, now)? {
                TryAttempt::Done(result) => return Ok(result),
                TryAttempt::Conflict => {
                    let reloaded = self
                        .replacements
                        .fetch(id)?
                        .ok_or(RepositoryError::NotFound)?;
                    if reloaded.is_terminal() {
                        // Lost the race to a cancellation; drop our result.
                        warn!(replacement = %id, "discarding search result for closed replacement");
                        return Ok(AssignmentResult::untouched(AssignmentOutcome::Discarded));
                    }
                    if attempt == 1 {
                        return Err(RepositoryError::VersionConflict {
                            expected: record.version,
                            found: reloaded.version,
                        });
                    }
                    record = reloaded;
                }
            }
        }

        unreachable!("attempt loop returns within two iterations")
    }

    fn try_attempt(
        &self,
        record: &Replacement,
        now: NaiveDateTime,
    ) -> Result<TryAttempt, RepositoryError> {
        if record.is_terminal()
            || matches!(
                record.status,
                ReplacementStatus::Proposed
                    | ReplacementStatus::Accepted
                    | ReplacementStatus::Confirmed
            )
        {
            return Ok(TryAttempt::Done(AssignmentResult::untouched(
                AssignmentOutcome::Unchanged(record.clone()),
            )));
        }

        let expected_version = record.version;

        // Pending records enter the search loop as part of the same write.
        let mut current = record.clone();
        if current.status == ReplacementStatus::Pending {
            current = ReplacementStateMachine::apply(&current, ReplacementCommand::BeginSearch, now)
                .map_err(|err| RepositoryError::Unavailable(err.to_string()))?
                .replacement;
        }

        let booking = self
            .bookings
            .fetch(&current.booking)?
            .ok_or(RepositoryError::NotFound)?;

        let mut excluding = Vec::with_capacity(current.excluded_providers.len() + 1);
        excluding.push(current.original_provider.clone());
        excluding.extend(current.excluded_providers.iter().cloned());

        let candidates = self.find_candidates(&booking, &excluding, self.engine.max_candidates)?;
        let attempts_after = current.search_attempts + 1;

        let (mut next, effects, kind) = if let Some(top) = candidates.first() {
            let outcome = ReplacementStateMachine::apply(
                &current,
                ReplacementCommand::Propose {
                    candidate: top.provider.id.clone(),
                    score: top.score,
                },
                now,
            )
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
            (outcome.replacement, outcome.effects, Written::Proposed)
        } else if attempts_after >= self.engine.search_attempt_cap {
            let outcome = ReplacementStateMachine::apply(
                &current,
                ReplacementCommand::Cancel {
                    reason: REASON_NO_CANDIDATE.to_string(),
                },
                now,
            )
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
            (outcome.replacement, outcome.effects, Written::Exhausted)
        } else {
            let mut next = current;
            next.version += 1;
            (next, Vec::new(), Written::StillSearching)
        };
        next.search_attempts = attempts_after;

        match self.replacements.update(next.clone(), expected_version) {
            Ok(()) => Ok(TryAttempt::Done(AssignmentResult {
                outcome: match kind {
                    Written::Proposed => AssignmentOutcome::Proposed(next),
                    Written::Exhausted => AssignmentOutcome::Exhausted(next),
                    Written::StillSearching => AssignmentOutcome::StillSearching(next),
                },
                effects,
            })),
            Err(RepositoryError::VersionConflict { .. }) => Ok(TryAttempt::Conflict),
            Err(other) => Err(other),
        }
    }
}

enum TryAttempt {
    Done(AssignmentResult),
    Conflict,
}

enum Written {
    Proposed,
    Exhausted,
    StillSearching,
}

/// Monday-through-Sunday bounds of the week holding the timestamp, used for
/// the load-balancing tie break.
fn week_bounds(at: NaiveDateTime) -> (NaiveDate, NaiveDate) {
    let date = at.date();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}
