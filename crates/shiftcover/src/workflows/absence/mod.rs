//! Absence-driven replacement engine.
//!
//! A provider declares an unavailability window; approval enumerates the
//! bookings that window invalidates and opens one replacement record per
//! booking. Each record is owned by the state machine in `state`, ranked
//! against substitute candidates by `search` and `matching`, and driven to a
//! terminal outcome by the workflow facade in `service` together with the
//! periodic sweep in `sweep`.

pub mod domain;
pub(crate) mod geo;
pub(crate) mod matching;
pub mod repository;
pub mod router;
pub mod search;
pub mod service;
pub mod state;
pub mod sweep;

#[cfg(test)]
mod tests;

pub use domain::{
    Absence, AbsenceId, AbsenceStatus, AbsenceType, Booking, BookingId, BookingStatus, ClientId,
    GeoPoint, Provider, ProviderId, Replacement, ReplacementId, ReplacementPriority,
    ReplacementStatus, ReplacementType, ServiceCategory, StaffId, AFFECTED_BOOKING_STATUSES,
    REASON_ABSENCE_CANCELLED, REASON_NO_CANDIDATE,
};
pub use matching::{GeoMatcher, MatchingConfig};
pub use repository::{
    AbsenceRepository, AbsenceStatusView, BookingStore, NotificationDispatcher, NoticeKind,
    NoticeRecipient, ProviderDirectory, ReplacementNotice, ReplacementRepository,
    ReplacementStatusView, RepositoryError, NotificationError,
};
pub use router::absence_router;
pub use search::{AssignmentOutcome, AssignmentResult, RankedCandidate, ReplacementSearch};
pub use service::{AbsenceWorkflowError, AbsenceWorkflowService};
pub use state::{
    ClientNotice, ReplacementCommand, ReplacementStateMachine, SideEffect, TransitionError,
    TransitionOutcome,
};
pub use sweep::{SweepReport, SweepRunner};
