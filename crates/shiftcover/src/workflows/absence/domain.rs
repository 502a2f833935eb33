use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for declared absences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbsenceId(pub String);

/// Identifier wrapper for replacement workflow records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplacementId(pub String);

/// Identifier wrapper for bookings held in the external booking store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingId(pub String);

/// Identifier wrapper for field service providers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

/// Identifier wrapper for booking clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);

/// Identifier wrapper for back-office staff acting as absence approvers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaffId(pub String);

impl fmt::Display for AbsenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ReplacementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service category offered by providers and requested by bookings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceCategory(pub String);

/// Latitude/longitude pair used by the matcher's distance checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceType {
    Leave,
    Illness,
    Emergency,
    Training,
    Personal,
    Other,
}

impl AbsenceType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Leave => "leave",
            Self::Illness => "illness",
            Self::Emergency => "emergency",
            Self::Training => "training",
            Self::Personal => "personal",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Active,
}

impl AbsenceStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Active => "active",
        }
    }

    /// Rejected and cancelled absences accept no further work.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }
}

/// A declared unavailability window for a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absence {
    pub id: AbsenceId,
    pub provider: ProviderId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub kind: AbsenceType,
    pub status: AbsenceStatus,
    pub reason: String,
    pub requires_replacement: bool,
    pub affected_bookings_count: u32,
    pub replacements_found_count: u32,
    pub approver: Option<StaffId>,
    pub approved_at: Option<NaiveDateTime>,
    pub rejected_at: Option<NaiveDateTime>,
    pub rejection_reason: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancel_reason: Option<String>,
}

impl Absence {
    /// The window is inclusive on both ends.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.end_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementType {
    Absence,
    Emergency,
    Unavailability,
    Quality,
    ClientRequest,
}

impl ReplacementType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Absence => "absence",
            Self::Emergency => "emergency",
            Self::Unavailability => "unavailability",
            Self::Quality => "quality",
            Self::ClientRequest => "client_request",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl ReplacementPriority {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementStatus {
    Pending,
    Searching,
    Proposed,
    Accepted,
    Confirmed,
    Rejected,
    Declined,
    Cancelled,
    Completed,
}

impl ReplacementStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// No transition leaves a terminal status.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Declined | Self::Cancelled | Self::Completed
        )
    }
}

/// Cancellation reason recorded when search attempts are exhausted.
pub const REASON_NO_CANDIDATE: &str = "no_candidate";

/// Cancellation reason recorded when the owning absence is withdrawn.
pub const REASON_ABSENCE_CANCELLED: &str = "absence_cancelled";

/// The workflow record tracking substitution of one booking's provider.
///
/// Holds foreign-key references only; related aggregates are loaded through
/// the repositories, never through back-pointers. `version` backs the
/// compare-and-swap write discipline that keeps concurrent search attempts
/// and cancellations from clobbering each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replacement {
    pub id: ReplacementId,
    pub absence: AbsenceId,
    pub booking: BookingId,
    pub original_provider: ProviderId,
    pub substitute_provider: Option<ProviderId>,
    pub reason: String,
    pub kind: ReplacementType,
    pub status: ReplacementStatus,
    pub priority: ReplacementPriority,
    pub matching_score: Option<u8>,
    pub search_attempts: u32,
    /// Providers already tried for this booking; a successor search skips them.
    pub excluded_providers: Vec<ProviderId>,
    /// The booking status to restore when the replacement is cancelled
    /// without a confirmed substitute.
    pub booking_prior_status: BookingStatus,
    pub cancel_reason: Option<String>,
    pub requested_at: NaiveDateTime,
    pub proposed_at: Option<NaiveDateTime>,
    pub accepted_at: Option<NaiveDateTime>,
    pub confirmed_at: Option<NaiveDateTime>,
    pub rejected_at: Option<NaiveDateTime>,
    pub declined_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub client_notified_at: Option<NaiveDateTime>,
    pub substitute_notified_at: Option<NaiveDateTime>,
    pub version: u64,
}

impl Replacement {
    pub fn new(
        id: ReplacementId,
        absence: AbsenceId,
        booking: &Booking,
        reason: String,
        requested_at: NaiveDateTime,
    ) -> Self {
        Self {
            id,
            absence,
            booking: booking.id.clone(),
            original_provider: booking.provider.clone(),
            substitute_provider: None,
            reason,
            kind: ReplacementType::Absence,
            status: ReplacementStatus::Pending,
            priority: ReplacementPriority::Normal,
            matching_score: None,
            search_attempts: 0,
            excluded_providers: Vec::new(),
            booking_prior_status: booking.status,
            cancel_reason: None,
            requested_at,
            proposed_at: None,
            accepted_at: None,
            confirmed_at: None,
            rejected_at: None,
            declined_at: None,
            cancelled_at: None,
            completed_at: None,
            client_notified_at: None,
            substitute_notified_at: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Scheduled,
    Confirmed,
    InProgress,
    ReplacementPending,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::ReplacementPending => "replacement_pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Statuses an approved absence invalidates.
pub const AFFECTED_BOOKING_STATUSES: [BookingStatus; 3] = [
    BookingStatus::Confirmed,
    BookingStatus::Scheduled,
    BookingStatus::InProgress,
];

/// Snapshot of a booking as held by the external booking store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub client: ClientId,
    pub provider: ProviderId,
    pub category: ServiceCategory,
    pub location: GeoPoint,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub amount_cents: u32,
}

/// Directory snapshot of a provider evaluated as a substitution candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub categories: Vec<ServiceCategory>,
    pub location: GeoPoint,
    pub service_radius_km: f64,
    pub approved: bool,
    pub active: bool,
    /// Platform rating, 0.0 through 5.0.
    pub rating: f32,
    /// Completed bookings per category, the matcher's experience signal.
    pub completed_by_category: BTreeMap<ServiceCategory, u32>,
}

impl Provider {
    pub fn offers(&self, category: &ServiceCategory) -> bool {
        self.categories.contains(category)
    }

    pub fn completed_in(&self, category: &ServiceCategory) -> u32 {
        self.completed_by_category
            .get(category)
            .copied()
            .unwrap_or(0)
    }
}
