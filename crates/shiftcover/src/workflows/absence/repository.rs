use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::domain::{
    Absence, AbsenceId, Booking, BookingId, BookingStatus, ClientId, Provider, ProviderId,
    Replacement, ReplacementId, ReplacementStatus, ServiceCategory,
};

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stale version: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction for absence aggregates.
pub trait AbsenceRepository: Send + Sync {
    fn insert(&self, absence: Absence) -> Result<Absence, RepositoryError>;
    fn update(&self, absence: Absence) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &AbsenceId) -> Result<Option<Absence>, RepositoryError>;
    fn find_for_provider(&self, provider: &ProviderId) -> Result<Vec<Absence>, RepositoryError>;
}

/// Storage abstraction for replacement records.
///
/// `update` is compare-and-swap: the write lands only when the stored
/// version still equals `expected_version`, otherwise `VersionConflict` is
/// returned and nothing is mutated. That check is what upholds the
/// one-active-replacement-per-booking invariant under concurrent writers.
pub trait ReplacementRepository: Send + Sync {
    fn insert(&self, replacement: Replacement) -> Result<Replacement, RepositoryError>;
    fn update(
        &self,
        replacement: Replacement,
        expected_version: u64,
    ) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &ReplacementId) -> Result<Option<Replacement>, RepositoryError>;
    fn find_for_absence(&self, absence: &AbsenceId) -> Result<Vec<Replacement>, RepositoryError>;
    fn find_with_status(
        &self,
        status: ReplacementStatus,
    ) -> Result<Vec<Replacement>, RepositoryError>;
    /// The non-terminal replacement currently holding the booking, if any.
    fn active_for_booking(
        &self,
        booking: &BookingId,
    ) -> Result<Option<Replacement>, RepositoryError>;
}

/// Read/write surface of the external booking store consumed by the engine.
pub trait BookingStore: Send + Sync {
    fn find_in_window(
        &self,
        provider: &ProviderId,
        start: NaiveDate,
        end: NaiveDate,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, RepositoryError>;
    fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;
    /// Transition a booking's status, optionally handing it to a new provider.
    fn update_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
        provider: Option<&ProviderId>,
    ) -> Result<(), RepositoryError>;
}

/// Read surface of the provider directory consumed by candidate search.
pub trait ProviderDirectory: Send + Sync {
    /// Active, approved providers offering the category, minus the excluded
    /// ones. Geographic eligibility stays with the matcher; directories may
    /// prefilter but the matcher's radius check is authoritative.
    fn find_eligible(
        &self,
        category: &ServiceCategory,
        excluding: &[ProviderId],
    ) -> Result<Vec<Provider>, RepositoryError>;
    /// Whether the provider is free at the given start for the given
    /// duration. Consulted again at confirmation time; an earlier answer is
    /// never trusted.
    fn is_available(
        &self,
        provider: &ProviderId,
        at: NaiveDateTime,
        duration_minutes: u32,
    ) -> Result<bool, RepositoryError>;
}

/// Recipient of a replacement notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeRecipient {
    Client(ClientId),
    Provider(ProviderId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    SubstituteProposed,
    SubstituteConfirmed,
    SubstituteAssignment,
    SubstitutionClosed,
}

/// Payload handed to the notification dispatcher. Delivery is best-effort:
/// the engine logs failures and moves on, state transitions never wait on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementNotice {
    pub recipient: NoticeRecipient,
    pub kind: NoticeKind,
    pub replacement: ReplacementId,
    pub booking: BookingId,
    pub details: BTreeMap<String, String>,
}

/// Notification dispatch error. Surfaced to logs only.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Trait describing the outbound notification hook (push, SMS, e-mail
/// adapters live behind it).
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, notice: ReplacementNotice) -> Result<(), NotificationError>;
}

/// Sanitized representation of an absence for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct AbsenceStatusView {
    pub absence_id: AbsenceId,
    pub provider_id: ProviderId,
    pub status: &'static str,
    pub kind: &'static str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub requires_replacement: bool,
    pub affected_bookings: u32,
    pub replacements_found: u32,
}

impl AbsenceStatusView {
    pub fn from_absence(absence: &Absence) -> Self {
        Self {
            absence_id: absence.id.clone(),
            provider_id: absence.provider.clone(),
            status: absence.status.label(),
            kind: absence.kind.label(),
            start_date: absence.start_date,
            end_date: absence.end_date,
            requires_replacement: absence.requires_replacement,
            affected_bookings: absence.affected_bookings_count,
            replacements_found: absence.replacements_found_count,
        }
    }
}

/// Sanitized representation of a replacement for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ReplacementStatusView {
    pub replacement_id: ReplacementId,
    pub booking_id: BookingId,
    pub status: &'static str,
    pub priority: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substitute_provider: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_score: Option<u8>,
    pub search_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl ReplacementStatusView {
    pub fn from_replacement(replacement: &Replacement) -> Self {
        Self {
            replacement_id: replacement.id.clone(),
            booking_id: replacement.booking.clone(),
            status: replacement.status.label(),
            priority: replacement.priority.label(),
            substitute_provider: replacement.substitute_provider.clone(),
            matching_score: replacement.matching_score,
            search_attempts: replacement.search_attempts,
            cancel_reason: replacement.cancel_reason.clone(),
        }
    }
}
