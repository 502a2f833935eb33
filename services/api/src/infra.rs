use chrono::{Duration, NaiveDate, NaiveDateTime};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use shiftcover::workflows::absence::{
    Absence, AbsenceId, AbsenceRepository, Booking, BookingId, BookingStatus, BookingStore,
    MatchingConfig, NotificationDispatcher, NotificationError, Provider, ProviderDirectory,
    ProviderId, Replacement, ReplacementId, ReplacementNotice, ReplacementRepository,
    ReplacementStatus, RepositoryError, ServiceCategory,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
pub(crate) struct InMemoryAbsenceRepository {
    records: Mutex<HashMap<AbsenceId, Absence>>,
}

impl AbsenceRepository for InMemoryAbsenceRepository {
    fn insert(&self, absence: Absence) -> Result<Absence, RepositoryError> {
        let mut guard = self.records.lock().expect("absence mutex poisoned");
        if guard.contains_key(&absence.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(absence.id.clone(), absence.clone());
        Ok(absence)
    }

    fn update(&self, absence: Absence) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("absence mutex poisoned");
        if !guard.contains_key(&absence.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(absence.id.clone(), absence);
        Ok(())
    }

    fn fetch(&self, id: &AbsenceId) -> Result<Option<Absence>, RepositoryError> {
        let guard = self.records.lock().expect("absence mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn find_for_provider(&self, provider: &ProviderId) -> Result<Vec<Absence>, RepositoryError> {
        let guard = self.records.lock().expect("absence mutex poisoned");
        let mut found: Vec<Absence> = guard
            .values()
            .filter(|absence| &absence.provider == provider)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryReplacementRepository {
    records: Mutex<HashMap<ReplacementId, Replacement>>,
}

impl ReplacementRepository for InMemoryReplacementRepository {
    fn insert(&self, replacement: Replacement) -> Result<Replacement, RepositoryError> {
        let mut guard = self.records.lock().expect("replacement mutex poisoned");
        if guard.contains_key(&replacement.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(replacement.id.clone(), replacement.clone());
        Ok(replacement)
    }

    fn update(
        &self,
        replacement: Replacement,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("replacement mutex poisoned");
        let stored = guard
            .get(&replacement.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                found: stored.version,
            });
        }
        guard.insert(replacement.id.clone(), replacement);
        Ok(())
    }

    fn fetch(&self, id: &ReplacementId) -> Result<Option<Replacement>, RepositoryError> {
        let guard = self.records.lock().expect("replacement mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn find_for_absence(&self, absence: &AbsenceId) -> Result<Vec<Replacement>, RepositoryError> {
        let guard = self.records.lock().expect("replacement mutex poisoned");
        let mut found: Vec<Replacement> = guard
            .values()
            .filter(|replacement| &replacement.absence == absence)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn find_with_status(
        &self,
        status: ReplacementStatus,
    ) -> Result<Vec<Replacement>, RepositoryError> {
        let guard = self.records.lock().expect("replacement mutex poisoned");
        let mut found: Vec<Replacement> = guard
            .values()
            .filter(|replacement| replacement.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn active_for_booking(
        &self,
        booking: &BookingId,
    ) -> Result<Option<Replacement>, RepositoryError> {
        let guard = self.records.lock().expect("replacement mutex poisoned");
        Ok(guard
            .values()
            .find(|replacement| &replacement.booking == booking && !replacement.is_terminal())
            .cloned())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryBookingStore {
    records: Mutex<HashMap<BookingId, Booking>>,
}

impl InMemoryBookingStore {
    pub(crate) fn seed(&self, booking: Booking) {
        self.records
            .lock()
            .expect("booking mutex poisoned")
            .insert(booking.id.clone(), booking);
    }

    fn overlapping(&self, provider: &ProviderId, at: NaiveDateTime, minutes: u32) -> bool {
        let guard = self.records.lock().expect("booking mutex poisoned");
        guard.values().any(|booking| {
            &booking.provider == provider
                && matches!(
                    booking.status,
                    BookingStatus::Scheduled | BookingStatus::Confirmed | BookingStatus::InProgress
                )
                && overlaps(at, minutes, booking.scheduled_at, booking.duration_minutes)
        })
    }
}

fn overlaps(start_a: NaiveDateTime, minutes_a: u32, start_b: NaiveDateTime, minutes_b: u32) -> bool {
    let end_a = start_a + Duration::minutes(i64::from(minutes_a));
    let end_b = start_b + Duration::minutes(i64::from(minutes_b));
    start_a < end_b && start_b < end_a
}

impl BookingStore for InMemoryBookingStore {
    fn find_in_window(
        &self,
        provider: &ProviderId,
        start: NaiveDate,
        end: NaiveDate,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, RepositoryError> {
        let guard = self.records.lock().expect("booking mutex poisoned");
        let mut found: Vec<Booking> = guard
            .values()
            .filter(|booking| {
                &booking.provider == provider
                    && booking.scheduled_at.date() >= start
                    && booking.scheduled_at.date() <= end
                    && statuses.contains(&booking.status)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(found)
    }

    fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let guard = self.records.lock().expect("booking mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn update_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
        provider: Option<&ProviderId>,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("booking mutex poisoned");
        let booking = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        booking.status = status;
        if let Some(provider) = provider {
            booking.provider = provider.clone();
        }
        Ok(())
    }
}

pub(crate) struct InMemoryProviderDirectory {
    providers: Mutex<HashMap<ProviderId, Provider>>,
    bookings: Arc<InMemoryBookingStore>,
}

impl InMemoryProviderDirectory {
    pub(crate) fn new(bookings: Arc<InMemoryBookingStore>) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            bookings,
        }
    }

    pub(crate) fn seed(&self, provider: Provider) {
        self.providers
            .lock()
            .expect("directory mutex poisoned")
            .insert(provider.id.clone(), provider);
    }
}

impl ProviderDirectory for InMemoryProviderDirectory {
    fn find_eligible(
        &self,
        category: &ServiceCategory,
        excluding: &[ProviderId],
    ) -> Result<Vec<Provider>, RepositoryError> {
        let guard = self.providers.lock().expect("directory mutex poisoned");
        let mut found: Vec<Provider> = guard
            .values()
            .filter(|provider| {
                provider.active
                    && provider.approved
                    && provider.offers(category)
                    && !excluding.contains(&provider.id)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn is_available(
        &self,
        provider: &ProviderId,
        at: NaiveDateTime,
        duration_minutes: u32,
    ) -> Result<bool, RepositoryError> {
        Ok(!self.bookings.overlapping(provider, at, duration_minutes))
    }
}

/// Logs deliveries instead of calling a push/SMS gateway; the reference
/// deployment has no transport wired in.
#[derive(Default)]
pub(crate) struct LoggingNotificationDispatcher {
    delivered: Mutex<Vec<ReplacementNotice>>,
}

impl LoggingNotificationDispatcher {
    pub(crate) fn delivered(&self) -> Vec<ReplacementNotice> {
        self.delivered
            .lock()
            .expect("notifier mutex poisoned")
            .clone()
    }
}

impl NotificationDispatcher for LoggingNotificationDispatcher {
    fn notify(&self, notice: ReplacementNotice) -> Result<(), NotificationError> {
        tracing::info!(
            replacement = %notice.replacement,
            booking = %notice.booking,
            kind = ?notice.kind,
            "notice dispatched"
        );
        self.delivered
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice);
        Ok(())
    }
}

pub(crate) fn default_matching_config() -> MatchingConfig {
    MatchingConfig {
        distance_penalty_max: 40.0,
        inexperience_threshold: 10,
        inexperience_penalty: 25.0,
        rating_bonus_max: 10.0,
        platform_average_rating: 4.2,
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
