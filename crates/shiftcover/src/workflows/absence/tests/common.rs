use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::config::EngineConfig;
use crate::workflows::absence::domain::{
    Absence, AbsenceId, Booking, BookingId, BookingStatus, ClientId, GeoPoint, Provider,
    ProviderId, Replacement, ReplacementId, ReplacementStatus, ServiceCategory,
};
use crate::workflows::absence::matching::MatchingConfig;
use crate::workflows::absence::repository::{
    AbsenceRepository, BookingStore, NotificationDispatcher, NotificationError, ProviderDirectory,
    ReplacementNotice, ReplacementRepository, RepositoryError,
};
use crate::workflows::absence::service::AbsenceWorkflowService;

pub(super) fn category() -> ServiceCategory {
    ServiceCategory("cleaning".to_string())
}

pub(super) fn city_center() -> GeoPoint {
    GeoPoint {
        latitude: 38.72,
        longitude: -9.14,
    }
}

/// A point roughly `km` kilometers east of the city center.
pub(super) fn east_of_center(km: f64) -> GeoPoint {
    GeoPoint {
        latitude: 38.72,
        longitude: -9.14 + km / 85.0,
    }
}

pub(super) fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .expect("valid date")
        .and_hms_opt(9, 0, 0)
        .expect("valid time")
}

pub(super) fn matching_config() -> MatchingConfig {
    MatchingConfig::default()
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig::default()
}

pub(super) fn provider(id: &str, location: GeoPoint, rating: f32, completed: u32) -> Provider {
    let mut completed_by_category = BTreeMap::new();
    completed_by_category.insert(category(), completed);
    Provider {
        id: ProviderId(id.to_string()),
        name: format!("Provider {id}"),
        categories: vec![category()],
        location,
        service_radius_km: 30.0,
        approved: true,
        active: true,
        rating,
        completed_by_category,
    }
}

pub(super) fn booking(id: &str, provider_id: &str, scheduled_at: NaiveDateTime) -> Booking {
    Booking {
        id: BookingId(id.to_string()),
        client: ClientId(format!("cli-{id}")),
        provider: ProviderId(provider_id.to_string()),
        category: category(),
        location: city_center(),
        scheduled_at,
        duration_minutes: 120,
        status: BookingStatus::Confirmed,
        amount_cents: 6_000,
    }
}

#[derive(Default)]
pub(super) struct MemoryAbsences {
    records: Mutex<HashMap<AbsenceId, Absence>>,
}

impl AbsenceRepository for MemoryAbsences {
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
pub(super) struct MemoryReplacements {
    records: Mutex<HashMap<ReplacementId, Replacement>>,
}

impl ReplacementRepository for MemoryReplacements {
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
pub(super) struct MemoryBookings {
    records: Mutex<HashMap<BookingId, Booking>>,
}

impl MemoryBookings {
    pub(super) fn seed(&self, booking: Booking) {
        self.records
            .lock()
            .expect("booking mutex poisoned")
            .insert(booking.id.clone(), booking);
    }
}

impl BookingStore for MemoryBookings {
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

pub(super) struct MemoryDirectory {
    providers: Mutex<HashMap<ProviderId, Provider>>,
    bookings: Arc<MemoryBookings>,
    busy: Mutex<Vec<(ProviderId, NaiveDateTime, u32)>>,
}

impl MemoryDirectory {
    pub(super) fn new(bookings: Arc<MemoryBookings>) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            bookings,
            busy: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn seed(&self, provider: Provider) {
        self.providers
            .lock()
            .expect("directory mutex poisoned")
            .insert(provider.id.clone(), provider);
    }

    /// Block a provider's calendar without going through the booking store,
    /// to model a booking landing on another platform between search and
    /// confirmation.
    pub(super) fn mark_busy(&self, provider: &ProviderId, at: NaiveDateTime, minutes: u32) {
        self.busy
            .lock()
            .expect("busy mutex poisoned")
            .push((provider.clone(), at, minutes));
    }
}

fn overlaps(start_a: NaiveDateTime, minutes_a: u32, start_b: NaiveDateTime, minutes_b: u32) -> bool {
    let end_a = start_a + Duration::minutes(i64::from(minutes_a));
    let end_b = start_b + Duration::minutes(i64::from(minutes_b));
    start_a < end_b && start_b < end_a
}

impl ProviderDirectory for MemoryDirectory {
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
        let busy = self.busy.lock().expect("busy mutex poisoned");
        if busy
            .iter()
            .any(|(id, start, minutes)| id == provider && overlaps(at, duration_minutes, *start, *minutes))
        {
            return Ok(false);
        }
        drop(busy);

        let guard = self
            .bookings
            .records
            .lock()
            .expect("booking mutex poisoned");
        let conflict = guard.values().any(|booking| {
            &booking.provider == provider
                && matches!(
                    booking.status,
                    BookingStatus::Scheduled | BookingStatus::Confirmed | BookingStatus::InProgress
                )
                && overlaps(at, duration_minutes, booking.scheduled_at, booking.duration_minutes)
        });
        Ok(!conflict)
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    events: Mutex<Vec<ReplacementNotice>>,
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<ReplacementNotice> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationDispatcher for MemoryNotifier {
    fn notify(&self, notice: ReplacementNotice) -> Result<(), NotificationError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice);
        Ok(())
    }
}

/// Dispatcher whose transport is down; transitions must shrug it off.
pub(super) struct FailingNotifier;

impl NotificationDispatcher for FailingNotifier {
    fn notify(&self, _notice: ReplacementNotice) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("gateway offline".to_string()))
    }
}

pub(super) type TestService =
    AbsenceWorkflowService<MemoryAbsences, MemoryReplacements, MemoryBookings, MemoryDirectory, MemoryNotifier>;

pub(super) struct TestHarness {
    pub(super) service: Arc<TestService>,
    pub(super) replacements: Arc<MemoryReplacements>,
    pub(super) bookings: Arc<MemoryBookings>,
    pub(super) directory: Arc<MemoryDirectory>,
    pub(super) notifier: Arc<MemoryNotifier>,
}

pub(super) fn build_harness() -> TestHarness {
    let absences = Arc::new(MemoryAbsences::default());
    let replacements = Arc::new(MemoryReplacements::default());
    let bookings = Arc::new(MemoryBookings::default());
    let directory = Arc::new(MemoryDirectory::new(bookings.clone()));
    let notifier = Arc::new(MemoryNotifier::default());
    let service = Arc::new(AbsenceWorkflowService::new(
        absences,
        replacements.clone(),
        bookings.clone(),
        directory.clone(),
        notifier.clone(),
        matching_config(),
        engine_config(),
    ));

    TestHarness {
        service,
        replacements,
        bookings,
        directory,
        notifier,
    }
}
