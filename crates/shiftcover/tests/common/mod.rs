#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, NaiveDateTime};

use shiftcover::config::EngineConfig;
use shiftcover::workflows::absence::{
    Absence, AbsenceId, AbsenceRepository, AbsenceWorkflowService, Booking, BookingId,
    BookingStatus, BookingStore, ClientId, GeoPoint, MatchingConfig, NotificationDispatcher,
    NotificationError, Provider, ProviderDirectory, ProviderId, Replacement, ReplacementId,
    ReplacementNotice, ReplacementRepository, ReplacementStatus, RepositoryError, ServiceCategory,
};

pub fn category() -> ServiceCategory {
    ServiceCategory("cleaning".to_string())
}

pub fn city_center() -> GeoPoint {
    GeoPoint {
        latitude: 38.72,
        longitude: -9.14,
    }
}

pub fn east_of_center(km: f64) -> GeoPoint {
    GeoPoint {
        latitude: 38.72,
        longitude: -9.14 + km / 85.0,
    }
}

pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .expect("valid date")
        .and_hms_opt(9, 0, 0)
        .expect("valid time")
}

pub fn booking_day() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 11)
        .expect("valid date")
        .and_hms_opt(10, 0, 0)
        .expect("valid time")
}

pub fn provider(id: &str, location: GeoPoint, rating: f32, completed: u32) -> Provider {
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

pub fn booking(id: &str, provider_id: &str, scheduled_at: NaiveDateTime) -> Booking {
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
pub struct InMemoryAbsences {
    records: Mutex<HashMap<AbsenceId, Absence>>,
}

impl AbsenceRepository for InMemoryAbsences {
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
pub struct InMemoryReplacements {
    records: Mutex<HashMap<ReplacementId, Replacement>>,
}

impl ReplacementRepository for InMemoryReplacements {
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
pub struct InMemoryBookings {
    records: Mutex<HashMap<BookingId, Booking>>,
}

impl InMemoryBookings {
    pub fn seed(&self, booking: Booking) {
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

impl BookingStore for InMemoryBookings {
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

pub struct InMemoryDirectory {
    providers: Mutex<HashMap<ProviderId, Provider>>,
    bookings: Arc<InMemoryBookings>,
    busy: Mutex<Vec<(ProviderId, NaiveDateTime, u32)>>,
}

impl InMemoryDirectory {
    pub fn new(bookings: Arc<InMemoryBookings>) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            bookings,
            busy: Mutex::new(Vec::new()),
        }
    }

    pub fn seed(&self, provider: Provider) {
        self.providers
            .lock()
            .expect("directory mutex poisoned")
            .insert(provider.id.clone(), provider);
    }

    pub fn mark_busy(&self, provider: &ProviderId, at: NaiveDateTime, minutes: u32) {
        self.busy
            .lock()
            .expect("busy mutex poisoned")
            .push((provider.clone(), at, minutes));
    }
}

impl ProviderDirectory for InMemoryDirectory {
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

        Ok(!self.bookings.overlapping(provider, at, duration_minutes))
    }
}

#[derive(Default)]
pub struct InMemoryNotifier {
    events: Mutex<Vec<ReplacementNotice>>,
}

impl InMemoryNotifier {
    pub fn events(&self) -> Vec<ReplacementNotice> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationDispatcher for InMemoryNotifier {
    fn notify(&self, notice: ReplacementNotice) -> Result<(), NotificationError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice);
        Ok(())
    }
}

pub type EngineService = AbsenceWorkflowService<
    InMemoryAbsences,
    InMemoryReplacements,
    InMemoryBookings,
    InMemoryDirectory,
    InMemoryNotifier,
>;

pub struct Engine {
    pub service: Arc<EngineService>,
    pub absences: Arc<InMemoryAbsences>,
    pub replacements: Arc<InMemoryReplacements>,
    pub bookings: Arc<InMemoryBookings>,
    pub directory: Arc<InMemoryDirectory>,
    pub notifier: Arc<InMemoryNotifier>,
}

pub fn build_engine() -> Engine {
    let absences = Arc::new(InMemoryAbsences::default());
    let replacements = Arc::new(InMemoryReplacements::default());
    let bookings = Arc::new(InMemoryBookings::default());
    let directory = Arc::new(InMemoryDirectory::new(bookings.clone()));
    let notifier = Arc::new(InMemoryNotifier::default());
    let service = Arc::new(AbsenceWorkflowService::new(
        absences.clone(),
        replacements.clone(),
        bookings.clone(),
        directory.clone(),
        notifier.clone(),
        MatchingConfig::default(),
        EngineConfig::default(),
    ));

    Engine {
        service,
        absences,
        replacements,
        bookings,
        directory,
        notifier,
    }
}
