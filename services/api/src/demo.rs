use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDate};
use clap::Args;

use crate::infra::{
    default_matching_config, parse_date, InMemoryAbsenceRepository, InMemoryBookingStore,
    InMemoryProviderDirectory, InMemoryReplacementRepository, LoggingNotificationDispatcher,
};
use shiftcover::config::EngineConfig;
use shiftcover::error::AppError;
use shiftcover::workflows::absence::{
    AbsenceWorkflowService, Booking, BookingId, BookingStatus, ClientId, GeoPoint, Provider,
    ProviderId, ReplacementStatus, ServiceCategory, StaffId, SweepRunner,
};
use shiftcover::workflows::roster::RosterImporter;

pub(crate) type DemoService = AbsenceWorkflowService<
    InMemoryAbsenceRepository,
    InMemoryReplacementRepository,
    InMemoryBookingStore,
    InMemoryProviderDirectory,
    LoggingNotificationDispatcher,
>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Optional provider roster CSV to hydrate the directory
    #[arg(long)]
    pub(crate) roster: Option<PathBuf>,
    /// Absence start date (YYYY-MM-DD). Defaults to a week from today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) absence_start: Option<NaiveDate>,
    /// Absence end date (YYYY-MM-DD). Defaults to absence_start + 2 days.
    #[arg(long, value_parser = parse_date)]
    pub(crate) absence_end: Option<NaiveDate>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Optional provider roster CSV to hydrate the directory
    #[arg(long)]
    pub(crate) roster: Option<PathBuf>,
}

pub(crate) struct DemoEngine {
    pub(crate) service: Arc<DemoService>,
    pub(crate) notifier: Arc<LoggingNotificationDispatcher>,
}

fn category() -> ServiceCategory {
    ServiceCategory("cleaning".to_string())
}

fn sample_providers() -> Vec<Provider> {
    let rows = [
        ("pro-ana", 38.72, -9.12, 25.0, 4.8f32, 42u32),
        ("pro-rui", 38.74, -9.15, 15.0, 4.3, 18),
        ("pro-ines", 38.70, -9.18, 20.0, 4.6, 31),
    ];

    rows.iter()
        .map(|(id, lat, lng, radius, rating, completed)| {
            let mut completed_by_category = BTreeMap::new();
            completed_by_category.insert(category(), *completed);
            Provider {
                id: ProviderId((*id).to_string()),
                name: format!("Provider {id}"),
                categories: vec![category()],
                location: GeoPoint {
                    latitude: *lat,
                    longitude: *lng,
                },
                service_radius_km: *radius,
                approved: true,
                active: true,
                rating: *rating,
                completed_by_category,
            }
        })
        .collect()
}

fn booking(id: &str, provider: &str, scheduled_at: chrono::NaiveDateTime) -> Booking {
    Booking {
        id: BookingId(id.to_string()),
        client: ClientId(format!("cli-{id}")),
        provider: ProviderId(provider.to_string()),
        category: category(),
        location: GeoPoint {
            latitude: 38.72,
            longitude: -9.14,
        },
        scheduled_at,
        duration_minutes: 120,
        status: BookingStatus::Confirmed,
        amount_cents: 6_000,
    }
}

fn build_demo_engine(
    roster: Option<PathBuf>,
    window_start: NaiveDate,
) -> Result<DemoEngine, AppError> {
    let absences = Arc::new(InMemoryAbsenceRepository::default());
    let replacements = Arc::new(InMemoryReplacementRepository::default());
    let bookings = Arc::new(InMemoryBookingStore::default());
    let directory = Arc::new(InMemoryProviderDirectory::new(bookings.clone()));
    let notifier = Arc::new(LoggingNotificationDispatcher::default());

    let providers = match roster {
        Some(path) => RosterImporter::from_path(path)?,
        None => sample_providers(),
    };
    for provider in providers {
        directory.seed(provider);
    }

    let slot = |day_offset: i64, hour: u32| {
        (window_start + Duration::days(day_offset))
            .and_hms_opt(hour, 0, 0)
            .expect("valid demo slot")
    };
    bookings.seed(booking("bk-100", "pro-absent", slot(0, 9)));
    bookings.seed(booking("bk-101", "pro-absent", slot(1, 14)));
    bookings.seed(booking("bk-102", "pro-absent", slot(6, 9)));
    bookings.seed(booking("bk-200", "pro-rui", slot(1, 9)));

    let service = Arc::new(AbsenceWorkflowService::new(
        absences,
        replacements,
        bookings,
        directory,
        notifier.clone(),
        default_matching_config(),
        EngineConfig::default(),
    ));

    Ok(DemoEngine { service, notifier })
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        roster,
        absence_start,
        absence_end,
    } = args;

    let today = Local::now().date_naive();
    let start = absence_start.unwrap_or_else(|| today + Duration::days(7));
    let end = absence_end.unwrap_or_else(|| start + Duration::days(2));
    let now = Local::now().naive_local();

    println!("Absence replacement demo");
    println!("- window {start}..{end} for provider pro-absent");

    let engine = build_demo_engine(roster, start)?;

    let absence = engine
        .service
        .declare_absence(
            ProviderId("pro-absent".to_string()),
            start,
            end,
            shiftcover::workflows::absence::AbsenceType::Leave,
            "demo leave".to_string(),
        )
        .map_err(AppError::from)?;
    println!("- declared absence {} ({})", absence.id, absence.status.label());

    let absence = engine
        .service
        .approve(&absence.id, StaffId("ops-demo".to_string()), now)
        .map_err(AppError::from)?;
    println!(
        "- approved: {} affected booking(s), replacement required: {}",
        absence.affected_bookings_count, absence.requires_replacement
    );

    let sweep = SweepRunner::new(engine.service.clone());
    let report = sweep.run_once(now).map_err(AppError::from)?;
    println!(
        "- sweep pass: {} retried, {} proposed, {} exhausted",
        report.retried, report.proposed, report.exhausted
    );

    let replacements = engine
        .service
        .replacements_for_absence(&absence.id)
        .map_err(AppError::from)?;
    for replacement in &replacements {
        match (&replacement.substitute_provider, replacement.matching_score) {
            (Some(substitute), Some(score)) => println!(
                "  - {} for booking {}: proposed {} (score {score})",
                replacement.id, replacement.booking, substitute
            ),
            _ => println!(
                "  - {} for booking {}: {}",
                replacement.id,
                replacement.booking,
                replacement.status.label()
            ),
        }
    }

    for replacement in &replacements {
        if replacement.status != ReplacementStatus::Proposed {
            continue;
        }
        engine
            .service
            .accept(&replacement.id, now)
            .map_err(AppError::from)?;
        let confirmed = engine
            .service
            .confirm(&replacement.id, now)
            .map_err(AppError::from)?;
        println!(
            "  - {} confirmed with {}",
            confirmed.id,
            confirmed
                .substitute_provider
                .map(|id| id.0)
                .unwrap_or_else(|| "nobody".to_string())
        );
    }

    let absence = engine.service.absence(&absence.id).map_err(AppError::from)?;
    println!(
        "- outcome: {}/{} replacements found, {} notices dispatched",
        absence.replacements_found_count,
        absence.affected_bookings_count,
        engine.notifier.delivered().len()
    );

    Ok(())
}

pub(crate) fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let today = Local::now().date_naive();
    let start = today + Duration::days(7);
    let now = Local::now().naive_local();

    let engine = build_demo_engine(args.roster, start)?;
    let absence = engine
        .service
        .declare_absence(
            ProviderId("pro-absent".to_string()),
            start,
            start + Duration::days(2),
            shiftcover::workflows::absence::AbsenceType::Leave,
            "sweep demo".to_string(),
        )
        .map_err(AppError::from)?;
    engine
        .service
        .approve(&absence.id, StaffId("ops-demo".to_string()), now)
        .map_err(AppError::from)?;

    let sweep = SweepRunner::new(engine.service.clone());
    let report = sweep.run_once(now).map_err(AppError::from)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("report serializes")
    );

    Ok(())
}
