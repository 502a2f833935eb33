use crate::cli::ServeArgs;
use crate::infra::{
    default_matching_config, AppState, InMemoryAbsenceRepository, InMemoryBookingStore,
    InMemoryProviderDirectory, InMemoryReplacementRepository, LoggingNotificationDispatcher,
};
use crate::routes::with_absence_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use shiftcover::config::AppConfig;
use shiftcover::error::AppError;
use shiftcover::telemetry;
use shiftcover::workflows::absence::{AbsenceWorkflowService, SweepRunner};
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let absences = Arc::new(InMemoryAbsenceRepository::default());
    let replacements = Arc::new(InMemoryReplacementRepository::default());
    let bookings = Arc::new(InMemoryBookingStore::default());
    let directory = Arc::new(InMemoryProviderDirectory::new(bookings.clone()));
    let notifier = Arc::new(LoggingNotificationDispatcher::default());
    let service = Arc::new(AbsenceWorkflowService::new(
        absences,
        replacements,
        bookings,
        directory,
        notifier,
        default_matching_config(),
        config.engine.clone(),
    ));

    let sweep_service = service.clone();
    let sweep_interval = config.engine.sweep_interval_secs.max(1);
    tokio::spawn(async move {
        let runner = SweepRunner::new(sweep_service);
        let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval));
        // The first tick completes immediately; skip it so the pass cadence
        // starts one interval after boot.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().naive_utc();
            if let Err(err) = runner.run_once(now) {
                tracing::warn!(error = %err, "sweep pass failed");
            }
        }
    });

    let app = with_absence_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "absence replacement engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
