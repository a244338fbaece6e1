use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use lease_engine::config::{AppConfig, LeasePolicy};
use lease_engine::error::AppError;
use lease_engine::leasing::{
    lease_router, ApplicationId, ApprovedApplication, Clock, DeadlineSweeper, DocumentId,
    LeaseEngine, LeaseTerms, ManualClock, MemoryApplicationDirectory, MemoryLeaseStore,
    MemoryNotificationPublisher, MemoryPropertyDirectory, PropertyId, SystemClock, UserId,
};
use lease_engine::telemetry;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::info;

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "Lease Lifecycle Engine",
    about = "Run the lease lifecycle and rent-schedule engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk a full lease lifecycle offline with a simulated clock
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Lease start date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, default_value = "2024-01-01")]
    start_date: NaiveDate,
    /// Lease end date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, default_value = "2024-12-26")]
    end_date: NaiveDate,
    /// Monthly rent in minor units
    #[arg(long, default_value_t = 200_000)]
    rent_amount: i64,
    /// Security deposit in minor units
    #[arg(long, default_value_t = 200_000)]
    security_deposit: i64,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Demo(args) => run_demo(args),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc()
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let store = Arc::new(MemoryLeaseStore::default());
    let clock = Arc::new(SystemClock);
    let applications = Arc::new(MemoryApplicationDirectory::default());
    let properties = Arc::new(MemoryPropertyDirectory::default());
    let notifier = Arc::new(MemoryNotificationPublisher::default());

    seed_demo_applications(&applications);

    let engine = Arc::new(LeaseEngine::new(
        store.clone(),
        clock.clone(),
        applications,
        properties,
        notifier.clone(),
        config.policy,
    ));
    let sweeper = Arc::new(DeadlineSweeper::new(
        store,
        clock,
        engine.state_machine.clone(),
        engine.schedule.clone(),
        notifier,
        config.sweeper,
    ));
    tokio::spawn(sweeper.run());

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(lease_router(engine))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "lease lifecycle engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// The application service is an external collaborator; until it is wired
/// in, the server starts with a couple of approved applications so the
/// create-lease flow can be exercised immediately.
fn seed_demo_applications(applications: &MemoryApplicationDirectory) {
    for (app, property, tenant, landlord) in [
        ("app-000101", "prop-100", "ten-501", "lld-900"),
        ("app-000102", "prop-200", "ten-502", "lld-900"),
    ] {
        applications.seed(ApprovedApplication {
            application_id: ApplicationId(app.to_string()),
            property_id: PropertyId(property.to_string()),
            tenant_id: UserId(tenant.to_string()),
            landlord_id: UserId(landlord.to_string()),
        });
    }
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let policy = LeasePolicy::default();
    let start = midnight_utc(args.start_date);
    let end = midnight_utc(args.end_date);
    let clock = Arc::new(ManualClock::starting_at(start - Duration::days(7)));

    let store = Arc::new(MemoryLeaseStore::default());
    let applications = Arc::new(MemoryApplicationDirectory::default());
    let properties = Arc::new(MemoryPropertyDirectory::default());
    let notifier = Arc::new(MemoryNotificationPublisher::default());
    applications.seed(ApprovedApplication {
        application_id: ApplicationId("app-demo".to_string()),
        property_id: PropertyId("prop-demo".to_string()),
        tenant_id: UserId("tenant-demo".to_string()),
        landlord_id: UserId("landlord-demo".to_string()),
    });

    let engine = LeaseEngine::new(
        store.clone(),
        clock.clone(),
        applications,
        properties.clone(),
        notifier.clone(),
        policy,
    );
    let sweeper = DeadlineSweeper::new(
        store,
        clock.clone(),
        engine.state_machine.clone(),
        engine.schedule.clone(),
        notifier.clone(),
        Default::default(),
    );

    println!("Lease lifecycle demo");
    println!(
        "Terms: {} -> {}, rent {} / deposit {} minor units",
        args.start_date, args.end_date, args.rent_amount, args.security_deposit
    );

    let lease = engine.state_machine.create_lease(
        &ApplicationId("app-demo".to_string()),
        LeaseTerms {
            start_date: start,
            end_date: end,
            rent_amount: args.rent_amount,
            security_deposit: args.security_deposit,
        },
    )?;
    println!("\nCreated lease {} ({})", lease.id.0, lease.status.label());

    engine
        .state_machine
        .attach_contract(&lease.id, DocumentId("doc-demo".to_string()))?;
    let lease = engine
        .state_machine
        .tenant_accept(&lease.id, &UserId("tenant-demo".to_string()))?;
    println!(
        "Tenant accepted; acceptance payment of {} due before {}",
        lease.total_due_on_acceptance,
        lease
            .acceptance_deadline
            .map(|d| d.to_rfc3339())
            .unwrap_or_default()
    );

    let outcome = engine.reconciler.apply_acceptance_payment(
        &lease.id,
        lease.total_due_on_acceptance,
        "bank_transfer",
        "demo-acceptance-1",
    )?;
    println!(
        "Acceptance payment applied; lease is {}",
        outcome.lease.status.label()
    );

    let schedule = engine.schedule.schedule_for_lease(&lease.id)?;
    println!("\nRent schedule ({} periods)", schedule.len());
    for item in schedule.iter().take(3) {
        println!(
            "- {} due {} amount {} status {}",
            item.id.0,
            item.due_date.date_naive(),
            item.amount_due,
            item.status.label()
        );
    }
    if schedule.len() > 3 {
        println!("  ... {} more", schedule.len() - 3);
    }

    // Run the clock past the first grace period and let the sweeper flag it.
    let first = &schedule[0];
    clock.set(first.grace_period_ends + Duration::days(1));
    let report = sweeper.sweep_once();
    let flagged = engine.schedule.item(&first.id)?;
    println!(
        "\nSweep at {} marked {} item(s) overdue; first item now {} with late fee {}",
        clock.now().date_naive(),
        report.items_marked_overdue,
        flagged.status.label(),
        flagged.late_fee_amount
    );

    let paid = engine.reconciler.pay_schedule_item(
        &lease.id,
        &first.id,
        flagged.outstanding(),
        "bank_transfer",
    )?;
    println!(
        "Paid first period in full; item now {}",
        paid.item.status.label()
    );

    clock.set(end + Duration::days(1));
    let report = sweeper.sweep_once();
    let lease = engine.state_machine.get_lease(&lease.id)?;
    println!(
        "\nSweep past end date expired {} lease(s); lease is {}",
        report.leases_expired,
        lease.status.label()
    );

    println!("\nProperty gateway calls");
    for (property, status) in properties.calls() {
        println!("- {} -> {:?}", property.0, status);
    }

    let events = notifier.events();
    println!("\nNotifications emitted: {}", events.len());
    for event in events {
        println!("- {:?} for {}", event.kind, event.lease_id.0);
    }

    Ok(())
}
