use clap::Parser;
use donation_settlement::{
    adapters::{PostgresDonationRepository, PostgresLedgerStore},
    cli::{self, Cli, Commands, DbCommands},
    config::{Config, LogFormat},
    create_app, db,
    health::{HealthChecks, PaymentGatewayChecker, PostgresChecker},
    middleware::request_logger::RequestLogConfig,
    payments::PaymentGatewayClient,
    services::{
        run_notification_worker, run_reconciler, LogDispatcher, NotificationDispatcher, NotificationQueue,
        ReconciliationService, SettlementService, WalletService, WebhookDispatcher,
    },
    startup, AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
        Commands::Reconcile { limit } => cli::handle_reconcile(&config, limit).await,
        Commands::Audit => cli::handle_audit(&config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let start_time = Instant::now();

    // Database pool
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let report = startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.environment || !report.database {
        anyhow::bail!("Startup validation failed");
    }
    if !report.payment_gateway {
        tracing::warn!("Payment gateway unreachable at startup; callbacks will be rejected until it recovers");
    }

    let donations = Arc::new(PostgresDonationRepository::new(pool.clone()));
    let ledger = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let wallets = WalletService::new(ledger.clone());

    let gateway = PaymentGatewayClient::new(config.payment_gateway_url.clone(), config.payment_timeout());
    tracing::info!("Payment gateway client initialized with URL: {}", config.payment_gateway_url);

    // Notifications are drained by their own worker so delivery never blocks settlement.
    let (notifications, receiver) = NotificationQueue::bounded(config.notification_queue_capacity);
    let dispatcher: Arc<dyn NotificationDispatcher> = match &config.notification_webhook_url {
        Some(url) => {
            tracing::info!("Delivering notifications to {}", url);
            Arc::new(WebhookDispatcher::new(url.clone(), config.notification_signing_secret.clone()))
        }
        None => {
            tracing::info!("NOTIFICATION_WEBHOOK_URL not set; notifications are logged only");
            Arc::new(LogDispatcher)
        }
    };
    tokio::spawn(run_notification_worker(receiver, dispatcher));

    match config.reconciliation_interval() {
        Some(interval) => {
            let reconciliation = ReconciliationService::new(donations.clone(), ledger.clone());
            tokio::spawn(run_reconciler(
                reconciliation,
                interval,
                config.reconciliation_batch_size,
            ));
        }
        None => tracing::info!("Background reconciliation disabled"),
    }

    let settlements = SettlementService::new(
        donations,
        wallets.clone(),
        Arc::new(gateway.clone()),
        notifications,
        config.payment_timeout(),
    );

    let health = HealthChecks::new()
        .with("postgres", true, Arc::new(PostgresChecker::new(pool.clone())))
        .with("payment_gateway", false, Arc::new(PaymentGatewayChecker::new(gateway)));

    let app = create_app(AppState {
        settlements: Arc::new(settlements),
        wallets,
        webhook_secret: config.payment_webhook_secret.clone(),
        health,
        start_time,
        request_log: RequestLogConfig {
            log_body: config.log_request_body,
        },
        cors_allowed_origins: config.cors_allowed_origins.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
