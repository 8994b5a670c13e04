use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use settlement_engine::adapters::PostgresSettlementRepository;
use settlement_engine::cli::{self, Cli, Commands, DbCommands};
use settlement_engine::config::Config;
use settlement_engine::services::DailySettlementScheduler;
use settlement_engine::{create_app, db, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Settle(command) => cli::handle_settle(&config, command).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

fn init_tracing() {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT").map_or(false, |v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let engine = Arc::new(cli::build_engine(&config, pool.clone()));
    let scheduler = DailySettlementScheduler::new(engine, &config.settlement_cron)?;
    scheduler.start();
    tracing::info!(cron = %config.settlement_cron, "Daily settlement scheduler started");

    let app = create_app(AppState {
        settlements: Arc::new(PostgresSettlementRepository::new(pool)),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
