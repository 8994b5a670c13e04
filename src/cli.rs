use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapters::{
    LoggingCacheInvalidator, PostgresOrderRepository, PostgresSettlementRepository,
};
use crate::config::Config;
use crate::services::{Calculator, SettlementEngine};

#[derive(Parser)]
#[command(name = "settlement-engine")]
#[command(
    about = "Settlement Engine - per-party daily settlements for marketplace orders",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP read API and the daily scheduler (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Settlement commands
    #[command(subcommand)]
    Settle(SettleCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum SettleCommands {
    /// Finalize the pending settlements of one day
    Daily {
        /// Local date (YYYY-MM-DD); defaults to yesterday
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
    },

    /// Settle a completed order
    OrderCompleted {
        /// Order UUID
        #[arg(value_name = "ORDER_ID")]
        order_id: Uuid,
    },

    /// Reverse the settlement of a refunded order
    Refund {
        /// Order UUID
        #[arg(value_name = "ORDER_ID")]
        order_id: Uuid,
    },

    /// Print the settlement items an order would produce, without saving
    Preview {
        /// Order UUID
        #[arg(value_name = "ORDER_ID")]
        order_id: Uuid,
    },
}

/// Wires the Postgres adapters into an engine configured from `config`.
pub fn build_engine(config: &Config, pool: PgPool) -> SettlementEngine {
    let mut calculator = Calculator::new(config.platform_party_id.clone());
    if let Some(rules) = &config.partner_commission_rules {
        calculator = calculator.with_partner(rules.clone(), config.platform_party_id.clone());
    }

    SettlementEngine::new(
        Arc::new(PostgresOrderRepository::new(pool.clone())),
        Arc::new(PostgresSettlementRepository::new(pool)),
        calculator,
        config.calendar(),
    )
    .with_cache_invalidator(Arc::new(LoggingCacheInvalidator))
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_settle(config: &Config, command: SettleCommands) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    let engine = build_engine(config, pool);

    match command {
        SettleCommands::Daily { date } => {
            let target = date.unwrap_or_else(|| engine.calendar().previous_day(Utc::now()));
            let finalized = engine.run_daily_settlement(target).await?;
            println!("✓ Finalized {} settlement(s) for {}", finalized, target);
        }
        SettleCommands::OrderCompleted { order_id } => {
            let settlements = engine.run_on_order_completed(order_id).await?;
            println!("✓ Order {} settled into {} settlement(s)", order_id, settlements.len());
        }
        SettleCommands::Refund { order_id } => {
            let settlements = engine.run_on_refund(order_id).await?;
            println!("✓ Order {} reversed in {} settlement(s)", order_id, settlements.len());
        }
        SettleCommands::Preview { order_id } => {
            let preview = engine.preview_order(order_id).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
    }
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Max Connections: {}", config.db_max_connections);
    println!("  Settlement UTC Offset: {}", config.calendar().offset());
    println!("  Platform Party: {}", config.platform_party_id);
    println!("  Settlement Cron: {}", config.settlement_cron);
    match &config.partner_commission_rules {
        Some(rules) => println!("  Partner Rules: {}", rules.rules().len()),
        None => println!("  Partner Rules: none"),
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
