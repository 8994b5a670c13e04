use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::AppError;
use crate::services::engine::SettlementEngine;

/// Runs the daily settlement for the previous local day on a cron schedule.
#[derive(Clone)]
pub struct DailySettlementScheduler {
    engine: Arc<SettlementEngine>,
    schedule: Schedule,
}

impl DailySettlementScheduler {
    /// `expression` uses the six-field cron syntax (seconds first).
    pub fn new(engine: Arc<SettlementEngine>, expression: &str) -> Result<Self, AppError> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            AppError::BadRequest(format!("invalid cron expression '{}': {}", expression, e))
        })?;
        Ok(Self { engine, schedule })
    }

    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }

    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = scheduler.next_run_after(now) else {
                    tracing::warn!("Settlement schedule has no upcoming runs, stopping");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::info!(next_run = %next, "Next daily settlement scheduled");
                tokio::time::sleep(wait).await;

                if let Err(e) = scheduler.tick(Utc::now()).await {
                    tracing::error!("Daily settlement run failed: {}", e);
                }
            }
        })
    }

    /// Settles the local day before `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let target = self.engine.calendar().previous_day(now);
        tracing::info!(target_date = %target, "Starting scheduled daily settlement");
        self.engine.run_daily_settlement(target).await
    }
}
