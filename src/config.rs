use anyhow::Result;
use chrono::FixedOffset;
use dotenvy::dotenv;
use std::env;

use crate::domain::{CommissionRule, CommissionRuleSet};
use crate::services::calculator::DEFAULT_PLATFORM_PARTY_ID;
use crate::services::period::SettlementCalendar;

pub const DEFAULT_SETTLEMENT_CRON: &str = "0 5 0 * * *";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Settlement day offset from UTC, in seconds east.
    pub settlement_utc_offset_secs: i32,
    pub platform_party_id: String,
    pub settlement_cron: String,
    pub partner_commission_rules: Option<CommissionRuleSet>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let offset =
            env::var("SETTLEMENT_UTC_OFFSET").unwrap_or_else(|_| "+00:00".to_string());
        let partner_commission_rules = match env::var("PARTNER_COMMISSION_RULE") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_commission_rules(&raw)?),
            _ => None,
        };

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            settlement_utc_offset_secs: parse_utc_offset(&offset)?,
            platform_party_id: env::var("PLATFORM_PARTY_ID")
                .unwrap_or_else(|_| DEFAULT_PLATFORM_PARTY_ID.to_string()),
            settlement_cron: env::var("SETTLEMENT_CRON")
                .unwrap_or_else(|_| DEFAULT_SETTLEMENT_CRON.to_string()),
            partner_commission_rules,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL must not be empty");
        }
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must not be 0");
        }
        if self.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        if self.platform_party_id.trim().is_empty() {
            anyhow::bail!("PLATFORM_PARTY_ID must not be empty");
        }
        if self.settlement_cron.parse::<cron::Schedule>().is_err() {
            anyhow::bail!(
                "SETTLEMENT_CRON '{}' is not a valid cron expression",
                self.settlement_cron
            );
        }
        Ok(())
    }

    pub fn calendar(&self) -> SettlementCalendar {
        FixedOffset::east_opt(self.settlement_utc_offset_secs)
            .map(SettlementCalendar::new)
            .unwrap_or_default()
    }
}

/// Parses `Z`, `+HH:MM` or `-HH:MM` into seconds east of UTC.
pub fn parse_utc_offset(raw: &str) -> Result<i32> {
    let value = raw.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(0);
    }

    let (sign, rest) = if let Some(rest) = value.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = value.strip_prefix('-') {
        (-1, rest)
    } else {
        anyhow::bail!("SETTLEMENT_UTC_OFFSET must look like +HH:MM, got '{}'", raw);
    };
    let Some((hours, minutes)) = rest.split_once(':') else {
        anyhow::bail!("SETTLEMENT_UTC_OFFSET must look like +HH:MM, got '{}'", raw);
    };
    let hours: i32 = hours.parse()?;
    let minutes: i32 = minutes.parse()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        anyhow::bail!("SETTLEMENT_UTC_OFFSET out of range: '{}'", raw);
    }
    Ok(sign * (hours * 3600 + minutes * 60))
}

/// Accepts a JSON array of scoped rules or a single bare rule.
fn parse_commission_rules(raw: &str) -> Result<CommissionRuleSet> {
    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(raw).map_err(|e| {
            anyhow::anyhow!("PARTNER_COMMISSION_RULE is not a valid rule set: {}", e)
        });
    }
    let rule: CommissionRule = serde_json::from_str(raw)
        .map_err(|e| anyhow::anyhow!("PARTNER_COMMISSION_RULE is not a valid rule: {}", e))?;
    Ok(CommissionRuleSet::single(rule))
}
