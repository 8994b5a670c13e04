//! Daily settlement calendar.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

use crate::domain::SettlementPeriod;

/// Maps dates and instants to daily settlement periods in a fixed local zone.
///
/// The engine and the aggregator must share one calendar; two calendars
/// with different offsets would split a day across two settlements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementCalendar {
    offset: FixedOffset,
}

impl Default for SettlementCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl SettlementCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local midnight through 23:59:59.999 of `date`.
    pub fn period_for_date(&self, date: NaiveDate) -> SettlementPeriod {
        let midnight = date.and_time(NaiveTime::MIN);
        // Fixed offsets have no gaps or folds, so the mapping is always single.
        let start = self
            .offset
            .from_local_datetime(&midnight)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight));
        let end = start + Duration::days(1) - Duration::milliseconds(1);
        SettlementPeriod { start, end }
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn period_for_instant(&self, instant: DateTime<Utc>) -> SettlementPeriod {
        self.period_for_date(self.local_date(instant))
    }

    /// The local day before the one containing `instant`.
    pub fn previous_day(&self, instant: DateTime<Utc>) -> NaiveDate {
        let today = self.local_date(instant);
        today.pred_opt().unwrap_or(today)
    }
}
