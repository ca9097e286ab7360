//! Calendar fields derived from click timestamps, and the shared campaign
//! calendar.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::EngineError;
use crate::events::{columns, FieldValue, RawEvent};

const MAX_OFFSET_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffset {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl Default for TimeOffset {
    fn default() -> Self {
        Self {
            days: 0,
            hours: 1,
            minutes: 0,
        }
    }
}

impl TimeOffset {
    pub fn hours(hours: i64) -> Self {
        Self {
            days: 0,
            hours,
            minutes: 0,
        }
    }

    pub fn total_minutes(&self) -> i64 {
        self.days
            .saturating_mul(24 * 60)
            .saturating_add(self.hours.saturating_mul(60))
            .saturating_add(self.minutes)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.total_minutes().abs() > MAX_OFFSET_MINUTES {
            return Err(EngineError::InvalidConfig(format!(
                "time offset of {} minutes exceeds {MAX_OFFSET_MINUTES}",
                self.total_minutes()
            )));
        }
        Ok(())
    }

    fn as_duration(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.total_minutes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFields {
    pub hour: u32,
    pub date: NaiveDate,
    pub month: u32,
    pub week: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub raw: RawEvent,
    pub calendar: CalendarFields,
}

pub fn parse_click_timestamp(value: &FieldValue, row: usize) -> Result<i64, EngineError> {
    let malformed = || EngineError::MalformedTimestamp {
        row,
        column: columns::CLICK_TIMESTAMP,
        value: value.to_string(),
    };

    match value {
        FieldValue::Int(secs) => Ok(*secs),
        FieldValue::Float(secs) => {
            if secs.is_finite()
                && secs.fract() == 0.0
                && *secs >= i64::MIN as f64
                && *secs <= i64::MAX as f64
            {
                Ok(*secs as i64)
            } else {
                Err(malformed())
            }
        }
        FieldValue::Text(raw) => raw.trim().parse::<i64>().map_err(|_| malformed()),
    }
}

pub fn calendar_fields(
    epoch_seconds: i64,
    offset: &TimeOffset,
    row: usize,
) -> Result<CalendarFields, EngineError> {
    let adjusted = DateTime::from_timestamp(epoch_seconds, 0)
        .and_then(|instant| instant.checked_add_signed(offset.as_duration()))
        .ok_or_else(|| EngineError::MalformedTimestamp {
            row,
            column: columns::CLICK_TIMESTAMP,
            value: epoch_seconds.to_string(),
        })?
        .naive_utc();

    let date = adjusted.date();
    Ok(CalendarFields {
        hour: adjusted.hour(),
        date,
        month: date.month(),
        week: date.iso_week().week(),
    })
}

pub fn add_calendar_fields(
    events: Vec<RawEvent>,
    offset: &TimeOffset,
) -> Result<Vec<TimedEvent>, EngineError> {
    offset.validate()?;

    let mut out = Vec::with_capacity(events.len());
    for (row, raw) in events.into_iter().enumerate() {
        let epoch_seconds = parse_click_timestamp(&raw.click_timestamp, row)?;
        let calendar = calendar_fields(epoch_seconds, offset, row)?;
        out.push(TimedEvent { raw, calendar });
    }

    info!(
        component = "calendar",
        event = "calendar.fields.built",
        events = out.len(),
        offset_minutes = offset.total_minutes()
    );

    Ok(out)
}

/// Day offsets from the earliest observed date. Built once per run and shared
/// by every consumer of `day_of_campaign`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignCalendar {
    first_day: NaiveDate,
    offsets: BTreeMap<NaiveDate, u32>,
}

impl CampaignCalendar {
    pub fn from_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Result<Self, EngineError> {
        let mut offsets: BTreeMap<NaiveDate, u32> =
            dates.into_iter().map(|date| (date, 0)).collect();
        let first_day = *offsets.keys().next().ok_or(EngineError::EmptyInput)?;

        for (date, offset) in offsets.iter_mut() {
            // chrono's date range keeps this well inside u32.
            *offset = (*date - first_day).num_days() as u32;
        }

        info!(
            component = "calendar",
            event = "calendar.campaign.built",
            first_day = %first_day,
            distinct_dates = offsets.len()
        );

        Ok(Self { first_day, offsets })
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        self.offsets
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.first_day)
    }

    pub fn day_of_campaign(&self, date: NaiveDate) -> Result<u32, EngineError> {
        self.offsets
            .get(&date)
            .copied()
            .ok_or(EngineError::IncompleteCalendarMapping { date })
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.offsets.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
