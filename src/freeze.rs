//! Freeze-up detection: season windows, freeze-up date extraction and the
//! extended day-of-year arithmetic that keeps November-to-May comparable.

use chrono::{Datelike, Duration, NaiveDate};

use crate::series::DailySeries;
use crate::state::SeasonState;

/// The river is considered frozen once the corrected water temperature
/// drops to this value. Chosen for best correspondence with freeze-up
/// dates from ice charts and satellite imagery.
pub const FREEZE_THRESHOLD: f64 = 0.75;

// Freeze-up is searched between Nov 1 and May 31 of the following year.
const SEARCH_START_MONTH: u32 = 11;
const SEARCH_END_MONTH: u32 = 5;

pub fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

pub fn days_in_year(year: i32) -> i64 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// The July-anchored 365-day window used to line up winters across years.
/// In leap years the start shifts one day-of-year later so the distance to
/// the end of the calendar year stays the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonWindow {
    pub start_year: i32,
}

impl SeasonWindow {
    pub fn containing(date: NaiveDate) -> SeasonWindow {
        let start_year = if date.month() >= 7 {
            date.year()
        } else {
            date.year() - 1
        };
        SeasonWindow { start_year }
    }

    pub fn start(&self) -> NaiveDate {
        let ordinal = if is_leap_year(self.start_year) { 183 } else { 182 };
        NaiveDate::from_yo_opt(self.start_year, ordinal).unwrap()
    }

    pub fn end(&self) -> NaiveDate {
        NaiveDate::from_yo_opt(self.start_year + 1, 181).unwrap()
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.start_year, self.start_year + 1)
    }
}

/// Freeze-up outcome of one winter season.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreezeUpRecord {
    /// Calendar year the season started in (its November).
    pub season: i32,
    pub observed_date: Option<NaiveDate>,
    pub observed_doy: Option<i64>,
    pub forecast_date: Option<NaiveDate>,
    pub forecast_doy: Option<i64>,
    pub is_frozen: bool,
}

impl FreezeUpRecord {
    pub fn unresolved(season: i32) -> Self {
        FreezeUpRecord {
            season,
            observed_date: None,
            observed_doy: None,
            forecast_date: None,
            forecast_doy: None,
            is_frozen: false,
        }
    }
}

/// Day-of-year within the season's start year, extended past 365/366 for
/// dates that fall in the following calendar year so the series stays
/// monotonic across January 1. Anything before day 300 of a January-anchored
/// count belongs to the next year.
pub fn extended_doy(date: NaiveDate, season_year: i32) -> i64 {
    let ordinal = date.ordinal() as i64;
    if ordinal < 300 {
        ordinal + days_in_year(season_year)
    } else {
        ordinal
    }
}

/// Map a forecasted day-of-year back to a calendar date. Forecast doys use a
/// fixed 365-day year, so in leap years the January anchor shifts one day.
pub fn doy_to_date(doy: f64, season_year: i32) -> Option<NaiveDate> {
    let rounded = doy.round() as i64;
    if rounded > 365 {
        let anchor = NaiveDate::from_ymd_opt(season_year + 1, 1, 1)?;
        anchor.checked_add_signed(Duration::days(rounded - 366))
    } else {
        let anchor = NaiveDate::from_ymd_opt(season_year, 1, 1)?;
        let offset = if is_leap_year(season_year) {
            rounded
        } else {
            rounded - 1
        };
        anchor.checked_add_signed(Duration::days(offset))
    }
}

/// Derive the per-season freeze-up records from the offset-corrected daily
/// series: the first day at or below the threshold between November 1 and
/// May 31. A season without such a day stays unresolved.
pub fn extract_freeze_up_dates(no_offset: &DailySeries) -> Vec<FreezeUpRecord> {
    let (Some(first), Some(last)) = (no_offset.first_date(), no_offset.last_date()) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for season in first.year()..last.year() {
        let start = NaiveDate::from_ymd_opt(season, SEARCH_START_MONTH, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(season + 1, SEARCH_END_MONTH, 31).unwrap();
        let mut record = FreezeUpRecord::unresolved(season);
        for index in no_offset.range(start, end) {
            if let Some(value) = no_offset.value(index) {
                if value <= FREEZE_THRESHOLD {
                    let date = no_offset.date(index);
                    record.observed_date = Some(date);
                    record.observed_doy = Some(extended_doy(date, season));
                    record.is_frozen = true;
                    break;
                }
            }
        }
        records.push(record);
    }

    records
}

/// Climatological freeze-up day: the mean of all observed extended doys,
/// renormalized into [1, 365].
pub fn climatological_freeze_doy(records: &[FreezeUpRecord]) -> Option<i64> {
    let doys: Vec<i64> = records.iter().filter_map(|record| record.observed_doy).collect();
    if doys.is_empty() {
        return None;
    }
    let mean = doys.iter().sum::<i64>() as f64 / doys.len() as f64;
    let mut doy = mean.round() as i64;
    if doy > 365 {
        doy -= 365;
    }
    Some(doy)
}

/// Daily operational check: flip the persisted state to frozen the first
/// day the series dips below the threshold. The flag stays set until the
/// between-season reset. Returns true when the state transitioned.
pub fn update_freeze_state(state: &mut SeasonState, date: NaiveDate, value: f64) -> bool {
    if value < FREEZE_THRESHOLD && !state.frozen {
        state.frozen = true;
        state.frozen_date = Some(date);
        return true;
    }
    false
}

// -- Tests -------------------------------------------------------------------
