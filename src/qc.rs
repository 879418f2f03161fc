//! Quality control of the water temperature record: the yearly batch pass
//! over the daily series and the quick smoothing applied to raw minute
//! samples before daily averaging.

use chrono::Datelike;

use crate::reading::thermistor::RawSample;
use crate::series::DailySeries;

/// Rate below which a day-to-day change counts as "no change" (°C/day).
pub const STUCK_RATE: f64 = 0.1;
/// A no-change run of at least this many days above [`WARM_LIMIT`] is an
/// instrument fault; real winter plateaus sit near 0 °C.
pub const STUCK_RUN_DAYS: usize = 7;
pub const WARM_LIMIT: f64 = 2.0;
/// Gaps up to this many days are closed by linear interpolation.
pub const MAX_GAP_DAYS: i64 = 7;
/// Climatological outlier cut, in multiples of the mean per-day standard
/// deviation.
const CLIMATOLOGY_SPREAD: f64 = 5.0;
/// Thermal-stability bound on the first and second derivative used when
/// isolating presumed-frozen samples.
const STABILITY_RATE: f64 = 0.1;

// Bounds for the raw minute samples.
const RAW_MAX_HOURLY_RATE: f64 = 1.0;
const RAW_MAX_VALUE: f64 = 30.0;
const RAW_MAX_DAILY_DEVIATION: f64 = 3.0;

/// The three series produced by the yearly pass.
pub struct QcOutput {
    pub processed: DailySeries,
    pub offset: DailySeries,
    pub no_offset: DailySeries,
}

/// Run the yearly pipeline over the full historical daily series. Stages
/// mask suspect days; no row is ever removed from the axis.
pub fn run_pipeline(raw: &DailySeries) -> QcOutput {
    let mut processed = raw.clone();
    processed.densify();
    mask_stuck_runs(&mut processed);
    mask_jumps(&mut processed);
    mask_climatological_outliers(&mut processed);
    floor_at_zero(&mut processed);
    processed.interpolate_gaps(MAX_GAP_DAYS);

    let offset = winter_offsets(&processed);
    let mut no_offset = subtract_offset(&processed, &offset);
    floor_at_zero(&mut no_offset);

    QcOutput {
        processed,
        offset,
        no_offset,
    }
}

/// Mask runs of at least [`STUCK_RUN_DAYS`] consecutive days whose
/// day-to-day change stays below [`STUCK_RATE`] while the temperature sits
/// above [`WARM_LIMIT`].
pub fn mask_stuck_runs(series: &mut DailySeries) {
    let values: Vec<Option<f64>> = series.points().iter().map(|(_, value)| *value).collect();
    let filled = forward_fill(&values);

    let warm = |index: usize| matches!(values[index], Some(value) if value > WARM_LIMIT);
    // linked(i) means days i-1 and i belong to the same no-change warm run
    let linked = |index: usize| {
        if index == 0 || !warm(index - 1) || !warm(index) {
            return false;
        }
        match (filled[index - 1], filled[index]) {
            (Some(previous), Some(current)) => (current - previous).abs() < STUCK_RATE,
            _ => false,
        }
    };

    let mut start = 0;
    while start < values.len() {
        let mut end = start;
        while end + 1 < values.len() && linked(end + 1) {
            end += 1;
        }
        if end - start + 1 >= STUCK_RUN_DAYS {
            for index in start..=end {
                series.set_value(index, None);
            }
        }
        start = end + 1;
    }
}

/// Mask single-sample spikes: days whose second derivative magnitude
/// exceeds the series-wide mean plus one standard deviation of those
/// magnitudes.
pub fn mask_jumps(series: &mut DailySeries) {
    let values: Vec<Option<f64>> = series.points().iter().map(|(_, value)| *value).collect();
    let filled = forward_fill(&values);
    let rate = central_rate(&filled);
    let second = central_rate(&rate);

    let magnitudes: Vec<f64> = second.iter().flatten().map(|value| value.abs()).collect();
    let Some((mean, std)) = mean_and_std(&magnitudes) else {
        return;
    };
    let threshold = mean + std;

    for (index, value) in second.iter().enumerate() {
        if let Some(value) = value {
            if value.abs() > threshold {
                series.set_value(index, None);
            }
        }
    }
}

/// Mask days straying too far from their day-of-year climatology. The cut
/// is measured against the mean of all days' standard deviations, not the
/// day's own, so naturally variable days are not over-masked.
pub fn mask_climatological_outliers(series: &mut DailySeries) {
    use std::collections::HashMap;

    let mut groups: HashMap<(u32, u32), Vec<f64>> = HashMap::new();
    for (date, value) in series.points() {
        if let Some(value) = value {
            groups.entry((date.month(), date.day())).or_default().push(*value);
        }
    }

    let mut means: HashMap<(u32, u32), f64> = HashMap::new();
    let mut stds = Vec::with_capacity(groups.len());
    for (key, values) in &groups {
        let (mean, std) = mean_and_std(values).unwrap();
        means.insert(*key, mean);
        stds.push(std);
    }
    let Some((mean_std, _)) = mean_and_std(&stds) else {
        return;
    };
    let threshold = CLIMATOLOGY_SPREAD * mean_std;

    for index in 0..series.len() {
        let date = series.date(index);
        if let Some(value) = series.value(index) {
            let mean = means[&(date.month(), date.day())];
            if (value - mean).abs() > threshold {
                series.set_value(index, None);
            }
        }
    }
}

/// The sensor cannot read below freezing; clamp negatives to 0.
pub fn floor_at_zero(series: &mut DailySeries) {
    for index in 0..series.len() {
        if let Some(value) = series.value(index) {
            if value < 0.0 {
                series.set_value(index, Some(0.0));
            }
        }
    }
}

/// Estimate the per-winter instrument offset: the residual warmth the
/// intake water keeps when the river is fully frozen. Thermally stable
/// near-freezing samples are averaged over each December-to-April window
/// and the sparse per-winter values are interpolated over the whole
/// timeline.
pub fn winter_offsets(processed: &DailySeries) -> DailySeries {
    let values: Vec<Option<f64>> = processed.points().iter().map(|(_, value)| *value).collect();
    let filled = forward_fill(&values);
    let rate = central_rate(&filled);
    let second = central_rate(&rate);

    let stable = |index: usize| -> Option<f64> {
        let value = values[index]?;
        if value > WARM_LIMIT {
            return None;
        }
        if rate[index]?.abs() > STABILITY_RATE || second[index]?.abs() > STABILITY_RATE {
            return None;
        }
        Some(value)
    };

    let mut offset = DailySeries::from_points(
        processed.points().iter().map(|(date, _)| (*date, None)).collect(),
    );
    let (Some(first), Some(last)) = (processed.first_date(), processed.last_date()) else {
        return offset;
    };

    for year in first.year()..=last.year() {
        let start = chrono::NaiveDate::from_ymd_opt(year - 1, 12, 1).unwrap();
        let end = chrono::NaiveDate::from_ymd_opt(year, 4, 30).unwrap();
        let window = processed.range(start, end);
        let samples: Vec<f64> = window.clone().filter_map(stable).collect();
        if samples.is_empty() {
            continue;
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        for index in window {
            offset.set_value(index, Some(mean));
        }
    }

    // bridge the summers between winter windows; outside the covered span
    // the offset stays unknown
    offset.interpolate_gaps(i64::MAX);

    offset
}

fn subtract_offset(processed: &DailySeries, offset: &DailySeries) -> DailySeries {
    let points = processed
        .points()
        .iter()
        .map(|(date, value)| {
            let corrected = match (value, offset.get(*date)) {
                (Some(value), Some(offset)) => Some(value - offset),
                _ => None,
            };
            (*date, corrected)
        })
        .collect();
    DailySeries::from_points(points)
}

/// Quick smoothing of raw minute samples before daily averaging: drop
/// implausible rates and magnitudes, drop samples far above their day's
/// mean, then close the holes by linear interpolation in time.
pub fn smooth_raw_samples(samples: &mut [RawSample]) {
    use std::collections::HashMap;

    let mut previous: Option<(chrono::NaiveDateTime, f64)> = None;
    for sample in samples.iter_mut() {
        let Some(value) = sample.temperature else {
            continue;
        };
        if value >= RAW_MAX_VALUE {
            sample.temperature = None;
            continue;
        }
        if let Some((time, last)) = previous {
            let hours = (sample.timestamp - time).num_minutes() as f64 / 60.0;
            if hours > 0.0 && ((value - last) / hours).abs() > RAW_MAX_HOURLY_RATE {
                sample.temperature = None;
                continue;
            }
        }
        previous = Some((sample.timestamp, value));
    }

    let mut sums: HashMap<chrono::NaiveDate, (f64, usize)> = HashMap::new();
    for sample in samples.iter() {
        if let Some(value) = sample.temperature {
            let entry = sums.entry(sample.timestamp.date()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    for sample in samples.iter_mut() {
        if let Some(value) = sample.temperature {
            let (sum, count) = sums[&sample.timestamp.date()];
            if value - sum / count as f64 > RAW_MAX_DAILY_DEVIATION {
                sample.temperature = None;
            }
        }
    }

    interpolate_samples(samples);
}

fn interpolate_samples(samples: &mut [RawSample]) {
    let mut last_known: Option<usize> = None;
    for index in 0..samples.len() {
        if samples[index].temperature.is_none() {
            continue;
        }
        if let Some(previous) = last_known {
            if index > previous + 1 {
                let (t0, v0) = (samples[previous].timestamp, samples[previous].temperature.unwrap());
                let (t1, v1) = (samples[index].timestamp, samples[index].temperature.unwrap());
                let span = (t1 - t0).num_minutes() as f64;
                for hole in previous + 1..index {
                    let t = (samples[hole].timestamp - t0).num_minutes() as f64 / span;
                    samples[hole].temperature = Some(v0 + t * (v1 - v0));
                }
            }
        }
        last_known = Some(index);
    }
}

fn forward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut filled = Vec::with_capacity(values.len());
    let mut last = None;
    for value in values {
        if value.is_some() {
            last = *value;
        }
        filled.push(last);
    }
    filled
}

/// Centered per-day derivative, one-sided at the ends.
fn central_rate(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let n = values.len();
    (0..n)
        .map(|index| {
            let previous = if index > 0 { values[index - 1] } else { values[index] };
            let next = if index + 1 < n { values[index + 1] } else { values[index] };
            match (previous, next) {
                (Some(a), Some(b)) => {
                    let days = if index == 0 || index + 1 == n { 1.0 } else { 2.0 };
                    Some((b - a) / days)
                }
                _ => None,
            }
        })
        .collect()
}

fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some((mean, variance.sqrt()))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn series_from(values: &[Option<f64>]) -> DailySeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        DailySeries::from_points(
            values
                .iter()
                .enumerate()
                .map(|(offset, value)| (start + chrono::Duration::days(offset as i64), *value))
                .collect(),
        )
    }

    fn flat_run_series(run_days: usize) -> DailySeries {
        let mut values = vec![Some(3.0), Some(4.0)];
        values.extend(std::iter::repeat(Some(5.0)).take(run_days));
        values.push(Some(6.0));
        values.push(Some(7.0));
        series_from(&values)
    }

    #[test]
    fn should_mask_eight_day_flat_run() {
        let mut series = flat_run_series(8);
        mask_stuck_runs(&mut series);

        for index in 2..10 {
            assert_eq!(series.value(index), None, "day {} should be masked", index);
        }
        assert_eq!(series.value(1), Some(4.0));
        assert_eq!(series.value(10), Some(6.0));
    }

    #[test]
    fn should_keep_six_day_flat_run() {
        let mut series = flat_run_series(6);
        mask_stuck_runs(&mut series);

        for index in 0..series.len() {
            assert!(series.value(index).is_some());
        }
    }

    #[test]
    fn should_keep_cold_plateau() {
        // A near-freezing plateau is the river being frozen, not a fault.
        let mut values = vec![Some(2.5), Some(1.5)];
        values.extend(std::iter::repeat(Some(0.8)).take(10));
        let mut series = series_from(&values);

        mask_stuck_runs(&mut series);

        for index in 0..series.len() {
            assert!(series.value(index).is_some());
        }
    }

    #[test]
    fn should_mask_spike_as_jump() {
        let mut values = vec![Some(10.0); 21];
        values[10] = Some(20.0);
        let mut series = series_from(&values);

        mask_jumps(&mut series);

        assert_eq!(series.value(10), None);
        assert_eq!(series.value(2), Some(10.0));
    }

    #[test]
    fn should_mask_climatological_outlier() {
        let mut points = Vec::new();
        for year in 2001..=2006 {
            for day in 1..=10 {
                let date = NaiveDate::from_ymd_opt(year, 1, day).unwrap();
                let value = if year == 2006 && day == 5 { 12.0 } else { 5.0 };
                points.push((date, Some(value)));
            }
        }
        let mut series = DailySeries::from_points(points);

        mask_climatological_outliers(&mut series);

        let outlier = NaiveDate::from_ymd_opt(2006, 1, 5).unwrap();
        assert_eq!(series.get(outlier), None);
        let untouched = NaiveDate::from_ymd_opt(2005, 1, 5).unwrap();
        assert_eq!(series.get(untouched), Some(5.0));
    }

    #[test]
    fn should_floor_negatives() {
        let mut series = series_from(&[Some(-0.3), Some(0.2), None]);
        floor_at_zero(&mut series);

        assert_eq!(series.value(0), Some(0.0));
        assert_eq!(series.value(1), Some(0.2));
        assert_eq!(series.value(2), None);
    }

    fn winter_series() -> DailySeries {
        let start = NaiveDate::from_ymd_opt(2001, 7, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2003, 6, 30).unwrap();
        let mut points = Vec::new();
        let mut day = start;
        while day <= end {
            let in_winter = matches!(day.month(), 12 | 1 | 2 | 3 | 4);
            let value = if in_winter { 0.8 } else { 5.0 };
            points.push((day, Some(value)));
            day = day.succ_opt().unwrap();
        }
        DailySeries::from_points(points)
    }

    #[test]
    fn should_anchor_offsets_to_each_winter() {
        let processed = winter_series();
        let offset = winter_offsets(&processed);

        let mid_winter = NaiveDate::from_ymd_opt(2002, 1, 15).unwrap();
        assert!((offset.get(mid_winter).unwrap() - 0.8).abs() < 1e-9);
        // summers between winters are bridged
        let summer = NaiveDate::from_ymd_opt(2002, 8, 1).unwrap();
        assert!((offset.get(summer).unwrap() - 0.8).abs() < 1e-9);
        // before the first winter the offset is unknown
        let before = NaiveDate::from_ymd_opt(2001, 8, 1).unwrap();
        assert_eq!(offset.get(before), None);
    }

    #[test]
    fn should_keep_output_non_negative() {
        let output = run_pipeline(&winter_series());

        for (_, value) in output.processed.points() {
            if let Some(value) = value {
                assert!(*value >= 0.0);
            }
        }
        for (_, value) in output.no_offset.points() {
            if let Some(value) = value {
                assert!(*value >= 0.0);
            }
        }
        // frozen winters collapse to 0 once the offset is removed
        let mid_winter = NaiveDate::from_ymd_opt(2002, 1, 15).unwrap();
        let corrected = output.no_offset.get(mid_winter).unwrap();
        assert!(corrected.abs() < 1e-9);
    }

    #[test]
    fn should_smooth_raw_spikes() {
        let t = |hour: u32| {
            NaiveDateTime::parse_from_str(
                &format!("2024-12-18 {:02}:00:00", hour),
                "%Y-%m-%d %H:%M:%S",
            )
            .unwrap()
        };
        let mut samples = vec![
            RawSample { timestamp: t(12), temperature: Some(1.0) },
            RawSample { timestamp: t(13), temperature: Some(35.0) },
            RawSample { timestamp: t(14), temperature: Some(1.2) },
        ];

        smooth_raw_samples(&mut samples);

        // the spike is replaced by the interpolation of its neighbours
        let smoothed = samples[1].temperature.unwrap();
        assert!((smoothed - 1.1).abs() < 1e-9);
    }
}
