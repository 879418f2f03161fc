//! Ordered daily series of water temperature observations.

use chrono::NaiveDate;

/// A daily time series: strictly ascending dates, at most one value per day.
/// A `None` value is a day that exists on the time axis but holds no usable
/// observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailySeries {
    points: Vec<(NaiveDate, Option<f64>)>,
}

impl DailySeries {
    pub fn new() -> Self {
        DailySeries { points: Vec::new() }
    }

    /// Build a series from unordered, possibly duplicated points. Later
    /// entries win on duplicate dates.
    pub fn from_points(mut points: Vec<(NaiveDate, Option<f64>)>) -> Self {
        points.sort_by_key(|(date, _)| *date);
        dedup_keep_last(&mut points);
        DailySeries { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[(NaiveDate, Option<f64>)] {
        &self.points
    }

    pub fn date(&self, index: usize) -> NaiveDate {
        self.points[index].0
    }

    pub fn value(&self, index: usize) -> Option<f64> {
        self.points[index].1
    }

    pub fn set_value(&mut self, index: usize, value: Option<f64>) {
        self.points[index].1 = value;
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|(date, _)| *date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|(date, _)| *date)
    }

    pub fn last_point(&self) -> Option<(NaiveDate, Option<f64>)> {
        self.points.last().copied()
    }

    /// Value recorded on `date`, if the day is on the axis and holds one.
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        match self.points.binary_search_by_key(&date, |(d, _)| *d) {
            Ok(index) => self.points[index].1,
            Err(_) => None,
        }
    }

    /// Indices of the points falling in `[start, end]`.
    pub fn range(&self, start: NaiveDate, end: NaiveDate) -> std::ops::Range<usize> {
        let lo = self.points.partition_point(|(d, _)| *d < start);
        let hi = self.points.partition_point(|(d, _)| *d <= end);
        lo..hi
    }

    /// Merge another series into this one. On duplicate dates the other
    /// series wins; the result is resorted ascending.
    pub fn merge(&mut self, other: &DailySeries) {
        self.points.extend_from_slice(&other.points);
        self.points.sort_by_key(|(date, _)| *date);
        dedup_keep_last(&mut self.points);
    }

    /// Insert missing-value days so the axis is contiguous between the first
    /// and last date.
    pub fn densify(&mut self) {
        let (Some(first), Some(last)) = (self.first_date(), self.last_date()) else {
            return;
        };
        let span = (last - first).num_days() as usize + 1;
        if span == self.points.len() {
            return;
        }
        let mut dense = Vec::with_capacity(span);
        let mut index = 0;
        let mut day = first;
        while day <= last {
            if index < self.points.len() && self.points[index].0 == day {
                dense.push(self.points[index]);
                index += 1;
            } else {
                dense.push((day, None));
            }
            day = day.succ_opt().expect("date overflow");
        }
        self.points = dense;
    }

    /// Linearly interpolate runs of missing values bounded by observations
    /// on both sides, when the bounding dates are at most `max_gap_days + 1`
    /// days apart. Longer gaps and gaps at either end stay missing.
    pub fn interpolate_gaps(&mut self, max_gap_days: i64) {
        let mut last_known: Option<usize> = None;
        for i in 0..self.points.len() {
            if self.points[i].1.is_none() {
                continue;
            }
            if let Some(prev) = last_known {
                if i > prev + 1 {
                    let (d0, v0) = (self.points[prev].0, self.points[prev].1.unwrap());
                    let (d1, v1) = (self.points[i].0, self.points[i].1.unwrap());
                    let span = (d1 - d0).num_days();
                    if span - 1 <= max_gap_days {
                        for j in prev + 1..i {
                            let t = (self.points[j].0 - d0).num_days() as f64 / span as f64;
                            self.points[j].1 = Some(v0 + t * (v1 - v0));
                        }
                    }
                }
            }
            last_known = Some(i);
        }
    }
}

fn dedup_keep_last(points: &mut Vec<(NaiveDate, Option<f64>)>) {
    let mut deduped: Vec<(NaiveDate, Option<f64>)> = Vec::with_capacity(points.len());
    for point in points.drain(..) {
        match deduped.last() {
            Some((date, _)) if *date == point.0 => {
                *deduped.last_mut().unwrap() = point;
            }
            _ => deduped.push(point),
        }
    }
    *points = deduped;
}

// -- Tests -------------------------------------------------------------------
