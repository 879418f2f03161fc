//! Monthly predictor aggregation: merging the observational reanalysis and
//! the ensemble seasonal forecast into one scalar per variable and member.

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate};

use crate::reading::gridded::{GridSource, GriddedVariable};
use crate::state::GriddedStore;

/// How daily source values collapse into the monthly scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMethod {
    Mean,
    Sum,
}

/// Which scheduled cadence is asking. The weekly cadence splices partial
/// reanalysis into the running forecast; the monthly cadence works from
/// whole months only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Weekly,
    Monthly,
}

impl Cadence {
    pub fn log_suffix(&self) -> &'static str {
        match self {
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        }
    }
}

/// One forecast realization. The ensemble mean is its own variant; it only
/// becomes member number 0 at the serialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastMember {
    Mean,
    Numbered(u32),
}

impl ForecastMember {
    pub fn number(&self) -> u32 {
        match self {
            ForecastMember::Mean => 0,
            ForecastMember::Numbered(id) => *id,
        }
    }

    pub fn from_number(number: u32) -> Self {
        if number == 0 {
            ForecastMember::Mean
        } else {
            ForecastMember::Numbered(number)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PredictorVariable {
    pub name: &'static str,
    pub short: &'static str,
    pub month: u32,
    pub method: AggregationMethod,
}

/// The three predictors, each tied to a fixed calendar month. These are
/// domain constants of the forecast model.
pub const PREDICTOR_VARIABLES: [PredictorVariable; 3] = [
    PredictorVariable {
        name: "2m_temperature",
        short: "t2m",
        month: 12,
        method: AggregationMethod::Mean,
    },
    PredictorVariable {
        name: "snowfall",
        short: "sf",
        month: 11,
        method: AggregationMethod::Sum,
    },
    PredictorVariable {
        name: "total_cloud_cover",
        short: "tcc",
        month: 9,
        method: AggregationMethod::Mean,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Observational,
    Forecast,
    ForecastBlended,
}

/// A resolved monthly scalar for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyPredictor {
    pub variable: &'static str,
    /// One value per numbered member, in member order; empty when the value
    /// came from the observational source.
    pub members: Vec<f64>,
    pub ensemble_mean: f64,
    pub provenance: Provenance,
}

/// All predictors of one run, in [`PREDICTOR_VARIABLES`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorSet {
    pub predictors: Vec<MonthlyPredictor>,
}

impl PredictorSet {
    pub fn member_count(&self) -> usize {
        self.predictors
            .iter()
            .map(|predictor| predictor.members.len())
            .max()
            .unwrap_or(0)
    }

    /// Predictor vector for one realization. A variable the source did not
    /// resolve per member (observational data has no members) falls back to
    /// its ensemble mean.
    pub fn vector_for(&self, member: ForecastMember) -> Vec<f64> {
        self.predictors
            .iter()
            .map(|predictor| match member {
                ForecastMember::Mean => predictor.ensemble_mean,
                ForecastMember::Numbered(id) => (id as usize)
                    .checked_sub(1)
                    .and_then(|index| predictor.members.get(index))
                    .copied()
                    .unwrap_or(predictor.ensemble_mean),
            })
            .collect()
    }
}

/// Resolve every predictor for the season. Any variable missing from both
/// sources aborts the whole computation; no partial forecast input is ever
/// produced.
pub fn compute_predictors(
    store: &dyn GriddedStore,
    season_year: i32,
    current_month: u32,
    day: u32,
    cadence: Cadence,
) -> Result<PredictorSet> {
    let mut predictors = Vec::new();
    for variable in &PREDICTOR_VARIABLES {
        predictors.push(resolve_variable(
            store,
            variable,
            season_year,
            current_month,
            day,
            cadence,
        )?);
    }

    Ok(PredictorSet { predictors })
}

fn resolve_variable(
    store: &dyn GriddedStore,
    variable: &PredictorVariable,
    season_year: i32,
    current_month: u32,
    day: u32,
    cadence: Cadence,
) -> Result<MonthlyPredictor> {
    // A complete observational month always wins over the forecast.
    if store.has(GridSource::Era5, variable.name, season_year, variable.month, false) {
        println!("using {} from the reanalysis", variable.name);
        let observed =
            store.load(GridSource::Era5, variable.name, season_year, variable.month, false)?;
        let value = aggregate_observational(&observed, variable.method);
        return Ok(MonthlyPredictor {
            variable: variable.name,
            members: Vec::new(),
            ensemble_mean: value,
            provenance: Provenance::Observational,
        });
    }

    let issue_month = forecast_issue_month(variable.month, current_month, day, cadence);
    if !store.has(GridSource::Seas51, variable.name, season_year, issue_month, false) {
        bail!("{} not found in any source", variable.name);
    }
    println!("using {} from the seasonal forecast", variable.name);
    let mut forecast =
        store.load(GridSource::Seas51, variable.name, season_year, issue_month, false)?;

    let mut provenance = Provenance::Forecast;
    if cadence == Cadence::Weekly
        && store.has(GridSource::Era5, variable.name, season_year, variable.month, true)
    {
        let partial =
            store.load(GridSource::Era5, variable.name, season_year, variable.month, true)?;
        if splice_partial(&mut forecast, &partial, variable.method)? {
            println!("updating {} with partial reanalysis", variable.name);
            provenance = Provenance::ForecastBlended;
        }
    }

    let members = aggregate_forecast(&forecast, variable.method, season_year, variable.month)?;
    let ensemble_mean = members.iter().sum::<f64>() / members.len() as f64;

    Ok(MonthlyPredictor {
        variable: variable.name,
        members,
        ensemble_mean,
        provenance,
    })
}

/// Which forecast issue to read. A target month already behind us was
/// covered by the forecast issued in that month; for the current or a
/// future target the weekly job keeps last month's issue until the new one
/// lands on the 7th.
pub(crate) fn forecast_issue_month(
    variable_month: u32,
    current_month: u32,
    day: u32,
    cadence: Cadence,
) -> u32 {
    if variable_month < current_month {
        return variable_month;
    }
    match cadence {
        Cadence::Monthly => current_month,
        Cadence::Weekly => {
            if day < 7 {
                if current_month == 1 {
                    12
                } else {
                    current_month - 1
                }
            } else {
                current_month
            }
        }
    }
}

pub(crate) fn aggregate_observational(observed: &GriddedVariable, method: AggregationMethod) -> f64 {
    let values = &observed.values[0];
    match method {
        AggregationMethod::Sum => values.iter().sum(),
        AggregationMethod::Mean => values.iter().sum::<f64>() / values.len().max(1) as f64,
    }
}

/// Collapse the (possibly spliced) forecast trajectory to one scalar per
/// member. `mean` averages the steps inside the target month; `sum` reads
/// the cumulative trajectory at the step nearest the end of the month.
fn aggregate_forecast(
    forecast: &GriddedVariable,
    method: AggregationMethod,
    year: i32,
    month: u32,
) -> Result<Vec<f64>> {
    if forecast.times.is_empty() {
        bail!("{}: forecast has no time steps", forecast.name);
    }
    let mut members = Vec::with_capacity(forecast.values.len());
    match method {
        AggregationMethod::Mean => {
            let in_month: Vec<usize> = (0..forecast.times.len())
                .filter(|&step| {
                    let time = forecast.times[step];
                    time.year() == year && time.month() == month
                })
                .collect();
            if in_month.is_empty() {
                bail!(
                    "{}: forecast covers no step in {:04}-{:02}",
                    forecast.name,
                    year,
                    month
                );
            }
            for row in &forecast.values {
                let sum: f64 = in_month.iter().map(|&step| row[step]).sum();
                members.push(sum / in_month.len() as f64);
            }
        }
        AggregationMethod::Sum => {
            let target = last_day_of_month(year, month)?;
            let nearest = (0..forecast.times.len())
                .min_by_key(|&step| (forecast.times[step] - target).num_days().abs())
                .unwrap();
            for row in &forecast.values {
                members.push(row[nearest]);
            }
        }
    }

    Ok(members)
}

/// Splice a partial observational month into the forecast trajectory at the
/// calendar days actually covered. Returns false when the two series do not
/// overlap. For cumulative (`sum`) variables the tail of the trajectory is
/// rebased so the totals after the splice neither double-count nor lose the
/// forecast's own evolution.
fn splice_partial(
    forecast: &mut GriddedVariable,
    observed: &GriddedVariable,
    method: AggregationMethod,
) -> Result<bool> {
    if observed.is_ensemble() {
        bail!("{}: partial extract has ensemble members", observed.name);
    }
    let observed_values = &observed.values[0];

    // The forecast may miss the first day(s) of the month when it was issued
    // inside that month; skip the leading observational days it cannot hold.
    let Some(first) = observed
        .times
        .iter()
        .position(|time| forecast.position(*time).is_some())
    else {
        return Ok(false);
    };
    let start = forecast.position(observed.times[first]).unwrap();
    let Some(end) = forecast.position(*observed.times.last().unwrap()) else {
        bail!(
            "{}: partial extract ends outside the forecast time axis",
            observed.name
        );
    };
    if end - start != observed.times.len() - 1 - first {
        bail!("{}: partial extract is misaligned with the forecast", observed.name);
    }

    match method {
        AggregationMethod::Mean => {
            for row in &mut forecast.values {
                row[start..=end].copy_from_slice(&observed_values[first..]);
            }
        }
        AggregationMethod::Sum => {
            // Running totals since the start of the month, including the
            // days the forecast axis cannot represent.
            let mut totals = Vec::with_capacity(observed_values.len());
            let mut acc = 0.0;
            for value in observed_values {
                acc += value;
                totals.push(acc);
            }
            for row in &mut forecast.values {
                let base = if first == 0 && start > 0 {
                    row[start - 1]
                } else {
                    0.0
                };
                let old_at_end = row[end];
                for step in start..=end {
                    row[step] = base + totals[first + (step - start)];
                }
                let shift = row[end] - old_at_end;
                for value in row[end + 1..].iter_mut() {
                    *value += shift;
                }
            }
        }
    }

    Ok(true)
}

fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|date| date.pred_opt())
        .ok_or_else(|| anyhow::anyhow!("bad month {:04}-{:02}", year, month))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use crate::state::fixtures::MemGriddedStore;

    fn nov(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 11, day).unwrap()
    }

    fn forecast_fixture(times: Vec<NaiveDate>, rows: Vec<Vec<f64>>) -> GriddedVariable {
        let members = (0..rows.len() as u32).collect();
        GriddedVariable::new("snowfall".to_string(), "m".to_string(), times, members, rows)
            .unwrap()
    }

    fn observed_fixture(times: Vec<NaiveDate>, values: Vec<f64>) -> GriddedVariable {
        GriddedVariable::new(
            "snowfall".to_string(),
            "m".to_string(),
            times,
            vec![],
            vec![values],
        )
        .unwrap()
    }

    #[test]
    fn should_rebase_cumulative_tail_when_splicing() {
        let mut forecast = forecast_fixture(
            vec![nov(1), nov(2), nov(3), nov(4)],
            vec![vec![10.0, 20.0, 30.0, 40.0]],
        );
        let observed = observed_fixture(vec![nov(1), nov(2)], vec![5.0, 4.0]);

        let blended = splice_partial(&mut forecast, &observed, AggregationMethod::Sum).unwrap();

        assert!(blended);
        assert_eq!(forecast.values[0], vec![5.0, 9.0, 19.0, 29.0]);
    }

    #[test]
    fn should_skip_leading_day_the_forecast_cannot_hold() {
        // Issued inside the month: the forecast starts on the 2nd.
        let mut forecast = forecast_fixture(
            vec![nov(2), nov(3), nov(4), nov(5)],
            vec![vec![1.0, 2.0, 3.0, 4.0]],
        );
        let observed = observed_fixture(vec![nov(1), nov(2), nov(3)], vec![5.0, 4.0, 1.0]);

        splice_partial(&mut forecast, &observed, AggregationMethod::Sum).unwrap();

        // Totals include the skipped first day; the tail keeps its own
        // increments on top of the new boundary total.
        assert_eq!(forecast.values[0], vec![9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn should_overwrite_steps_for_mean_variables() {
        let mut forecast = forecast_fixture(
            vec![nov(1), nov(2), nov(3), nov(4)],
            vec![vec![1.0, 1.0, 1.0, 1.0], vec![2.0, 2.0, 2.0, 2.0]],
        );
        let observed = observed_fixture(vec![nov(1), nov(2)], vec![7.0, 8.0]);

        splice_partial(&mut forecast, &observed, AggregationMethod::Mean).unwrap();

        assert_eq!(forecast.values[0], vec![7.0, 8.0, 1.0, 1.0]);
        assert_eq!(forecast.values[1], vec![7.0, 8.0, 2.0, 2.0]);
    }

    #[test]
    fn should_report_no_overlap() {
        let mut forecast = forecast_fixture(vec![nov(10), nov(11)], vec![vec![1.0, 2.0]]);
        let observed = observed_fixture(vec![nov(1), nov(2)], vec![5.0, 4.0]);

        let blended = splice_partial(&mut forecast, &observed, AggregationMethod::Sum).unwrap();

        assert!(!blended);
        assert_eq!(forecast.values[0], vec![1.0, 2.0]);
    }

    #[test]
    fn should_prefer_full_reanalysis_over_forecast() {
        let mut store = MemGriddedStore::default();
        store.insert(
            GridSource::Era5,
            2023,
            11,
            false,
            observed_fixture(vec![nov(1), nov(2), nov(3)], vec![0.1, 0.2, 0.3]),
        );
        store.insert(
            GridSource::Seas51,
            2023,
            11,
            false,
            forecast_fixture(vec![nov(2), nov(3)], vec![vec![9.0, 9.0]]),
        );

        let variable = &PREDICTOR_VARIABLES[1];
        let predictor =
            resolve_variable(&store, variable, 2023, 11, 10, Cadence::Weekly).unwrap();

        assert_eq!(predictor.provenance, Provenance::Observational);
        assert!(predictor.members.is_empty());
        assert!((predictor.ensemble_mean - 0.6).abs() < 1e-12);
    }

    #[test]
    fn should_average_members_into_ensemble_mean() {
        let mut store = MemGriddedStore::default();
        let times = vec![nov(2), nov(3), nov(30)];
        store.insert(
            GridSource::Seas51,
            2023,
            11,
            false,
            forecast_fixture(
                times,
                vec![vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 4.0]],
            ),
        );

        let variable = &PREDICTOR_VARIABLES[1];
        let predictor =
            resolve_variable(&store, variable, 2023, 11, 10, Cadence::Weekly).unwrap();

        assert_eq!(predictor.provenance, Provenance::Forecast);
        assert_eq!(predictor.members, vec![2.0, 4.0]);
        assert!((predictor.ensemble_mean - 3.0).abs() < 1e-12);
    }

    #[test]
    fn should_abort_when_no_source_has_the_variable() {
        let store = MemGriddedStore::default();

        let result = compute_predictors(&store, 2023, 11, 10, Cadence::Weekly);

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("not found in any source"));
    }

    #[test]
    fn should_pick_issue_month_per_cadence() {
        // Target month already behind us: use its own issue.
        assert_eq!(forecast_issue_month(9, 11, 3, Cadence::Weekly), 9);
        // Current target, before the 7th: last month's issue.
        assert_eq!(forecast_issue_month(11, 11, 3, Cadence::Weekly), 10);
        // Current target, from the 7th: this month's issue.
        assert_eq!(forecast_issue_month(11, 11, 9, Cadence::Weekly), 11);
        // January wraps to December.
        assert_eq!(forecast_issue_month(12, 1, 3, Cadence::Weekly), 12);
        // Monthly cadence always reads the current issue.
        assert_eq!(forecast_issue_month(11, 11, 3, Cadence::Monthly), 11);
    }

    #[test]
    fn should_fall_back_to_ensemble_mean_in_vectors() {
        let set = PredictorSet {
            predictors: vec![
                MonthlyPredictor {
                    variable: "2m_temperature",
                    members: vec![],
                    ensemble_mean: -5.0,
                    provenance: Provenance::Observational,
                },
                MonthlyPredictor {
                    variable: "snowfall",
                    members: vec![0.1, 0.3],
                    ensemble_mean: 0.2,
                    provenance: Provenance::Forecast,
                },
            ],
        };

        assert_eq!(set.member_count(), 2);
        assert_eq!(set.vector_for(ForecastMember::Mean), vec![-5.0, 0.2]);
        assert_eq!(
            set.vector_for(ForecastMember::Numbered(2)),
            vec![-5.0, 0.3]
        );
    }
}
