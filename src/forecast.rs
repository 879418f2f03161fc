//! The freeze-up forecast: a least-squares fit of the predictor history,
//! evaluated for the ensemble mean and every member.

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};

use crate::predictors::{ForecastMember, PredictorSet};
use crate::store::forecast_log::ForecastRow;
use crate::store::predictor_table::PredictorTable;

/// Ordinary least squares with an intercept.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64]) -> Result<LinearModel> {
        if rows.len() != targets.len() {
            bail!("{} predictor rows for {} targets", rows.len(), targets.len());
        }
        let width = rows.first().map(|row| row.len()).unwrap_or(0);
        if width == 0 {
            bail!("nothing to fit");
        }
        if rows.len() <= width {
            bail!(
                "only {} seasons of history for {} coefficients",
                rows.len(),
                width + 1
            );
        }

        let mut data = Vec::with_capacity(rows.len() * (width + 1));
        for row in rows {
            if row.len() != width {
                bail!("ragged predictor row");
            }
            data.push(1.0);
            data.extend_from_slice(row);
        }
        let design = DMatrix::from_row_slice(rows.len(), width + 1, &data);
        let observed = DVector::from_column_slice(targets);

        let svd = design.svd(true, true);
        let beta = svd
            .solve(&observed, 1e-10)
            .map_err(|err| anyhow!("least-squares solve failed: {}", err))?;

        Ok(LinearModel {
            intercept: beta[0],
            coefficients: beta.iter().skip(1).copied().collect(),
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept
            + row
                .iter()
                .zip(&self.coefficients)
                .map(|(value, coefficient)| value * coefficient)
                .sum::<f64>()
    }
}

/// Fit on the seasons that have both predictors and a recorded freeze-up.
pub fn fit_history(table: &PredictorTable) -> Result<LinearModel> {
    let mut rows = Vec::new();
    let mut targets = Vec::new();
    for index in 0..table.len() {
        if let Some(fudoy) = table.fudoy[index] {
            rows.push(vec![table.t2m[index], table.sf[index], table.tcc[index]]);
            targets.push(fudoy);
        }
    }
    if rows.is_empty() {
        bail!("predictor history holds no season with a recorded freeze-up");
    }

    LinearModel::fit(&rows, &targets)
}

/// Produce the forecast rows for one issue date: the ensemble mean first
/// (so a failed mean write never strands member rows), then each member.
pub fn run_forecast(
    table: &PredictorTable,
    set: &PredictorSet,
    issued: NaiveDate,
) -> Result<Vec<ForecastRow>> {
    let model = fit_history(table)?;

    let mut rows = Vec::new();
    let mean = model.predict(&set.vector_for(ForecastMember::Mean));
    rows.push(ForecastRow {
        issued,
        member: ForecastMember::Mean,
        fud: mean.round() as i64,
    });
    for number in 1..=set.member_count() as u32 {
        let doy = model.predict(&set.vector_for(ForecastMember::Numbered(number)));
        rows.push(ForecastRow {
            issued,
            member: ForecastMember::Numbered(number),
            fud: doy.round() as i64,
        });
    }

    Ok(rows)
}

/// Of the two most recent logs, the one with the later issue date is
/// authoritative for display. Returns that log's latest ensemble-mean row.
pub fn select_authoritative(weekly: &[ForecastRow], monthly: &[ForecastRow]) -> Option<ForecastRow> {
    let source = match (weekly.last(), monthly.last()) {
        (Some(w), Some(m)) => {
            if w.issued >= m.issued {
                weekly
            } else {
                monthly
            }
        }
        (Some(_), None) => weekly,
        (None, Some(_)) => monthly,
        (None, None) => return None,
    };
    let latest = source.last()?.issued;
    source
        .iter()
        .rev()
        .find(|row| row.issued == latest && row.member == ForecastMember::Mean)
        .copied()
}

// -- Tests -------------------------------------------------------------------
