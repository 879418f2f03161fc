//! Canonical parquet form of the area-averaged gridded source extracts.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow::array::{Array, Date32Array, Date32Builder, Float64Array, Float64Builder, Int64Array, Int64Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use super::{date_to_days, days_to_date};
use super::series::column_as;
use crate::reading::gridded::GriddedVariable;

const VARIABLE_KEY: &str = "variable";
const UNIT_KEY: &str = "unit";

/// Persist one source month. The variable name and unit ride along as
/// schema metadata; the `number` column is null for observational data.
pub fn save_gridded(variable: &GriddedVariable, path: &Path) -> Result<()> {
    let metadata = HashMap::from([
        (VARIABLE_KEY.to_string(), variable.name.clone()),
        (UNIT_KEY.to_string(), variable.unit.clone()),
    ]);
    let schema = Arc::new(Schema::new_with_metadata(
        vec![
            Field::new("time", DataType::Date32, false),
            Field::new("number", DataType::Int64, true),
            Field::new("value", DataType::Float64, false),
        ],
        metadata,
    ));

    let rows = variable.values.len() * variable.times.len();
    let mut time_builder = Date32Builder::with_capacity(rows);
    let mut number_builder = Int64Builder::with_capacity(rows);
    let mut value_builder = Float64Builder::with_capacity(rows);
    for (row, values) in variable.values.iter().enumerate() {
        let member = variable.members.get(row).copied();
        for (step, value) in values.iter().enumerate() {
            time_builder.append_value(date_to_days(variable.times[step]));
            number_builder.append_option(member.map(|id| id as i64));
            value_builder.append_value(*value);
        }
    }

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(time_builder.finish()),
            Arc::new(number_builder.finish()),
            Arc::new(value_builder.finish()),
        ],
    )?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::ZSTD(
            parquet::basic::ZstdLevel::default(),
        ))
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

pub fn load_gridded(path: &Path) -> Result<GriddedVariable> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut name = None;
    let mut unit = None;
    let mut rows: BTreeMap<Option<i64>, Vec<(chrono::NaiveDate, f64)>> = BTreeMap::new();
    for batch in reader {
        let batch = batch?;
        if name.is_none() {
            let metadata = batch.schema().metadata().clone();
            name = metadata.get(VARIABLE_KEY).cloned();
            unit = metadata.get(UNIT_KEY).cloned();
        }
        let times = column_as::<Date32Array>(&batch, 0, "time")?;
        let numbers = column_as::<Int64Array>(&batch, 1, "number")?;
        let values = column_as::<Float64Array>(&batch, 2, "value")?;
        for row in 0..batch.num_rows() {
            let member = if numbers.is_null(row) {
                None
            } else {
                Some(numbers.value(row))
            };
            rows.entry(member)
                .or_default()
                .push((days_to_date(times.value(row))?, values.value(row)));
        }
    }

    let name = name.ok_or_else(|| anyhow!("{}: missing variable metadata", path.display()))?;
    let unit = unit.ok_or_else(|| anyhow!("{}: missing unit metadata", path.display()))?;

    let mut times: Option<Vec<chrono::NaiveDate>> = None;
    let mut members = Vec::new();
    let mut values = Vec::new();
    for (member, mut series) in rows {
        series.sort_by_key(|(time, _)| *time);
        let row_times: Vec<chrono::NaiveDate> = series.iter().map(|(time, _)| *time).collect();
        match &times {
            None => times = Some(row_times),
            Some(axis) if *axis != row_times => {
                bail_mismatch(path)?;
            }
            _ => {}
        }
        if let Some(id) = member {
            members.push(id as u32);
        }
        values.push(series.into_iter().map(|(_, value)| value).collect());
    }

    GriddedVariable::new(name, unit, times.unwrap_or_default(), members, values)
}

fn bail_mismatch(path: &Path) -> Result<()> {
    Err(anyhow!(
        "{}: ensemble members disagree on the time axis",
        path.display()
    ))
}

// -- Tests -------------------------------------------------------------------
