//! Parquet persistence of the daily temperature series.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow::array::{Array, Date32Array, Date32Builder, Float64Array, Float64Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use super::{date_to_days, days_to_date};
use crate::series::DailySeries;

/// Write the daily store wholesale: one row per day, missing days kept as
/// null values so the axis survives the round trip.
pub fn save_series(series: &DailySeries, path: &Path) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("value", DataType::Float64, true),
    ]));

    let mut date_builder = Date32Builder::with_capacity(series.len());
    let mut value_builder = Float64Builder::with_capacity(series.len());
    for (date, value) in series.points() {
        date_builder.append_value(date_to_days(*date));
        value_builder.append_option(*value);
    }

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(date_builder.finish()),
            Arc::new(value_builder.finish()),
        ],
    )?;

    write_batch(batch, schema, path)
}

pub fn load_series(path: &Path) -> Result<DailySeries> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut points = Vec::new();
    for batch in reader {
        let batch = batch?;
        let dates = column_as::<Date32Array>(&batch, 0, "date")?;
        let values = column_as::<Float64Array>(&batch, 1, "value")?;
        for row in 0..batch.num_rows() {
            let date = days_to_date(dates.value(row))?;
            let value = if values.is_null(row) {
                None
            } else {
                Some(values.value(row))
            };
            points.push((date, value));
        }
    }

    Ok(DailySeries::from_points(points))
}

/// Write the yearly quality-control output: the raw series plus the three
/// derived columns, sharing one date axis.
pub fn save_preprocessed(
    raw: &DailySeries,
    processed: &DailySeries,
    offset: &DailySeries,
    no_offset: &DailySeries,
    path: &Path,
) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("value", DataType::Float64, true),
        Field::new("processed", DataType::Float64, true),
        Field::new("winter_offset", DataType::Float64, true),
        Field::new("no_offset", DataType::Float64, true),
    ]));

    let mut date_builder = Date32Builder::with_capacity(raw.len());
    let mut value_builder = Float64Builder::with_capacity(raw.len());
    let mut processed_builder = Float64Builder::with_capacity(raw.len());
    let mut offset_builder = Float64Builder::with_capacity(raw.len());
    let mut no_offset_builder = Float64Builder::with_capacity(raw.len());
    for (date, value) in raw.points() {
        date_builder.append_value(date_to_days(*date));
        value_builder.append_option(*value);
        processed_builder.append_option(processed.get(*date));
        offset_builder.append_option(offset.get(*date));
        no_offset_builder.append_option(no_offset.get(*date));
    }

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(date_builder.finish()),
            Arc::new(value_builder.finish()),
            Arc::new(processed_builder.finish()),
            Arc::new(offset_builder.finish()),
            Arc::new(no_offset_builder.finish()),
        ],
    )?;

    write_batch(batch, schema, path)
}

fn write_batch(batch: RecordBatch, schema: Arc<Schema>, path: &Path) -> Result<()> {
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

pub(crate) fn column_as<'a, T: 'static>(
    batch: &'a RecordBatch,
    index: usize,
    name: &str,
) -> Result<&'a T> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("column {} has an unexpected type", name))
}

// -- Tests -------------------------------------------------------------------
