//! The per-year predictor history feeding the regression.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, Float64Array, Float64Builder, Int32Array, Int32Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use super::series::column_as;
use crate::predictors::PREDICTOR_VARIABLES;

/// One row per season year: the three monthly predictors from the
/// observational record and the observed freeze-up day-of-year. Seasons
/// without a recorded freeze-up keep a null `fudoy`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictorTable {
    pub years: Vec<i32>,
    pub t2m: Vec<f64>,
    pub sf: Vec<f64>,
    pub tcc: Vec<f64>,
    pub fudoy: Vec<Option<f64>>,
}

impl PredictorTable {
    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn push(&mut self, year: i32, t2m: f64, sf: f64, tcc: f64, fudoy: Option<f64>) {
        self.years.push(year);
        self.t2m.push(t2m);
        self.sf.push(sf);
        self.tcc.push(tcc);
        self.fudoy.push(fudoy);
    }
}

pub fn save_table(table: &PredictorTable, path: &Path) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("year", DataType::Int32, false),
        Field::new(PREDICTOR_VARIABLES[0].short, DataType::Float64, false),
        Field::new(PREDICTOR_VARIABLES[1].short, DataType::Float64, false),
        Field::new(PREDICTOR_VARIABLES[2].short, DataType::Float64, false),
        Field::new("fudoy", DataType::Float64, true),
    ]));

    let mut year_builder = Int32Builder::with_capacity(table.len());
    let mut t2m_builder = Float64Builder::with_capacity(table.len());
    let mut sf_builder = Float64Builder::with_capacity(table.len());
    let mut tcc_builder = Float64Builder::with_capacity(table.len());
    let mut fudoy_builder = Float64Builder::with_capacity(table.len());
    for row in 0..table.len() {
        year_builder.append_value(table.years[row]);
        t2m_builder.append_value(table.t2m[row]);
        sf_builder.append_value(table.sf[row]);
        tcc_builder.append_value(table.tcc[row]);
        fudoy_builder.append_option(table.fudoy[row]);
    }

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(year_builder.finish()),
            Arc::new(t2m_builder.finish()),
            Arc::new(sf_builder.finish()),
            Arc::new(tcc_builder.finish()),
            Arc::new(fudoy_builder.finish()),
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

pub fn load_table(path: &Path) -> Result<PredictorTable> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut table = PredictorTable::default();
    for batch in reader {
        let batch = batch?;
        let years = column_as::<Int32Array>(&batch, 0, "year")?;
        let t2m = column_as::<Float64Array>(&batch, 1, "t2m")?;
        let sf = column_as::<Float64Array>(&batch, 2, "sf")?;
        let tcc = column_as::<Float64Array>(&batch, 3, "tcc")?;
        let fudoy = column_as::<Float64Array>(&batch, 4, "fudoy")?;
        for row in 0..batch.num_rows() {
            let fud = if fudoy.is_null(row) {
                None
            } else {
                Some(fudoy.value(row))
            };
            table.push(
                years.value(row),
                t2m.value(row),
                sf.value(row),
                tcc.value(row),
                fud,
            );
        }
    }

    if table.is_empty() {
        bail!("{}: predictor table is empty", path.display());
    }

    Ok(table)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn should_round_trip_table() {
        let mut table = PredictorTable::default();
        table.push(1992, -5.2, 0.031, 0.62, Some(357.0));
        table.push(1993, -3.8, 0.046, 0.71, Some(362.0));
        table.push(1994, -4.4, 0.029, 0.55, None);
        let file = NamedTempFile::new().unwrap();

        save_table(&table, file.path()).unwrap();
        let loaded = load_table(file.path()).unwrap();

        assert_eq!(loaded, table);
    }

    #[test]
    fn should_reject_empty_table() {
        let table = PredictorTable::default();
        let file = NamedTempFile::new().unwrap();

        save_table(&table, file.path()).unwrap();

        assert!(load_table(file.path()).is_err());
    }
}
