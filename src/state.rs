//! Durable season state and the storage capabilities behind it.
//!
//! The scheduled jobs share a handful of tiny state files (frozen flag,
//! freeze-up date, ingestion resume marker). Business logic only ever sees
//! the [`SeasonState`] struct and the [`Storage`] / [`GriddedStore`]
//! traits, so tests can run against in-memory fixtures.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::reading::gridded::{grid_file_name, GridSource, GriddedVariable};
use crate::store::gridded as gridded_store;

const FROZEN_KEY: &str = "frozen";
const FROZEN_DATE_KEY: &str = "frozenDate";
const NEXT_INDEX_KEY: &str = "next.i";

/// Key-value persistence for the small state files.
pub trait Storage {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// Production storage: one file per key under the data directory, written
/// via a temp file and rename so a crashed job cannot leave a torn value.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage { root: root.into() }
    }
}

impl Storage for FsStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.root.join(key);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(text.trim().to_string()))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.root.join(key);
        let tmp = self.root.join(format!("{}.tmp", key));
        fs::write(&tmp, value).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

/// The mutable per-season state shared by the jobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonState {
    pub frozen: bool,
    pub frozen_date: Option<NaiveDate>,
    /// Index of the next unconsumed thermistor batch file.
    pub next_index: u64,
}

impl SeasonState {
    pub fn load(storage: &dyn Storage) -> Result<Self> {
        let frozen = matches!(storage.read(FROZEN_KEY)?.as_deref(), Some("True"));
        let frozen_date = match storage.read(FROZEN_DATE_KEY)? {
            Some(text) => Some(
                text.parse::<NaiveDate>()
                    .with_context(|| format!("bad {} value: {}", FROZEN_DATE_KEY, text))?,
            ),
            None => None,
        };
        let next_index = match storage.read(NEXT_INDEX_KEY)? {
            Some(text) => text
                .parse::<u64>()
                .with_context(|| format!("bad {} value: {}", NEXT_INDEX_KEY, text))?,
            None => 0,
        };

        Ok(SeasonState {
            frozen,
            frozen_date,
            next_index,
        })
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        storage.write(FROZEN_KEY, if self.frozen { "True" } else { "False" })?;
        if let Some(date) = self.frozen_date {
            storage.write(FROZEN_DATE_KEY, &date.format("%Y-%m-%d").to_string())?;
        }
        storage.write(NEXT_INDEX_KEY, &self.next_index.to_string())?;
        Ok(())
    }
}

/// Availability and access to the gridded source extracts. In production a
/// file-existence check is the readiness signal between the download jobs
/// and the aggregation; tests substitute an in-memory fixture.
pub trait GriddedStore {
    fn has(&self, source: GridSource, variable: &str, year: i32, month: u32, partial: bool)
        -> bool;
    fn load(
        &self,
        source: GridSource,
        variable: &str,
        year: i32,
        month: u32,
        partial: bool,
    ) -> Result<GriddedVariable>;
}

pub struct FsGriddedStore {
    dir: PathBuf,
}

impl FsGriddedStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FsGriddedStore { dir: dir.into() }
    }

    pub fn path_of(
        &self,
        source: GridSource,
        variable: &str,
        year: i32,
        month: u32,
        partial: bool,
    ) -> PathBuf {
        self.dir
            .join(grid_file_name(source, variable, year, month, partial))
    }
}

impl GriddedStore for FsGriddedStore {
    fn has(
        &self,
        source: GridSource,
        variable: &str,
        year: i32,
        month: u32,
        partial: bool,
    ) -> bool {
        self.path_of(source, variable, year, month, partial).is_file()
    }

    fn load(
        &self,
        source: GridSource,
        variable: &str,
        year: i32,
        month: u32,
        partial: bool,
    ) -> Result<GriddedVariable> {
        let path = self.path_of(source, variable, year, month, partial);
        gridded_store::load_gridded(&path)
    }
}

// -- Test fixtures -----------------------------------------------------------

#[cfg(test)]
pub mod fixtures {

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory key-value storage.
    #[derive(Default)]
    pub struct MemStorage {
        map: Mutex<HashMap<String, String>>,
    }

    impl Storage for MemStorage {
        fn read(&self, key: &str) -> Result<Option<String>> {
            Ok(self.map.lock().unwrap().get(key).cloned())
        }

        fn write(&self, key: &str, value: &str) -> Result<()> {
            self.map
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    /// In-memory gridded source fixture.
    #[derive(Default)]
    pub struct MemGriddedStore {
        grids: HashMap<(String, String, i32, u32, bool), GriddedVariable>,
    }

    impl MemGriddedStore {
        pub fn insert(
            &mut self,
            source: GridSource,
            year: i32,
            month: u32,
            partial: bool,
            variable: GriddedVariable,
        ) {
            self.grids.insert(
                (
                    source.as_str().to_string(),
                    variable.name.clone(),
                    year,
                    month,
                    partial,
                ),
                variable,
            );
        }

        fn key(
            source: GridSource,
            variable: &str,
            year: i32,
            month: u32,
            partial: bool,
        ) -> (String, String, i32, u32, bool) {
            (
                source.as_str().to_string(),
                variable.to_string(),
                year,
                month,
                partial,
            )
        }
    }

    impl GriddedStore for MemGriddedStore {
        fn has(
            &self,
            source: GridSource,
            variable: &str,
            year: i32,
            month: u32,
            partial: bool,
        ) -> bool {
            self.grids
                .contains_key(&Self::key(source, variable, year, month, partial))
        }

        fn load(
            &self,
            source: GridSource,
            variable: &str,
            year: i32,
            month: u32,
            partial: bool,
        ) -> Result<GriddedVariable> {
            self.grids
                .get(&Self::key(source, variable, year, month, partial))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("{} not found", variable))
        }
    }
}

// -- Tests -------------------------------------------------------------------
