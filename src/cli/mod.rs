//! Command line interface.

pub mod command;

use std::time::Duration;

use chrono::NaiveDate;
use clap::{command, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the scheduled jobs
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest new thermistor data and update the freeze state
    Daily {
        /// Pin the run to a date instead of today (for reruns and tests)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Refresh predictors with new reanalysis and reissue the forecast
    Weekly {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Ingest the new seasonal forecast and issue the monthly forecast
    Monthly {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run the yearly quality control and rebuild the forecast inputs
    Yearly {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    ProgressBar::new(size).with_message(message).with_style(
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {msg}")
            .unwrap()
            .progress_chars("##-"),
    )
}
