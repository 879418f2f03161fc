mod cli;
mod download;
mod forecast;
mod freeze;
mod predictors;
mod qc;
mod reading;
mod series;
mod state;
mod store;

use anyhow::{Error, Result};
use clap::Parser;
use cli::command::RunDate;
use cli::{command, Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Daily { date } => command::daily(RunDate::resolve(*date)).await,
        Commands::Weekly { date } => command::weekly(RunDate::resolve(*date)).await,
        Commands::Monthly { date } => command::monthly(RunDate::resolve(*date)).await,
        Commands::Yearly { date } => command::yearly(RunDate::resolve(*date)).await,
    };

    match result {
        Ok(message) => println!("{}", message),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
