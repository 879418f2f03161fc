pub mod gridded;
pub mod thermistor;

pub use gridded::{GridSource, GriddedVariable};
pub use thermistor::RawSample;
