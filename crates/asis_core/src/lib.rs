pub mod bmi;
pub mod clock;
pub mod config;
pub mod error;
