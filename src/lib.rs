//! Founder intake — multi-step registration wizard and its record server.

pub mod cli;
pub mod config;
pub mod error;
pub mod records;
pub mod store;
pub mod wizard;
