// Public API - only expose the runner module
pub mod runner;

// Internal modules - organized by subsystem
mod config;
mod coordination;
mod db;
mod error;
mod formats;
mod io;
mod telemetry;

#[cfg(test)]
mod integ_tests;
