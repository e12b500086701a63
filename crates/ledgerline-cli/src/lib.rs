//! Ledgerline operator CLI.
//!
//! Applies migrations and maintains the read models projected from the
//! event log.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod telemetry;
