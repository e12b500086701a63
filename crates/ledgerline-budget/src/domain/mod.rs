//! Aggregates, commands and events of the budget context.

pub mod aggregates;
pub mod commands;
pub mod events;
