//! Ledgerline budget context: categories and members.
//!
//! A bounded context built on the engine: category names are unique per
//! owner through the uniqueness registry, member e-mail addresses are unique
//! globally, and member personal data is encrypted per member so erasure is
//! a key deletion.

pub mod application;
pub mod domain;
pub mod projections;
