//! The event-sourced persistence engine.
//!
//! This crate defines the event envelope, the aggregate protocol, lazy stream
//! reading, snapshots, uniqueness registries, personal-data encryption and
//! the projection manager. Storage backends implement the traits in
//! [`repository`], [`snapshot`] and [`crypto::key`]; this crate contains no
//! infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod crypto;
pub mod error;
pub mod event;
pub mod projection;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod stream;
