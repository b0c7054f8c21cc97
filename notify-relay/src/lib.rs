//! notify-relay library crate.
//!
//! Turns domain events read from a message broker into user notifications,
//! keeps them in an in-process sequence, mirrors each recipient's recent
//! notifications into an expiring cache, and answers list, mark-read and
//! statistics queries.

pub mod broker;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod notification;

pub use error::{Error, Result};
