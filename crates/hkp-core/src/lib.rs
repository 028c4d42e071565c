//! Stateful runtime layer for the hitokoto quotation bot.
//!
//! This crate is intentionally transport-agnostic. The remote sentence API and
//! the chat front-ends live behind ports (traits) implemented in adapter crates.

pub mod access;
pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod favorites;
pub mod fetch;
pub mod logging;
pub mod persist;
pub mod rate_limit;
pub mod render;
pub mod sentence;
pub mod service;
pub mod tasks;

pub use errors::{Error, Result};
