//! msgrelay - durable message relay
//!
//! An HTTP endpoint publishes typed messages to a RabbitMQ direct exchange;
//! a consumer drains the bound queue, runs a per-type handler, and records
//! every processed message in SQLite.

pub mod api;
pub mod bus;
pub mod config;
pub mod handlers;
pub mod message;
pub mod runtime;
pub mod storage;
pub mod utils;
