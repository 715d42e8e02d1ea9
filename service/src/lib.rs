//! # Questline Service
//!
//! Deployment assembly for the progression stack: [`Config`] reads the
//! environment, [`App`] wires the Postgres stores and catalogs, the Redis
//! retry spool, and the AMQP transport into an event bus and the two
//! trackers, with an explicit start/shutdown lifecycle. The binary in
//! `main.rs` runs the whole thing; embedders instead construct an [`App`]
//! and drive progression through its tracker handles.

pub mod app;
pub mod config;

pub use app::{App, AppError};
pub use config::{AmqpConfig, Config, PostgresConfig, RedisConfig, ServiceConfig};
