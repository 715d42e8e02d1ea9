//! # Questline Redis
//!
//! Redis persistence for the Questline retry spool: [`RedisSpoolStore`]
//! keeps one list per routing key, so events that could not be published
//! survive restarts and replay in order.

pub mod spool;

pub use spool::RedisSpoolStore;
