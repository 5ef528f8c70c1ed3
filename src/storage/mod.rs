//! Append-only telemetry storage
//!
//! # Architecture
//!
//! - [`column::AppendColumn`]: lock-free segmented array of 64-bit words
//! - [`store::TelemetryStore`]: one column per dataset plus a shared
//!   timestamp column, published with an atomic sample count
//! - [`store::StoreWriter`]: the exclusive append handle owned by a decode loop
//! - [`timestamps`]: timestamp range queries and [`timestamps::TimestampCache`]
//!
//! Readers never take a lock. They read the published count once and clamp
//! every request to it, so data that has not arrived is never observed.

pub mod column;
pub mod store;
pub mod timestamps;

pub use store::{StoreError, StoreWriter, TelemetryStore};
pub use timestamps::TimestampCache;
