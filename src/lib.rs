//! A thread-safe connection pool for a key-value server.
//!
//! The pool multiplexes callers over a bounded set of long-lived backend
//! connections, each authenticated once at connect time, with automatic
//! failover across a configured list of endpoints and automatic
//! reconnect-on-error. See [`Pool`] for the main entry point.

mod backend;
mod config;
mod endpoint;
mod error;
mod pool;
mod slot;

pub use backend::{BackendConnection, BackendFailure, Command, RedisConnection};
pub use config::PoolConfig;
pub use endpoint::Endpoint;
pub use error::ConfigError;
pub use pool::{AcquireOutcome, CommandOutcome, Lease, Pool, ReplyPresence};
