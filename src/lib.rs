//! # Keyed Object Pool
//!
//! Thread-safe pool of expensive-to-create objects, partitioned by key, with a
//! pluggable factory driving each object's lifecycle.
//!
//! ## Features
//!
//! - Independent idle sets and active counts per key, with per-key locking
//! - Factory lifecycle: create, activate, validate, passivate, destroy
//! - LIFO or FIFO reuse of idle objects
//! - Optional validation on borrow and on return
//! - Per-key limits on active and idle objects
//! - Automatic return of objects via RAII (Drop trait)
//! - Async borrow with timeout
//! - Metrics and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use keyed_objectpool::{FnFactory, KeyedObjectPool, KeyedPoolConfiguration};
//! use std::convert::Infallible;
//!
//! let factory =
//!     FnFactory::new(|key: &&'static str| Ok::<_, Infallible>(format!("{key}-session")));
//! let pool = KeyedObjectPool::new(factory, KeyedPoolConfiguration::default());
//! {
//!     let session = pool.get_object(&"eu-west").unwrap();
//!     println!("Got: {}", *session);
//!     // Object automatically returned when `session` goes out of scope
//! }
//! assert_eq!(pool.num_idle_for(&"eu-west"), 1);
//! ```

mod config;
mod errors;
mod factory;
mod lifecycle;
mod metrics;
mod pool;
mod store;

#[cfg(test)]
mod testing;

pub use config::{KeyedPoolConfiguration, SelectionPolicy};
pub use errors::{PoolError, PoolResult};
pub use factory::{FnFactory, KeyedObjectFactory, PoolKey};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{KeyedObjectPool, PoolState, PooledObject};
