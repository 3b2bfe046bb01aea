//! Admission control
//!
//! Per-caller request counting in fixed windows over a shared counter
//! store, and the actix middleware that gates requests with it.

mod counter;
mod limiter;
mod middleware;

pub use counter::{InMemoryCounterStore, RateCounterStore, RedisCounterStore};
pub use limiter::{caller_key, AdmissionController, RatePolicy, Window};
pub use middleware::{Admission, AdmissionMiddleware};
