//! Runtime value storage for a single flow execution.
//!
//! - [`Store`] holds every scalar value or enum ordinal produced or consumed during one execution, addressed by
//!   absolute `resource:path` keys, plus declared lengths for arrays and objects. It is shared by the workers
//!   executing that instance's nodes.
//! - [`Tracker`] turns relative template paths into indexed paths while a codec walks repeated structures. Each
//!   marshal or unmarshal call owns its own tracker.

mod store;
mod tracker;

pub use store::{Entry, Store, StoreSnapshot};
pub use tracker::Tracker;
