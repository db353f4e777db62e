//! gridpact-core — shared primitives for the GridPact marketplace core.
//!
//! - `clock`: injectable time source so schedulers run on virtual time in tests
//! - `ids`: collision-resistant prefixed id generation
//! - `env`: per-environment limits (operator cap, minimum stake, timeouts)

pub mod clock;
pub mod env;
pub mod ids;

pub use clock::{Clock, ManualClock, SystemClock};
pub use env::Environment;
pub use ids::new_id;
