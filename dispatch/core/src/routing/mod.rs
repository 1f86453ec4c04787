//! Backend Routing
//!
//! ```text
//! +------------------+
//! |  BackendRouter   |  <-- ranks the pool, walks the fallback order
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! | BackendRegistry  |  <-- per-backend stats + circuit breakers
//! +--------+---------+
//!          |
//!    +-----+-----+
//!    |     |     |
//!    v     v     v
//! +----+ +----+ +-------+
//! | A  | | B  | |premium|  <-- Backend implementations
//! +----+ +----+ +-------+
//! ```

pub mod metrics;
pub mod registry;
pub mod router;

pub use metrics::{BackendMetrics, Counter, DispatchMetrics, Gauge, Histogram, HistogramSnapshot};
pub use registry::{BackendRecord, BackendRegistry};
pub use router::{BackendRouter, Dispatched, PremiumPolicy, RouterBuilder};
