//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Listener, detector and TLS sessions produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges, optional Prometheus endpoint)
//! ```

pub mod logging;
pub mod metrics;
