//! gatesync-report: the status reporting round trip.
//!
//! Agents POST deployment outcomes; [`payload`] parses and validates them,
//! [`apply`] records them in the store in one transaction, and [`upstream`]
//! forwards outcomes the control plane has not acknowledged yet.

pub mod apply;
pub mod error;
pub mod payload;
pub mod upstream;

pub use apply::{ApplySummary, apply_results};
pub use error::{ReportError, ReportResult, SinkError};
pub use payload::{ReportedStatus, ResultPayload, ValidResult, parse_batch, parse_single};
pub use upstream::{HttpStatusSink, StatusReporter, StatusSink, UpstreamResult};
