//! gatesync-ingest: turns upstream change data into deployment state.
//!
//! The [`Ingestor`] applies each [`SyncEvent`] in one store transaction,
//! provisions any bundles that still need fetching, then wakes waiting
//! clients once.

mod error;
pub mod events;
mod ingestor;
mod provision;
pub mod row;

pub use error::{IngestError, IngestResult};
pub use events::{Change, ChangeList, ColumnVal, Operation, Row, Snapshot, SyncEvent, Table};
pub use ingestor::{BatchSummary, IngestConfig, Ingestor};
pub use provision::{ProvisionConfig, ProvisionStats, Provisioner};
