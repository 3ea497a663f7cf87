//! gatesync-state: durable deployment store for gatesync.
//!
//! Backed by [redb](https://docs.rs/redb), holds the deployments this node
//! should run and the bundles each of them references.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Bundles use composite keys (`{len}:{deployment_id}:{bundle_id}`) so a prefix
//! scan yields every bundle of one deployment, and deleting a deployment
//! removes that range in the same transaction.
//!
//! Writers batch their mutations through a [`StoreTxn`]; nothing is visible
//! to readers until it commits. The `StateStore` is `Clone` + `Send` + `Sync`
//! (backed by `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod etag;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use etag::{etag, etag_matches};
pub use store::{StateStore, StoreTxn};
pub use types::*;
