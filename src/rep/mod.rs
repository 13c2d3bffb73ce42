//! The replica-facing layer: per-table sources holding rows in
//! replica-key order, value coercion into the engine's closed type set,
//! the snapshotter interface, and an in-memory replica implementation.

pub mod coerce;
pub mod mem;
pub mod snapshot;
pub mod source;
pub mod stats;

pub use coerce::RawRow;
pub use coerce::RawValue;
pub use mem::MemReplica;
pub use snapshot::Diff;
pub use snapshot::DiffEntry;
pub use snapshot::ReplicaRead;
pub use snapshot::SnapshotInfo;
pub use snapshot::Snapshotter;
pub use source::Fetched;
pub use source::FetchIter;
pub use source::FetchRequest;
pub use source::SourceChange;
pub use source::SourceDelta;
pub use source::TableSource;
pub use stats::ReplicaStats;

/// The driver's table sources, keyed by table name. Pipelines borrow
/// this map for the duration of one hydration or advancement; ownership
/// stays with the driver.
pub type Sources = std::collections::BTreeMap<String, TableSource>;
