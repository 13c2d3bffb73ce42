use crate::err::Error;
use crate::rep::coerce::RawRow;
use crate::sch::ClientSchema;
use std::collections::BTreeMap;

/// A point-in-time view of the replica.
#[derive(Clone, Debug)]
pub struct SnapshotInfo {
	/// Opaque version string; ordering is total and monotonic
	pub version: String,
	/// Per-table schema versions at this snapshot
	pub schema_versions: BTreeMap<String, String>,
}

/// One entry of a snapshot diff, representing a single upstream
/// mutation.
#[derive(Clone, Debug)]
pub enum DiffEntry {
	Change {
		table: String,
		/// Several previous rows arise when one change collapses several
		/// rows under a key change
		prev_values: Vec<RawRow>,
		next_value: Option<RawRow>,
	},
	/// The whole table was truncated upstream; pipelines must be reset
	Truncate {
		table: String,
	},
}

impl DiffEntry {
	pub fn table(&self) -> &str {
		match self {
			DiffEntry::Change {
				table,
				..
			} => table,
			DiffEntry::Truncate {
				table,
			} => table,
		}
	}
}

/// An ordered sequence of upstream mutations between two snapshots.
#[derive(Clone, Debug)]
pub struct Diff {
	pub prev: String,
	pub curr: String,
	pub entries: Vec<DiffEntry>,
}

/// Read operations the driver performs against a snapshot.
pub trait ReplicaRead {
	/// All current rows of a table
	fn table_rows(&self, table: &str) -> Result<Vec<RawRow>, Error>;

	/// The replicated schema at this snapshot
	fn schema(&self) -> Result<ClientSchema, Error>;
}

/// The driver's window onto replication. The replica only moves at
/// snapshot boundaries: `advance` computes the diff up to the head, and
/// the new head becomes current only once the driver commits a fully
/// processed advance.
pub trait Snapshotter {
	fn init(&mut self) -> Result<(), Error>;

	fn current(&self) -> Result<SnapshotInfo, Error>;

	/// The read handle for the current snapshot
	fn read(&self) -> &dyn ReplicaRead;

	/// Compute the diff from the current version to the head, restricted
	/// to the given tables
	fn advance(&mut self, tables: &[String]) -> Result<Diff, Error>;

	/// Jump to the head without producing a diff, as on a pipeline reset
	fn advance_without_diff(&mut self) -> Result<(String, String), Error>;

	/// Commit the head produced by the last `advance`
	fn commit(&mut self) -> Result<(), Error>;

	fn destroy(&mut self);
}
