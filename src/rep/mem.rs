//! An in-memory replica with scripted diffs. Used by tests and by
//! embedders which feed changes programmatically rather than through a
//! replication stream.

use crate::err::Error;
use crate::rep::coerce::RawRow;
use crate::rep::snapshot::{Diff, DiffEntry, ReplicaRead, SnapshotInfo, Snapshotter};
use crate::sch::ClientSchema;
use std::collections::{BTreeMap, VecDeque};

struct Pending {
	head: u64,
	entries: Vec<DiffEntry>,
}

pub struct MemReplica {
	schema: ClientSchema,
	tables: BTreeMap<String, Vec<RawRow>>,
	version: u64,
	queued: VecDeque<DiffEntry>,
	pending: Option<Pending>,
	initialised: bool,
}

impl MemReplica {
	pub fn new(schema: ClientSchema) -> Self {
		let tables = schema.tables.keys().map(|name| (name.clone(), Vec::new())).collect();
		MemReplica {
			schema,
			tables,
			version: 0,
			queued: VecDeque::new(),
			pending: None,
			initialised: false,
		}
	}

	/// Seed a table with its initial rows
	pub fn seed(&mut self, table: impl Into<String>, rows: Vec<RawRow>) {
		self.tables.insert(table.into(), rows);
	}

	/// Queue an upstream insert for the next advance
	pub fn queue_insert(&mut self, table: impl Into<String>, row: RawRow) {
		self.queued.push_back(DiffEntry::Change {
			table: table.into(),
			prev_values: vec![],
			next_value: Some(row),
		});
	}

	/// Queue an upstream delete for the next advance
	pub fn queue_delete(&mut self, table: impl Into<String>, row: RawRow) {
		self.queued.push_back(DiffEntry::Change {
			table: table.into(),
			prev_values: vec![row],
			next_value: None,
		});
	}

	/// Queue an upstream update for the next advance
	pub fn queue_update(&mut self, table: impl Into<String>, prev: RawRow, next: RawRow) {
		self.queued.push_back(DiffEntry::Change {
			table: table.into(),
			prev_values: vec![prev],
			next_value: Some(next),
		});
	}

	/// Queue a change which collapses several previous rows
	pub fn queue_collapse(
		&mut self,
		table: impl Into<String>,
		prev_values: Vec<RawRow>,
		next_value: Option<RawRow>,
	) {
		self.queued.push_back(DiffEntry::Change {
			table: table.into(),
			prev_values,
			next_value,
		});
	}

	/// Queue an upstream truncate for the next advance
	pub fn queue_truncate(&mut self, table: impl Into<String>) {
		self.queued.push_back(DiffEntry::Truncate {
			table: table.into(),
		});
	}

	fn format_version(version: u64) -> String {
		format!("{version:08}")
	}

	fn apply_entry(&mut self, entry: &DiffEntry) -> Result<(), Error> {
		match entry {
			DiffEntry::Truncate {
				table,
			} => {
				if let Some(rows) = self.tables.get_mut(table) {
					rows.clear();
				}
				Ok(())
			}
			DiffEntry::Change {
				table,
				prev_values,
				next_value,
			} => {
				let pk = self.schema.table(table)?.primary_key.clone();
				let rows = self.tables.entry(table.clone()).or_default();
				for prev in prev_values {
					rows.retain(|row| !Self::pk_matches(&pk, row, prev));
				}
				if let Some(next) = next_value {
					rows.push(next.clone());
				}
				Ok(())
			}
		}
	}

	fn pk_matches(pk: &[String], a: &RawRow, b: &RawRow) -> bool {
		pk.iter().all(|column| a.get(column) == b.get(column))
	}
}

impl ReplicaRead for MemReplica {
	fn table_rows(&self, table: &str) -> Result<Vec<RawRow>, Error> {
		self.tables.get(table).cloned().ok_or_else(|| Error::TableNotReplicated {
			table: table.to_owned(),
		})
	}

	fn schema(&self) -> Result<ClientSchema, Error> {
		Ok(self.schema.clone())
	}
}

impl Snapshotter for MemReplica {
	fn init(&mut self) -> Result<(), Error> {
		self.initialised = true;
		Ok(())
	}

	fn current(&self) -> Result<SnapshotInfo, Error> {
		if !self.initialised {
			return Err(Error::NotInitialised);
		}
		Ok(SnapshotInfo {
			version: Self::format_version(self.version),
			schema_versions: self
				.schema
				.tables
				.keys()
				.map(|name| (name.clone(), "1".to_owned()))
				.collect(),
		})
	}

	fn read(&self) -> &dyn ReplicaRead {
		self
	}

	fn advance(&mut self, tables: &[String]) -> Result<Diff, Error> {
		let drained: Vec<DiffEntry> = self.queued.drain(..).collect();
		let prev = Self::format_version(self.version);
		let head = if drained.is_empty() {
			self.version
		} else {
			self.version + 1
		};
		let visible = drained
			.iter()
			.filter(|entry| tables.iter().any(|t| t.as_str() == entry.table()))
			.cloned()
			.collect();
		self.pending = Some(Pending {
			head,
			entries: drained,
		});
		Ok(Diff {
			prev,
			curr: Self::format_version(head),
			entries: visible,
		})
	}

	fn advance_without_diff(&mut self) -> Result<(String, String), Error> {
		let prev = Self::format_version(self.version);
		let pending = self.pending.take().map(|p| p.entries).unwrap_or_default();
		let queued: Vec<DiffEntry> = self.queued.drain(..).collect();
		let moved = !pending.is_empty() || !queued.is_empty();
		for entry in pending.iter().chain(queued.iter()) {
			self.apply_entry(entry)?;
		}
		if moved {
			self.version += 1;
		}
		Ok((prev, Self::format_version(self.version)))
	}

	fn commit(&mut self) -> Result<(), Error> {
		if let Some(pending) = self.pending.take() {
			for entry in &pending.entries {
				self.apply_entry(entry)?;
			}
			self.version = pending.head;
		}
		Ok(())
	}

	fn destroy(&mut self) {
		self.tables.clear();
		self.queued.clear();
		self.pending = None;
		self.initialised = false;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rep::coerce::RawValue;
	use crate::sch::{ColumnType, TableSchema};

	fn schema() -> ClientSchema {
		ClientSchema::new([TableSchema::new("issues")
			.column("id", ColumnType::Number)
			.column("closed", ColumnType::Boolean)
			.primary_key(["id"])])
	}

	fn raw(id: i64, closed: bool) -> RawRow {
		[
			("id".to_owned(), RawValue::Integer(id)),
			("closed".to_owned(), RawValue::Bool(closed)),
		]
		.into_iter()
		.collect()
	}

	#[test]
	fn uncommitted_advances_do_not_move_the_head() {
		let mut replica = MemReplica::new(schema());
		replica.seed("issues", vec![raw(1, false)]);
		replica.init().unwrap();
		replica.queue_delete("issues", raw(1, false));
		let diff = replica.advance(&["issues".to_owned()]).unwrap();
		assert_eq!(diff.entries.len(), 1);
		// Not committed, so the state and version are unchanged
		assert_eq!(replica.current().unwrap().version, diff.prev);
		assert_eq!(replica.table_rows("issues").unwrap().len(), 1);
		replica.commit().unwrap();
		assert_eq!(replica.current().unwrap().version, diff.curr);
		assert!(replica.table_rows("issues").unwrap().is_empty());
	}

	#[test]
	fn entries_for_unwatched_tables_are_filtered_but_applied() {
		let mut replica = MemReplica::new(schema());
		replica.init().unwrap();
		replica.queue_insert("issues", raw(1, false));
		let diff = replica.advance(&[]).unwrap();
		assert!(diff.entries.is_empty());
		replica.commit().unwrap();
		assert_eq!(replica.table_rows("issues").unwrap().len(), 1);
	}
}
