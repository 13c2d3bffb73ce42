use crate::ast::{Basis, Direction, Key, Orders, Row, Start, Value};
use crate::dbs::options::YieldState;
use crate::err::Error;
use crate::rep::coerce::{materialise, RawRow};
use crate::sch::TableSchema;
use std::collections::{BTreeMap, HashMap};

/// A change to push through a table source, with its rows already
/// materialised. Multiple previous rows arise when one upstream mutation
/// collapses several rows under a key change.
#[derive(Clone, Debug)]
pub struct SourceChange {
	pub prev_values: Vec<Row>,
	pub next_value: Option<Row>,
}

/// One row-level delta produced by a push. Both sides present means an
/// edit which kept its primary key; one side means an add or a remove.
#[derive(Clone, Debug)]
pub struct SourceDelta {
	pub old: Option<Row>,
	pub new: Option<Row>,
	/// This remove evicts a row whose unique columns collided with an
	/// incoming add
	pub eviction: bool,
}

impl SourceDelta {
	pub fn is_edit(&self) -> bool {
		self.old.is_some() && self.new.is_some()
	}
}

struct UniqueState {
	columns: Vec<String>,
	map: HashMap<Key, Key>,
}

/// A per-table connector which keeps the table's rows in replica-key
/// order, serves ordered range fetches, and applies row-level pushes as
/// the replica advances. Created lazily the first time any query reads
/// the table, and owned by the driver for its whole life.
pub struct TableSource {
	schema: TableSchema,
	rows: BTreeMap<Key, Row>,
	uniques: Vec<UniqueState>,
	evictions: u64,
}

impl TableSource {
	pub fn new(schema: TableSchema) -> Self {
		let uniques = schema
			.indexes
			.iter()
			.filter(|ix| ix.unique)
			.map(|ix| UniqueState {
				columns: ix.columns.clone(),
				map: HashMap::new(),
			})
			.collect();
		TableSource {
			schema,
			rows: BTreeMap::new(),
			uniques,
			evictions: 0,
		}
	}

	pub fn schema(&self) -> &TableSchema {
		&self.schema
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	/// Rows evicted so far by unique-key conflicts
	pub fn evictions(&self) -> u64 {
		self.evictions
	}

	/// The storage key of a row under the primary key
	pub fn key_of(&self, row: &Row) -> Key {
		row.values(&self.schema.primary_key)
	}

	/// Hydrate the source from a snapshot of replica rows
	pub fn load(&mut self, raw_rows: &[RawRow]) -> Result<(), Error> {
		for raw in raw_rows {
			let row = materialise(&self.schema, raw)?;
			self.insert(row)?;
		}
		Ok(())
	}

	/// Materialise one replica row against this source's schema
	pub fn materialise(&self, raw: &RawRow) -> Result<Row, Error> {
		materialise(&self.schema, raw)
	}

	fn insert(&mut self, row: Row) -> Result<(), Error> {
		let key = self.key_of(&row);
		if self.rows.contains_key(&key) {
			return Err(Error::RowConflict {
				table: self.schema.name.clone(),
				key: row.project(&self.schema.primary_key).canonical(),
			});
		}
		for unique in &mut self.uniques {
			let index_key = row.values(&unique.columns);
			// NULL components never constrain
			if !index_key.has_null() {
				unique.map.insert(index_key, key.clone());
			}
		}
		self.rows.insert(key, row);
		Ok(())
	}

	fn remove(&mut self, key: &Key) -> Option<Row> {
		let row = self.rows.remove(key)?;
		for unique in &mut self.uniques {
			let index_key = row.values(&unique.columns);
			if !index_key.has_null() && unique.map.get(&index_key) == Some(key) {
				unique.map.remove(&index_key);
			}
		}
		Some(row)
	}

	pub fn get(&self, key: &Key) -> Option<&Row> {
		self.rows.get(key)
	}

	/// The current rows, in primary-key order
	pub fn rows(&self) -> impl Iterator<Item = &Row> + '_ {
		self.rows.values()
	}

	/// Resolve a row through any unique index whose columns the given map
	/// covers. Every provided column must match the resolved row.
	pub fn get_row(&self, columns: &BTreeMap<String, Value>) -> Option<&Row> {
		if self.schema.primary_key.iter().all(|c| columns.contains_key(c)) {
			let key =
				Key(self.schema.primary_key.iter().map(|c| columns[c].clone()).collect());
			return self.verify(&key, columns);
		}
		for unique in &self.uniques {
			if unique.columns.iter().all(|c| columns.contains_key(c)) {
				let key = Key(unique.columns.iter().map(|c| columns[c].clone()).collect());
				if let Some(pk) = unique.map.get(&key) {
					return self.verify(pk, columns);
				}
			}
		}
		None
	}

	fn verify(&self, key: &Key, columns: &BTreeMap<String, Value>) -> Option<&Row> {
		let row = self.rows.get(key)?;
		columns.iter().all(|(c, v)| row.get(c) == Some(v)).then_some(row)
	}

	/// Work out the row-level deltas one pushed change produces, without
	/// applying anything. Removes always precede adds, and an add whose
	/// non-primary unique columns collide evicts the standing row first.
	pub fn prepare(&self, change: &SourceChange) -> Result<Vec<SourceDelta>, Error> {
		let pk = &self.schema.primary_key;
		let mut deltas = Vec::new();

		// An edit keeps its primary key and stays a single delta
		if let (1, Some(next)) = (change.prev_values.len(), &change.next_value) {
			let prev_key = change.prev_values[0].values(pk);
			if prev_key == next.values(pk) {
				let stored = self.rows.get(&prev_key).ok_or_else(|| Error::RowNotFound {
					table: self.schema.name.clone(),
					key: change.prev_values[0].project(pk).canonical(),
				})?;
				let mut removed = vec![prev_key];
				self.prepare_evictions(next, &mut removed, &mut deltas);
				deltas.push(SourceDelta {
					old: Some(stored.clone()),
					new: Some(next.clone()),
					eviction: false,
				});
				return Ok(deltas);
			}
		}

		let mut removed = Vec::new();
		for prev in &change.prev_values {
			let key = prev.values(pk);
			let stored = self.rows.get(&key).ok_or_else(|| Error::RowNotFound {
				table: self.schema.name.clone(),
				key: prev.project(pk).canonical(),
			})?;
			deltas.push(SourceDelta {
				old: Some(stored.clone()),
				new: None,
				eviction: false,
			});
			removed.push(key);
		}

		if let Some(next) = &change.next_value {
			let key = next.values(pk);
			if self.rows.contains_key(&key) && !removed.contains(&key) {
				return Err(Error::RowConflict {
					table: self.schema.name.clone(),
					key: next.project(pk).canonical(),
				});
			}
			self.prepare_evictions(next, &mut removed, &mut deltas);
			deltas.push(SourceDelta {
				old: None,
				new: Some(next.clone()),
				eviction: false,
			});
		}

		Ok(deltas)
	}

	/// Compressed changelogs can reorder a removal behind the add which
	/// re-uses its unique columns; the standing row is evicted to keep
	/// unique semantics over the incremental stream
	fn prepare_evictions(&self, next: &Row, removed: &mut Vec<Key>, deltas: &mut Vec<SourceDelta>) {
		let next_key = next.values(&self.schema.primary_key);
		for unique in &self.uniques {
			let index_key = next.values(&unique.columns);
			if index_key.has_null() {
				continue;
			}
			if let Some(standing) = unique.map.get(&index_key) {
				if *standing != next_key && !removed.contains(standing) {
					if let Some(row) = self.rows.get(standing) {
						deltas.push(SourceDelta {
							old: Some(row.clone()),
							new: None,
							eviction: true,
						});
						removed.push(standing.clone());
					}
				}
			}
		}
	}

	/// Push one change through the source: prepare its deltas, apply
	/// them, and hand them back for propagation
	pub fn push(&mut self, change: &SourceChange) -> Result<Vec<SourceDelta>, Error> {
		let deltas = self.prepare(change)?;
		self.apply(&deltas)?;
		Ok(deltas)
	}

	/// Apply prepared deltas to the stored rows
	pub fn apply(&mut self, deltas: &[SourceDelta]) -> Result<(), Error> {
		for delta in deltas {
			if let Some(old) = &delta.old {
				let key = self.key_of(old);
				self.remove(&key);
				if delta.eviction {
					self.evictions += 1;
					debug!(
						table = %self.schema.name,
						key = %old.project(&self.schema.primary_key).canonical(),
						"unique conflict evicted a standing row"
					);
				}
			}
			if let Some(new) = &delta.new {
				self.insert(new.clone())?;
			}
		}
		Ok(())
	}

	/// An ordered, single-shot fetch over the current rows. The iterator
	/// interleaves yield sentinels per the supplied yield state, and must
	/// not be re-driven after consumption.
	pub fn fetch<'a>(
		&'a self,
		request: FetchRequest<'a>,
		yields: Option<YieldState<'a>>,
	) -> FetchIter<'a> {
		// The effective order, with the reverse flag folded in
		let mut order = request.order.clone();
		if request.reverse {
			for o in &mut order.0 {
				o.direction = match o.direction {
					Direction::Asc => Direction::Desc,
					Direction::Desc => Direction::Asc,
				};
			}
		}
		let rows: Box<dyn Iterator<Item = &'a Row> + 'a> = if self.is_pk_order(&order) {
			match order.first().map(|o| o.direction).unwrap_or(Direction::Asc) {
				Direction::Asc => Box::new(self.rows.values()),
				Direction::Desc => Box::new(self.rows.values().rev()),
			}
		} else {
			// Orders an index cannot satisfy pay an explicit sort pass
			let mut sorted: Vec<&Row> = self.rows.values().collect();
			sorted.sort_by(|a, b| order.compare(a, b));
			Box::new(sorted.into_iter())
		};
		FetchIter {
			rows,
			order,
			constraint: request.constraint,
			start: request.start,
			started: false,
			yields,
			fetched: 0,
			pending_yield: false,
		}
	}

	/// Whether the order is the primary key in a single direction
	fn is_pk_order(&self, order: &Orders) -> bool {
		if order.is_empty() {
			return true;
		}
		let uniform = order.windows(2).all(|w| w[0].direction == w[1].direction);
		uniform
			&& order.len() <= self.schema.primary_key.len()
			&& order.iter().zip(&self.schema.primary_key).all(|(o, pk)| &o.column == pk)
	}
}

/// Parameters of one ordered range fetch.
pub struct FetchRequest<'a> {
	/// Equality constraints, column to required value
	pub constraint: Option<&'a BTreeMap<String, Value>>,
	/// The completed ordering to produce
	pub order: &'a Orders,
	/// Resume position within the ordering
	pub start: Option<&'a Start>,
	pub reverse: bool,
}

/// An item of a fetch stream: a row, or the cooperative yield sentinel
/// which every consumer forwards unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetched {
	Row(Row),
	Yield,
}

pub struct FetchIter<'a> {
	rows: Box<dyn Iterator<Item = &'a Row> + 'a>,
	order: Orders,
	constraint: Option<&'a BTreeMap<String, Value>>,
	start: Option<&'a Start>,
	started: bool,
	yields: Option<YieldState<'a>>,
	fetched: u32,
	pending_yield: bool,
}

impl Iterator for FetchIter<'_> {
	type Item = Fetched;

	fn next(&mut self) -> Option<Fetched> {
		if self.pending_yield {
			self.pending_yield = false;
			return Some(Fetched::Yield);
		}
		loop {
			let row = self.rows.next()?;
			if let Some(constraint) = self.constraint {
				if !constraint.iter().all(|(c, v)| row.get(c) == Some(v)) {
					continue;
				}
			}
			if !self.started {
				if let Some(start) = self.start {
					let position = self.order.compare(row, &start.row);
					let before = match start.basis {
						Basis::At => position.is_lt(),
						Basis::After => position.is_le(),
					};
					if before {
						continue;
					}
				}
				self.started = true;
			}
			self.fetched += 1;
			if let Some(yields) = &self.yields {
				if yields.should_yield(self.fetched) {
					self.pending_yield = true;
				}
			}
			return Some(Fetched::Row(row.clone()));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ast::{Order, Orders};
	use crate::sch::ColumnType;

	fn uniques_schema() -> TableSchema {
		TableSchema::new("uniques")
			.column("id", ColumnType::String)
			.column("name", ColumnType::String)
			.primary_key(["id"])
			.unique(["name"])
	}

	fn row(id: &str, name: &str) -> Row {
		[("id", id), ("name", name)].into_iter().collect()
	}

	fn source_with(rows: Vec<Row>) -> TableSource {
		let mut source = TableSource::new(uniques_schema());
		for r in rows {
			source.insert(r).unwrap();
		}
		source
	}

	fn add(next: Row) -> SourceChange {
		SourceChange {
			prev_values: vec![],
			next_value: Some(next),
		}
	}

	#[test]
	fn unique_conflicts_evict_before_adding() {
		let source = source_with(vec![row("foo", "bar"), row("boo", "dar")]);
		let deltas = source.prepare(&add(row("baz", "bar"))).unwrap();
		assert_eq!(deltas.len(), 2);
		assert!(deltas[0].eviction);
		assert_eq!(deltas[0].old.as_ref().unwrap().get("id"), Some(&Value::from("foo")));
		assert_eq!(deltas[1].new.as_ref().unwrap().get("id"), Some(&Value::from("baz")));
	}

	#[test]
	fn same_key_edits_stay_single() {
		let source = source_with(vec![row("foo", "bar")]);
		let change = SourceChange {
			prev_values: vec![row("foo", "bar")],
			next_value: Some(row("foo", "baz")),
		};
		let deltas = source.prepare(&change).unwrap();
		assert_eq!(deltas.len(), 1);
		assert!(deltas[0].is_edit());
	}

	#[test]
	fn key_changes_split_into_remove_and_add() {
		let source = source_with(vec![row("foo", "bar")]);
		let change = SourceChange {
			prev_values: vec![row("foo", "bar")],
			next_value: Some(row("foo2", "bar")),
		};
		let deltas = source.prepare(&change).unwrap();
		assert_eq!(deltas.len(), 2);
		assert!(deltas[0].old.is_some() && deltas[0].new.is_none());
		assert!(deltas[1].new.is_some() && deltas[1].old.is_none());
	}

	#[test]
	fn removes_of_missing_rows_fail_loudly() {
		let source = source_with(vec![]);
		let change = SourceChange {
			prev_values: vec![row("nope", "x")],
			next_value: None,
		};
		assert!(matches!(
			source.prepare(&change),
			Err(Error::RowNotFound {
				..
			})
		));
	}

	#[test]
	fn conflicting_adds_fail_loudly() {
		let source = source_with(vec![row("foo", "bar")]);
		assert!(matches!(
			source.prepare(&add(row("foo", "other"))),
			Err(Error::RowConflict {
				..
			})
		));
	}

	#[test]
	fn eviction_is_applied_and_counted() {
		let mut source = source_with(vec![row("foo", "bar")]);
		let deltas = source.prepare(&add(row("baz", "bar"))).unwrap();
		source.apply(&deltas).unwrap();
		assert_eq!(source.evictions(), 1);
		assert!(source.get(&Key(vec![Value::from("foo")])).is_none());
		assert!(source.get(&Key(vec![Value::from("baz")])).is_some());
	}

	#[test]
	fn fetch_honours_reverse_and_constraint() {
		let mut source = source_with(vec![row("a", "1"), row("b", "2"), row("c", "2")]);
		source.insert(row("d", "3")).unwrap();
		let order = Orders(vec![Order::asc("id")]);
		let constraint: BTreeMap<String, Value> =
			[("name".to_string(), Value::from("2"))].into_iter().collect();
		let fetched: Vec<_> = source
			.fetch(
				FetchRequest {
					constraint: Some(&constraint),
					order: &order,
					start: None,
					reverse: true,
				},
				None,
			)
			.collect();
		assert_eq!(
			fetched,
			vec![Fetched::Row(row("c", "2")), Fetched::Row(row("b", "2"))]
		);
	}

	#[test]
	fn start_cursor_is_inclusive_or_exclusive() {
		let source = source_with(vec![row("a", "1"), row("b", "2"), row("c", "3")]);
		let order = Orders(vec![Order::asc("id")]);
		let at = Start {
			row: row("b", "2"),
			basis: Basis::At,
		};
		let fetched: Vec<_> = source
			.fetch(
				FetchRequest {
					constraint: None,
					order: &order,
					start: Some(&at),
					reverse: false,
				},
				None,
			)
			.collect();
		assert_eq!(fetched.len(), 2);
		let after = Start {
			row: row("b", "2"),
			basis: Basis::After,
		};
		let fetched: Vec<_> = source
			.fetch(
				FetchRequest {
					constraint: None,
					order: &order,
					start: Some(&after),
					reverse: false,
				},
				None,
			)
			.collect();
		assert_eq!(fetched, vec![Fetched::Row(row("c", "3"))]);
	}

	#[test]
	fn get_row_resolves_through_any_unique_index() {
		let source = source_with(vec![row("foo", "bar")]);
		let by_name: BTreeMap<String, Value> =
			[("name".to_string(), Value::from("bar"))].into_iter().collect();
		assert_eq!(source.get_row(&by_name).unwrap().get("id"), Some(&Value::from("foo")));
		let wrong: BTreeMap<String, Value> =
			[("name".to_string(), Value::from("nope"))].into_iter().collect();
		assert!(source.get_row(&wrong).is_none());
	}
}
