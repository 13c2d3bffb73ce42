//! Replica statistics computed from the live table sources, feeding the
//! statistics-backed cost model.

use crate::ast::Key;
use crate::cost::StatsProvider;
use crate::rep::source::TableSource;
use std::collections::BTreeMap;

/// A statistics view over the driver's table sources. The generation is
/// bumped by the driver on every reset so that cached cost figures are
/// re-resolved against fresh state.
pub struct ReplicaStats<'a> {
	sources: &'a BTreeMap<String, TableSource>,
	generation: u64,
}

impl<'a> ReplicaStats<'a> {
	pub fn new(sources: &'a BTreeMap<String, TableSource>, generation: u64) -> Self {
		ReplicaStats {
			sources,
			generation,
		}
	}

	fn grouped(&self, table: &str, columns: &[String]) -> Option<BTreeMap<Key, u64>> {
		let source = self.sources.get(table)?;
		let mut groups: BTreeMap<Key, u64> = BTreeMap::new();
		for row in source.rows() {
			*groups.entry(row.values(columns)).or_insert(0) += 1;
		}
		Some(groups)
	}
}

impl StatsProvider for ReplicaStats<'_> {
	fn table_rows(&self, table: &str) -> Option<u64> {
		self.sources.get(table).map(|s| s.len() as u64)
	}

	fn column_samples(&self, table: &str, columns: &[String]) -> Option<Vec<(Key, u64)>> {
		Some(self.grouped(table, columns)?.into_iter().collect())
	}

	fn index_average(&self, table: &str, columns: &[String]) -> Option<f64> {
		let groups = self.grouped(table, columns)?;
		let non_null: Vec<u64> =
			groups.iter().filter(|(k, _)| !k.has_null()).map(|(_, n)| *n).collect();
		if non_null.is_empty() {
			return None;
		}
		Some(non_null.iter().sum::<u64>() as f64 / non_null.len() as f64)
	}

	fn generation(&self) -> u64 {
		self.generation
	}
}
