use crate::ast::{Row, System};
use crate::flow::item::{ChangeKind, RowChange, StreamItem};
use radix_trie::Trie;

/// Buffers operator outputs for one hydration or one advancement,
/// deduplicates them by `(query, kind, table, canonical row JSON)`, and
/// holds back rows vended under a permissions subtree. A streamer is a
/// single-use helper: one per push, drained at the end.
pub(crate) struct ChangeStreamer {
	seen: Trie<Vec<u8>, bool>,
	items: Vec<StreamItem>,
	changes: usize,
}

impl ChangeStreamer {
	pub fn new() -> Self {
		ChangeStreamer {
			seen: Trie::new(),
			items: Vec::new(),
			changes: 0,
		}
	}

	/// Push one row change. Permissions rows participate in filtering
	/// upstream but are never forwarded to subscribers, enforced here at
	/// the streamer boundary so operator semantics stay symmetric.
	pub fn push(
		&mut self,
		system: System,
		kind: ChangeKind,
		query_hash: &str,
		table: &str,
		primary_key: &[String],
		row: &Row,
	) {
		if system == System::Permissions {
			return;
		}
		let mut key = Vec::with_capacity(query_hash.len() + table.len() + 24);
		key.extend_from_slice(query_hash.as_bytes());
		key.push(0);
		key.push(kind as u8);
		key.extend_from_slice(table.as_bytes());
		key.push(0);
		key.extend_from_slice(row.canonical().as_bytes());
		if self.seen.get(&key).is_some() {
			return;
		}
		self.seen.insert(key, true);
		self.changes += 1;
		self.items.push(StreamItem::Change(RowChange {
			kind,
			query_hash: query_hash.to_owned(),
			table: table.to_owned(),
			row_key: row.project(primary_key),
			row: match kind {
				ChangeKind::Remove => None,
				_ => Some(row.clone()),
			},
		}));
	}

	pub fn push_yield(&mut self) {
		self.items.push(StreamItem::Yield);
	}

	/// The number of row changes buffered so far
	pub fn changes(&self) -> usize {
		self.changes
	}

	pub fn into_items(self) -> Vec<StreamItem> {
		self.items
	}
}
