use crate::ast::{Row, RowKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a row change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	Add,
	Remove,
	Edit,
}

impl fmt::Display for ChangeKind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ChangeKind::Add => f.write_str("add"),
			ChangeKind::Remove => f.write_str("remove"),
			ChangeKind::Edit => f.write_str("edit"),
		}
	}
}

/// One row-level change emitted to a subscriber. For removes the row is
/// absent; for edits the primary key did not change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
	#[serde(rename = "type")]
	pub kind: ChangeKind,
	pub query_hash: String,
	pub table: String,
	/// Exactly the primary-key columns
	pub row_key: RowKey,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub row: Option<Row>,
}

/// An item of a change stream: a row change, or the in-band cooperative
/// yield sentinel. Operators forward the sentinel unchanged; it is the
/// stream's only suspension point.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamItem {
	Change(RowChange),
	Yield,
}

impl StreamItem {
	pub fn is_yield(&self) -> bool {
		matches!(self, StreamItem::Yield)
	}

	pub fn change(&self) -> Option<&RowChange> {
		match self {
			StreamItem::Change(change) => Some(change),
			StreamItem::Yield => None,
		}
	}
}
