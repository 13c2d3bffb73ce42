//! Schema descriptions for replicated tables, and validation that a
//! client schema is a subset of what the replica carries.

use crate::ast::Value;
use crate::err::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The closed set of column types a client view can carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
	String,
	Number,
	Boolean,
	Json,
	Null,
}

impl ColumnType {
	/// Whether the given value is representable under this type
	pub fn admits(&self, value: &Value) -> bool {
		match (self, value) {
			(_, Value::Null) => true,
			(ColumnType::String, Value::Strand(_)) => true,
			(ColumnType::Number, Value::Number(_)) => true,
			(ColumnType::Boolean, Value::Bool(_)) => true,
			(ColumnType::Json, _) => true,
			(ColumnType::Null, Value::Null) => true,
			_ => false,
		}
	}
}

impl fmt::Display for ColumnType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ColumnType::String => f.write_str("string"),
			ColumnType::Number => f.write_str("number"),
			ColumnType::Boolean => f.write_str("boolean"),
			ColumnType::Json => f.write_str("json"),
			ColumnType::Null => f.write_str("null"),
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
	#[serde(rename = "type")]
	pub column_type: ColumnType,
	pub nullable: bool,
}

/// A secondary index on a table. Only unique indexes influence planning;
/// non-unique indexes inform the cost model's ordering satisfaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
	pub columns: Vec<String>,
	pub unique: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
	pub name: String,
	pub columns: BTreeMap<String, ColumnDef>,
	pub primary_key: Vec<String>,
	pub indexes: Vec<IndexDef>,
}

impl TableSchema {
	pub fn new(name: impl Into<String>) -> Self {
		TableSchema {
			name: name.into(),
			..Default::default()
		}
	}

	pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
		self.columns.insert(
			name.into(),
			ColumnDef {
				column_type,
				nullable: false,
			},
		);
		self
	}

	pub fn nullable_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
		self.columns.insert(
			name.into(),
			ColumnDef {
				column_type,
				nullable: true,
			},
		);
		self
	}

	pub fn primary_key(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.primary_key = columns.into_iter().map(Into::into).collect();
		self
	}

	pub fn unique(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.indexes.push(IndexDef {
			columns: columns.into_iter().map(Into::into).collect(),
			unique: true,
		});
		self
	}

	pub fn index(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.indexes.push(IndexDef {
			columns: columns.into_iter().map(Into::into).collect(),
			unique: false,
		});
		self
	}

	pub fn column_def(&self, name: &str) -> Result<&ColumnDef, Error> {
		self.columns.get(name).ok_or_else(|| Error::ColumnNotFound {
			table: self.name.clone(),
			column: name.to_owned(),
		})
	}

	/// The unique indexes of this table, including the implicit
	/// primary-key index
	pub fn unique_indexes(&self) -> Vec<IndexDef> {
		let mut out = vec![IndexDef {
			columns: self.primary_key.clone(),
			unique: true,
		}];
		out.extend(self.indexes.iter().filter(|ix| ix.unique).cloned());
		out
	}

	/// Whether the given columns are exactly the primary key
	pub fn is_primary_key(&self, columns: &[String]) -> bool {
		let mut a: Vec<&String> = columns.iter().collect();
		let mut b: Vec<&String> = self.primary_key.iter().collect();
		a.sort();
		b.sort();
		a == b
	}

	/// Whether equality on the given columns pins at most one row: some
	/// unique index is covered by the columns and none of its columns
	/// admit NULL
	pub fn has_non_null_unique_covering(&self, columns: &[String]) -> bool {
		self.unique_indexes().iter().any(|ix| {
			ix.columns.iter().all(|c| {
				columns.contains(c)
					&& self.columns.get(c).map(|def| !def.nullable).unwrap_or(false)
			})
		})
	}

	/// Whether an index satisfies the given ordering without a sort pass
	pub fn order_is_indexed(&self, order: &[crate::ast::Order]) -> bool {
		if order.is_empty() {
			return true;
		}
		let cols: Vec<&str> = order.iter().map(|o| o.column.as_str()).collect();
		let mut candidates: Vec<&[String]> = vec![self.primary_key.as_slice()];
		candidates.extend(self.indexes.iter().map(|ix| ix.columns.as_slice()));
		// A single scan direction per index, so the ordering must be
		// uniformly ascending or uniformly descending over a prefix
		let uniform = order.windows(2).all(|w| w[0].direction == w[1].direction);
		uniform
			&& candidates.iter().any(|ix| {
				ix.len() >= cols.len()
					&& ix.iter().zip(&cols).all(|(a, b)| a.as_str() == *b)
			})
	}
}

/// The set of tables a client subscribes to.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClientSchema {
	pub tables: BTreeMap<String, TableSchema>,
}

impl ClientSchema {
	pub fn new(tables: impl IntoIterator<Item = TableSchema>) -> Self {
		ClientSchema {
			tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
		}
	}

	pub fn table(&self, name: &str) -> Result<&TableSchema, Error> {
		self.tables.get(name).ok_or_else(|| Error::TableNotFound {
			table: name.to_owned(),
		})
	}

	/// Validate that this client schema is a subset of the replicated
	/// schema: every table and column exists, the column types agree, and
	/// no column the replica may NULL is declared non-nullable
	pub fn validate_subset(&self, replicated: &ClientSchema) -> Result<(), Error> {
		for (name, table) in &self.tables {
			let rep = replicated.tables.get(name).ok_or_else(|| Error::TableNotReplicated {
				table: name.clone(),
			})?;
			if table.primary_key != rep.primary_key {
				return Err(Error::SchemaMismatch {
					table: name.clone(),
					column: rep.primary_key.join(","),
					message: "primary key differs from the replicated table".to_owned(),
				});
			}
			for (col, def) in &table.columns {
				let rdef = rep.columns.get(col).ok_or_else(|| Error::SchemaMismatch {
					table: name.clone(),
					column: col.clone(),
					message: "column is not replicated".to_owned(),
				})?;
				if def.column_type != rdef.column_type {
					return Err(Error::SchemaMismatch {
						table: name.clone(),
						column: col.clone(),
						message: format!(
							"replicated type {} is not compatible with client type {}",
							rdef.column_type, def.column_type
						),
					});
				}
				if rdef.nullable && !def.nullable {
					return Err(Error::SchemaMismatch {
						table: name.clone(),
						column: col.clone(),
						message: "replicated column is nullable".to_owned(),
					});
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ast::Order;

	fn issue_schema() -> TableSchema {
		TableSchema::new("issue")
			.column("id", ColumnType::String)
			.column("title", ColumnType::String)
			.nullable_column("ownerID", ColumnType::String)
			.primary_key(["id"])
	}

	#[test]
	fn primary_key_is_a_unique_index() {
		let schema = issue_schema();
		assert!(schema.has_non_null_unique_covering(&["id".to_string()]));
		assert!(!schema.has_non_null_unique_covering(&["title".to_string()]));
	}

	#[test]
	fn nullable_columns_never_pin_a_row() {
		let schema = issue_schema().unique(["ownerID"]);
		assert!(!schema.has_non_null_unique_covering(&["ownerID".to_string()]));
	}

	#[test]
	fn order_satisfaction_requires_an_index_prefix() {
		let schema = issue_schema().index(["title", "id"]);
		assert!(schema.order_is_indexed(&[Order::asc("id")]));
		assert!(schema.order_is_indexed(&[Order::desc("id")]));
		assert!(schema.order_is_indexed(&[Order::asc("title")]));
		assert!(!schema.order_is_indexed(&[Order::asc("ownerID")]));
	}

	#[test]
	fn subset_validation_names_the_offending_column() {
		let client = ClientSchema::new([issue_schema()]);
		let mut replicated = issue_schema();
		replicated.columns.remove("title");
		let replicated = ClientSchema::new([replicated]);
		match client.validate_subset(&replicated) {
			Err(Error::SchemaMismatch {
				table,
				column,
				..
			}) => {
				assert_eq!(table, "issue");
				assert_eq!(column, "title");
			}
			other => panic!("expected schema mismatch, got {other:?}"),
		}
	}
}
