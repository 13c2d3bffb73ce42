use crate::ast::value::MAX_SAFE_INTEGER;
use crate::ast::{Json, Row, Value};
use crate::err::Error;
use crate::sch::{ColumnType, TableSchema};
use std::collections::BTreeMap;

/// A column value as read from the replica, before coercion into the
/// engine's value set.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum RawValue {
	Null,
	Bool(bool),
	Integer(i64),
	Real(f64),
	Text(String),
	/// JSON column text, parsed on first materialisation
	Json(String),
}

impl From<bool> for RawValue {
	fn from(v: bool) -> Self {
		RawValue::Bool(v)
	}
}

impl From<i64> for RawValue {
	fn from(v: i64) -> Self {
		RawValue::Integer(v)
	}
}

impl From<i32> for RawValue {
	fn from(v: i32) -> Self {
		RawValue::Integer(v as i64)
	}
}

impl From<f64> for RawValue {
	fn from(v: f64) -> Self {
		RawValue::Real(v)
	}
}

impl From<&str> for RawValue {
	fn from(v: &str) -> Self {
		RawValue::Text(v.to_owned())
	}
}

/// A replica row prior to coercion.
pub type RawRow = BTreeMap<String, RawValue>;

/// Materialise a replica row into engine values, following the client
/// schema. Columns the client does not sync are dropped. Values outside
/// the representable set fail loudly, naming the table and column.
pub fn materialise(table: &TableSchema, raw: &RawRow) -> Result<Row, Error> {
	let mut row = Row::new();
	for (column, def) in &table.columns {
		let value = match raw.get(column) {
			None | Some(RawValue::Null) => {
				if !def.nullable && !raw.contains_key(column) {
					return Err(Error::SchemaMismatch {
						table: table.name.clone(),
						column: column.clone(),
						message: "non-nullable column is missing from the replica row".to_owned(),
					});
				}
				if !def.nullable && raw.contains_key(column) {
					return Err(Error::SchemaMismatch {
						table: table.name.clone(),
						column: column.clone(),
						message: "replica row holds NULL in a non-nullable column".to_owned(),
					});
				}
				Value::Null
			}
			Some(raw_value) => coerce(table, column, def.column_type, raw_value)?,
		};
		row.0.insert(column.clone(), value);
	}
	Ok(row)
}

fn coerce(
	table: &TableSchema,
	column: &str,
	column_type: ColumnType,
	value: &RawValue,
) -> Result<Value, Error> {
	let mismatch = |message: &str| Error::SchemaMismatch {
		table: table.name.clone(),
		column: column.to_owned(),
		message: message.to_owned(),
	};
	match (column_type, value) {
		(ColumnType::String, RawValue::Text(s)) => Ok(Value::Strand(s.clone())),
		(ColumnType::Number, RawValue::Integer(i)) => {
			if i.abs() > MAX_SAFE_INTEGER {
				return Err(Error::UnsupportedValue {
					table: table.name.clone(),
					column: column.to_owned(),
					message: format!("integer {i} is outside the safe range"),
				});
			}
			Ok(Value::number(*i as f64))
		}
		(ColumnType::Number, RawValue::Real(r)) => {
			if !r.is_finite() {
				return Err(Error::UnsupportedValue {
					table: table.name.clone(),
					column: column.to_owned(),
					message: format!("number {r} is not representable"),
				});
			}
			Ok(Value::number(*r))
		}
		// Replicas without a boolean storage class encode booleans as
		// zero and one
		(ColumnType::Boolean, RawValue::Bool(b)) => Ok(Value::Bool(*b)),
		(ColumnType::Boolean, RawValue::Integer(0)) => Ok(Value::Bool(false)),
		(ColumnType::Boolean, RawValue::Integer(1)) => Ok(Value::Bool(true)),
		(ColumnType::Json, RawValue::Json(text)) | (ColumnType::Json, RawValue::Text(text)) => {
			let parsed = serde_json::from_str(text).map_err(|source| Error::InvalidJson {
				table: table.name.clone(),
				column: column.to_owned(),
				source,
			})?;
			Ok(Value::Json(Json(parsed)))
		}
		(ColumnType::Null, _) => Err(mismatch("column type admits only NULL")),
		_ => Err(mismatch("replica value does not match the column type")),
	}
}
