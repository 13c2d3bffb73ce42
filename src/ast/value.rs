use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The largest integer magnitude which survives a round-trip through the
/// engine's number representation.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// A single column value.
///
/// The type set is closed: everything a replica row can carry maps onto
/// one of these variants, and a replicated value which does not is a fatal
/// schema mismatch at the coercion boundary.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Value {
	Null,
	Bool(bool),
	Number(f64),
	Strand(String),
	Json(Json),
}

impl Value {
	/// Construct a number value, normalising the zero sign so that equal
	/// numbers produce identical canonical encodings
	pub fn number(v: f64) -> Self {
		if v == 0.0 {
			Value::Number(0.0)
		} else {
			Value::Number(v)
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// A stable rank used to order values of different types
	fn rank(&self) -> u8 {
		match self {
			Value::Null => 0,
			Value::Bool(_) => 1,
			Value::Number(_) => 2,
			Value::Strand(_) => 3,
			Value::Json(_) => 4,
		}
	}
}

impl Default for Value {
	fn default() -> Self {
		Value::Null
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Value {}

impl PartialOrd for Value {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Value {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Value::Null, Value::Null) => Ordering::Equal,
			(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
			(Value::Number(a), Value::Number(b)) => a.total_cmp(b),
			(Value::Strand(a), Value::Strand(b)) => a.cmp(b),
			(Value::Json(a), Value::Json(b)) => a.canonical().cmp(&b.canonical()),
			_ => self.rank().cmp(&other.rank()),
		}
	}
}

impl Hash for Value {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.rank().hash(state);
		match self {
			Value::Null => {}
			Value::Bool(b) => b.hash(state),
			Value::Number(n) => {
				// Normalise the zero sign so 0.0 and -0.0 collide
				let n = if *n == 0.0 {
					0.0
				} else {
					*n
				};
				n.to_bits().hash(state);
			}
			Value::Strand(s) => s.hash(state),
			Value::Json(j) => j.canonical().hash(state),
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Value::Null => f.write_str("NULL"),
			Value::Bool(b) => write!(f, "{b}"),
			Value::Number(n) => write!(f, "{n}"),
			Value::Strand(s) => write!(f, "'{s}'"),
			Value::Json(j) => write!(f, "{}", j.canonical()),
		}
	}
}

impl Serialize for Value {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Value::Null => serializer.serialize_unit(),
			Value::Bool(b) => serializer.serialize_bool(*b),
			Value::Number(n) => {
				// Whole numbers encode as integers so that canonical row
				// JSON is stable across replication round-trips
				if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 {
					serializer.serialize_i64(*n as i64)
				} else {
					serializer.serialize_f64(*n)
				}
			}
			Value::Strand(s) => serializer.serialize_str(s),
			Value::Json(j) => j.0.serialize(serializer),
		}
	}
}

impl<'de> Deserialize<'de> for Value {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let v = serde_json::Value::deserialize(deserializer)?;
		Ok(Value::from(v))
	}
}

impl From<serde_json::Value> for Value {
	fn from(v: serde_json::Value) -> Self {
		match v {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(b) => Value::Bool(b),
			serde_json::Value::Number(n) => Value::number(n.as_f64().unwrap_or(0.0)),
			serde_json::Value::String(s) => Value::Strand(s),
			v => Value::Json(Json(v)),
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::number(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::number(v as f64)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::number(v as f64)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Strand(v.to_owned())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Strand(v)
	}
}

/// A parsed JSON document stored in a single column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Json(pub serde_json::Value);

impl Json {
	/// The canonical text encoding, with object keys sorted
	pub fn canonical(&self) -> String {
		self.0.to_string()
	}
}

/// A single row, keyed by column name.
///
/// Columns are held in a sorted map so that the serialised form is
/// canonical, which the change streamer relies on for deduplication.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Row(pub BTreeMap<String, Value>);

impl Row {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, column: &str) -> Option<&Value> {
		self.0.get(column)
	}

	pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
		self.0.insert(column.into(), value.into());
		self
	}

	/// The values of the given columns, in the given order
	pub fn values(&self, columns: &[String]) -> Key {
		Key(columns.iter().map(|c| self.get(c).cloned().unwrap_or(Value::Null)).collect())
	}

	/// The subset of this row covering exactly the given columns
	pub fn project(&self, columns: &[String]) -> RowKey {
		let mut out = BTreeMap::new();
		for c in columns {
			out.insert(c.clone(), self.get(c).cloned().unwrap_or(Value::Null));
		}
		RowKey(out)
	}

	/// The canonical JSON encoding of this row
	pub fn canonical(&self) -> String {
		serde_json::to_string(self).unwrap_or_default()
	}
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Row(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

/// The primary-key projection of a row, as emitted in row changes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RowKey(pub BTreeMap<String, Value>);

impl RowKey {
	pub fn canonical(&self) -> String {
		serde_json::to_string(self).unwrap_or_default()
	}
}

/// An ordered tuple of values, used as the internal storage key for a row
/// under its primary key or one of its unique indexes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Key(pub Vec<Value>);

impl Key {
	/// Whether any component is NULL. NULL never matches a join, and a
	/// unique index never constrains rows with a NULL component.
	pub fn has_null(&self) -> bool {
		self.0.iter().any(Value::is_null)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn value_type_order_is_stable() {
		let mut values = vec![
			Value::Strand("a".into()),
			Value::Null,
			Value::Number(1.0),
			Value::Bool(true),
		];
		values.sort();
		assert_eq!(
			values,
			vec![Value::Null, Value::Bool(true), Value::Number(1.0), Value::Strand("a".into())]
		);
	}

	#[test]
	fn negative_zero_collides_with_zero() {
		assert_eq!(Value::number(-0.0), Value::number(0.0));
		let a: Row = [("n", Value::number(-0.0))].into_iter().collect();
		let b: Row = [("n", Value::number(0.0))].into_iter().collect();
		assert_eq!(a.canonical(), b.canonical());
	}

	#[test]
	fn whole_numbers_encode_as_integers() {
		let row: Row = [("id", 3)].into_iter().collect();
		assert_eq!(row.canonical(), r#"{"id":3}"#);
	}

	#[test]
	fn row_projection_extracts_key_columns() {
		let row: Row = [("id", Value::from(1)), ("name", Value::from("foo"))]
			.into_iter()
			.collect();
		let key = row.values(&["id".to_string()]);
		assert_eq!(key, Key(vec![Value::from(1)]));
	}
}
