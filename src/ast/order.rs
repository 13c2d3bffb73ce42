use crate::ast::value::Row;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	#[default]
	Asc,
	Desc,
}

impl fmt::Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Direction::Asc => f.write_str("ASC"),
			Direction::Desc => f.write_str("DESC"),
		}
	}
}

/// One ordering term.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Order {
	pub column: String,
	pub direction: Direction,
}

impl Order {
	pub fn asc(column: impl Into<String>) -> Self {
		Order {
			column: column.into(),
			direction: Direction::Asc,
		}
	}

	pub fn desc(column: impl Into<String>) -> Self {
		Order {
			column: column.into(),
			direction: Direction::Desc,
		}
	}
}

impl fmt::Display for Order {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} {}", self.column, self.direction)
	}
}

/// The full ordering of a query.
///
/// Once the primary-key columns are appended this is a total order over
/// the table, which hydration relies on for determinism.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Orders(pub Vec<Order>);

impl Deref for Orders {
	type Target = Vec<Order>;
	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl Orders {
	pub fn contains(&self, column: &str) -> bool {
		self.0.iter().any(|o| o.column == column)
	}

	/// Append any missing primary-key columns, making the order total
	pub fn complete(&mut self, primary_key: &[String]) {
		for pk in primary_key {
			if !self.contains(pk) {
				self.0.push(Order::asc(pk.clone()));
			}
		}
	}

	/// Whether this order covers every primary-key column
	pub fn is_complete(&self, primary_key: &[String]) -> bool {
		primary_key.iter().all(|pk| self.contains(pk))
	}

	/// Compare two rows under this ordering
	pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
		for o in &self.0 {
			let av = a.get(&o.column);
			let bv = b.get(&o.column);
			let ord = av.cmp(&bv);
			let ord = match o.direction {
				Direction::Asc => ord,
				Direction::Desc => ord.reverse(),
			};
			if ord != Ordering::Equal {
				return ord;
			}
		}
		Ordering::Equal
	}
}

impl fmt::Display for Orders {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("ORDER BY ")?;
		for (i, o) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{o}")?;
		}
		Ok(())
	}
}

/// Whether a start cursor is inclusive or exclusive of its row.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Basis {
	At,
	After,
}

/// A resume cursor positioning a fetch within an ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Start {
	pub row: Row,
	pub basis: Basis,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ast::value::Value;

	#[test]
	fn complete_appends_missing_primary_key() {
		let mut orders = Orders(vec![Order::desc("modified")]);
		orders.complete(&["id".to_string()]);
		assert_eq!(orders.0, vec![Order::desc("modified"), Order::asc("id")]);
	}

	#[test]
	fn complete_is_idempotent() {
		let mut orders = Orders(vec![Order::desc("id")]);
		orders.complete(&["id".to_string()]);
		assert_eq!(orders.0, vec![Order::desc("id")]);
	}

	#[test]
	fn compare_honours_direction() {
		let orders = Orders(vec![Order::desc("id")]);
		let a: Row = [("id", Value::from(1))].into_iter().collect();
		let b: Row = [("id", Value::from(2))].into_iter().collect();
		assert_eq!(orders.compare(&a, &b), Ordering::Greater);
	}
}
