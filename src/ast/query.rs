use crate::ast::cond::{Cond, CorrelatedSubquery, Operand};
use crate::ast::order::{Direction, Order, Orders, Start};
use crate::ast::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Which subsystem a related subtree belongs to.
///
/// Permissions subtrees constrain visibility exactly like client
/// subtrees, but their rows are never forwarded to subscribers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
	#[default]
	Client,
	Permissions,
}

/// The column pairing which correlates a child subquery with its parent.
/// `parent_fields[i]` on the parent row must equal `child_fields[i]` on
/// the child row.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Correlation {
	pub parent_fields: Vec<String>,
	pub child_fields: Vec<String>,
}

impl Correlation {
	pub fn new(
		parent_fields: impl IntoIterator<Item = impl Into<String>>,
		child_fields: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		Correlation {
			parent_fields: parent_fields.into_iter().map(Into::into).collect(),
			child_fields: child_fields.into_iter().map(Into::into).collect(),
		}
	}
}

/// A correlated subtree: the child query plus the correlation which ties
/// it to the parent row. Used both for output-related subtrees and as the
/// body of an EXISTS condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Related {
	pub correlation: Correlation,
	pub subquery: Box<Query>,
	pub system: System,
}

impl Related {
	pub fn new(correlation: Correlation, subquery: Query) -> Self {
		Related {
			correlation,
			subquery: Box::new(subquery),
			system: System::Client,
		}
	}

	pub fn with_system(mut self, system: System) -> Self {
		self.system = system;
		self
	}
}

/// A declarative view subscription query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
	pub table: String,
	pub cond: Option<Cond>,
	pub order: Orders,
	pub related: Vec<Related>,
	pub limit: Option<usize>,
	pub start: Option<Start>,
}

impl Query {
	pub fn new(table: impl Into<String>) -> Self {
		Query {
			table: table.into(),
			..Default::default()
		}
	}

	pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
		self.order.0.push(Order {
			column: column.into(),
			direction,
		});
		self
	}

	/// AND a condition onto this query
	pub fn filter(mut self, cond: Cond) -> Self {
		self.cond = Some(match self.cond.take() {
			None => cond,
			Some(Cond::And(mut cs)) => {
				cs.push(cond);
				Cond::And(cs)
			}
			Some(prev) => Cond::And(vec![prev, cond]),
		});
		self
	}

	/// AND an EXISTS condition onto this query
	pub fn where_exists(self, related: Related) -> Self {
		self.filter(Cond::Exists(CorrelatedSubquery::new(related)))
	}

	/// Attach an output-related subtree
	pub fn with_related(mut self, related: Related) -> Self {
		self.related.push(related);
		self
	}

	pub fn with_limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn with_start(mut self, start: Start) -> Self {
		self.start = Some(start);
		self
	}

	/// Collect every table this query tree references
	pub fn tables(&self) -> BTreeSet<String> {
		let mut out = BTreeSet::new();
		self.collect_tables(&mut out);
		out
	}

	fn collect_tables(&self, out: &mut BTreeSet<String>) {
		out.insert(self.table.clone());
		if let Some(cond) = &self.cond {
			Self::collect_cond_tables(cond, out);
		}
		for r in &self.related {
			r.subquery.collect_tables(out);
		}
	}

	fn collect_cond_tables(cond: &Cond, out: &mut BTreeSet<String>) {
		match cond {
			Cond::Simple {
				..
			} => {}
			Cond::And(cs) | Cond::Or(cs) => {
				for c in cs {
					Self::collect_cond_tables(c, out);
				}
			}
			Cond::Exists(sub) => sub.related.subquery.collect_tables(out),
		}
	}

	/// The name of the first unsubstituted static operand anywhere in the
	/// query tree, if any
	pub fn find_static(&self) -> Option<&str> {
		if let Some(found) = self.cond.as_ref().and_then(Cond::find_static) {
			return Some(found);
		}
		self.related.iter().find_map(|r| r.subquery.find_static())
	}

	/// Replace every static operand with its value. Unknown names are
	/// left in place so the executor can report them.
	pub fn substitute_statics(&self, values: &BTreeMap<String, Value>) -> Query {
		let mut out = self.clone();
		if let Some(cond) = out.cond.take() {
			out.cond = Some(Self::substitute_cond(cond, values));
		}
		out.related = out
			.related
			.into_iter()
			.map(|mut r| {
				r.subquery = Box::new(r.subquery.substitute_statics(values));
				r
			})
			.collect();
		out
	}

	fn substitute_cond(cond: Cond, values: &BTreeMap<String, Value>) -> Cond {
		let substitute = |o: Operand| match o {
			Operand::Static(n) => match values.get(&n) {
				Some(v) => Operand::Literal(v.clone()),
				None => Operand::Static(n),
			},
			o => o,
		};
		match cond {
			Cond::Simple {
				left,
				op,
				right,
			} => Cond::Simple {
				left: substitute(left),
				op,
				right: substitute(right),
			},
			Cond::And(cs) => {
				Cond::And(cs.into_iter().map(|c| Self::substitute_cond(c, values)).collect())
			}
			Cond::Or(cs) => {
				Cond::Or(cs.into_iter().map(|c| Self::substitute_cond(c, values)).collect())
			}
			Cond::Exists(mut sub) => {
				sub.related.subquery = Box::new(sub.related.subquery.substitute_statics(values));
				Cond::Exists(sub)
			}
		}
	}

	/// A stable hash of this query tree, usable as a pipeline key when the
	/// caller does not maintain its own transformation hashes
	pub fn transformation_hash(&self) -> String {
		let mut hasher = DefaultHasher::new();
		serde_json::to_string(self).unwrap_or_default().hash(&mut hasher);
		format!("{:016x}", hasher.finish())
	}
}

impl fmt::Display for Query {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "FROM {}", self.table)?;
		if let Some(cond) = &self.cond {
			write!(f, " WHERE {cond}")?;
		}
		if !self.order.is_empty() {
			write!(f, " {}", self.order)?;
		}
		if let Some(limit) = self.limit {
			write!(f, " LIMIT {limit}")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ast::operator::CompareOp;

	#[test]
	fn tables_collects_nested_references() {
		let q = Query::new("issue")
			.where_exists(Related::new(
				Correlation::new(["id"], ["issueID"]),
				Query::new("comment"),
			))
			.with_related(Related::new(
				Correlation::new(["ownerID"], ["id"]),
				Query::new("user"),
			));
		let tables: Vec<_> = q.tables().into_iter().collect();
		assert_eq!(tables, vec!["comment", "issue", "user"]);
	}

	#[test]
	fn filter_flattens_into_and() {
		let q = Query::new("issue")
			.filter(Cond::eq("closed", false))
			.filter(Cond::cmp("priority", CompareOp::MoreThan, 1));
		match q.cond {
			Some(Cond::And(cs)) => assert_eq!(cs.len(), 2),
			other => panic!("expected AND, got {other:?}"),
		}
	}

	#[test]
	fn statics_substitute_and_report() {
		let q = Query::new("issue").filter(Cond::Simple {
			left: Operand::Column("ownerID".into()),
			op: CompareOp::Equal,
			right: Operand::Static("userID".into()),
		});
		assert_eq!(q.find_static(), Some("userID"));
		let values = [("userID".to_string(), Value::from("u1"))].into_iter().collect();
		let q = q.substitute_statics(&values);
		assert_eq!(q.find_static(), None);
	}
}
