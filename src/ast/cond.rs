use crate::ast::operator::CompareOp;
use crate::ast::query::Related;
use crate::ast::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One operand of a simple condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Operand {
	/// A column of the current table
	Column(String),
	/// A literal value
	Literal(Value),
	/// A literal list, the right-hand side of IN and NOT IN
	Set(Vec<Value>),
	/// A named placeholder which must be substituted before execution
	Static(String),
}

impl fmt::Display for Operand {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Operand::Column(c) => f.write_str(c),
			Operand::Literal(v) => write!(f, "{v}"),
			Operand::Set(vs) => {
				f.write_str("(")?;
				for (i, v) in vs.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{v}")?;
				}
				f.write_str(")")
			}
			Operand::Static(n) => write!(f, "${n}"),
		}
	}
}

/// A boolean condition over the rows of one table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Cond {
	Simple {
		left: Operand,
		op: CompareOp,
		right: Operand,
	},
	And(Vec<Cond>),
	Or(Vec<Cond>),
	Exists(CorrelatedSubquery),
}

impl Cond {
	/// A simple column-to-literal comparison
	pub fn cmp(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
		Cond::Simple {
			left: Operand::Column(column.into()),
			op,
			right: Operand::Literal(value.into()),
		}
	}

	/// An equality comparison against a literal
	pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
		Self::cmp(column, CompareOp::Equal, value)
	}

	/// The name of the first unsubstituted static operand, if any
	pub fn find_static(&self) -> Option<&str> {
		match self {
			Cond::Simple {
				left,
				right,
				..
			} => [left, right].into_iter().find_map(|o| match o {
				Operand::Static(n) => Some(n.as_str()),
				_ => None,
			}),
			Cond::And(cs) | Cond::Or(cs) => cs.iter().find_map(Cond::find_static),
			Cond::Exists(sub) => sub.related.subquery.find_static(),
		}
	}
}

impl fmt::Display for Cond {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Cond::Simple {
				left,
				op,
				right,
			} => write!(f, "{left} {op} {right}"),
			Cond::And(cs) => {
				f.write_str("(")?;
				for (i, c) in cs.iter().enumerate() {
					if i > 0 {
						f.write_str(" AND ")?;
					}
					write!(f, "{c}")?;
				}
				f.write_str(")")
			}
			Cond::Or(cs) => {
				f.write_str("(")?;
				for (i, c) in cs.iter().enumerate() {
					if i > 0 {
						f.write_str(" OR ")?;
					}
					write!(f, "{c}")?;
				}
				f.write_str(")")
			}
			Cond::Exists(sub) => write!(f, "{sub}"),
		}
	}
}

/// An EXISTS-style correlated subquery.
///
/// The flip flag records the planner's decision about which side drives
/// the iteration: `false` means the parent drives and each parent row
/// probes the child side; `true` means the child drives and parent rows
/// are reached through the correlation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedSubquery {
	pub related: Related,
	pub flip: bool,
}

impl CorrelatedSubquery {
	pub fn new(related: Related) -> Self {
		CorrelatedSubquery {
			related,
			flip: false,
		}
	}
}

impl fmt::Display for CorrelatedSubquery {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.flip {
			write!(f, "EXISTS FLIPPED ({})", self.related.subquery)
		} else {
			write!(f, "EXISTS ({})", self.related.subquery)
		}
	}
}
