use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operators usable in a simple condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CompareOp {
	Equal,           // =
	NotEqual,        // !=
	LessThan,        // <
	LessThanOrEqual, // <=
	MoreThan,        // >
	MoreThanOrEqual, // >=
	In,              // IN
	NotIn,           // NOT IN
	Like,            // LIKE
	NotLike,         // NOT LIKE
	ILike,           // ILIKE
	NotILike,        // NOT ILIKE
	Is,              // IS
	IsNot,           // IS NOT
}

impl CompareOp {
	/// Whether the right-hand operand is a list of values
	pub fn is_membership(&self) -> bool {
		matches!(self, CompareOp::In | CompareOp::NotIn)
	}

	/// Whether this operator matches rows by string pattern
	pub fn is_pattern(&self) -> bool {
		matches!(
			self,
			CompareOp::Like | CompareOp::NotLike | CompareOp::ILike | CompareOp::NotILike
		)
	}
}

impl fmt::Display for CompareOp {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Equal => f.write_str("="),
			Self::NotEqual => f.write_str("!="),
			Self::LessThan => f.write_str("<"),
			Self::LessThanOrEqual => f.write_str("<="),
			Self::MoreThan => f.write_str(">"),
			Self::MoreThanOrEqual => f.write_str(">="),
			Self::In => f.write_str("IN"),
			Self::NotIn => f.write_str("NOT IN"),
			Self::Like => f.write_str("LIKE"),
			Self::NotLike => f.write_str("NOT LIKE"),
			Self::ILike => f.write_str("ILIKE"),
			Self::NotILike => f.write_str("NOT ILIKE"),
			Self::Is => f.write_str("IS"),
			Self::IsNot => f.write_str("IS NOT"),
		}
	}
}
