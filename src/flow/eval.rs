use crate::ast::{CompareOp, Correlation, Key, Operand, Orders, Row, Value};
use crate::err::Error;
use crate::rep::source::{FetchRequest, Fetched};
use crate::rep::Sources;
use std::collections::{BTreeMap, HashMap, HashSet};

/// The compiled form of a condition, with correlated subqueries carrying
/// their operator identity so flipped joins can reach their buffered
/// parent keys.
#[derive(Debug)]
pub(crate) enum Pred {
	Simple {
		left: Operand,
		op: CompareOp,
		right: Operand,
	},
	And(Vec<Pred>),
	Or(Vec<Pred>),
	Exists(ExistsOp),
}

#[derive(Debug)]
pub(crate) struct ExistsOp {
	/// Identity of this operator within its pipeline
	pub id: usize,
	pub table: String,
	pub correlation: Correlation,
	pub flip: bool,
	pub cond: Option<Box<Pred>>,
}

/// Everything an evaluation can reach: the driver's table sources, and
/// during hydration the operator-local buffers of flipped joins.
pub(crate) struct EvalCtx<'a> {
	pub sources: &'a Sources,
	pub buffers: Option<&'a HashMap<usize, HashSet<Key>>>,
}

pub(crate) fn eval(pred: &Pred, row: &Row, ctx: &EvalCtx) -> Result<bool, Error> {
	match pred {
		Pred::Simple {
			left,
			op,
			right,
		} => eval_simple(left, *op, right, row),
		Pred::And(children) => {
			for child in children {
				if !eval(child, row, ctx)? {
					return Ok(false);
				}
			}
			Ok(true)
		}
		Pred::Or(children) => {
			for child in children {
				if eval(child, row, ctx)? {
					return Ok(true);
				}
			}
			Ok(false)
		}
		Pred::Exists(exists) => eval_exists(exists, row, ctx),
	}
}

fn eval_exists(exists: &ExistsOp, row: &Row, ctx: &EvalCtx) -> Result<bool, Error> {
	let parent_values: Vec<Value> = exists
		.correlation
		.parent_fields
		.iter()
		.map(|column| row.get(column).cloned().unwrap_or(Value::Null))
		.collect();
	// NULL never matches a join
	if parent_values.iter().any(Value::is_null) {
		return Ok(false);
	}
	// A flipped join probes the parent keys its child side buffered
	// during hydration
	if exists.flip {
		if let Some(set) = ctx.buffers.and_then(|buffers| buffers.get(&exists.id)) {
			return Ok(set.contains(&Key(parent_values)));
		}
	}
	let source = ctx.sources.get(&exists.table).ok_or_else(|| Error::TableNotFound {
		table: exists.table.clone(),
	})?;
	let constraint: BTreeMap<String, Value> = exists
		.correlation
		.child_fields
		.iter()
		.cloned()
		.zip(parent_values)
		.collect();
	let order = Orders::default();
	let request = FetchRequest {
		constraint: Some(&constraint),
		order: &order,
		start: None,
		reverse: false,
	};
	for fetched in source.fetch(request, None) {
		if let Fetched::Row(child) = fetched {
			match &exists.cond {
				None => return Ok(true),
				Some(cond) => {
					if eval(cond, &child, ctx)? {
						return Ok(true);
					}
				}
			}
		}
	}
	Ok(false)
}

enum Resolved<'a> {
	One(&'a Value),
	Many(&'a [Value]),
}

fn resolve<'a>(operand: &'a Operand, row: &'a Row) -> Result<Resolved<'a>, Error> {
	const NULL: &Value = &Value::Null;
	match operand {
		Operand::Column(column) => Ok(Resolved::One(row.get(column).unwrap_or(NULL))),
		Operand::Literal(value) => Ok(Resolved::One(value)),
		Operand::Set(values) => Ok(Resolved::Many(values)),
		Operand::Static(name) => Err(Error::StaticNotSubstituted {
			name: name.clone(),
		}),
	}
}

fn eval_simple(left: &Operand, op: CompareOp, right: &Operand, row: &Row) -> Result<bool, Error> {
	let left = resolve(left, row)?;
	let right = resolve(right, row)?;
	Ok(match (left, op, right) {
		// IS and IS NOT are the only null-aware comparisons
		(Resolved::One(l), CompareOp::Is, Resolved::One(r)) => l == r,
		(Resolved::One(l), CompareOp::IsNot, Resolved::One(r)) => l != r,
		(Resolved::One(l), _, _) | (_, _, Resolved::One(l)) if l.is_null() => false,
		(Resolved::One(l), CompareOp::Equal, Resolved::One(r)) => l == r,
		(Resolved::One(l), CompareOp::NotEqual, Resolved::One(r)) => l != r,
		(Resolved::One(l), CompareOp::LessThan, Resolved::One(r)) => l < r,
		(Resolved::One(l), CompareOp::LessThanOrEqual, Resolved::One(r)) => l <= r,
		(Resolved::One(l), CompareOp::MoreThan, Resolved::One(r)) => l > r,
		(Resolved::One(l), CompareOp::MoreThanOrEqual, Resolved::One(r)) => l >= r,
		(Resolved::One(l), CompareOp::In, Resolved::Many(r)) => r.contains(l),
		(Resolved::One(l), CompareOp::NotIn, Resolved::Many(r)) => !r.contains(l),
		(Resolved::One(l), CompareOp::Like, Resolved::One(r)) => like(l, r, false),
		(Resolved::One(l), CompareOp::NotLike, Resolved::One(r)) => is_text(l, r) && !like(l, r, false),
		(Resolved::One(l), CompareOp::ILike, Resolved::One(r)) => like(l, r, true),
		(Resolved::One(l), CompareOp::NotILike, Resolved::One(r)) => is_text(l, r) && !like(l, r, true),
		_ => false,
	})
}

fn is_text(l: &Value, r: &Value) -> bool {
	matches!((l, r), (Value::Strand(_), Value::Strand(_)))
}

/// SQL LIKE matching: `%` matches any run, `_` matches one character
fn like(value: &Value, pattern: &Value, case_insensitive: bool) -> bool {
	let (Value::Strand(value), Value::Strand(pattern)) = (value, pattern) else {
		return false;
	};
	let mut expression = String::with_capacity(pattern.len() + 8);
	if case_insensitive {
		expression.push_str("(?i)");
	}
	expression.push('^');
	for ch in pattern.chars() {
		match ch {
			'%' => expression.push_str(".*"),
			'_' => expression.push('.'),
			ch => expression.push_str(&regex::escape(&ch.to_string())),
		}
	}
	expression.push('$');
	regex::Regex::new(&expression).map(|re| re.is_match(value)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn row(pairs: Vec<(&str, Value)>) -> Row {
		pairs.into_iter().collect()
	}

	fn simple(column: &str, op: CompareOp, value: Value) -> Pred {
		Pred::Simple {
			left: Operand::Column(column.to_owned()),
			op,
			right: Operand::Literal(value),
		}
	}

	fn eval_filter(pred: &Pred, row: &Row) -> bool {
		let sources = Sources::new();
		let ctx = EvalCtx {
			sources: &sources,
			buffers: None,
		};
		eval(pred, row, &ctx).unwrap()
	}

	#[test]
	fn null_comparisons_never_match() {
		let row = row(vec![("owner", Value::Null)]);
		assert!(!eval_filter(&simple("owner", CompareOp::Equal, Value::Null), &row));
		assert!(!eval_filter(&simple("owner", CompareOp::NotEqual, Value::from("a")), &row));
		assert!(eval_filter(&simple("owner", CompareOp::Is, Value::Null), &row));
		assert!(!eval_filter(&simple("owner", CompareOp::IsNot, Value::Null), &row));
	}

	#[test]
	fn like_patterns_anchor_and_escape() {
		let row = row(vec![("title", Value::from("a.b-c"))]);
		assert!(eval_filter(&simple("title", CompareOp::Like, Value::from("a.b%")), &row));
		assert!(!eval_filter(&simple("title", CompareOp::Like, Value::from("a_b%")), &row));
		assert!(eval_filter(&simple("title", CompareOp::ILike, Value::from("A.B%")), &row));
		assert!(!eval_filter(&simple("title", CompareOp::Like, Value::from("b-c")), &row));
	}

	#[test]
	fn membership_checks_the_value_list() {
		let row = row(vec![("id", Value::from(2))]);
		let pred = Pred::Simple {
			left: Operand::Column("id".to_owned()),
			op: CompareOp::In,
			right: Operand::Set(vec![Value::from(1), Value::from(2)]),
		};
		assert!(eval_filter(&pred, &row));
	}

	#[test]
	fn statics_fail_loudly_at_evaluation() {
		let row = row(vec![("id", Value::from(1))]);
		let pred = Pred::Simple {
			left: Operand::Column("id".to_owned()),
			op: CompareOp::Equal,
			right: Operand::Static("userID".to_owned()),
		};
		let sources = Sources::new();
		let ctx = EvalCtx {
			sources: &sources,
			buffers: None,
		};
		assert!(matches!(
			eval(&pred, &row, &ctx),
			Err(Error::StaticNotSubstituted {
				..
			})
		));
	}
}
