//! The pluggable cost model consulted by the planner.
//!
//! A cost model estimates, for one table access site, how many rows the
//! access will scan, what one-time startup cost it pays, and — through a
//! deferred fanout lookup — how many rows it contributes per distinct
//! value of a set of join columns when it sits on the child side of a
//! correlation.

pub mod stats;

use crate::ast::{CompareOp, Order, Value};
use crate::err::Error;
use crate::sch::ClientSchema;
use std::collections::BTreeMap;

pub use stats::StatsCostModel;
pub use stats::StatsProvider;

/// One table access site, as seen by the planner.
pub struct Access<'a> {
	pub table: &'a str,
	/// The ordering the access must produce
	pub order: &'a [Order],
	/// The local filters, with subqueries already extracted
	pub filters: &'a [Filter],
	/// The columns the parent side fixes by equality
	pub constraint: &'a [String],
}

/// A local filter, reduced to the shape the cost model cares about.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
	pub column: String,
	pub op: CompareOp,
	pub value: FilterValue,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
	One(Value),
	Many(Vec<Value>),
	/// A value the planner can not see, such as an unsubstituted static
	Opaque,
}

impl Filter {
	/// Whether this filter pins its column to a single known value
	pub fn is_equality(&self) -> bool {
		self.op == CompareOp::Equal && matches!(self.value, FilterValue::One(_))
	}
}

/// How trustworthy a fanout figure is. Higher-confidence figures replace
/// plain row counts inside fanout-bearing loops.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Confidence {
	Fallback,
	IndexAverage,
	Histogram,
}

/// The expected number of child rows per distinct value of a set of join
/// columns.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fanout {
	pub per_value: f64,
	pub confidence: Confidence,
}

/// The deferred part of a cost estimate: a column-parameterised fanout
/// lookup, resolved only when the access turns out to be the child side
/// of a join. Implementations borrow their statistics source rather than
/// capturing a mutable handle.
pub trait FanoutFn {
	fn fanout(&self, columns: &[String]) -> Fanout;
}

/// The cost of one table access site.
pub struct Estimate<'a> {
	/// Approximate cardinality of the access
	pub rows: f64,
	/// One-time cost, zero when the ordering is satisfied by an index
	pub startup_cost: f64,
	/// Deferred per-join-column fanout lookup
	pub fanout: Box<dyn FanoutFn + 'a>,
}

impl Estimate<'_> {
	/// The branch cost of this access when it drives its own iteration
	pub fn branch_cost(&self) -> f64 {
		self.startup_cost + self.rows
	}
}

/// A pure costing function over table access sites.
pub trait CostModel {
	fn cost(&self, access: &Access<'_>) -> Result<Estimate<'_>, Error>;
}

/// A cost model with fixed per-table cardinalities and a uniform fanout.
/// Used by tests and by analyse tooling to replay planning decisions
/// against hypothetical statistics.
#[derive(Clone, Debug)]
pub struct FixedCostModel {
	schema: ClientSchema,
	rows: BTreeMap<String, f64>,
	fanout: f64,
	default_rows: f64,
}

impl FixedCostModel {
	pub fn new(schema: ClientSchema) -> Self {
		FixedCostModel {
			schema,
			rows: BTreeMap::new(),
			fanout: crate::cnf::DEFAULT_FANOUT,
			default_rows: 1000.0,
		}
	}

	pub fn with_rows(mut self, table: impl Into<String>, rows: f64) -> Self {
		self.rows.insert(table.into(), rows);
		self
	}

	pub fn with_fanout(mut self, fanout: f64) -> Self {
		self.fanout = fanout;
		self
	}
}

struct FixedFanout(f64);

impl FanoutFn for FixedFanout {
	fn fanout(&self, _columns: &[String]) -> Fanout {
		Fanout {
			per_value: self.0,
			confidence: Confidence::Fallback,
		}
	}
}

impl CostModel for FixedCostModel {
	fn cost(&self, access: &Access<'_>) -> Result<Estimate<'_>, Error> {
		let table = self.schema.table(access.table)?;
		let mut rows = self.rows.get(access.table).copied().unwrap_or(self.default_rows);
		// Equality on a non-null unique index pins a single row
		let pinned: Vec<String> = access
			.filters
			.iter()
			.filter(|f| f.is_equality())
			.map(|f| f.column.clone())
			.collect();
		if table.has_non_null_unique_covering(&pinned) {
			rows = 1.0;
		}
		let startup_cost = if table.order_is_indexed(access.order) {
			0.0
		} else {
			rows * rows.max(2.0).log2()
		};
		Ok(Estimate {
			rows,
			startup_cost,
			fanout: Box::new(FixedFanout(self.fanout)),
		})
	}
}
