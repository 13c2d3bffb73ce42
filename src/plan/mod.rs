//! The cost-based query planner.
//!
//! Planning never changes what a query means; it only decides, for each
//! EXISTS-style correlated subquery, whether the parent or the child side
//! should drive the iteration. The planner builds a plan graph from the
//! condition tree, enumerates every flip assignment over the flippable
//! joins, scores each assignment through the cost model, and returns a
//! new AST with the winning flip flags written back. Related subtrees are
//! planned recursively as their own units.

pub(crate) mod build;
pub mod debug;
pub(crate) mod graph;
pub(crate) mod score;

use crate::ast::{Cond, Query};
use crate::cost::CostModel;
use crate::err::Error;
use crate::plan::build::GraphBuilder;
use crate::sch::ClientSchema;

pub use debug::AnalyseReport;
pub use debug::JoinSnapshot;
pub use debug::NoopObserver;
pub use debug::PlanAttempt;
pub use debug::PlanObserver;

/// Plan a query against the given cost model, producing a new AST with a
/// flip decision on every correlated subquery. Planning an already
/// planned AST returns an equal AST.
pub fn plan(
	query: &Query,
	cost: &dyn CostModel,
	schema: &ClientSchema,
	observer: &mut dyn PlanObserver,
) -> Result<Query, Error> {
	let mut planned = query.clone();
	plan_tree(&mut planned, cost, schema, observer)?;
	Ok(planned)
}

/// Plan a query and collect the scored attempts into a report.
pub fn analyse(
	query: &Query,
	cost: &dyn CostModel,
	schema: &ClientSchema,
) -> Result<(Query, AnalyseReport), Error> {
	let mut report = AnalyseReport::default();
	let planned = plan(query, cost, schema, &mut report)?;
	Ok((planned, report))
}

fn plan_tree(
	query: &mut Query,
	cost: &dyn CostModel,
	schema: &ClientSchema,
	observer: &mut dyn PlanObserver,
) -> Result<(), Error> {
	// Orderings become total before anything is costed
	let table = schema.table(&query.table)?;
	query.order.complete(&table.primary_key);
	if let Some(cond) = &mut query.cond {
		complete_subquery_orders(cond, schema)?;
	}

	let mut graph = GraphBuilder::build(schema, query)?;
	let decisions = score::enumerate(&mut graph, cost, observer)?;
	debug!(query = %query, flips = ?decisions, "query planned");
	if let Some(cond) = &mut query.cond {
		let mut decisions = decisions.into_iter();
		write_flips(cond, &mut decisions);
	}

	// Related subtrees are planned as their own units, wherever they sit
	for related in &mut query.related {
		plan_tree(&mut related.subquery, cost, schema, observer)?;
	}
	if let Some(cond) = &mut query.cond {
		plan_subquery_related(cond, cost, schema, observer)?;
	}
	Ok(())
}

/// Complete the ordering of every EXISTS subquery in this unit
fn complete_subquery_orders(cond: &mut Cond, schema: &ClientSchema) -> Result<(), Error> {
	match cond {
		Cond::Simple {
			..
		} => Ok(()),
		Cond::And(children) | Cond::Or(children) => {
			for child in children {
				complete_subquery_orders(child, schema)?;
			}
			Ok(())
		}
		Cond::Exists(sub) => {
			let subquery = &mut sub.related.subquery;
			let table = schema.table(&subquery.table)?;
			subquery.order.complete(&table.primary_key);
			if let Some(inner) = &mut subquery.cond {
				complete_subquery_orders(inner, schema)?;
			}
			Ok(())
		}
	}
}

/// Write flip decisions back onto the EXISTS nodes, in the same
/// pre-order walk the graph builder used to discover them
fn write_flips(cond: &mut Cond, decisions: &mut impl Iterator<Item = bool>) {
	match cond {
		Cond::Simple {
			..
		} => {}
		Cond::And(children) | Cond::Or(children) => {
			for child in children {
				write_flips(child, decisions);
			}
		}
		Cond::Exists(sub) => {
			sub.flip = decisions.next().unwrap_or(false);
			if let Some(inner) = &mut sub.related.subquery.cond {
				write_flips(inner, decisions);
			}
		}
	}
}

/// Recurse into the related subtrees hanging off EXISTS subqueries
fn plan_subquery_related(
	cond: &mut Cond,
	cost: &dyn CostModel,
	schema: &ClientSchema,
	observer: &mut dyn PlanObserver,
) -> Result<(), Error> {
	match cond {
		Cond::Simple {
			..
		} => Ok(()),
		Cond::And(children) | Cond::Or(children) => {
			for child in children {
				plan_subquery_related(child, cost, schema, observer)?;
			}
			Ok(())
		}
		Cond::Exists(sub) => {
			for related in &mut sub.related.subquery.related {
				plan_tree(&mut related.subquery, cost, schema, observer)?;
			}
			if let Some(inner) = &mut sub.related.subquery.cond {
				plan_subquery_related(inner, cost, schema, observer)?;
			}
			Ok(())
		}
	}
}
