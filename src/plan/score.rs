use crate::cnf::SEMI_JOIN_OVERHEAD;
use crate::cost::{Access, Confidence, CostModel, Estimate};
use crate::err::Error;
use crate::plan::debug::{PlanAttempt, PlanObserver};
use crate::plan::graph::{JoinKind, PlanGraph};

/// Enumerate every flip assignment over the graph's flippable joins,
/// score each one, and leave the winning assignment applied to the graph.
/// Returns the flip decision for every EXISTS join in condition order,
/// with unflippable joins normalised to `false`.
pub(crate) fn enumerate(
	graph: &mut PlanGraph,
	cost: &dyn CostModel,
	observer: &mut dyn PlanObserver,
) -> Result<Vec<bool>, Error> {
	let estimates = graph
		.connections
		.iter()
		.map(|conn| {
			cost.cost(&Access {
				table: &conn.table,
				order: &conn.order,
				filters: &conn.filters,
				constraint: &conn.constraint,
			})
		})
		.collect::<Result<Vec<_>, _>>()?;

	let flippable = graph.flippable();
	let k = flippable.len();
	// (cost, flip count, attempt): replaced only on a strict improvement,
	// so equal-cost assignments keep the earliest attempt and the
	// original order wins outright ties
	let mut best: Option<(f64, u32, usize)> = None;

	for attempt in 0..(1usize << k) {
		for (bit, &join) in flippable.iter().enumerate() {
			graph.joins[join].flipped = attempt >> bit & 1 == 1;
		}
		let total = score(graph, &estimates);
		let flips = attempt.count_ones();
		let pattern: String =
			(0..k).map(|bit| if attempt >> bit & 1 == 1 { '1' } else { '0' }).collect();
		trace!(attempt, total, pattern = %pattern, "plan attempt scored");
		observer.plan_complete(&PlanAttempt::capture(attempt, total, pattern, graph));
		let better = match best {
			None => true,
			Some((best_cost, best_flips, _)) => {
				total < best_cost || (total == best_cost && flips < best_flips)
			}
		};
		if better {
			best = Some((total, flips, attempt));
		}
	}

	let winner = best.map(|(_, _, attempt)| attempt).unwrap_or(0);
	for (bit, &join) in flippable.iter().enumerate() {
		graph.joins[join].flipped = winner >> bit & 1 == 1;
	}

	// Flip decisions for every EXISTS join, in condition order
	let mut exists: Vec<&crate::plan::graph::Join> =
		graph.joins.iter().filter(|j| j.kind == JoinKind::Exists).collect();
	exists.sort_by_key(|j| j.seq);
	Ok(exists.iter().map(|j| j.flipped).collect())
}

/// The total cost of the graph under its current flip assignment:
/// every connection's branch cost plus every join's loop cost. Join
/// costs are gathered through each connection's boolean shape, so OR
/// branches pay for their subqueries just as AND branches do, plus the
/// output-related joins which sit outside the condition tree.
fn score(graph: &PlanGraph, estimates: &[Estimate]) -> f64 {
	let mut total: f64 = estimates.iter().map(Estimate::branch_cost).sum();
	let mut joins = Vec::with_capacity(graph.joins.len());
	for connection in &graph.connections {
		connection.shape.joins(&mut joins);
	}
	joins.extend(
		(0..graph.joins.len()).filter(|&j| graph.joins[j].kind == JoinKind::Related),
	);
	for &join in &joins {
		let join = &graph.joins[join];
		total += if join.flipped {
			// The child drives; parent rows are reached per child row
			effective_rows(graph, estimates, join.child)
				* fanout(estimates, join.parent, &join.parent_cols)
		} else {
			let mut cost = effective_rows(graph, estimates, join.parent)
				* fanout(estimates, join.child, &join.child_cols);
			if join.kind == JoinKind::Exists {
				// An unflipped EXISTS pays for semi-join buffering, so
				// equal-cost plans settle on the flipped form
				cost += SEMI_JOIN_OVERHEAD;
			}
			cost
		};
	}
	total
}

/// The rows a connection contributes as a join driver. A flipped join
/// below it constrains the connection to the rows its child reaches.
fn effective_rows(graph: &PlanGraph, estimates: &[Estimate], connection: usize) -> f64 {
	let mut rows = estimates[connection].rows;
	for join in graph.joins_of(connection) {
		let join = &graph.joins[join];
		if join.flipped {
			let child = effective_rows(graph, estimates, join.child);
			rows = rows.min(child * fanout(estimates, connection, &join.parent_cols));
		}
	}
	rows
}

/// The fanout of a connection over the given join columns. A fallback
/// figure is only trusted up to the connection's own cardinality.
fn fanout(estimates: &[Estimate], connection: usize, columns: &[String]) -> f64 {
	let fanout = estimates[connection].fanout.fanout(columns);
	if fanout.confidence == Confidence::Fallback {
		fanout.per_value.min(estimates[connection].rows)
	} else {
		fanout.per_value
	}
}
