use crate::ast::System;
use crate::plan::graph::PlanGraph;
use serde::Serialize;

/// The state of one join at the end of a plan attempt.
#[derive(Clone, Debug, Serialize)]
pub struct JoinSnapshot {
	pub parent_table: String,
	pub child_table: String,
	pub system: System,
	pub flippable: bool,
	pub flipped: bool,
}

/// One enumerated flip assignment and its total cost. Attempt zero is
/// always the original, unflipped plan.
#[derive(Clone, Debug, Serialize)]
pub struct PlanAttempt {
	pub attempt: usize,
	pub total_cost: f64,
	/// One character per flippable join, in condition order
	pub flip_pattern: String,
	pub joins: Vec<JoinSnapshot>,
}

impl PlanAttempt {
	pub(crate) fn capture(
		attempt: usize,
		total_cost: f64,
		flip_pattern: String,
		graph: &PlanGraph,
	) -> Self {
		PlanAttempt {
			attempt,
			total_cost,
			flip_pattern,
			joins: graph
				.joins
				.iter()
				.map(|j| JoinSnapshot {
					parent_table: graph.connections[j.parent].table.clone(),
					child_table: graph.connections[j.child].table.clone(),
					system: j.system,
					flippable: j.flippable,
					flipped: j.flipped,
				})
				.collect(),
		}
	}
}

/// A delegate which observes planning. Threaded explicitly through the
/// planner rather than read from process-wide state.
pub trait PlanObserver {
	fn plan_complete(&mut self, attempt: &PlanAttempt);
}

/// Discards every event.
#[derive(Default)]
pub struct NoopObserver;

impl PlanObserver for NoopObserver {
	fn plan_complete(&mut self, _attempt: &PlanAttempt) {}
}

/// Collects every attempt into a report.
#[derive(Default, Debug, Serialize)]
pub struct AnalyseReport {
	pub attempts: Vec<PlanAttempt>,
}

impl PlanObserver for AnalyseReport {
	fn plan_complete(&mut self, attempt: &PlanAttempt) {
		self.attempts.push(attempt.clone());
	}
}
