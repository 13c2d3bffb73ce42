use crate::ast::{Order, System};
use crate::cost::Filter;

/// One table access site: the root table, the child of each correlated
/// subquery, or a related subtree.
#[derive(Debug)]
pub(crate) struct Connection {
	pub table: String,
	/// The ordering this access must produce
	pub order: Vec<Order>,
	/// Local filters, with subqueries extracted
	pub filters: Vec<Filter>,
	/// Columns the parent correlation fixes by equality
	pub constraint: Vec<String>,
	/// The boolean structure of this connection's condition
	pub shape: BoolNode,
}

/// The AND/OR structure of a condition, with correlated subqueries
/// replaced by references into the join list.
#[derive(Debug, Clone)]
pub(crate) enum BoolNode {
	/// No condition, or a condition with no join content
	Leaf,
	/// A correlated subquery edge
	Join(usize),
	And(Vec<BoolNode>),
	Or(Vec<BoolNode>),
}

impl BoolNode {
	/// Collect every join referenced beneath this node
	pub fn joins(&self, out: &mut Vec<usize>) {
		match self {
			BoolNode::Leaf => {}
			BoolNode::Join(j) => out.push(*j),
			BoolNode::And(children) | BoolNode::Or(children) => {
				for child in children {
					child.joins(out);
				}
			}
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum JoinKind {
	/// An EXISTS condition; only asserts that a correlated row exists
	Exists,
	/// An output subtree; child rows are emitted alongside the parent
	Related,
}

/// One correlation edge between two connections.
#[derive(Debug)]
pub(crate) struct Join {
	pub parent: usize,
	pub child: usize,
	pub parent_cols: Vec<String>,
	pub child_cols: Vec<String>,
	pub kind: JoinKind,
	pub system: System,
	/// Position of this join in the pre-order walk of the condition
	/// tree. The rewriter assigns flip decisions back in this order.
	pub seq: usize,
	pub flippable: bool,
	pub flipped: bool,
}

/// The plan graph for one planning unit: a root connection, the
/// connections reached through its condition tree, and the output-related
/// connections one level down.
#[derive(Debug, Default)]
pub(crate) struct PlanGraph {
	pub connections: Vec<Connection>,
	pub joins: Vec<Join>,
}

impl PlanGraph {
	/// The indices of the flippable joins, in condition pre-order
	pub fn flippable(&self) -> Vec<usize> {
		let mut out: Vec<usize> =
			(0..self.joins.len()).filter(|j| self.joins[*j].flippable).collect();
		out.sort_by_key(|j| self.joins[*j].seq);
		out
	}

	/// The joins driven from the given connection
	pub fn joins_of(&self, connection: usize) -> impl Iterator<Item = usize> + '_ {
		(0..self.joins.len()).filter(move |j| self.joins[*j].parent == connection)
	}
}
