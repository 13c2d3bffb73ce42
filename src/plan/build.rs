use crate::ast::{CompareOp, Cond, Correlation, Operand, Query, Related};
use crate::cost::{Filter, FilterValue};
use crate::err::Error;
use crate::plan::graph::{BoolNode, Connection, Join, JoinKind, PlanGraph};
use crate::sch::ClientSchema;

/// Builds the plan graph for one planning unit by recursive descent over
/// the query's condition tree. Output-related subtrees contribute a
/// connection and a join one level down, but their own conditions are
/// planned when the planner recurses into them.
pub(crate) struct GraphBuilder<'a> {
	schema: &'a ClientSchema,
	graph: PlanGraph,
	seq: usize,
}

impl<'a> GraphBuilder<'a> {
	pub fn build(schema: &'a ClientSchema, query: &Query) -> Result<PlanGraph, Error> {
		let mut builder = GraphBuilder {
			schema,
			graph: PlanGraph::default(),
			seq: 0,
		};
		let root = builder.add_connection(query, &[], true)?;
		for related in &query.related {
			builder.add_related(root, related)?;
		}
		Ok(builder.graph)
	}

	/// Add a connection for one table access site. When `walk` is set the
	/// condition tree is descended, creating joins for its correlated
	/// subqueries; otherwise only the conjunctive filters are collected.
	fn add_connection(&mut self, query: &Query, constraint: &[String], walk: bool) -> Result<usize, Error> {
		self.schema.table(&query.table)?;
		let id = self.graph.connections.len();
		self.graph.connections.push(Connection {
			table: query.table.clone(),
			order: query.order.0.clone(),
			filters: Vec::new(),
			constraint: constraint.to_vec(),
			shape: BoolNode::Leaf,
		});
		if let Some(cond) = &query.cond {
			let shape = if walk {
				self.add_cond(id, cond)?
			} else {
				Self::collect_filters(cond, &mut self.graph.connections[id].filters);
				BoolNode::Leaf
			};
			self.graph.connections[id].shape = shape;
		}
		Ok(id)
	}

	fn add_cond(&mut self, conn: usize, cond: &Cond) -> Result<BoolNode, Error> {
		match cond {
			Cond::Simple {
				left,
				op,
				right,
			} => {
				if let Some(filter) = Self::to_filter(left, *op, right) {
					self.graph.connections[conn].filters.push(filter);
				}
				Ok(BoolNode::Leaf)
			}
			Cond::And(children) => {
				let mut nodes = Vec::with_capacity(children.len());
				for child in children {
					nodes.push(self.add_cond(conn, child)?);
				}
				Ok(BoolNode::And(nodes))
			}
			Cond::Or(children) => {
				// Disjunctive filters do not reduce the scan, but each
				// branch still carries its own joins and flips
				let mut nodes = Vec::with_capacity(children.len());
				for child in children {
					nodes.push(self.add_or_branch(conn, child)?);
				}
				Ok(BoolNode::Or(nodes))
			}
			Cond::Exists(sub) => {
				let seq = self.seq;
				self.seq += 1;
				let subquery = &sub.related.subquery;
				self.check_correlation(conn, subquery, &sub.related.correlation)?;
				// Existence checks do not need the subquery ordering
				let child = self.add_exists_child(subquery, &sub.related.correlation.child_fields)?;
				let flippable = self.is_flippable(subquery, &sub.related.correlation)?;
				let join = self.graph.joins.len();
				self.graph.joins.push(Join {
					parent: conn,
					child,
					parent_cols: sub.related.correlation.parent_fields.clone(),
					child_cols: sub.related.correlation.child_fields.clone(),
					kind: JoinKind::Exists,
					system: sub.related.system,
					seq,
					flippable,
					flipped: false,
				});
				Ok(BoolNode::Join(join))
			}
		}
	}

	/// As `add_cond`, but simple conditions inside an OR are not usable
	/// as scan-reducing filters
	fn add_or_branch(&mut self, conn: usize, cond: &Cond) -> Result<BoolNode, Error> {
		match cond {
			Cond::Simple {
				..
			} => Ok(BoolNode::Leaf),
			Cond::And(children) => {
				let mut nodes = Vec::with_capacity(children.len());
				for child in children {
					nodes.push(self.add_or_branch(conn, child)?);
				}
				Ok(BoolNode::And(nodes))
			}
			other => self.add_cond(conn, other),
		}
	}

	fn add_exists_child(&mut self, subquery: &Query, child_fields: &[String]) -> Result<usize, Error> {
		let mut stripped = subquery.clone();
		stripped.order.0.clear();
		self.add_connection(&stripped, child_fields, true)
	}

	fn add_related(&mut self, parent: usize, related: &Related) -> Result<(), Error> {
		let seq = self.seq;
		self.seq += 1;
		self.check_correlation(parent, &related.subquery, &related.correlation)?;
		let child =
			self.add_connection(&related.subquery, &related.correlation.child_fields, false)?;
		self.graph.joins.push(Join {
			parent,
			child,
			parent_cols: related.correlation.parent_fields.clone(),
			child_cols: related.correlation.child_fields.clone(),
			kind: JoinKind::Related,
			system: related.system,
			seq,
			// An output subtree always iterates from the parent side
			flippable: false,
			flipped: false,
		});
		Ok(())
	}

	/// An EXISTS join may flip when driving from the child side is
	/// well-defined: the child correlation is pinned by a non-null unique
	/// index, and the subquery has no cursor or limit to respect.
	fn is_flippable(&self, subquery: &Query, correlation: &Correlation) -> Result<bool, Error> {
		let child = self.schema.table(&subquery.table)?;
		Ok(subquery.limit.is_none()
			&& subquery.start.is_none()
			&& child.has_non_null_unique_covering(&correlation.child_fields))
	}

	fn check_correlation(
		&self,
		parent: usize,
		subquery: &Query,
		correlation: &Correlation,
	) -> Result<(), Error> {
		let parent_table = self.schema.table(&self.graph.connections[parent].table)?;
		let child_table = self.schema.table(&subquery.table)?;
		for column in &correlation.parent_fields {
			parent_table.column_def(column)?;
		}
		for column in &correlation.child_fields {
			child_table.column_def(column)?;
		}
		Ok(())
	}

	fn collect_filters(cond: &Cond, out: &mut Vec<Filter>) {
		match cond {
			Cond::Simple {
				left,
				op,
				right,
			} => {
				if let Some(filter) = Self::to_filter(left, *op, right) {
					out.push(filter);
				}
			}
			Cond::And(children) => {
				for child in children {
					Self::collect_filters(child, out);
				}
			}
			Cond::Or(_) | Cond::Exists(_) => {}
		}
	}

	fn to_filter(left: &Operand, op: CompareOp, right: &Operand) -> Option<Filter> {
		match (left, right) {
			(Operand::Column(column), Operand::Literal(value)) => Some(Filter {
				column: column.clone(),
				op,
				value: FilterValue::One(value.clone()),
			}),
			(Operand::Column(column), Operand::Set(values)) => Some(Filter {
				column: column.clone(),
				op,
				value: FilterValue::Many(values.clone()),
			}),
			(Operand::Column(column), Operand::Static(_)) => Some(Filter {
				column: column.clone(),
				op,
				value: FilterValue::Opaque,
			}),
			(Operand::Literal(value), Operand::Column(column)) => Some(Filter {
				column: column.clone(),
				op: Self::mirror(op)?,
				value: FilterValue::One(value.clone()),
			}),
			_ => None,
		}
	}

	/// The operator as seen with its operands swapped
	fn mirror(op: CompareOp) -> Option<CompareOp> {
		match op {
			CompareOp::Equal => Some(CompareOp::Equal),
			CompareOp::NotEqual => Some(CompareOp::NotEqual),
			CompareOp::LessThan => Some(CompareOp::MoreThan),
			CompareOp::LessThanOrEqual => Some(CompareOp::MoreThanOrEqual),
			CompareOp::MoreThan => Some(CompareOp::LessThan),
			CompareOp::MoreThanOrEqual => Some(CompareOp::LessThanOrEqual),
			CompareOp::Is => Some(CompareOp::Is),
			CompareOp::IsNot => Some(CompareOp::IsNot),
			_ => None,
		}
	}
}
