use crate::ast::{Cond, Correlation, Operand, Query};
use crate::err::Error;
use crate::flow::eval::{ExistsOp, Pred};
use crate::flow::pipeline::{RelatedNode, Step, TablePath, ViewNode};
use crate::sch::ClientSchema;
use std::collections::BTreeSet;

/// The compiled operator tree for one query, together with the
/// correlation paths the driver uses to trace a table-level delta back to
/// the root rows it can affect.
pub(crate) struct Compiled {
	pub root: ViewNode,
	pub tables: BTreeSet<String>,
	pub paths: Vec<TablePath>,
}

/// Compile a planned AST into the pipeline's operator tree. The AST must
/// have had its static operands substituted, and every referenced table
/// and column must exist in the client schema.
pub(crate) fn compile(query: &Query, schema: &ClientSchema) -> Result<Compiled, Error> {
	if let Some(name) = query.find_static() {
		return Err(Error::StaticNotSubstituted {
			name: name.to_owned(),
		});
	}
	let mut compiler = Compiler {
		schema,
		exists_seq: 0,
		tables: BTreeSet::new(),
		paths: Vec::new(),
	};
	let root = compiler.node(query, &[])?;
	Ok(Compiled {
		root,
		tables: compiler.tables,
		paths: compiler.paths,
	})
}

struct Compiler<'a> {
	schema: &'a ClientSchema,
	exists_seq: usize,
	tables: BTreeSet<String>,
	paths: Vec<TablePath>,
}

impl Compiler<'_> {
	fn node(&mut self, query: &Query, chain: &[Step]) -> Result<ViewNode, Error> {
		let table = self.schema.table(&query.table)?;
		for order in query.order.iter() {
			table.column_def(&order.column)?;
		}
		let primary_key = table.primary_key.clone();
		self.tables.insert(query.table.clone());
		self.paths.push(TablePath {
			table: query.table.clone(),
			steps: chain.to_vec(),
		});

		let mut order = query.order.clone();
		order.complete(&primary_key);

		let pred = match &query.cond {
			Some(cond) => Some(self.cond(cond, &query.table, chain)?),
			None => None,
		};

		let mut related = Vec::with_capacity(query.related.len());
		for rel in &query.related {
			self.correlation(&query.table, &rel.subquery.table, &rel.correlation)?;
			let step = Step {
				parent_table: query.table.clone(),
				parent_fields: rel.correlation.parent_fields.clone(),
				child_fields: rel.correlation.child_fields.clone(),
			};
			let mut child_chain = chain.to_vec();
			child_chain.push(step);
			related.push(RelatedNode {
				correlation: rel.correlation.clone(),
				system: rel.system,
				node: self.node(&rel.subquery, &child_chain)?,
			});
		}

		Ok(ViewNode {
			table: query.table.clone(),
			primary_key,
			pred,
			order,
			limit: query.limit,
			start: query.start.clone(),
			related,
		})
	}

	fn cond(&mut self, cond: &Cond, table: &str, chain: &[Step]) -> Result<Pred, Error> {
		match cond {
			Cond::Simple {
				left,
				op,
				right,
			} => {
				for operand in [left, right] {
					if let Operand::Column(column) = operand {
						self.schema.table(table)?.column_def(column)?;
					}
				}
				Ok(Pred::Simple {
					left: left.clone(),
					op: *op,
					right: right.clone(),
				})
			}
			Cond::And(children) => {
				let mut out = Vec::with_capacity(children.len());
				for child in children {
					out.push(self.cond(child, table, chain)?);
				}
				Ok(Pred::And(out))
			}
			Cond::Or(children) => {
				let mut out = Vec::with_capacity(children.len());
				for child in children {
					out.push(self.cond(child, table, chain)?);
				}
				Ok(Pred::Or(out))
			}
			Cond::Exists(sub) => {
				let subquery = &sub.related.subquery;
				self.correlation(table, &subquery.table, &sub.related.correlation)?;
				let id = self.exists_seq;
				self.exists_seq += 1;
				let step = Step {
					parent_table: table.to_owned(),
					parent_fields: sub.related.correlation.parent_fields.clone(),
					child_fields: sub.related.correlation.child_fields.clone(),
				};
				let mut child_chain = chain.to_vec();
				child_chain.push(step);
				self.tables.insert(subquery.table.clone());
				self.paths.push(TablePath {
					table: subquery.table.clone(),
					steps: child_chain.clone(),
				});
				let inner = match &subquery.cond {
					Some(cond) => {
						Some(Box::new(self.cond(cond, &subquery.table, &child_chain)?))
					}
					None => None,
				};
				Ok(Pred::Exists(ExistsOp {
					id,
					table: subquery.table.clone(),
					correlation: sub.related.correlation.clone(),
					flip: sub.flip,
					cond: inner,
				}))
			}
		}
	}

	fn correlation(
		&self,
		parent: &str,
		child: &str,
		correlation: &Correlation,
	) -> Result<(), Error> {
		let parent = self.schema.table(parent)?;
		let child = self.schema.table(child)?;
		for column in &correlation.parent_fields {
			parent.column_def(column)?;
		}
		for column in &correlation.child_fields {
			child.column_def(column)?;
		}
		Ok(())
	}
}
