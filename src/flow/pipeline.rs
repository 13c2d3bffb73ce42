use crate::ast::{Correlation, Key, Orders, Query, Row, Start, System, Value};
use crate::dbs::options::YieldState;
use crate::err::Error;
use crate::flow::build::{compile, Compiled};
use crate::flow::eval::{eval, EvalCtx, Pred};
use crate::flow::item::ChangeKind;
use crate::flow::stream::ChangeStreamer;
use crate::rep::source::{FetchRequest, Fetched, SourceDelta};
use crate::rep::Sources;
use crate::sch::ClientSchema;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

/// One output node of a query: the root, or a related subtree.
pub(crate) struct ViewNode {
	pub table: String,
	pub primary_key: Vec<String>,
	pub pred: Option<Pred>,
	pub order: Orders,
	pub limit: Option<usize>,
	pub start: Option<Start>,
	pub related: Vec<RelatedNode>,
}

pub(crate) struct RelatedNode {
	pub correlation: Correlation,
	pub system: System,
	pub node: ViewNode,
}

/// One correlation hop on the way from the root to a referenced table.
#[derive(Clone, Debug)]
pub(crate) struct Step {
	pub parent_table: String,
	pub parent_fields: Vec<String>,
	pub child_fields: Vec<String>,
}

/// Where a table sits in the query tree: the hops a delta on that table
/// must be traced through to find the root rows it can affect.
#[derive(Clone, Debug)]
pub(crate) struct TablePath {
	pub table: String,
	pub steps: Vec<Step>,
}

/// The membership state a pipeline captured for one diff entry before the
/// entry was applied to its table source.
pub(crate) struct PreState {
	candidates: BTreeSet<Key>,
	rows: Vec<(String, Row)>,
}

/// One query's dataflow tree. The pipeline owns no table data; it borrows
/// the driver's sources for the duration of each hydration or advancement
/// call. The flipped-join buffers are the only operator-local storage,
/// and they die with the pipeline on `remove_query`.
pub struct Pipeline {
	pub(crate) query_hash: String,
	pub(crate) query_id: String,
	root: ViewNode,
	tables: BTreeSet<String>,
	paths: Vec<TablePath>,
	buffers: HashMap<usize, HashSet<Key>>,
	pub(crate) hydration_time: Duration,
}

impl Pipeline {
	pub(crate) fn new(
		query_hash: impl Into<String>,
		query_id: impl Into<String>,
		query: &Query,
		schema: &ClientSchema,
	) -> Result<Self, Error> {
		let Compiled {
			root,
			tables,
			paths,
		} = compile(query, schema)?;
		Ok(Pipeline {
			query_hash: query_hash.into(),
			query_id: query_id.into(),
			root,
			tables,
			paths,
			buffers: HashMap::new(),
			hydration_time: Duration::ZERO,
		})
	}

	/// Every table this pipeline reads
	pub fn tables(&self) -> &BTreeSet<String> {
		&self.tables
	}

	pub fn query_id(&self) -> &str {
		&self.query_id
	}

	/// How long the initial hydration of this pipeline took
	pub fn hydration_time(&self) -> Duration {
		self.hydration_time
	}

	/// Emit the full current result of the query as adds, in query order,
	/// with parents interleaved with their related children.
	pub(crate) fn hydrate(
		&mut self,
		sources: &Sources,
		yields: YieldState<'_>,
		streamer: &mut ChangeStreamer,
	) -> Result<(), Error> {
		// Flipped joins pre-scan their child side once and buffer the
		// reached parent keys
		let mut buffers = HashMap::new();
		if let Some(pred) = &self.root.pred {
			build_buffers(pred, sources, &mut buffers)?;
		}
		self.buffers = buffers;
		let ctx = EvalCtx {
			sources,
			buffers: Some(&self.buffers),
		};
		emit_node(
			&self.root,
			None,
			System::Client,
			&ctx,
			Some(yields),
			&self.query_hash,
			streamer,
		)?;
		self.buffers.clear();
		Ok(())
	}

	/// Capture, before a diff entry is applied to its source, the visible
	/// subtree rows of every root the entry can affect.
	pub(crate) fn prepare_entry(
		&self,
		table: &str,
		deltas: &[SourceDelta],
		sources: &Sources,
	) -> Result<PreState, Error> {
		if self.windowed() {
			return Ok(PreState {
				candidates: BTreeSet::new(),
				rows: self.window(sources)?,
			});
		}
		let candidates = self.candidate_roots(table, deltas, sources)?;
		let mut rows = Vec::new();
		for key in &candidates {
			self.snapshot_for_key(key, sources, &mut rows)?;
		}
		Ok(PreState {
			candidates,
			rows,
		})
	}

	/// Re-evaluate the affected roots after the entry was applied, and
	/// stream the difference. Removes precede edits, which precede adds.
	pub(crate) fn complete_entry(
		&self,
		table: &str,
		deltas: &[SourceDelta],
		sources: &Sources,
		pre: PreState,
		streamer: &mut ChangeStreamer,
	) -> Result<(), Error> {
		let post_rows = if self.windowed() {
			self.window(sources)?
		} else {
			let mut candidates = self.candidate_roots(table, deltas, sources)?;
			candidates.extend(pre.candidates.iter().cloned());
			let mut rows = Vec::new();
			for key in &candidates {
				self.snapshot_for_key(key, sources, &mut rows)?;
			}
			rows
		};
		self.diff_rows(&pre.rows, &post_rows, sources, streamer)
	}

	fn windowed(&self) -> bool {
		self.root.limit.is_some() || self.root.start.is_some()
	}

	/// The full visible result, as `(table, row)` pairs in emission order
	fn window(&self, sources: &Sources) -> Result<Vec<(String, Row)>, Error> {
		let ctx = EvalCtx {
			sources,
			buffers: None,
		};
		let mut out = Vec::new();
		snapshot_node(&self.root, None, &ctx, &mut out)?;
		Ok(out)
	}

	/// The visible subtree of one root row, if the row exists and matches
	fn snapshot_for_key(
		&self,
		key: &Key,
		sources: &Sources,
		out: &mut Vec<(String, Row)>,
	) -> Result<(), Error> {
		let source = sources.get(&self.root.table).ok_or_else(|| Error::TableNotFound {
			table: self.root.table.clone(),
		})?;
		let Some(row) = source.get(key) else {
			return Ok(());
		};
		let ctx = EvalCtx {
			sources,
			buffers: None,
		};
		if let Some(pred) = &self.root.pred {
			if !eval(pred, row, &ctx)? {
				return Ok(());
			}
		}
		snapshot_row(&self.root, row, &ctx, out)
	}

	/// Trace the rows touched by a delta back through every correlation
	/// path to the root rows they can affect
	fn candidate_roots(
		&self,
		table: &str,
		deltas: &[SourceDelta],
		sources: &Sources,
	) -> Result<BTreeSet<Key>, Error> {
		let mut out = BTreeSet::new();
		let delta_rows: Vec<&Row> = deltas
			.iter()
			.flat_map(|d| [d.old.as_ref(), d.new.as_ref()])
			.flatten()
			.collect();
		let order = Orders::default();
		for path in &self.paths {
			if path.table != table {
				continue;
			}
			if path.steps.is_empty() {
				for row in &delta_rows {
					out.insert(row.values(&self.root.primary_key));
				}
				continue;
			}
			let mut rows: Vec<Row> = delta_rows.iter().map(|r| (*r).clone()).collect();
			for step in path.steps.iter().rev() {
				let parent_source =
					sources.get(&step.parent_table).ok_or_else(|| Error::TableNotFound {
						table: step.parent_table.clone(),
					})?;
				let mut parents = Vec::new();
				for row in &rows {
					let mut constraint = BTreeMap::new();
					let mut unmatched = false;
					for (pf, cf) in step.parent_fields.iter().zip(&step.child_fields) {
						match row.get(cf) {
							Some(value) if !value.is_null() => {
								constraint.insert(pf.clone(), value.clone());
							}
							// NULL never matches a join
							_ => {
								unmatched = true;
								break;
							}
						}
					}
					if unmatched {
						continue;
					}
					let request = FetchRequest {
						constraint: Some(&constraint),
						order: &order,
						start: None,
						reverse: false,
					};
					for fetched in parent_source.fetch(request, None) {
						if let Fetched::Row(parent) = fetched {
							parents.push(parent);
						}
					}
				}
				rows = parents;
				if rows.is_empty() {
					break;
				}
			}
			for row in &rows {
				out.insert(row.values(&self.root.primary_key));
			}
		}
		Ok(out)
	}

	/// Stream the difference between two visible row sets, keyed by
	/// `(table, primary key)`
	fn diff_rows(
		&self,
		pre: &[(String, Row)],
		post: &[(String, Row)],
		sources: &Sources,
		streamer: &mut ChangeStreamer,
	) -> Result<(), Error> {
		let keyed = |rows: &[(String, Row)]| -> Result<Vec<((String, Key), Row)>, Error> {
			let mut out = Vec::with_capacity(rows.len());
			for (table, row) in rows {
				let source = sources.get(table).ok_or_else(|| Error::TableNotFound {
					table: table.clone(),
				})?;
				let key = row.values(&source.schema().primary_key);
				out.push(((table.clone(), key), row.clone()));
			}
			Ok(out)
		};
		let pre = keyed(pre)?;
		let post = keyed(post)?;
		let pre_map: BTreeMap<(&str, &Key), &Row> =
			pre.iter().map(|((t, k), row)| ((t.as_str(), k), row)).collect();
		let post_map: BTreeMap<(&str, &Key), &Row> =
			post.iter().map(|((t, k), row)| ((t.as_str(), k), row)).collect();

		for ((table, key), row) in &pre {
			if !post_map.contains_key(&(table.as_str(), key)) {
				self.push(streamer, ChangeKind::Remove, table, row, sources)?;
			}
		}
		for ((table, key), row) in &post {
			match pre_map.get(&(table.as_str(), key)) {
				Some(previous) if *previous != row => {
					self.push(streamer, ChangeKind::Edit, table, row, sources)?;
				}
				None => {
					self.push(streamer, ChangeKind::Add, table, row, sources)?;
				}
				_ => {}
			}
		}
		Ok(())
	}

	fn push(
		&self,
		streamer: &mut ChangeStreamer,
		kind: ChangeKind,
		table: &str,
		row: &Row,
		sources: &Sources,
	) -> Result<(), Error> {
		let primary_key = pk_of(sources, table)?;
		streamer.push(System::Client, kind, &self.query_hash, table, &primary_key, row);
		Ok(())
	}
}

fn pk_of(sources: &Sources, table: &str) -> Result<Vec<String>, Error> {
	Ok(sources
		.get(table)
		.ok_or_else(|| Error::TableNotFound {
			table: table.to_owned(),
		})?
		.schema()
		.primary_key
		.clone())
}

/// Build the parent-key buffers for every flipped join, deepest first so
/// a nested flipped join is already buffered when its parent scans.
fn build_buffers(
	pred: &Pred,
	sources: &Sources,
	buffers: &mut HashMap<usize, HashSet<Key>>,
) -> Result<(), Error> {
	match pred {
		Pred::Simple {
			..
		} => Ok(()),
		Pred::And(children) | Pred::Or(children) => {
			for child in children {
				build_buffers(child, sources, buffers)?;
			}
			Ok(())
		}
		Pred::Exists(exists) => {
			if let Some(cond) = &exists.cond {
				build_buffers(cond, sources, buffers)?;
			}
			if !exists.flip {
				return Ok(());
			}
			let source = sources.get(&exists.table).ok_or_else(|| Error::TableNotFound {
				table: exists.table.clone(),
			})?;
			let mut set = HashSet::new();
			{
				let ctx = EvalCtx {
					sources,
					buffers: Some(buffers),
				};
				for row in source.rows() {
					let matched = match &exists.cond {
						None => true,
						Some(cond) => eval(cond, row, &ctx)?,
					};
					if matched {
						let key = row.values(&exists.correlation.child_fields);
						if !key.has_null() {
							set.insert(key);
						}
					}
				}
			}
			buffers.insert(exists.id, set);
			Ok(())
		}
	}
}

/// The child-side constraint produced by one parent row
fn correlate(correlation: &Correlation, parent: &Row) -> Option<BTreeMap<String, Value>> {
	let mut constraint = BTreeMap::new();
	for (pf, cf) in correlation.parent_fields.iter().zip(&correlation.child_fields) {
		match parent.get(pf) {
			Some(value) if !value.is_null() => {
				constraint.insert(cf.clone(), value.clone());
			}
			_ => return None,
		}
	}
	Some(constraint)
}

/// Stream one node's matching rows as adds, recursing into related
/// subtrees after each parent row
fn emit_node(
	node: &ViewNode,
	constraint: Option<&BTreeMap<String, Value>>,
	system: System,
	ctx: &EvalCtx<'_>,
	yields: Option<YieldState<'_>>,
	query_hash: &str,
	streamer: &mut ChangeStreamer,
) -> Result<(), Error> {
	let source = ctx.sources.get(&node.table).ok_or_else(|| Error::TableNotFound {
		table: node.table.clone(),
	})?;
	let request = FetchRequest {
		constraint,
		order: &node.order,
		start: node.start.as_ref(),
		reverse: false,
	};
	let mut emitted = 0usize;
	for fetched in source.fetch(request, yields) {
		match fetched {
			Fetched::Yield => streamer.push_yield(),
			Fetched::Row(row) => {
				if let Some(pred) = &node.pred {
					if !eval(pred, &row, ctx)? {
						continue;
					}
				}
				streamer.push(
					system,
					ChangeKind::Add,
					query_hash,
					&node.table,
					&node.primary_key,
					&row,
				);
				for related in &node.related {
					// Permissions subtrees are never vended
					if related.system == System::Permissions {
						continue;
					}
					if let Some(constraint) = correlate(&related.correlation, &row) {
						emit_node(
							&related.node,
							Some(&constraint),
							related.system,
							ctx,
							yields,
							query_hash,
							streamer,
						)?;
					}
				}
				emitted += 1;
				if node.limit.map_or(false, |limit| emitted >= limit) {
					break;
				}
			}
		}
	}
	Ok(())
}

/// Collect one node's visible rows into a snapshot, in emission order
fn snapshot_node(
	node: &ViewNode,
	constraint: Option<&BTreeMap<String, Value>>,
	ctx: &EvalCtx<'_>,
	out: &mut Vec<(String, Row)>,
) -> Result<(), Error> {
	let source = ctx.sources.get(&node.table).ok_or_else(|| Error::TableNotFound {
		table: node.table.clone(),
	})?;
	let request = FetchRequest {
		constraint,
		order: &node.order,
		start: node.start.as_ref(),
		reverse: false,
	};
	let mut emitted = 0usize;
	for fetched in source.fetch(request, None) {
		if let Fetched::Row(row) = fetched {
			if let Some(pred) = &node.pred {
				if !eval(pred, &row, ctx)? {
					continue;
				}
			}
			snapshot_row(node, &row, ctx, out)?;
			emitted += 1;
			if node.limit.map_or(false, |limit| emitted >= limit) {
				break;
			}
		}
	}
	Ok(())
}

/// One visible row plus its related children
fn snapshot_row(
	node: &ViewNode,
	row: &Row,
	ctx: &EvalCtx<'_>,
	out: &mut Vec<(String, Row)>,
) -> Result<(), Error> {
	out.push((node.table.clone(), row.clone()));
	for related in &node.related {
		if related.system == System::Permissions {
			continue;
		}
		if let Some(constraint) = correlate(&related.correlation, row) {
			snapshot_node(&related.node, Some(&constraint), ctx, out)?;
		}
	}
	Ok(())
}
