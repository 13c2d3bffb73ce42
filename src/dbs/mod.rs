//! The pipeline driver: owns every per-query operator tree and every
//! table source for one client group, orchestrates hydration and
//! advancement on a single cooperative thread, and aborts an advancement
//! which overruns its hydration-relative time budget.

pub mod options;
pub mod timer;

pub use options::DriverOptions;
pub use options::YieldConfig;
pub use options::YieldState;
pub use timer::Clock;
pub use timer::ManualClock;
pub use timer::SystemClock;
pub use timer::Timer;

use crate::ast::{Query, Row, Value};
use crate::cost::StatsCostModel;
use crate::err::Error;
use crate::flow::pipeline::{Pipeline, PreState};
use crate::flow::stream::ChangeStreamer;
use crate::flow::StreamItem;
use crate::plan::NoopObserver;
use crate::rep::snapshot::{Diff, DiffEntry, Snapshotter};
use crate::rep::source::{SourceChange, TableSource};
use crate::rep::{ReplicaStats, Sources};
use crate::sch::ClientSchema;
use std::collections::BTreeMap;
use std::time::Duration;

/// A buffered, single-shot stream of row changes and yield sentinels.
/// The work has already been driven against the sources; the sentinels
/// sit in the stream at the positions where the producer reached its
/// yield threshold, and the consumer applies back-pressure by pausing at
/// them.
#[derive(Debug)]
pub struct ChangeStream {
	items: std::vec::IntoIter<StreamItem>,
}

impl ChangeStream {
	fn new(items: Vec<StreamItem>) -> Self {
		ChangeStream {
			items: items.into_iter(),
		}
	}

	fn empty() -> Self {
		Self::new(Vec::new())
	}
}

impl Iterator for ChangeStream {
	type Item = StreamItem;

	fn next(&mut self) -> Option<StreamItem> {
		self.items.next()
	}
}

/// The outcome of one advancement.
#[derive(Debug)]
pub struct Advancement {
	/// The replica version the driver now sits at
	pub version: String,
	pub num_changes: usize,
	pub changes: ChangeStream,
}

/// Driver counters, surfaced for observability.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DriverMetrics {
	pub queries_hydrated: u64,
	pub pipelines_reset: u64,
	pub advance_aborts: u64,
	pub unique_evictions: u64,
}

pub struct PipelineDriver<S> {
	snapshotter: S,
	options: DriverOptions,
	schema: Option<ClientSchema>,
	replica_version: Option<String>,
	schema_versions: BTreeMap<String, String>,
	permissions: Option<String>,
	pipelines: BTreeMap<String, Pipeline>,
	sources: Sources,
	/// Bumped on every reset; invalidates cached cost statistics
	generation: u64,
	/// Evictions accumulated from sources discarded by resets
	evictions_base: u64,
	metrics: DriverMetrics,
}

impl<S: Snapshotter> PipelineDriver<S> {
	pub fn new(snapshotter: S, options: DriverOptions) -> Self {
		PipelineDriver {
			snapshotter,
			options,
			schema: None,
			replica_version: None,
			schema_versions: BTreeMap::new(),
			permissions: None,
			pipelines: BTreeMap::new(),
			sources: Sources::new(),
			generation: 0,
			evictions_base: 0,
			metrics: DriverMetrics::default(),
		}
	}

	/// Initialise against the snapshot head: validate that the client
	/// schema is a subset of what is replicated, and record the replica
	/// version.
	pub fn init(&mut self, client_schema: ClientSchema) -> Result<(), Error> {
		self.snapshotter.init()?;
		self.configure(client_schema)
	}

	/// Destroy every operator tree and reinitialise at the new head.
	/// Called on schema change or after a *ResetPipelines* signal.
	pub fn reset(&mut self, client_schema: ClientSchema) -> Result<(), Error> {
		for source in self.sources.values() {
			self.evictions_base += source.evictions();
		}
		self.pipelines.clear();
		self.sources.clear();
		self.generation += 1;
		self.metrics.pipelines_reset += 1;
		self.snapshotter.advance_without_diff()?;
		info!(generation = self.generation, "pipelines reset");
		self.configure(client_schema)
	}

	fn configure(&mut self, client_schema: ClientSchema) -> Result<(), Error> {
		let replicated = self.snapshotter.read().schema()?;
		client_schema.validate_subset(&replicated)?;
		let info = self.snapshotter.current()?;
		self.schema = Some(client_schema);
		self.replica_version = Some(info.version);
		self.schema_versions = info.schema_versions;
		Ok(())
	}

	fn schema(&self) -> Result<&ClientSchema, Error> {
		self.schema.as_ref().ok_or(Error::NotInitialised)
	}

	/// The replication window this driver advances through. Embedders use
	/// this to feed an in-memory replica.
	pub fn snapshotter_mut(&mut self) -> &mut S {
		&mut self.snapshotter
	}

	/// The most recent permissions bundle applied to this client group
	pub fn set_permissions(&mut self, bundle: impl Into<String>) {
		self.permissions = Some(bundle.into());
	}

	pub fn permissions(&self) -> Option<&str> {
		self.permissions.as_deref()
	}

	pub fn replica_version(&self) -> Option<&str> {
		self.replica_version.as_deref()
	}

	pub fn metrics(&self) -> DriverMetrics {
		let mut metrics = self.metrics;
		metrics.unique_evictions =
			self.evictions_base + self.sources.values().map(TableSource::evictions).sum::<u64>();
		metrics
	}

	/// Plan a query against statistics computed from the live sources
	pub fn plan_query(&self, query: &Query) -> Result<Query, Error> {
		let schema = self.schema()?;
		let stats = ReplicaStats::new(&self.sources, self.generation);
		let model = StatsCostModel::new(schema.clone(), stats);
		crate::plan::plan(query, &model, schema, &mut NoopObserver)
	}

	/// Create sources for any referenced tables which do not have one
	/// yet, loading their rows from the current snapshot
	fn ensure_sources(&mut self, tables: impl IntoIterator<Item = String>) -> Result<(), Error> {
		for table in tables {
			if self.sources.contains_key(&table) {
				continue;
			}
			let schema = self.schema()?.table(&table)?.clone();
			let mut source = TableSource::new(schema);
			source.load(&self.snapshotter.read().table_rows(&table)?)?;
			self.sources.insert(table, source);
		}
		Ok(())
	}

	/// Add a query pipeline and hydrate it against the current snapshot.
	/// Adding a hash which already has a pipeline is a no-op returning an
	/// empty stream. A hydration error leaves the driver unchanged.
	pub fn add_query(
		&mut self,
		transformation_hash: &str,
		query_id: &str,
		query: &Query,
		timer: &Timer,
	) -> Result<ChangeStream, Error> {
		self.schema()?;
		if self.pipelines.contains_key(transformation_hash) {
			return Ok(ChangeStream::empty());
		}
		self.ensure_sources(query.tables())?;
		let mut pipeline =
			Pipeline::new(transformation_hash, query_id, query, self.schema()?)?;
		let mut streamer = ChangeStreamer::new();
		let yields = YieldState::new(&self.options.yield_config, timer);
		pipeline.hydrate(&self.sources, yields, &mut streamer)?;
		pipeline.hydration_time = timer.total_elapsed();
		debug!(
			query_id,
			hydration_ms = pipeline.hydration_time.as_millis() as u64,
			"query hydrated"
		);
		self.metrics.queries_hydrated += 1;
		self.pipelines.insert(transformation_hash.to_owned(), pipeline);
		Ok(ChangeStream::new(streamer.into_items()))
	}

	/// Destroy one query pipeline and its operator-local storage
	pub fn remove_query(&mut self, transformation_hash: &str) {
		self.pipelines.remove(transformation_hash);
	}

	/// Tear the driver down: every pipeline, every source, and the
	/// replication window
	pub fn destroy(&mut self) {
		self.pipelines.clear();
		self.sources.clear();
		self.schema = None;
		self.replica_version = None;
		self.snapshotter.destroy();
	}

	/// Direct passthrough to the underlying table source
	pub fn get_row(&self, table: &str, key: &BTreeMap<String, Value>) -> Option<Row> {
		self.sources.get(table).and_then(|source| source.get_row(key)).cloned()
	}

	/// Drive all pipelines forward to the snapshot head, emitting the
	/// resulting row changes. The advancement budget is derived from the
	/// total hydration time: overrunning it raises *ResetPipelines* and
	/// leaves the snapshot un-advanced.
	pub fn advance(&mut self, timer: &Timer) -> Result<Advancement, Error> {
		self.schema()?;
		let hydration: Duration =
			self.pipelines.values().map(|pipeline| pipeline.hydration_time).sum();
		let budget = self.options.min_advance_budget.max(hydration);
		let tables: Vec<String> = self.sources.keys().cloned().collect();
		let diff = self.snapshotter.advance(&tables)?;
		if let Some(current) = &self.replica_version {
			if &diff.prev != current {
				return Err(Error::VersionMismatch {
					diff: diff.prev,
					replica: current.clone(),
				});
			}
		}
		let mut streamer = ChangeStreamer::new();
		match self.apply_diff(&diff, timer, budget, &mut streamer) {
			Ok(()) => {}
			Err(error) => {
				if error.is_reset() {
					self.metrics.advance_aborts += 1;
					warn!(
						budget_ms = budget.as_millis() as u64,
						"advance exceeded its budget and was aborted"
					);
				}
				return Err(error);
			}
		}
		// Only now does the new head become observable
		self.snapshotter.commit()?;
		self.replica_version = Some(diff.curr.clone());
		Ok(Advancement {
			version: diff.curr,
			num_changes: streamer.changes(),
			changes: ChangeStream::new(streamer.into_items()),
		})
	}

	fn apply_diff(
		&mut self,
		diff: &Diff,
		timer: &Timer,
		budget: Duration,
		streamer: &mut ChangeStreamer,
	) -> Result<(), Error> {
		let total = diff.entries.len();
		let yields = YieldState::new(&self.options.yield_config, timer);
		for (processed, entry) in diff.entries.iter().enumerate() {
			check_budget(timer, budget, processed, total)?;
			match entry {
				DiffEntry::Truncate {
					table,
				} => {
					warn!(table = %table, "table truncated upstream");
					return Err(Error::ResetPipelines);
				}
				DiffEntry::Change {
					table,
					prev_values,
					next_value,
				} => {
					// Tables no registered pipeline reads are skipped
					let Some(source) = self.sources.get(table) else {
						continue;
					};
					let change = SourceChange {
						prev_values: prev_values
							.iter()
							.map(|raw| source.materialise(raw))
							.collect::<Result<_, _>>()?,
						next_value: next_value
							.as_ref()
							.map(|raw| source.materialise(raw))
							.transpose()?,
					};
					let deltas = source.prepare(&change)?;
					let mut pre_states: Vec<(String, PreState)> = Vec::new();
					for (hash, pipeline) in &self.pipelines {
						if pipeline.tables().contains(table.as_str()) {
							pre_states.push((
								hash.clone(),
								pipeline.prepare_entry(table, &deltas, &self.sources)?,
							));
						}
					}
					if let Some(source) = self.sources.get_mut(table) {
						source.apply(&deltas)?;
					}
					for (hash, pre) in pre_states {
						if let Some(pipeline) = self.pipelines.get(&hash) {
							pipeline.complete_entry(
								table,
								&deltas,
								&self.sources,
								pre,
								streamer,
							)?;
						}
					}
				}
			}
			if yields.should_yield(processed as u32 + 1) {
				streamer.push_yield();
			}
		}
		Ok(())
	}
}

/// The advancement budget rule: the whole budget must never be exceeded,
/// and a run which has burnt half the budget without getting through half
/// the entries is not going to make it either.
fn check_budget(
	timer: &Timer,
	budget: Duration,
	processed: usize,
	total: usize,
) -> Result<(), Error> {
	let elapsed = timer.total_elapsed();
	if elapsed > budget {
		return Err(Error::ResetPipelines);
	}
	if elapsed > budget / 2 && processed * 2 < total {
		return Err(Error::ResetPipelines);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::rc::Rc;

	#[test]
	fn budget_rule_halts_slow_advances() {
		let clock = ManualClock::new();
		let timer = Timer::new(Rc::new(clock.clone()));
		let budget = Duration::from_millis(100);
		// Under half the budget, anything goes
		clock.set(Duration::from_millis(40));
		assert!(check_budget(&timer, budget, 0, 4).is_ok());
		// Over half the budget with under half the entries processed
		clock.set(Duration::from_millis(60));
		assert!(check_budget(&timer, budget, 1, 4).is_err());
		assert!(check_budget(&timer, budget, 2, 4).is_ok());
		// Over the whole budget, regardless of progress
		clock.set(Duration::from_millis(101));
		assert!(check_budget(&timer, budget, 3, 4).is_err());
	}
}
