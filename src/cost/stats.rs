//! A cost model backed by replica statistics.
//!
//! The provider exposes per-index column histograms sampled from the
//! replica. Fanout is the median non-NULL equal-to count of the sampled
//! histogram, falling back to the per-index average, then to a constant.
//! Resolved figures are cached per `(table, sorted-columns)` and the
//! cache is dropped whenever the provider's generation moves, which
//! happens on schema or statistics refresh.

use crate::ast::Key;
use crate::cnf::DEFAULT_FANOUT;
use crate::cost::{Access, Confidence, CostModel, Estimate, Fanout, FanoutFn, FilterValue};
use crate::err::Error;
use crate::sch::ClientSchema;
use quick_cache::unsync::Cache;
use std::cell::{Cell, RefCell};

/// A source of replica statistics.
pub trait StatsProvider {
	/// The current row count of a table, when known
	fn table_rows(&self, table: &str) -> Option<u64>;

	/// Sampled equal-to counts per distinct value of the given columns,
	/// from a per-index histogram. `None` when no histogram is kept.
	fn column_samples(&self, table: &str, columns: &[String]) -> Option<Vec<(Key, u64)>>;

	/// The maintained per-index average rows per distinct value
	fn index_average(&self, table: &str, columns: &[String]) -> Option<f64>;

	/// Bumped on every schema or statistics refresh
	fn generation(&self) -> u64;
}

/// The resolved fanout figures for one `(table, columns)` pair.
#[derive(Clone, Copy, Debug, Default)]
struct FanoutStats {
	median: Option<f64>,
	average: Option<f64>,
	/// Every sampled value was NULL. NULL never matches a join, so the
	/// fanout of such a column is zero.
	all_null: bool,
}

pub struct StatsCostModel<P> {
	schema: ClientSchema,
	provider: P,
	cache: RefCell<Cache<(String, Vec<String>), FanoutStats>>,
	generation: Cell<u64>,
	default_rows: f64,
}

impl<P: StatsProvider> StatsCostModel<P> {
	pub fn new(schema: ClientSchema, provider: P) -> Self {
		let generation = provider.generation();
		StatsCostModel {
			schema,
			provider,
			cache: RefCell::new(Cache::new(crate::cnf::COST_CACHE_SIZE)),
			generation: Cell::new(generation),
			default_rows: 1000.0,
		}
	}

	fn stats(&self, table: &str, columns: &[String]) -> FanoutStats {
		// Refreshed statistics invalidate everything resolved so far
		let generation = self.provider.generation();
		if generation != self.generation.get() {
			*self.cache.borrow_mut() = Cache::new(crate::cnf::COST_CACHE_SIZE);
			self.generation.set(generation);
		}
		let mut sorted = columns.to_vec();
		sorted.sort();
		let key = (table.to_owned(), sorted);
		if let Some(stats) = self.cache.borrow_mut().get(&key).copied() {
			return stats;
		}
		let stats = self.resolve(table, columns);
		self.cache.borrow_mut().insert(key, stats);
		stats
	}

	fn resolve(&self, table: &str, columns: &[String]) -> FanoutStats {
		let mut stats = FanoutStats {
			average: self.provider.index_average(table, columns),
			..Default::default()
		};
		if let Some(samples) = self.provider.column_samples(table, columns) {
			let mut counts: Vec<u64> = samples
				.iter()
				.filter(|(key, _)| !key.has_null())
				.map(|(_, count)| *count)
				.collect();
			if counts.is_empty() {
				stats.all_null = !samples.is_empty();
			} else {
				counts.sort_unstable();
				stats.median = Some(counts[counts.len() / 2] as f64);
			}
		}
		stats
	}

	fn fanout(&self, table: &str, columns: &[String]) -> Fanout {
		let stats = self.stats(table, columns);
		if stats.all_null {
			return Fanout {
				per_value: 0.0,
				confidence: Confidence::Histogram,
			};
		}
		if let Some(median) = stats.median {
			return Fanout {
				per_value: median,
				confidence: Confidence::Histogram,
			};
		}
		if let Some(average) = stats.average {
			return Fanout {
				per_value: average,
				confidence: Confidence::IndexAverage,
			};
		}
		Fanout {
			per_value: DEFAULT_FANOUT,
			confidence: Confidence::Fallback,
		}
	}
}

struct StatsFanout<'a, P> {
	model: &'a StatsCostModel<P>,
	table: String,
}

impl<P: StatsProvider> FanoutFn for StatsFanout<'_, P> {
	fn fanout(&self, columns: &[String]) -> Fanout {
		self.model.fanout(&self.table, columns)
	}
}

impl<P: StatsProvider> CostModel for StatsCostModel<P> {
	fn cost(&self, access: &Access<'_>) -> Result<Estimate<'_>, Error> {
		let table = self.schema.table(access.table)?;
		let mut rows =
			self.provider.table_rows(access.table).map(|r| r as f64).unwrap_or(self.default_rows);
		let pinned: Vec<String> = access
			.filters
			.iter()
			.filter(|f| f.is_equality())
			.map(|f| f.column.clone())
			.collect();
		if table.has_non_null_unique_covering(&pinned) {
			// Equality over a non-null unique index pins a single row
			rows = 1.0;
		} else {
			for filter in access.filters {
				let column = std::slice::from_ref(&filter.column);
				let reduced = match (&filter.op, &filter.value) {
					(crate::ast::CompareOp::Equal, FilterValue::One(_)) => {
						self.fanout(access.table, column).per_value
					}
					(crate::ast::CompareOp::In, FilterValue::Many(vs)) => {
						vs.len() as f64 * self.fanout(access.table, column).per_value
					}
					// Ranges, patterns and null tests scan a fraction
					_ => rows / 3.0,
				};
				rows = rows.min(reduced.max(1.0));
			}
		}
		let startup_cost = if table.order_is_indexed(access.order) {
			0.0
		} else {
			rows * rows.max(2.0).log2()
		};
		Ok(Estimate {
			rows,
			startup_cost,
			fanout: Box::new(StatsFanout {
				model: self,
				table: access.table.to_owned(),
			}),
		})
	}
}
