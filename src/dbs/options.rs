use crate::cnf::{DEFAULT_YIELD_THRESHOLD, MIN_ADVANCE_BUDGET};
use crate::dbs::timer::Timer;
use std::time::Duration;

/// When a fetch iterator interleaves cooperative yield sentinels.
#[derive(Clone, Debug, PartialEq)]
pub enum YieldConfig {
	/// Never yield; only sensible for tests and tiny replicas
	Never,
	/// Yield once the lap timer exceeds the threshold
	Elapsed(Duration),
	/// Yield after every N fetched rows, for deterministic tests
	EveryRows(u32),
}

impl Default for YieldConfig {
	fn default() -> Self {
		YieldConfig::Elapsed(DEFAULT_YIELD_THRESHOLD)
	}
}

/// The yield decision for one stream, pairing the driver configuration
/// with the caller's timer.
#[derive(Clone, Copy)]
pub struct YieldState<'a> {
	config: &'a YieldConfig,
	timer: &'a Timer,
}

impl<'a> YieldState<'a> {
	pub fn new(config: &'a YieldConfig, timer: &'a Timer) -> Self {
		YieldState {
			config,
			timer,
		}
	}

	/// Whether to emit a yield sentinel after the row just fetched.
	/// `rows_since` counts rows fetched since the last sentinel.
	pub fn should_yield(&self, rows_since: u32) -> bool {
		match self.config {
			YieldConfig::Never => false,
			YieldConfig::Elapsed(threshold) => {
				if self.timer.elapsed_lap() > *threshold {
					self.timer.reset_lap();
					true
				} else {
					false
				}
			}
			YieldConfig::EveryRows(n) => *n > 0 && rows_since > 0 && rows_since % n == 0,
		}
	}
}

/// Per-driver tunables.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverOptions {
	pub yield_config: YieldConfig,
	/// The floor under the advancement time budget
	pub min_advance_budget: Duration,
}

impl Default for DriverOptions {
	fn default() -> Self {
		DriverOptions {
			yield_config: YieldConfig::default(),
			min_advance_budget: MIN_ADVANCE_BUDGET,
		}
	}
}

impl DriverOptions {
	pub fn with_yield_config(mut self, config: YieldConfig) -> Self {
		self.yield_config = config;
		self
	}

	pub fn with_min_advance_budget(mut self, budget: Duration) -> Self {
		self.min_advance_budget = budget;
		self
	}
}
