use std::time::Duration;

/// The minimum time budget granted to an advancement, regardless of how
/// short hydration was. An advance which stays under this floor always
/// completes, so that a driver whose queries hydrated quickly is not
/// starved of the ability to make progress.
pub const MIN_ADVANCE_BUDGET: Duration = Duration::from_millis(50);

/// The default interval after which a fetch iterator emits a cooperative
/// yield sentinel. Drivers override this through [`crate::dbs::YieldConfig`].
pub const DEFAULT_YIELD_THRESHOLD: Duration = Duration::from_millis(100);

/// The fanout returned when no statistics are available for a join column.
pub const DEFAULT_FANOUT: f64 = 3.0;

/// A small constant cost which penalises an unflipped EXISTS relative to a
/// plain join. It must be small enough that substantially better plans
/// still win, but large enough that two otherwise equal-cost plans prefer
/// the flipped form, which avoids semi-join buffering.
pub const SEMI_JOIN_OVERHEAD: f64 = 10.0;

/// The maximum number of cached cost estimates per cost model instance.
pub const COST_CACHE_SIZE: usize = 256;
