use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// A monotonic time source. The driver is single-threaded and
/// cooperative, so clocks are shared through cheap handles rather than
/// synchronised.
pub trait Clock {
	fn now(&self) -> Duration;
}

/// The wall clock.
pub struct SystemClock {
	origin: trice::Instant,
}

impl Default for SystemClock {
	fn default() -> Self {
		SystemClock {
			origin: trice::Instant::now(),
		}
	}
}

impl Clock for SystemClock {
	fn now(&self) -> Duration {
		self.origin.elapsed()
	}
}

/// A hand-driven clock for tests. Cloned handles share the same time, and
/// an optional step advances the clock on every observation so that a
/// test can simulate work which takes time to process.
#[derive(Clone, Default)]
pub struct ManualClock {
	inner: Rc<ManualClockInner>,
}

#[derive(Default)]
struct ManualClockInner {
	now: Cell<Duration>,
	step: Cell<Duration>,
}

impl ManualClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(&self, now: Duration) {
		self.inner.now.set(now);
	}

	pub fn advance(&self, by: Duration) {
		self.inner.now.set(self.inner.now.get() + by);
	}

	/// Advance the clock by this much on every `now` observation
	pub fn auto_step(&self, step: Duration) {
		self.inner.step.set(step);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> Duration {
		let now = self.inner.now.get() + self.inner.step.get();
		self.inner.now.set(now);
		now
	}
}

/// Tracks elapsed time for one hydration or advancement, with a lap hand
/// for the cooperative yield threshold. The caller pauses the timer while
/// it is suspended at a yield point so that scheduler time is not billed
/// to the budget.
pub struct Timer {
	clock: Rc<dyn Clock>,
	base: Duration,
	lap: Cell<Duration>,
	paused_at: Cell<Option<Duration>>,
	paused_total: Cell<Duration>,
}

impl Timer {
	pub fn new(clock: Rc<dyn Clock>) -> Self {
		let base = clock.now();
		Timer {
			clock,
			base,
			lap: Cell::new(base),
			paused_at: Cell::new(None),
			paused_total: Cell::new(Duration::ZERO),
		}
	}

	/// A timer over the wall clock
	pub fn system() -> Self {
		Self::new(Rc::new(SystemClock::default()))
	}

	/// The current reading, with paused intervals carved out
	fn now(&self) -> Duration {
		let now = match self.paused_at.get() {
			Some(paused) => paused,
			None => self.clock.now(),
		};
		now - self.paused_total.get()
	}

	/// Time elapsed since the timer was created
	pub fn total_elapsed(&self) -> Duration {
		self.now() - self.base
	}

	/// Time elapsed since the last lap reset
	pub fn elapsed_lap(&self) -> Duration {
		self.now() - self.lap.get()
	}

	pub fn reset_lap(&self) {
		self.lap.set(self.now());
	}

	pub fn pause(&self) {
		if self.paused_at.get().is_none() {
			self.paused_at.set(Some(self.clock.now()));
		}
	}

	pub fn resume(&self) {
		if let Some(paused) = self.paused_at.take() {
			let total = self.paused_total.get() + (self.clock.now() - paused);
			self.paused_total.set(total);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn paused_time_is_not_billed() {
		let clock = ManualClock::new();
		let timer = Timer::new(Rc::new(clock.clone()));
		clock.advance(Duration::from_millis(10));
		timer.pause();
		clock.advance(Duration::from_millis(100));
		timer.resume();
		clock.advance(Duration::from_millis(5));
		assert_eq!(timer.total_elapsed(), Duration::from_millis(15));
	}

	#[test]
	fn laps_reset_independently_of_the_total() {
		let clock = ManualClock::new();
		let timer = Timer::new(Rc::new(clock.clone()));
		clock.advance(Duration::from_millis(10));
		timer.reset_lap();
		clock.advance(Duration::from_millis(5));
		assert_eq!(timer.elapsed_lap(), Duration::from_millis(5));
		assert_eq!(timer.total_elapsed(), Duration::from_millis(15));
	}

	#[test]
	fn auto_step_advances_per_observation() {
		let clock = ManualClock::new();
		clock.auto_step(Duration::from_millis(30));
		let timer = Timer::new(Rc::new(clock.clone()));
		assert_eq!(timer.total_elapsed(), Duration::from_millis(30));
		assert_eq!(timer.total_elapsed(), Duration::from_millis(60));
	}
}
