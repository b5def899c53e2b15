use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

/// Decides whether a gate that has stayed busy too long should be forced open.
///
/// Consulted once per poll while a dispatcher waits. Implementations must be
/// cheap and must not block.
pub trait StuckGatePolicy: Send + Sync + 'static {
	/// Returns `true` to force the gate clear.
	fn should_reset(&self, busy_for: Duration, polls: u32) -> bool;
}

/// Waits for the peer indefinitely. The queue stalls if a snapshot is lost.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForever;

impl StuckGatePolicy for WaitForever {
	fn should_reset(&self, _busy_for: Duration, _polls: u32) -> bool {
		false
	}
}

/// Forces the gate clear once it has been busy for longer than the given duration.
#[derive(Debug, Clone, Copy)]
pub struct ResetAfter(pub Duration);

impl StuckGatePolicy for ResetAfter {
	fn should_reset(&self, busy_for: Duration, _polls: u32) -> bool {
		busy_for >= self.0
	}
}

/// How a wait on the gate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
	/// The gate was, or became, clear.
	Cleared,
	/// The stuck-gate policy forced the gate clear.
	Reset,
}

/// Knobs for [`AckGate::wait_clear`].
#[derive(Clone)]
pub struct GateWaitSpec {
	/// Upper bound between re-checks of the gate and the stuck-gate policy.
	pub poll: Duration,
	/// Consecutive busy polls before a diagnostic warning is logged. Zero disables it.
	pub watchdog_polls: u32,
	pub policy: Arc<dyn StuckGatePolicy>,
}

impl std::fmt::Debug for GateWaitSpec {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GateWaitSpec")
			.field("poll", &self.poll)
			.field("watchdog_polls", &self.watchdog_polls)
			.finish_non_exhaustive()
	}
}

struct GateInner {
	busy: watch::Sender<bool>,
	busy_since: Mutex<Option<Instant>>,
}

/// Busy/not-busy signal limiting dispatch to one command in flight.
///
/// Set by the dispatcher right before a command goes out; cleared by the
/// snapshot hook when the peer pushes a fresh full collection. Waiters are
/// woken by the watch channel and additionally re-check on a poll interval so
/// the stuck-gate policy gets a chance to run.
#[derive(Clone)]
pub struct AckGate {
	inner: Arc<GateInner>,
}

impl std::fmt::Debug for AckGate {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AckGate").field("busy", &self.is_busy()).finish()
	}
}

impl Default for AckGate {
	fn default() -> Self {
		Self::new()
	}
}

impl AckGate {
	/// Creates a clear gate.
	pub fn new() -> Self {
		let (busy, _) = watch::channel(false);
		Self {
			inner: Arc::new(GateInner {
				busy,
				busy_since: Mutex::new(None),
			}),
		}
	}

	pub fn is_busy(&self) -> bool {
		*self.inner.busy.borrow()
	}

	/// How long the gate has been busy, if it is.
	pub fn busy_for(&self) -> Option<Duration> {
		self.inner.busy_since.lock().map(|since| since.elapsed())
	}

	/// Atomically flips clear to busy. Returns `false` if it was already busy.
	pub fn try_acquire(&self) -> bool {
		self.inner.busy.send_if_modified(|busy| {
			if *busy {
				return false;
			}
			*busy = true;
			*self.inner.busy_since.lock() = Some(Instant::now());
			true
		})
	}

	/// Clears the gate. Returns whether it was busy.
	///
	/// This is what the snapshot hook calls; it carries no correlation to a
	/// particular command.
	pub fn clear(&self) -> bool {
		self.inner.busy.send_if_modified(|busy| {
			if !*busy {
				return false;
			}
			*busy = false;
			*self.inner.busy_since.lock() = None;
			true
		})
	}

	/// Manual escape hatch for a gate whose snapshot will never arrive.
	pub fn force_clear(&self) -> bool {
		let was_busy = self.clear();
		if was_busy {
			tracing::warn!("gate.force_clear");
		}
		was_busy
	}

	/// Resolves once the gate is clear. Never consults a stuck-gate policy.
	pub async fn cleared(&self) {
		let mut rx = self.inner.busy.subscribe();
		let _ = rx.wait_for(|busy| !*busy).await;
	}

	/// Resolves once the gate is clear, or once `spec.policy` forces it clear.
	pub async fn wait_clear(&self, spec: &GateWaitSpec) -> GateWait {
		let mut rx = self.inner.busy.subscribe();
		let mut polls = 0u32;
		loop {
			if !*rx.borrow_and_update() {
				return GateWait::Cleared;
			}

			let busy_for = self.busy_for().unwrap_or_default();
			if spec.policy.should_reset(busy_for, polls) {
				tracing::warn!(busy_ms = busy_for.as_millis() as u64, polls, "gate.reset");
				self.clear();
				return GateWait::Reset;
			}
			if spec.watchdog_polls > 0 && polls > 0 && polls % spec.watchdog_polls == 0 {
				tracing::warn!(busy_ms = busy_for.as_millis() as u64, polls, "gate.watchdog");
			}

			polls = polls.wrapping_add(1);
			tokio::select! {
				res = rx.changed() => {
					if res.is_err() {
						return GateWait::Cleared;
					}
				}
				_ = tokio::time::sleep(spec.poll) => {}
			}
		}
	}
}
