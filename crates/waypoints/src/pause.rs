use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::shared::{Layer, LayerId, SharedLock, SharedState};
use crate::spawn::TaskClass;

/// Default generation tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(20);

/// How [`GenerationPauseController::pause`] decides the worker is out of the way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SettlePolicy {
	/// Wait until the worker reports it has parked for this suspend, or is not running.
	#[default]
	Acknowledged,
	/// Sleep for a fixed delay and assume any in-flight tick has finished.
	///
	/// The worker may still be mid-tick when the delay ends; mutations made
	/// under the shared lock stay consistent, but a multi-step sequence can
	/// interleave with that last tick.
	FixedDelay(Duration),
}

/// Observable state of the generation worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
	/// Not started, or shut down.
	Stopped,
	/// Ticking, or sleeping between ticks.
	Running,
	/// Blocked on the pause gate. `epoch` is the latest suspend it has observed.
	Parked { epoch: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PauseState {
	depth: usize,
	epoch: u64,
}

enum WorkerSlot {
	Idle,
	Running(JoinHandle<()>),
	Joining,
	Stopped,
}

struct PauseInner {
	shared: SharedLock,
	pause: watch::Sender<PauseState>,
	phase: watch::Sender<WorkerPhase>,
	tick_interval: Duration,
	settle: SettlePolicy,
	ticks: AtomicU64,
	cancel: CancellationToken,
	slot: Mutex<WorkerSlot>,
	joined: Notify,
}

/// Pausable driver for the perpetual layer generation worker.
///
/// One instance per process, cloned into every foreground mutator. The pause
/// gate is advisory: the worker only looks at it at the top of each tick, and
/// mutual exclusion always comes from [`SharedLock`]. Suspend requests nest;
/// the gate reopens when the last outstanding suspend is resumed.
#[derive(Clone)]
pub struct GenerationPauseController {
	inner: Arc<PauseInner>,
}

impl std::fmt::Debug for GenerationPauseController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GenerationPauseController")
			.field("phase", &self.phase())
			.field("suspended", &self.is_suspended())
			.field("ticks", &self.ticks())
			.finish()
	}
}

/// Scoped suspend. Resumes the worker when dropped, on every exit path.
#[must_use = "dropping the guard resumes generation immediately"]
pub struct PauseGuard {
	controller: GenerationPauseController,
}

impl Drop for PauseGuard {
	fn drop(&mut self) {
		self.controller.resume();
	}
}

impl GenerationPauseController {
	pub fn new(shared: SharedLock, tick_interval: Duration, settle: SettlePolicy) -> Self {
		let (pause, _) = watch::channel(PauseState::default());
		let (phase, _) = watch::channel(WorkerPhase::Stopped);
		Self {
			inner: Arc::new(PauseInner {
				shared,
				pause,
				phase,
				tick_interval,
				settle,
				ticks: AtomicU64::new(0),
				cancel: CancellationToken::new(),
				slot: Mutex::new(WorkerSlot::Idle),
				joined: Notify::new(),
			}),
		}
	}

	pub fn shared(&self) -> &SharedLock {
		&self.inner.shared
	}

	pub fn tick_interval(&self) -> Duration {
		self.inner.tick_interval
	}

	pub fn phase(&self) -> WorkerPhase {
		*self.inner.phase.borrow()
	}

	/// Completed ticks since start.
	pub fn ticks(&self) -> u64 {
		self.inner.ticks.load(Ordering::Acquire)
	}

	pub fn is_suspended(&self) -> bool {
		self.inner.pause.borrow().depth > 0
	}

	/// Closes the pause gate. Never blocks, never fails.
	///
	/// Returns the suspend epoch, which [`Self::settle`] uses to recognise
	/// the worker's acknowledgement. Prefer [`Self::pause`], which cannot
	/// leave the worker suspended by mistake.
	pub fn suspend(&self) -> u64 {
		let mut observed = PauseState::default();
		self.inner.pause.send_modify(|state| {
			state.depth = state.depth.saturating_add(1);
			state.epoch = state.epoch.wrapping_add(1);
			observed = *state;
		});
		tracing::debug!(depth = observed.depth, epoch = observed.epoch, "pause.suspend");
		observed.epoch
	}

	/// Releases one suspend. A resume with nothing suspended is a no-op.
	pub fn resume(&self) {
		let mut depth = 0;
		let resumed = self.inner.pause.send_if_modified(|state| {
			if state.depth == 0 {
				return false;
			}
			state.depth -= 1;
			depth = state.depth;
			true
		});
		if resumed {
			tracing::debug!(depth, "pause.resume");
		} else {
			tracing::warn!("pause.resume_without_suspend");
		}
	}

	/// Waits until the worker is out of the way for the suspend at `epoch`.
	pub async fn settle(&self, epoch: u64) {
		match self.inner.settle {
			SettlePolicy::FixedDelay(delay) => tokio::time::sleep(delay).await,
			SettlePolicy::Acknowledged => {
				let mut rx = self.inner.phase.subscribe();
				let _ = rx
					.wait_for(|phase| match *phase {
						WorkerPhase::Stopped => true,
						WorkerPhase::Parked { epoch: seen } => seen >= epoch,
						WorkerPhase::Running => false,
					})
					.await;
			}
		}
	}

	/// Suspends the worker, waits for it to settle, and returns a guard that resumes on drop.
	pub async fn pause(&self) -> PauseGuard {
		let epoch = self.suspend();
		let guard = PauseGuard { controller: self.clone() };
		self.settle(epoch).await;
		guard
	}

	/// Runs `f` against the shared state inside a pause bracket.
	pub async fn mutate<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
		let _pause = self.pause().await;
		let mut state = self.inner.shared.lock();
		f(&mut state)
	}

	/// Adds a layer to the tick set.
	pub async fn register_layer(&self, layer: Arc<dyn Layer>) -> LayerId {
		let name = layer.name().to_string();
		let id = self.mutate(|state| state.add_layer(layer)).await;
		tracing::debug!(%id, layer = %name, "generation.layer_registered");
		id
	}

	/// Removes a layer from the tick set. Returns whether it was present.
	pub async fn unregister_layer(&self, id: LayerId) -> bool {
		let removed = self.mutate(|state| state.remove_layer(id)).await;
		match &removed {
			Some(layer) => tracing::debug!(%id, layer = layer.name(), "generation.layer_unregistered"),
			None => tracing::debug!(%id, "generation.layer_missing"),
		}
		removed.is_some()
	}

	pub fn layer_ids(&self) -> Vec<LayerId> {
		self.inner.shared.lock().layer_ids()
	}

	pub fn layer_count(&self) -> usize {
		self.inner.shared.lock().layer_count()
	}

	/// Spawns the worker. Returns `false` if it was already started or has been shut down.
	pub fn start(&self) -> bool {
		let mut slot = self.inner.slot.lock();
		if !matches!(*slot, WorkerSlot::Idle) {
			return false;
		}
		self.inner.phase.send_replace(WorkerPhase::Running);
		let inner = Arc::clone(&self.inner);
		*slot = WorkerSlot::Running(crate::spawn(TaskClass::Generation, run_worker(inner)));
		tracing::debug!(tick_ms = self.inner.tick_interval.as_millis() as u64, "generation.start");
		true
	}

	/// Cancels the worker and waits for it to exit. Safe to call concurrently and repeatedly.
	pub async fn shutdown(&self) {
		self.inner.cancel.cancel();
		loop {
			let next = {
				let mut slot = self.inner.slot.lock();
				match std::mem::replace(&mut *slot, WorkerSlot::Joining) {
					WorkerSlot::Running(handle) => ShutdownStep::Join(handle),
					WorkerSlot::Joining => ShutdownStep::Wait(self.inner.joined.notified()),
					WorkerSlot::Idle | WorkerSlot::Stopped => {
						*slot = WorkerSlot::Stopped;
						ShutdownStep::Done
					}
				}
			};
			match next {
				ShutdownStep::Join(handle) => {
					match handle.await {
						Err(err) if err.is_panic() => tracing::error!("generation.worker_panicked"),
						_ => {}
					}
					*self.inner.slot.lock() = WorkerSlot::Stopped;
					self.inner.phase.send_replace(WorkerPhase::Stopped);
					self.inner.joined.notify_waiters();
					return;
				}
				ShutdownStep::Wait(notified) => notified.await,
				ShutdownStep::Done => {
					self.inner.phase.send_replace(WorkerPhase::Stopped);
					return;
				}
			}
		}
	}
}

enum ShutdownStep<'a> {
	Join(JoinHandle<()>),
	Wait(Notified<'a>),
	Done,
}

impl PauseInner {
	fn tick_once(&self) {
		let state = self.shared.lock();
		let layers = state.layer_snapshot();
		for layer in &layers {
			let res = std::panic::catch_unwind(AssertUnwindSafe(|| layer.on_tick(self.tick_interval, state.waypoints())));
			if let Err(payload) = res {
				tracing::error!(layer = layer.name(), panic = %panic_message(payload.as_ref()), "generation.layer_panicked");
			}
		}
		drop(state);
		self.ticks.fetch_add(1, Ordering::AcqRel);
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		return (*s).to_string();
	}
	if let Some(s) = payload.downcast_ref::<String>() {
		return s.clone();
	}
	"non-string panic payload".to_string()
}

async fn run_worker(inner: Arc<PauseInner>) {
	let mut pause = inner.pause.subscribe();
	'worker: loop {
		if inner.cancel.is_cancelled() {
			break;
		}

		let state = *pause.borrow_and_update();
		if state.depth > 0 {
			inner.phase.send_replace(WorkerPhase::Parked { epoch: state.epoch });
			tracing::trace!(epoch = state.epoch, "generation.parked");
			loop {
				tokio::select! {
					biased;
					_ = inner.cancel.cancelled() => break 'worker,
					res = pause.changed() => {
						if res.is_err() {
							break 'worker;
						}
					}
				}
				let state = *pause.borrow_and_update();
				if state.depth == 0 {
					break;
				}
				inner.phase.send_replace(WorkerPhase::Parked { epoch: state.epoch });
			}
			inner.phase.send_replace(WorkerPhase::Running);
			tracing::trace!("generation.unparked");
		}

		let started = tokio::time::Instant::now();
		inner.tick_once();

		// Sleep out the rest of the tick, but go park right away if a suspend lands.
		let deadline = started + inner.tick_interval;
		loop {
			tokio::select! {
				biased;
				_ = inner.cancel.cancelled() => break 'worker,
				_ = tokio::time::sleep_until(deadline) => break,
				res = pause.changed() => {
					if res.is_err() {
						break 'worker;
					}
					if pause.borrow().depth > 0 {
						break;
					}
				}
			}
		}
	}
	inner.phase.send_replace(WorkerPhase::Stopped);
	tracing::debug!(ticks = inner.ticks.load(Ordering::Acquire), "generation.stopped");
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests;
