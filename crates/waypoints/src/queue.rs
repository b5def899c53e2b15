//! Strictly ordered, single-flight dispatch of mutation commands.
//!
//! Producers append to one FIFO and return immediately. At most one drain
//! loop runs per queue; it waits for the acknowledgement gate, marks it busy,
//! pops exactly one command and sends it. The next command goes out only
//! after the peer's next full snapshot clears the gate again, or after the
//! stuck-gate policy forces it clear.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::command::MutationCommand;
use crate::error::CommandEncodeError;
use crate::gate::{AckGate, GateWait, GateWaitSpec};
use crate::record::{SavedWaypoints, Waypoint};
use crate::shared::SharedLock;
use crate::spawn::TaskClass;
use crate::transport::Transport;

/// Remove commands for every record matching `pred`, highest index first.
///
/// Applied in order to a list that shrinks by one per removal, these remove
/// exactly the matching records: every removal only shifts records that
/// were already removed.
pub fn plan_mass_removal(saved: &SavedWaypoints, pred: impl FnMut(&Waypoint) -> bool) -> Vec<MutationCommand> {
	let mut indices = saved.matching_indices(pred);
	indices.reverse();
	indices.into_iter().map(MutationCommand::remove).collect()
}

/// Add commands for every record whose id is not already in `saved`, in input order.
///
/// Each command keeps its record's id, so once the peer has applied a batch,
/// planning the same batch again against the new snapshot yields nothing.
/// Repeated ids within `records` are added once.
pub fn plan_mass_addition<'a>(saved: &SavedWaypoints, records: impl IntoIterator<Item = &'a Waypoint>) -> Vec<MutationCommand> {
	let mut seen = HashSet::new();
	records
		.into_iter()
		.filter(|rec| !saved.contains_id(&rec.id) && seen.insert(rec.id.clone()))
		.map(|rec| MutationCommand::add_as(rec.id.clone(), rec.position, rec.draft()))
		.collect()
}

struct QueueInner {
	pending: Mutex<VecDeque<MutationCommand>>,
	draining: AtomicBool,
	idle: Notify,
	dispatched: AtomicU64,
	gate: AckGate,
	shared: SharedLock,
	transport: Arc<dyn Transport>,
	wait: GateWaitSpec,
}

/// The process-wide mutation queue. Cheap to clone; clones share one FIFO.
#[derive(Clone)]
pub struct CommandQueue {
	inner: Arc<QueueInner>,
}

impl std::fmt::Debug for CommandQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CommandQueue")
			.field("pending", &self.len())
			.field("draining", &self.is_draining())
			.field("dispatched", &self.dispatched())
			.finish()
	}
}

impl CommandQueue {
	pub fn new(gate: AckGate, shared: SharedLock, transport: Arc<dyn Transport>, wait: GateWaitSpec) -> Self {
		Self {
			inner: Arc::new(QueueInner {
				pending: Mutex::new(VecDeque::new()),
				draining: AtomicBool::new(false),
				idle: Notify::new(),
				dispatched: AtomicU64::new(0),
				gate,
				shared,
				transport,
				wait,
			}),
		}
	}

	pub fn gate(&self) -> &AckGate {
		&self.inner.gate
	}

	/// Appends one command and makes sure a drain loop is running.
	pub fn enqueue(&self, command: MutationCommand) {
		tracing::trace!(verb = command.verb(), "queue.enqueue");
		self.inner.pending.lock().push_back(command);
		self.kick();
	}

	/// Appends a batch contiguously. Returns how many commands were queued.
	pub fn enqueue_all(&self, commands: impl IntoIterator<Item = MutationCommand>) -> usize {
		let queued = {
			let mut pending = self.inner.pending.lock();
			let before = pending.len();
			pending.extend(commands);
			pending.len() - before
		};
		if queued > 0 {
			tracing::debug!(queued, "queue.enqueue_batch");
			self.kick();
		}
		queued
	}

	/// Queues removal of every cached record matching `pred`. Returns the number queued.
	pub fn remove_where(&self, pred: impl FnMut(&Waypoint) -> bool) -> usize {
		let commands = {
			let state = self.inner.shared.lock();
			plan_mass_removal(state.waypoints(), pred)
		};
		self.enqueue_all(commands)
	}

	/// Queues creation of every record whose id is not cached yet. Returns the number queued.
	pub fn add_missing<'a>(&self, records: impl IntoIterator<Item = &'a Waypoint>) -> usize {
		let commands = {
			let state = self.inner.shared.lock();
			plan_mass_addition(state.waypoints(), records)
		};
		self.enqueue_all(commands)
	}

	/// Commands waiting to be dispatched.
	pub fn len(&self) -> usize {
		self.inner.pending.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn is_draining(&self) -> bool {
		self.inner.draining.load(Ordering::Acquire)
	}

	/// Commands successfully handed to the transport so far.
	pub fn dispatched(&self) -> u64 {
		self.inner.dispatched.load(Ordering::Acquire)
	}

	/// Drains the queue on the calling task.
	///
	/// Returns `false` without doing anything if another drain loop is
	/// already active; that loop will pick up everything queued.
	pub async fn run(&self) -> bool {
		if !self.inner.claim_drain() {
			return false;
		}
		Arc::clone(&self.inner).drain().await;
		true
	}

	/// Resolves once nothing is queued, no drain loop is active and the gate is clear.
	pub async fn wait_idle(&self) {
		loop {
			let notified = self.inner.idle.notified();
			if self.is_empty() && !self.is_draining() {
				if !self.inner.gate.is_busy() {
					return;
				}
				self.inner.gate.cleared().await;
				continue;
			}
			notified.await;
		}
	}

	fn kick(&self) {
		if self.inner.claim_drain() {
			let inner = Arc::clone(&self.inner);
			crate::spawn(TaskClass::Dispatch, inner.drain());
		}
	}
}

impl QueueInner {
	fn claim_drain(&self) -> bool {
		self.draining
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	async fn drain(self: Arc<Self>) {
		tracing::debug!(pending = self.pending.lock().len(), "queue.drain_start");
		loop {
			while !self.pending.lock().is_empty() {
				if self.gate.wait_clear(&self.wait).await == GateWait::Reset {
					tracing::warn!(pending = self.pending.lock().len(), "queue.gate_reset");
				}
				if !self.gate.try_acquire() {
					continue;
				}
				let Some(command) = self.pending.lock().pop_front() else {
					self.gate.clear();
					break;
				};
				self.dispatch(command);
			}

			// A producer may have pushed after the emptiness check but before
			// the flag dropped; reclaim the loop for it.
			self.draining.store(false, Ordering::Release);
			if self.pending.lock().is_empty() || !self.claim_drain() {
				break;
			}
		}
		tracing::debug!(dispatched = self.dispatched.load(Ordering::Acquire), "queue.drain_idle");
		self.idle.notify_waiters();
	}

	/// Sends one command. Must be called with the gate held.
	fn dispatch(&self, command: MutationCommand) {
		let line = {
			let state = self.shared.lock();
			command.to_wire(state.waypoints())
		};
		let line = match line {
			Ok(line) => line,
			Err(err @ CommandEncodeError::Unresolved(_)) => {
				tracing::warn!(verb = command.verb(), error = %err, "queue.unresolved");
				self.gate.clear();
				return;
			}
			Err(err) => {
				tracing::error!(verb = command.verb(), error = %err, "queue.unencodable");
				self.gate.clear();
				return;
			}
		};
		let sent = match command.created_id() {
			Some(id) => self.transport.send_create(&line, id),
			None => self.transport.send(&line),
		};
		match sent {
			Ok(()) => {
				let seq = self.dispatched.fetch_add(1, Ordering::AcqRel) + 1;
				tracing::debug!(seq, line = %line, "queue.dispatch");
			}
			Err(err) => {
				tracing::error!(error = %err, line = %line, "queue.send_failed");
				self.gate.clear();
			}
		}
	}
}
