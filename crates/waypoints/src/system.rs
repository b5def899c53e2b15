use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::command::MutationCommand;
use crate::config::CoreConfig;
use crate::gate::AckGate;
use crate::lease::PositionLeaseRegistry;
use crate::pause::GenerationPauseController;
use crate::queue::CommandQueue;
use crate::record::{SavedWaypoints, Waypoint, WaypointDraft, WaypointId, WorldPos};
use crate::shared::SharedLock;
use crate::spawn::TaskClass;
use crate::transport::Transport;

/// Result of [`WaypointSystem::create_waypoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
	/// The add command was queued; the record will carry this identifier.
	Queued(WaypointId),
	/// A creation for the same position is already in flight; nothing was queued.
	Suppressed,
}

/// The coordination core, wired once per process.
///
/// Every part is a shared handle, so clones of the system observe and drive
/// the same queue, gate, lease set, lock and worker.
#[derive(Clone)]
pub struct WaypointSystem {
	config: Arc<CoreConfig>,
	shared: SharedLock,
	gate: AckGate,
	leases: PositionLeaseRegistry,
	queue: CommandQueue,
	pause: GenerationPauseController,
}

impl std::fmt::Debug for WaypointSystem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WaypointSystem")
			.field("queue", &self.queue)
			.field("gate", &self.gate)
			.field("pause", &self.pause)
			.finish_non_exhaustive()
	}
}

impl WaypointSystem {
	/// Wires every part around one shared lock. Does not start the worker.
	pub fn new(config: CoreConfig, transport: Arc<dyn Transport>) -> Self {
		let shared = SharedLock::new();
		let gate = AckGate::new();
		let leases = PositionLeaseRegistry::new(config.lease_timeout());
		let queue = CommandQueue::new(gate.clone(), shared.clone(), transport, config.gate_wait_spec());
		let pause = GenerationPauseController::new(shared.clone(), config.tick_interval(), config.settle_policy());
		Self {
			config: Arc::new(config),
			shared,
			gate,
			leases,
			queue,
			pause,
		}
	}

	pub fn config(&self) -> &CoreConfig {
		&self.config
	}

	pub fn shared(&self) -> &SharedLock {
		&self.shared
	}

	pub fn gate(&self) -> &AckGate {
		&self.gate
	}

	pub fn leases(&self) -> &PositionLeaseRegistry {
		&self.leases
	}

	pub fn queue(&self) -> &CommandQueue {
		&self.queue
	}

	pub fn pause(&self) -> &GenerationPauseController {
		&self.pause
	}

	/// Copy of the locally cached authoritative list.
	pub fn saved(&self) -> SavedWaypoints {
		self.shared.waypoints()
	}

	/// Starts the generation worker. Returns `false` if it already ran.
	pub fn start(&self) -> bool {
		self.pause.start()
	}

	/// Queues creation of a waypoint at `position` unless one is already being created there.
	pub fn create_waypoint(&self, position: WorldPos, draft: WaypointDraft) -> CreateOutcome {
		if !self.leases.try_acquire(position) {
			tracing::debug!(%position, "waypoints.create_suppressed");
			return CreateOutcome::Suppressed;
		}
		let id = WaypointId::generate();
		self.queue.enqueue(MutationCommand::add_as(id.clone(), position, draft));
		CreateOutcome::Queued(id)
	}

	/// Queues a full replacement of the record `id`. Returns `false` if `id` is not cached.
	pub fn modify_waypoint(&self, id: &WaypointId, draft: WaypointDraft) -> bool {
		if !self.shared.lock().waypoints().contains_id(id) {
			tracing::debug!(%id, "waypoints.modify_unknown");
			return false;
		}
		self.queue.enqueue(MutationCommand::modify(id.clone(), draft));
		true
	}

	/// Queues removal of the record `id`. Returns `false` if `id` is not cached.
	pub fn remove_waypoint(&self, id: &WaypointId) -> bool {
		if !self.shared.lock().waypoints().contains_id(id) {
			tracing::debug!(%id, "waypoints.remove_unknown");
			return false;
		}
		self.queue.enqueue(MutationCommand::remove(id.clone()));
		true
	}

	/// See [`CommandQueue::remove_where`].
	pub fn remove_where(&self, pred: impl FnMut(&Waypoint) -> bool) -> usize {
		self.queue.remove_where(pred)
	}

	/// See [`CommandQueue::add_missing`].
	pub fn add_missing<'a>(&self, records: impl IntoIterator<Item = &'a Waypoint>) -> usize {
		self.queue.add_missing(records)
	}

	/// The "full snapshot received" hook.
	///
	/// Replaces the cache wholesale, then clears the gate. This is the only
	/// path that clears the gate in normal operation.
	pub fn on_snapshot(&self, records: Vec<Waypoint>) {
		let count = records.len();
		self.shared.lock().replace_waypoints(records);
		let was_busy = self.gate.clear();
		tracing::debug!(records = count, was_busy, "waypoints.snapshot");
	}

	/// Feeds every snapshot from `snapshots` into [`Self::on_snapshot`] until the sender closes.
	pub fn forward_snapshots(&self, mut snapshots: mpsc::UnboundedReceiver<Vec<Waypoint>>) -> JoinHandle<()> {
		let system = self.clone();
		crate::spawn(TaskClass::Forwarder, async move {
			while let Some(records) = snapshots.recv().await {
				system.on_snapshot(records);
			}
			tracing::debug!("waypoints.forwarder_closed");
		})
	}

	/// Stops the generation worker. Queued commands are left in place.
	pub async fn shutdown(&self) {
		self.pause.shutdown().await;
	}
}
