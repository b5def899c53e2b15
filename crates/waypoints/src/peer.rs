//! In-process stand-in for the remote authoritative peer.
//!
//! Applies every outbound line to its own record list and, after a fixed
//! latency, pushes the full list back as a snapshot. Snapshots can be
//! deliberately dropped to reproduce a stuck acknowledgement gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::command::{MutationCommand, RecordRef};
use crate::error::TransportError;
use crate::record::{PeerId, Waypoint, WaypointId};
use crate::spawn::TaskClass;
use crate::transport::Transport;

/// Settings for a [`LoopbackPeer`].
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
	/// Owner stamped on records the peer creates.
	pub owner: PeerId,
	/// Delay between applying a line and pushing the resulting snapshot.
	pub latency: Duration,
}

impl Default for LoopbackConfig {
	fn default() -> Self {
		Self {
			owner: PeerId::new("loopback"),
			latency: Duration::from_millis(5),
		}
	}
}

struct PeerInner {
	config: LoopbackConfig,
	records: Mutex<Vec<Waypoint>>,
	received: Mutex<Vec<String>>,
	drop_next: AtomicUsize,
	outbox: mpsc::UnboundedSender<Vec<Waypoint>>,
	snapshots: mpsc::UnboundedSender<Vec<Waypoint>>,
}

/// Authoritative peer living in the same process. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackPeer {
	inner: Arc<PeerInner>,
}

impl std::fmt::Debug for LoopbackPeer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LoopbackPeer")
			.field("owner", &self.inner.config.owner)
			.field("records", &self.inner.records.lock().len())
			.finish_non_exhaustive()
	}
}

impl LoopbackPeer {
	/// Starts a peer holding `initial` and returns it with its snapshot stream.
	///
	/// The initial list is pushed immediately as the first snapshot.
	pub fn spawn(config: LoopbackConfig, initial: Vec<Waypoint>) -> (Self, mpsc::UnboundedReceiver<Vec<Waypoint>>) {
		let (snapshots, snapshot_rx) = mpsc::unbounded_channel();
		let (outbox, outbox_rx) = mpsc::unbounded_channel();
		let _ = snapshots.send(initial.clone());

		let inner = Arc::new(PeerInner {
			config,
			records: Mutex::new(initial),
			received: Mutex::new(Vec::new()),
			drop_next: AtomicUsize::new(0),
			outbox,
			snapshots,
		});
		crate::spawn(TaskClass::Peer, pump(Arc::clone(&inner), outbox_rx));
		(Self { inner }, snapshot_rx)
	}

	pub fn owner(&self) -> &PeerId {
		&self.inner.config.owner
	}

	/// Current authoritative list.
	pub fn records(&self) -> Vec<Waypoint> {
		self.inner.records.lock().clone()
	}

	/// Every line received so far, in arrival order.
	pub fn received(&self) -> Vec<String> {
		self.inner.received.lock().clone()
	}

	/// Swallows the next `n` snapshots instead of pushing them.
	pub fn drop_next_snapshots(&self, n: usize) {
		self.inner.drop_next.fetch_add(n, Ordering::AcqRel);
	}

	/// Schedules an unsolicited snapshot of the current list.
	pub fn push_snapshot(&self) {
		let snapshot = self.records();
		let _ = self.inner.outbox.send(snapshot);
	}

	fn apply(&self, command: MutationCommand) {
		let mut records = self.inner.records.lock();
		match command {
			MutationCommand::Add { mut id, position, draft } => {
				if records.iter().any(|rec| rec.id == id) {
					let fresh = WaypointId::generate();
					tracing::warn!(%id, %fresh, "peer.id_collision");
					id = fresh;
				}
				tracing::trace!(%id, %position, "peer.add");
				records.push(Waypoint::from_draft(id, position, draft, self.inner.config.owner.clone()));
			}
			MutationCommand::Modify { target, draft } => match index_in(&target, records.len()) {
				Some(idx) => records[idx].apply_draft(draft),
				None => tracing::warn!(%target, len = records.len(), "peer.modify_out_of_range"),
			},
			MutationCommand::Remove { target } => match index_in(&target, records.len()) {
				Some(idx) => {
					records.remove(idx);
				}
				None => tracing::warn!(%target, len = records.len(), "peer.remove_out_of_range"),
			},
		}
	}
}

fn index_in(target: &RecordRef, len: usize) -> Option<usize> {
	match target {
		RecordRef::Index(idx) if *idx < len => Some(*idx),
		_ => None,
	}
}

impl LoopbackPeer {
	fn accept(&self, line: &str, created: Option<&WaypointId>) -> Result<(), TransportError> {
		self.inner.received.lock().push(line.to_string());
		let command = MutationCommand::decode(line, created.cloned()).map_err(|err| {
			tracing::warn!(line, error = %err, "peer.rejected");
			TransportError::Rejected(format!("{err}"))
		})?;
		self.apply(command);
		self.push_snapshot();
		Ok(())
	}
}

impl Transport for LoopbackPeer {
	fn send(&self, line: &str) -> Result<(), TransportError> {
		self.accept(line, None)
	}

	/// Adopts the sender's identifier unless a record already holds it.
	fn send_create(&self, line: &str, id: &WaypointId) -> Result<(), TransportError> {
		self.accept(line, Some(id))
	}
}

async fn pump(inner: Arc<PeerInner>, mut outbox: mpsc::UnboundedReceiver<Vec<Waypoint>>) {
	while let Some(snapshot) = outbox.recv().await {
		tokio::time::sleep(inner.config.latency).await;
		let dropped = inner
			.drop_next
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
			.is_ok();
		if dropped {
			tracing::debug!(records = snapshot.len(), "peer.snapshot_dropped");
			continue;
		}
		if inner.snapshots.send(snapshot).is_err() {
			break;
		}
	}
	tracing::debug!("peer.stopped");
}
