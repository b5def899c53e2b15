use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::record::{SavedWaypoints, Waypoint};

/// A derived view recomputed on every generation tick.
///
/// `on_tick` runs on the generation worker while the shared lock is held, so
/// it must not block on I/O and must not try to take [`SharedLock`] itself.
pub trait Layer: Send + Sync + 'static {
	/// Short name used in logs.
	fn name(&self) -> &str;

	/// Advances this layer by one fixed time slice.
	fn on_tick(&self, slice: Duration, waypoints: &SavedWaypoints);
}

/// Handle for one registered layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl fmt::Display for LayerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "layer#{}", self.0)
	}
}

struct LayerSlot {
	id: LayerId,
	layer: Arc<dyn Layer>,
}

/// Everything the generation worker reads: the layer list and the local
/// record mirror.
#[derive(Default)]
pub struct SharedState {
	layers: Vec<LayerSlot>,
	next_layer: u64,
	waypoints: SavedWaypoints,
}

impl fmt::Debug for SharedState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SharedState")
			.field("layers", &self.layer_ids())
			.field("waypoints", &self.waypoints.len())
			.finish()
	}
}

impl SharedState {
	pub fn waypoints(&self) -> &SavedWaypoints {
		&self.waypoints
	}

	/// Swaps in a full snapshot from the peer.
	pub fn replace_waypoints(&mut self, records: Vec<Waypoint>) {
		self.waypoints.replace(records);
	}

	/// Appends a layer. Ticks visit layers in insertion order.
	pub fn add_layer(&mut self, layer: Arc<dyn Layer>) -> LayerId {
		self.next_layer = self.next_layer.wrapping_add(1);
		let id = LayerId(self.next_layer);
		self.layers.push(LayerSlot { id, layer });
		id
	}

	pub fn remove_layer(&mut self, id: LayerId) -> Option<Arc<dyn Layer>> {
		let pos = self.layers.iter().position(|slot| slot.id == id)?;
		Some(self.layers.remove(pos).layer)
	}

	pub fn layer(&self, id: LayerId) -> Option<&Arc<dyn Layer>> {
		self.layers.iter().find(|slot| slot.id == id).map(|slot| &slot.layer)
	}

	pub fn layer_ids(&self) -> Vec<LayerId> {
		self.layers.iter().map(|slot| slot.id).collect()
	}

	pub fn layer_count(&self) -> usize {
		self.layers.len()
	}

	/// Copies the layer list so a tick iterates a stable set.
	pub(crate) fn layer_snapshot(&self) -> Vec<Arc<dyn Layer>> {
		self.layers.iter().map(|slot| Arc::clone(&slot.layer)).collect()
	}
}

/// The single process-wide lock over [`SharedState`].
///
/// Never hold the guard across an `.await`.
#[derive(Clone, Default)]
pub struct SharedLock {
	inner: Arc<Mutex<SharedState>>,
}

impl fmt::Debug for SharedLock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SharedLock").finish_non_exhaustive()
	}
}

impl SharedLock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn lock(&self) -> MutexGuard<'_, SharedState> {
		self.inner.lock()
	}

	/// Clones the current record mirror.
	pub fn waypoints(&self) -> SavedWaypoints {
		self.inner.lock().waypoints.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Named(&'static str);

	impl Layer for Named {
		fn name(&self) -> &str {
			self.0
		}

		fn on_tick(&self, _slice: Duration, _waypoints: &SavedWaypoints) {}
	}

	#[test]
	fn layers_keep_insertion_order() {
		let shared = SharedLock::new();
		let mut state = shared.lock();
		let a = state.add_layer(Arc::new(Named("a")));
		let b = state.add_layer(Arc::new(Named("b")));
		let c = state.add_layer(Arc::new(Named("c")));
		assert_eq!(state.layer_ids(), vec![a, b, c]);

		assert_eq!(state.remove_layer(b).map(|l| l.name().to_string()), Some("b".to_string()));
		assert!(state.remove_layer(b).is_none());
		assert_eq!(state.layer_ids(), vec![a, c]);
	}

	#[test]
	fn layer_ids_are_never_reused() {
		let mut state = SharedState::default();
		let a = state.add_layer(Arc::new(Named("a")));
		state.remove_layer(a);
		let b = state.add_layer(Arc::new(Named("b")));
		assert_ne!(a, b);
	}

	#[test]
	fn snapshot_is_detached_from_list() {
		let mut state = SharedState::default();
		let a = state.add_layer(Arc::new(Named("a")));
		let copy = state.layer_snapshot();
		state.remove_layer(a);
		assert_eq!(copy.len(), 1);
		assert_eq!(state.layer_count(), 0);
	}
}
