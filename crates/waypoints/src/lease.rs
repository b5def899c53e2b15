use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::record::WorldPos;

/// Default lifetime of a position lease.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
	generation: u64,
	deadline: Instant,
}

#[derive(Debug)]
struct LeaseInner {
	timeout: Duration,
	next_generation: AtomicU64,
	leases: Mutex<HashMap<WorldPos, LeaseEntry>>,
}

/// Self-expiring set of positions with a creation request in flight.
///
/// Check-and-insert happens under one lock, so two concurrent acquirers of
/// the same position can never both win. Every lease expires on its own
/// after the configured timeout whether or not it is released; an expired
/// lease is treated as absent by every operation.
#[derive(Debug, Clone)]
pub struct PositionLeaseRegistry {
	inner: Arc<LeaseInner>,
}

impl Default for PositionLeaseRegistry {
	fn default() -> Self {
		Self::new(DEFAULT_LEASE_TIMEOUT)
	}
}

impl PositionLeaseRegistry {
	/// Creates an empty registry whose leases live for `timeout`.
	pub fn new(timeout: Duration) -> Self {
		Self {
			inner: Arc::new(LeaseInner {
				timeout,
				next_generation: AtomicU64::new(0),
				leases: Mutex::new(HashMap::new()),
			}),
		}
	}

	pub fn timeout(&self) -> Duration {
		self.inner.timeout
	}

	/// Takes the lease for `pos`, or returns `false` if one is already live.
	///
	/// A `false` return is the signal to drop the duplicate request silently.
	pub fn try_acquire(&self, pos: WorldPos) -> bool {
		self.acquire(pos).is_some()
	}

	/// Like [`Self::try_acquire`], returning a guard that releases on drop.
	pub fn try_lease(&self, pos: WorldPos) -> Option<PositionLease> {
		let generation = self.acquire(pos)?;
		Some(PositionLease {
			registry: self.clone(),
			pos,
			generation,
		})
	}

	fn acquire(&self, pos: WorldPos) -> Option<u64> {
		let now = Instant::now();
		let mut leases = self.inner.leases.lock();
		leases.retain(|_, entry| entry.deadline > now);
		if leases.contains_key(&pos) {
			tracing::trace!(%pos, "lease.suppressed");
			return None;
		}
		let generation = self.inner.next_generation.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		leases.insert(
			pos,
			LeaseEntry {
				generation,
				deadline: now + self.inner.timeout,
			},
		);
		tracing::trace!(%pos, generation, "lease.acquired");
		Some(generation)
	}

	/// Releases the lease for `pos` immediately. Returns whether a live lease was removed.
	pub fn release(&self, pos: WorldPos) -> bool {
		let now = Instant::now();
		self.inner.leases.lock().remove(&pos).is_some_and(|entry| entry.deadline > now)
	}

	fn release_generation(&self, pos: WorldPos, generation: u64) {
		let mut leases = self.inner.leases.lock();
		if leases.get(&pos).is_some_and(|entry| entry.generation == generation) {
			leases.remove(&pos);
		}
	}

	/// Returns whether `pos` currently holds a live lease.
	pub fn is_leased(&self, pos: WorldPos) -> bool {
		let now = Instant::now();
		self.inner.leases.lock().get(&pos).is_some_and(|entry| entry.deadline > now)
	}

	/// Number of live leases.
	pub fn active(&self) -> usize {
		let now = Instant::now();
		self.inner.leases.lock().values().filter(|entry| entry.deadline > now).count()
	}

	/// Drops expired entries. Returns how many were removed.
	pub fn purge_expired(&self) -> usize {
		let now = Instant::now();
		let mut leases = self.inner.leases.lock();
		let before = leases.len();
		leases.retain(|_, entry| entry.deadline > now);
		before - leases.len()
	}
}

/// Scoped lease over one position. Releases on drop unless it already
/// expired and the position was leased again by someone else.
#[derive(Debug)]
pub struct PositionLease {
	registry: PositionLeaseRegistry,
	pos: WorldPos,
	generation: u64,
}

impl PositionLease {
	pub fn position(&self) -> WorldPos {
		self.pos
	}
}

impl Drop for PositionLease {
	fn drop(&mut self) {
		self.registry.release_generation(self.pos, self.generation);
	}
}
