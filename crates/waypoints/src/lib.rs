//! Mutation coordination for a peer-owned waypoint collection.
//!
//! # Purpose
//!
//! - Queue structural changes (add, modify, remove) to a waypoint collection that lives on a remote peer and can only be changed by fire-and-forget text lines.
//! - Keep a background worker that ticks derived layers off the local record mirror from observing half-applied foreground changes.
//! - Suppress duplicate creation requests for the same position.
//! - Exclude the transport itself, presentation, and any business rules about which waypoints to create.
//!
//! # Mental model
//!
//! - The peer owns the list. Locally there is only a mirror ([`SavedWaypoints`]) that is replaced wholesale whenever the peer pushes a full snapshot.
//! - A snapshot is the only acknowledgement. It carries no correlation id, so the queue treats "any snapshot arrived" as "the last command landed" and sends one command per snapshot.
//! - The generation worker and all foreground mutators share one lock ([`SharedLock`]). The pause gate is a separate, advisory signal used to keep the worker out of the way during multi-step changes.
//! - Everything is wired once into a [`WaypointSystem`] and shared by cloning handles; there are no statics besides the fallback runtime behind [`spawn()`].
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`PositionLeaseRegistry`] | Positions with a creation in flight | MUST check and insert under one lock; every lease MUST expire after the timeout | `PositionLeaseRegistry::try_acquire`, `PositionLeaseRegistry::try_lease` |
//! | [`MutationCommand`] | One add/modify/remove request | Immutable; encodes to exactly one line; adds carry a client-assigned id | `MutationCommand::add`, `MutationCommand::modify`, `MutationCommand::remove` |
//! | [`CommandQueue`] | FIFO plus single drain loop | MUST send in enqueue order with at most one command in flight | `CommandQueue::enqueue`, `CommandQueue::enqueue_all` |
//! | [`AckGate`] | Busy flag between dispatch and snapshot | MUST be set before a send and cleared only by a snapshot, a failed send, or the stuck-gate policy | `AckGate::try_acquire`, `WaypointSystem::on_snapshot` |
//! | [`GenerationPauseController`] | Tick worker plus nested pause gate | Worker MUST only tick with the gate open; every suspend MUST be matched by a resume | `GenerationPauseController::pause`, `GenerationPauseController::start` |
//! | [`SharedState`] | Layer list and record mirror | MUST only be touched under [`SharedLock`], never across an `.await` | `SharedState::add_layer`, `SharedState::replace_waypoints` |
//!
//! # Invariants
//!
//! 1. Two concurrent acquires of the same position MUST NOT both succeed.
//!    - Enforced in: `PositionLeaseRegistry::acquire`
//!    - Tested by: `lease::tests::concurrent_acquires_have_one_winner`
//!    - Failure symptom: the same waypoint is created twice from overlapping triggers.
//!
//! 2. An unreleased lease MUST become acquirable again after the timeout.
//!    - Enforced in: `PositionLeaseRegistry::acquire` (lazy expiry against the deadline)
//!    - Tested by: `lease::tests::unreleased_lease_expires_after_timeout`
//!    - Failure symptom: a position stays blocked for creation forever after a caller failed midway.
//!
//! 3. Commands MUST reach the transport in enqueue order, one in flight at a time.
//!    - Enforced in: `QueueInner::drain`
//!    - Tested by: `queue::tests::dispatch_order_matches_enqueue_order`, `queue::tests::one_command_in_flight_until_gate_clears`
//!    - Failure symptom: the peer applies index-addressed commands against an ordering the sender never saw.
//!
//! 4. Mass removal MUST emit indices in descending order.
//!    - Enforced in: `plan_mass_removal`
//!    - Tested by: `queue::tests::prop_mass_removal_removes_exactly_matches`, `loopback::mass_removal_over_loopback_keeps_unmatched_records`
//!    - Failure symptom: records that did not match the predicate are removed.
//!
//! 5. A pause bracket MUST resume on every exit path.
//!    - Enforced in: `PauseGuard::drop`
//!    - Tested by: `pause::tests::cancelled_pause_still_resumes`
//!    - Failure symptom: layers stop updating for the rest of the process lifetime.
//!
//! 6. A tick MUST iterate a copy of the layer list taken under the lock.
//!    - Enforced in: `PauseInner::tick_once`
//!    - Tested by: `generation::removed_layer_gets_exactly_one_more_tick`
//!    - Failure symptom: a layer removed mid-tick is skipped or visited twice.
//!
//! # Concurrency and ordering
//!
//! - Producers never block: `enqueue` pushes under a short lock and spawns a drain loop only if none is active.
//! - The drain loop waits on the gate's watch channel and re-checks every `dispatch_poll_ms` so a [`StuckGatePolicy`] can force it open.
//! - Id-addressed targets are resolved against the mirror right before the line is sent, after the previous snapshot has landed.
//! - The worker checks the pause gate at the top of each tick and also while sleeping between ticks, then reports [`WorkerPhase::Parked`] with the suspend epoch it saw.
//!
//! # Failure modes
//!
//! - Lost snapshot: the gate stays busy. With [`WaitForever`] the queue stalls and the watchdog logs `gate.watchdog`; [`ResetAfter`] or [`AckGate::force_clear`] reopen it.
//! - Transport send error: the command is dropped, logged as `queue.send_failed`, and the gate is released.
//! - Unencodable command (an icon that is empty or not one token): dropped before sending, logged as `queue.unencodable`, gate released.
//! - Stale index: an index-addressed command computed against an older snapshot acts on whatever record sits at that index now. This is not detected.
//! - Panicking layer: the panic is caught and logged as `generation.layer_panicked`; the worker keeps ticking.

mod command;
mod config;
mod error;
mod gate;
mod lease;
mod pause;
mod peer;
mod queue;
mod record;
mod shared;
mod spawn;
mod system;
mod transport;

pub use command::{MutationCommand, RecordRef};
pub use config::CoreConfig;
pub use error::{CommandEncodeError, CommandParseError, ConfigError, Result, TransportError};
pub use gate::{AckGate, GateWait, GateWaitSpec, ResetAfter, StuckGatePolicy, WaitForever};
pub use lease::{DEFAULT_LEASE_TIMEOUT, PositionLease, PositionLeaseRegistry};
pub use pause::{DEFAULT_TICK_INTERVAL, GenerationPauseController, PauseGuard, SettlePolicy, WorkerPhase};
pub use peer::{LoopbackConfig, LoopbackPeer};
pub use queue::{CommandQueue, plan_mass_addition, plan_mass_removal};
pub use record::{PeerId, SavedWaypoints, Waypoint, WaypointDraft, WaypointId, WorldPos};
pub use shared::{Layer, LayerId, SharedLock, SharedState};
pub use spawn::{TaskClass, spawn};
pub use system::{CreateOutcome, WaypointSystem};
pub use transport::{ChannelTransport, Transport};
