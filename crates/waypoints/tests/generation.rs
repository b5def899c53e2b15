//! Generation worker behaviour seen from outside the crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use waymark_waypoints::{
	ChannelTransport, CoreConfig, GenerationPauseController, Layer, PeerId, SavedWaypoints, SettlePolicy, SharedLock, Waypoint,
	WaypointDraft, WaypointId, WaypointSystem, WorldPos,
};

/// Blocks inside its first tick until released.
struct Stalling {
	ticks: AtomicUsize,
	entered: mpsc::UnboundedSender<()>,
	release: Mutex<std::sync::mpsc::Receiver<()>>,
}

impl Layer for Stalling {
	fn name(&self) -> &str {
		"stalling"
	}

	fn on_tick(&self, _slice: Duration, _waypoints: &SavedWaypoints) {
		if self.ticks.fetch_add(1, Ordering::SeqCst) == 0 {
			let _ = self.entered.send(());
			let _ = self.release.lock().recv();
		}
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[allow(clippy::disallowed_methods)]
async fn removed_layer_gets_exactly_one_more_tick() {
	let ctl = GenerationPauseController::new(SharedLock::new(), Duration::from_millis(5), SettlePolicy::Acknowledged);
	let (entered_tx, mut entered) = mpsc::unbounded_channel();
	let (release_tx, release_rx) = std::sync::mpsc::channel();
	let layer = Arc::new(Stalling {
		ticks: AtomicUsize::new(0),
		entered: entered_tx,
		release: Mutex::new(release_rx),
	});
	let id = ctl.register_layer(layer.clone()).await;
	assert!(ctl.start());

	entered.recv().await.expect("first tick started");
	let unregister = {
		let ctl = ctl.clone();
		tokio::spawn(async move { ctl.unregister_layer(id).await })
	};
	tokio::time::sleep(Duration::from_millis(30)).await;
	assert!(!unregister.is_finished(), "removal waits for the in-flight tick");

	release_tx.send(()).expect("layer still waiting");
	assert!(unregister.await.expect("unregister task"));
	assert_eq!(layer.ticks.load(Ordering::SeqCst), 1);

	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(layer.ticks.load(Ordering::SeqCst), 1);
	assert!(ctl.ticks() > 1, "worker keeps ticking without the layer");
	ctl.shutdown().await;
}

/// Records the mirror size it sees on every tick.
#[derive(Default)]
struct MirrorSize {
	seen: Mutex<Vec<usize>>,
}

impl Layer for MirrorSize {
	fn name(&self) -> &str {
		"mirror-size"
	}

	fn on_tick(&self, _slice: Duration, waypoints: &SavedWaypoints) {
		self.seen.lock().push(waypoints.len());
	}
}

fn record(id: &str) -> Waypoint {
	Waypoint::from_draft(
		WaypointId::new(id),
		WorldPos::new(0.0, 0.0, 0.0),
		WaypointDraft::new(id, "dot", 0, false),
		PeerId::new("server"),
	)
}

#[tokio::test(start_paused = true)]
async fn layers_observe_whole_snapshots() {
	let (transport, _lines) = ChannelTransport::new();
	let system = WaypointSystem::new(CoreConfig::default(), Arc::new(transport));
	let layer = Arc::new(MirrorSize::default());
	system.pause().register_layer(layer.clone()).await;
	system.start();

	tokio::time::sleep(Duration::from_millis(50)).await;
	system.on_snapshot(vec![record("a"), record("b"), record("c")]);
	tokio::time::sleep(Duration::from_millis(50)).await;
	system.shutdown().await;

	let seen = layer.seen.lock();
	assert!(seen.iter().all(|n| *n == 0 || *n == 3), "partial snapshot observed: {seen:?}");
	assert_eq!(seen.first(), Some(&0));
	assert_eq!(seen.last(), Some(&3));
}

#[tokio::test(start_paused = true)]
async fn system_pause_holds_the_worker_during_multi_step_changes() {
	let (transport, _lines) = ChannelTransport::new();
	let system = WaypointSystem::new(CoreConfig::default(), Arc::new(transport));
	let layer = Arc::new(MirrorSize::default());
	system.pause().register_layer(layer.clone()).await;
	system.start();
	tokio::time::sleep(Duration::from_millis(30)).await;

	let guard = system.pause().pause().await;
	let before = layer.seen.lock().len();
	system.on_snapshot(vec![record("a")]);
	tokio::time::sleep(Duration::from_millis(100)).await;
	system.on_snapshot(vec![record("a"), record("b")]);
	assert_eq!(layer.seen.lock().len(), before, "no tick between the two steps");
	drop(guard);

	tokio::time::sleep(Duration::from_millis(30)).await;
	assert_eq!(layer.seen.lock().last(), Some(&2));
	assert!(!layer.seen.lock().contains(&1));
	system.shutdown().await;
}
