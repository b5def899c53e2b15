use std::sync::atomic::AtomicUsize;

use super::*;
use crate::record::SavedWaypoints;

struct Recording {
	name: &'static str,
	log: Arc<Mutex<Vec<&'static str>>>,
}

impl Layer for Recording {
	fn name(&self) -> &str {
		self.name
	}

	fn on_tick(&self, _slice: Duration, _waypoints: &SavedWaypoints) {
		self.log.lock().push(self.name);
	}
}

#[derive(Default)]
struct Counting {
	ticks: AtomicUsize,
}

impl Layer for Counting {
	fn name(&self) -> &str {
		"counting"
	}

	fn on_tick(&self, _slice: Duration, _waypoints: &SavedWaypoints) {
		self.ticks.fetch_add(1, Ordering::SeqCst);
	}
}

struct Exploding;

impl Layer for Exploding {
	fn name(&self) -> &str {
		"exploding"
	}

	fn on_tick(&self, _slice: Duration, _waypoints: &SavedWaypoints) {
		panic!("layer blew up");
	}
}

fn controller(settle: SettlePolicy) -> GenerationPauseController {
	GenerationPauseController::new(SharedLock::new(), DEFAULT_TICK_INTERVAL, settle)
}

#[test]
fn nested_suspends_need_matching_resumes() {
	let ctl = controller(SettlePolicy::Acknowledged);
	let first = ctl.suspend();
	let second = ctl.suspend();
	assert!(second > first);
	assert!(ctl.is_suspended());

	ctl.resume();
	assert!(ctl.is_suspended(), "one suspend still outstanding");
	ctl.resume();
	assert!(!ctl.is_suspended());

	ctl.resume();
	assert!(!ctl.is_suspended(), "extra resume is a no-op");
}

#[tokio::test(start_paused = true)]
async fn pause_on_stopped_worker_returns_immediately() {
	let ctl = controller(SettlePolicy::Acknowledged);
	let started = tokio::time::Instant::now();
	let guard = ctl.pause().await;
	assert_eq!(started.elapsed(), Duration::ZERO);
	assert!(ctl.is_suspended());
	drop(guard);
	assert!(!ctl.is_suspended());
}

#[tokio::test(start_paused = true)]
async fn layers_tick_in_registration_order() {
	let ctl = controller(SettlePolicy::Acknowledged);
	let log = Arc::new(Mutex::new(Vec::new()));
	ctl.register_layer(Arc::new(Recording { name: "terrain", log: Arc::clone(&log) })).await;
	ctl.register_layer(Arc::new(Recording { name: "beacons", log: Arc::clone(&log) })).await;

	assert!(ctl.start());
	tokio::time::sleep(Duration::from_millis(70)).await;
	ctl.shutdown().await;

	let log = log.lock();
	assert!(log.len() >= 4, "expected several ticks, got {log:?}");
	for pair in log.chunks(2) {
		assert_eq!(pair, ["terrain", "beacons"]);
	}
}

#[tokio::test(start_paused = true)]
async fn paused_worker_does_not_tick() {
	let ctl = controller(SettlePolicy::Acknowledged);
	let layer = Arc::new(Counting::default());
	ctl.register_layer(layer.clone()).await;
	ctl.start();
	tokio::time::sleep(Duration::from_millis(50)).await;

	let guard = ctl.pause().await;
	assert!(matches!(ctl.phase(), WorkerPhase::Parked { .. }));
	let frozen = layer.ticks.load(Ordering::SeqCst);
	tokio::time::sleep(Duration::from_millis(500)).await;
	assert_eq!(layer.ticks.load(Ordering::SeqCst), frozen);

	drop(guard);
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(layer.ticks.load(Ordering::SeqCst) > frozen);
	assert_eq!(ctl.phase(), WorkerPhase::Running);
	ctl.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pause_round_trip_keeps_layer_set() {
	let ctl = controller(SettlePolicy::Acknowledged);
	let log = Arc::new(Mutex::new(Vec::new()));
	let terrain = ctl.register_layer(Arc::new(Recording { name: "terrain", log: Arc::clone(&log) })).await;
	ctl.register_layer(Arc::new(Recording { name: "beacons", log: Arc::clone(&log) })).await;
	ctl.start();
	tokio::time::sleep(Duration::from_millis(30)).await;

	let guard = ctl.pause().await;
	log.lock().clear();
	drop(guard);
	// Resuming unparks straight into a tick; the next one is a full interval away.
	tokio::time::sleep(Duration::from_millis(5)).await;
	assert_eq!(*log.lock(), vec!["terrain", "beacons"]);

	assert!(ctl.unregister_layer(terrain).await);
	assert!(!ctl.unregister_layer(terrain).await);
	log.lock().clear();
	tokio::time::sleep(Duration::from_millis(5)).await;
	assert_eq!(*log.lock(), vec!["beacons"]);
	ctl.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_settle_sleeps_the_delay() {
	let ctl = controller(SettlePolicy::FixedDelay(Duration::from_millis(50)));
	ctl.start();
	let started = tokio::time::Instant::now();
	let guard = ctl.pause().await;
	assert!(started.elapsed() >= Duration::from_millis(50));
	drop(guard);
	ctl.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_pause_still_resumes() {
	let ctl = controller(SettlePolicy::FixedDelay(Duration::from_secs(5)));
	let res = tokio::time::timeout(Duration::from_millis(10), ctl.pause()).await;
	assert!(res.is_err());
	assert!(!ctl.is_suspended());
}

#[tokio::test(start_paused = true)]
async fn panicking_layer_does_not_stop_generation() {
	let ctl = controller(SettlePolicy::Acknowledged);
	let counting = Arc::new(Counting::default());
	ctl.register_layer(Arc::new(Exploding)).await;
	ctl.register_layer(counting.clone()).await;
	ctl.start();
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert!(counting.ticks.load(Ordering::SeqCst) >= 3);
	assert!(ctl.ticks() >= 3);
	assert_eq!(ctl.phase(), WorkerPhase::Running);
	ctl.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_idempotent_and_final() {
	let ctl = controller(SettlePolicy::Acknowledged);
	assert!(ctl.start());
	assert!(!ctl.start());

	let other = ctl.clone();
	tokio::join!(ctl.shutdown(), other.shutdown());
	assert_eq!(ctl.phase(), WorkerPhase::Stopped);

	ctl.shutdown().await;
	assert!(!ctl.start());
}

#[tokio::test(start_paused = true)]
async fn pause_after_shutdown_returns_immediately() {
	let ctl = controller(SettlePolicy::Acknowledged);
	ctl.start();
	tokio::time::sleep(Duration::from_millis(30)).await;
	ctl.shutdown().await;
	let ticks = ctl.ticks();
	let _guard = ctl.pause().await;
	assert_eq!(ctl.phase(), WorkerPhase::Stopped);
	assert_eq!(ctl.ticks(), ticks);
}
