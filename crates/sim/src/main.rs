//! Waymark loopback simulator.
//!
//! Runs the coordination core against an in-process peer:
//! - creates a batch of waypoints, including one duplicate
//! - removes every other one with a mass removal
//! - reports what the peer and the generation worker saw

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use waymark_waypoints::{CreateOutcome, Layer, LoopbackPeer, SavedWaypoints, WaypointDraft, WaypointSystem, WorldPos};

use crate::config::SimConfig;

/// Simulator command line arguments.
#[derive(Parser, Debug)]
#[command(name = "waymark-sim")]
#[command(about = "Drive the waypoint coordination core against a loopback peer")]
struct Args {
	/// TOML configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Number of waypoints to create
	#[arg(short = 'n', long, default_value_t = 40)]
	count: usize,

	/// Snapshots the peer swallows after the batch is queued
	#[arg(long, default_value_t = 0)]
	drop_snapshots: usize,

	/// Give up if the queue is not idle after this many seconds
	#[arg(long, default_value_t = 30)]
	idle_timeout: u64,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

/// Counts ticks and remembers the last mirror size it saw.
#[derive(Default)]
struct Census {
	ticks: AtomicU64,
	last_seen: AtomicUsize,
}

impl Layer for Census {
	fn name(&self) -> &str {
		"census"
	}

	fn on_tick(&self, _slice: Duration, waypoints: &SavedWaypoints) {
		self.ticks.fetch_add(1, Ordering::Relaxed);
		self.last_seen.store(waypoints.len(), Ordering::Relaxed);
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();

	tracing::subscriber::set_global_default(subscriber)?;

	let config = match &args.config {
		Some(path) => SimConfig::load(path)?,
		None => SimConfig::default(),
	};
	info!(?config, "Starting waymark-sim");

	let (peer, mut snapshots) = LoopbackPeer::spawn(config.peer.loopback(), Vec::new());
	let system = WaypointSystem::new(config.core.clone(), Arc::new(peer.clone()));
	let initial = snapshots.recv().await.context("peer closed before its first snapshot")?;
	system.on_snapshot(initial);
	let forwarder = system.forward_snapshots(snapshots);

	let census = Arc::new(Census::default());
	system.pause().register_layer(census.clone()).await;
	system.start();

	let idle_timeout = Duration::from_secs(args.idle_timeout);
	let mut suppressed = 0usize;
	for i in 0..args.count {
		let pos = WorldPos::new(i as f64 * 16.0, 64.0, 0.0);
		let draft = WaypointDraft::new(format!("wp-{i}"), "flag", 0x00ff_8800, i % 5 == 0);
		if system.create_waypoint(pos, draft) == CreateOutcome::Suppressed {
			suppressed += 1;
		}
	}
	if args.count > 0 {
		let again = system.create_waypoint(WorldPos::new(0.0, 64.0, 0.0), WaypointDraft::new("wp-0", "flag", 0, true));
		if again == CreateOutcome::Suppressed {
			suppressed += 1;
		}
	}
	peer.drop_next_snapshots(args.drop_snapshots);

	tokio::time::timeout(idle_timeout, system.queue().wait_idle())
		.await
		.context("queue did not drain after creation; is a snapshot lost?")?;
	info!(records = system.saved().len(), suppressed, "Creation batch applied");

	let removed = system.remove_where(|rec| {
		rec.title
			.strip_prefix("wp-")
			.and_then(|n| n.parse::<usize>().ok())
			.is_some_and(|n| n % 2 == 1)
	});
	tokio::time::timeout(idle_timeout, system.queue().wait_idle())
		.await
		.context("queue did not drain after mass removal")?;
	info!(removed, records = system.saved().len(), "Mass removal applied");

	// Let the worker tick over the final mirror at least once.
	tokio::time::sleep(system.config().tick_interval() * 2).await;
	system.shutdown().await;
	forwarder.abort();

	println!("lines sent:        {}", system.queue().dispatched());
	println!("duplicates dropped: {suppressed}");
	println!("records on peer:   {}", peer.records().len());
	println!("records mirrored:  {}", system.saved().len());
	println!("generation ticks:  {}", system.pause().ticks());
	println!(
		"census layer:      {} ticks, last saw {} records",
		census.ticks.load(Ordering::Relaxed),
		census.last_seen.load(Ordering::Relaxed)
	);

	Ok(())
}
