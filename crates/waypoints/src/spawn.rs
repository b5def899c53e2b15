use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

/// Execution classes for the tasks this crate spawns, used in trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Command queue drain loop.
	Dispatch,
	/// Perpetual layer generation worker.
	Generation,
	/// Snapshot forwarding from a transport into the snapshot hook.
	Forwarder,
	/// In-process loopback peer.
	Peer,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Dispatch => "dispatch",
			Self::Generation => "generation",
			Self::Forwarder => "forwarder",
			Self::Peer => "peer",
		}
	}
}

/// Runtime for tasks spawned from host threads that never entered tokio.
///
/// Foreground mutators such as [`crate::CommandQueue::enqueue`] are plain
/// synchronous calls and are often made from a host's own threads. Their drain
/// loop still has to run somewhere, so the first such call builds a small
/// runtime that lives for the rest of the process.
fn fallback_runtime() -> &'static tokio::runtime::Runtime {
	static FALLBACK: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	FALLBACK.get_or_init(|| {
		tracing::debug!("waymark.fallback_runtime");
		tokio::runtime::Builder::new_multi_thread()
			.enable_time()
			.worker_threads(1)
			.thread_name("waymark-dispatch")
			.build()
			.expect("failed to build waymark fallback runtime")
	})
}

/// Spawns a task on the caller's runtime, or on the fallback runtime when
/// the caller is outside tokio.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	match tokio::runtime::Handle::try_current() {
		Ok(handle) => {
			tracing::trace!(task_class = class.as_str(), "waymark.spawn");
			handle.spawn(fut)
		}
		Err(_) => {
			tracing::trace!(task_class = class.as_str(), fallback = true, "waymark.spawn");
			fallback_runtime().spawn(fut)
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use super::*;
	use crate::command::MutationCommand;
	use crate::gate::{AckGate, GateWaitSpec, WaitForever};
	use crate::queue::CommandQueue;
	use crate::shared::SharedLock;
	use crate::transport::ChannelTransport;

	#[test]
	fn host_threads_without_a_runtime_still_drain() {
		let (transport, mut rx) = ChannelTransport::new();
		let wait = GateWaitSpec {
			poll: Duration::from_millis(5),
			watchdog_polls: 0,
			policy: Arc::new(WaitForever),
		};
		let queue = CommandQueue::new(AckGate::new(), SharedLock::new(), Arc::new(transport), wait);

		std::thread::spawn(move || queue.enqueue(MutationCommand::remove(2)))
			.join()
			.expect("host thread");
		assert_eq!(rx.blocking_recv().as_deref(), Some("remove 2"));
	}
}
