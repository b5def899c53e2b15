use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::record::WaypointId;

/// Outbound half of the link to the remote peer.
///
/// `send` hands one already-encoded line off and returns; it must not wait
/// for the peer's reply. Acknowledgement arrives separately as a snapshot.
pub trait Transport: Send + Sync + 'static {
	fn send(&self, line: &str) -> Result<(), TransportError>;

	/// Hands off an add line together with the identifier its sender assigned.
	///
	/// The line grammar has no identifier field. Transports that can carry it
	/// out of band override this; the default sends the bare line and leaves
	/// the peer to mint its own.
	fn send_create(&self, line: &str, id: &WaypointId) -> Result<(), TransportError> {
		tracing::trace!(%id, "transport.create_id_dropped");
		self.send(line)
	}
}

/// Transport that forwards every line into a tokio channel.
///
/// Used by the loopback peer and by tests that want to observe the exact
/// outbound stream.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
	tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
	/// Creates a transport and the receiver that observes its lines.
	pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl Transport for ChannelTransport {
	fn send(&self, line: &str) -> Result<(), TransportError> {
		self.tx.send(line.to_string()).map_err(|_| TransportError::Closed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lines_arrive_in_order() {
		let (transport, mut rx) = ChannelTransport::new();
		transport.send("remove 3").unwrap();
		transport.send("remove 1").unwrap();
		assert_eq!(rx.try_recv().ok().as_deref(), Some("remove 3"));
		assert_eq!(rx.try_recv().ok().as_deref(), Some("remove 1"));
	}

	#[test]
	fn closed_receiver_is_reported() {
		let (transport, rx) = ChannelTransport::new();
		drop(rx);
		assert_eq!(transport.send("remove 0"), Err(TransportError::Closed));
	}

	#[test]
	fn plain_transports_send_add_lines_unchanged() {
		let (transport, mut rx) = ChannelTransport::new();
		transport.send_create("add flag 0 0 0 false 0 Camp", &WaypointId::new("x1")).unwrap();
		assert_eq!(rx.try_recv().ok().as_deref(), Some("add flag 0 0 0 false 0 Camp"));
	}
}
