//! Cluster lifecycle events
//!
//! Listeners observe node, connection and request transitions. The surface
//! is intentionally synchronous and infallible: listeners are bookkeeping
//! hooks (metrics, tests), never control flow. A panicking listener is
//! caught and logged; it cannot wedge event emission for its siblings.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;

/// A cluster lifecycle event
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ClusterEvent {
	/// A node finished loading and serves the given composite queue
	NodeAdded { node_id: u64, composite: String },
	/// A node was removed; its pool and queue registrations are gone
	NodeEnded { node_id: u64 },
	/// A physical connection became live
	ConnectionOpened { node_id: u64, connection_id: u64 },
	/// A physical connection closed
	ConnectionClosed { node_id: u64, connection_id: u64 },
	/// A request entered the queues serving its pool
	RequestQueued { request_id: u64, pool: String },
	/// A request was handed an idle connection
	RequestDispatched { request_id: u64, connection_id: u64 },
	/// A request expired before a connection became available
	RequestExpired { request_id: u64, pool: String },
	/// A composite queue's last pending request left
	QueueDrained { composite: String },
	/// All nodes have been ended
	End,
}

/// Observer for [`ClusterEvent`]s
pub trait ClusterEventListener: Send + Sync {
	fn handle(&self, event: &ClusterEvent);
}

impl<F> ClusterEventListener for F
where
	F: Fn(&ClusterEvent) + Send + Sync,
{
	fn handle(&self, event: &ClusterEvent) {
		self(event)
	}
}

/// Registered listeners, shared across the cluster's tasks
#[derive(Default)]
pub(crate) struct ListenerSet {
	listeners: RwLock<Vec<Arc<dyn ClusterEventListener>>>,
}

impl ListenerSet {
	pub fn add(&self, listener: Arc<dyn ClusterEventListener>) {
		self.listeners.write().push(listener);
	}

	pub fn emit(&self, event: ClusterEvent) {
		let listeners = self.listeners.read();
		for listener in listeners.iter() {
			let caught =
				std::panic::catch_unwind(AssertUnwindSafe(|| listener.handle(&event)));
			if caught.is_err() {
				tracing::error!(?event, "cluster event listener panicked");
			}
		}
	}
}
