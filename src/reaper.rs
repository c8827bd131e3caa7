//! Request TTL reaper
//!
//! A background task that sweeps every queue at a fixed cadence and aborts
//! requests that waited longer than the configured TTL. Queues are walked
//! from the head: entries age in FIFO order, so the sweep stops at the
//! first request that is still fresh.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::cluster::ClusterShared;
use crate::errors::ClusterError;
use crate::events::ClusterEvent;

pub(crate) struct TtlReaper {
	handle: JoinHandle<()>,
}

impl TtlReaper {
	pub fn spawn(shared: Arc<ClusterShared>) -> Self {
		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(shared.config.ttl_check_interval);
			// The first tick fires immediately; skip it so a fresh cluster
			// does not sweep before anything could possibly expire.
			ticker.tick().await;
			loop {
				ticker.tick().await;
				sweep(&shared);
			}
		});
		Self { handle }
	}

	pub fn stop(&self) {
		self.handle.abort();
	}
}

impl Drop for TtlReaper {
	fn drop(&mut self) {
		self.handle.abort();
	}
}

fn sweep(shared: &ClusterShared) {
	let ttl = shared.config.ttl;
	let outcome = {
		let mut state = shared.state.lock();
		let outcome = state.queues.expire(ttl);
		if !outcome.expired.is_empty() {
			shared.pending_tx.send_replace(state.queues.pending());
		}
		outcome
	};
	if outcome.expired.is_empty() {
		return;
	}

	tracing::debug!(count = outcome.expired.len(), "expired overdue connection requests");

	for request in outcome.expired {
		shared.listeners.emit(ClusterEvent::RequestExpired {
			request_id: request.id(),
			pool: request.pool().to_string(),
		});
		request.abort(ClusterError::Timeout(ttl));
	}
	for composite in outcome.drained {
		shared.listeners.emit(ClusterEvent::QueueDrained {
			composite: composite.to_string(),
		});
	}
}
