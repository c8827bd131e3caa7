//! Pending connection requests

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::connection::Connection;
use crate::errors::{ClusterError, Result};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A pending demand for a connection from a named pool.
///
/// A request lives in every queue that can serve its pool and leaves all of
/// them when it is executed, aborted or expired. Completion is single-shot:
/// exactly one of `execute` or `abort` wins; later calls are no-ops.
pub struct ConnectionRequest {
	id: u64,
	pool: String,
	created_at: Instant,
	reply: Mutex<Option<oneshot::Sender<Result<Arc<Connection>>>>>,
}

impl ConnectionRequest {
	pub(crate) fn new(pool: impl Into<String>) -> (Arc<Self>, oneshot::Receiver<Result<Arc<Connection>>>) {
		let (tx, rx) = oneshot::channel();
		let request = Arc::new(Self {
			id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
			pool: pool.into(),
			created_at: Instant::now(),
			reply: Mutex::new(Some(tx)),
		});
		(request, rx)
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn pool(&self) -> &str {
		&self.pool
	}

	/// Resolve the request with an idle connection.
	///
	/// Returns the connection back when the caller has gone away (the
	/// receiving future was dropped) so the dispatcher can re-route it.
	pub(crate) fn execute(&self, connection: Arc<Connection>) -> std::result::Result<(), Arc<Connection>> {
		match self.reply.lock().take() {
			Some(tx) => tx.send(Ok(connection)).map_err(|res| match res {
				Ok(conn) => conn,
				Err(_) => unreachable!("request reply carried the sent connection"),
			}),
			None => {
				tracing::error!(request_id = self.id, "execute on an already completed request");
				Err(connection)
			}
		}
	}

	/// Reject the request.
	pub(crate) fn abort(&self, error: ClusterError) {
		match self.reply.lock().take() {
			Some(tx) => {
				// The caller may have stopped waiting; nothing left to do then.
				let _ = tx.send(Err(error));
			}
			None => {
				tracing::error!(request_id = self.id, "abort on an already completed request");
			}
		}
	}

	pub(crate) fn is_fulfilled(&self) -> bool {
		self.reply.lock().is_none()
	}

	pub fn is_expired(&self, ttl: Duration) -> bool {
		self.created_at.elapsed() > ttl
	}
}

impl std::fmt::Debug for ConnectionRequest {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionRequest")
			.field("id", &self.id)
			.field("pool", &self.pool)
			.field("fulfilled", &self.is_fulfilled())
			.finish()
	}
}
