//! Cluster-side connection handle
//!
//! Wraps one physical driver connection with the bookkeeping the scheduler
//! needs: a process-unique id, the owner node's pool memberships, and the
//! announcements (`idle`, `end`) that feed the dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::cluster::ClusterMessage;
use crate::driver::DriverConnection;
use crate::errors::{ClusterError, Result};
use crate::query::QueryContext;
use crate::types::QueryResult;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A live connection owned by a cluster node.
///
/// While idle and unassigned, the connection is parked in every pool its
/// node advertises. Once handed to a caller it stays out of the pools until
/// [`Connection::release`] announces it idle again, or the caller detaches
/// it with [`Connection::remove_from_pool`] and later [`Connection::end`]s
/// it.
pub struct Connection {
	id: u64,
	node_id: u64,
	pools: Arc<[String]>,
	composite: Arc<str>,
	driver: Box<dyn DriverConnection>,
	messages: mpsc::UnboundedSender<ClusterMessage>,
	detached: AtomicBool,
	ended: AtomicBool,
}

impl Connection {
	pub(crate) fn new(
		node_id: u64,
		pools: Arc<[String]>,
		composite: Arc<str>,
		driver: Box<dyn DriverConnection>,
		messages: mpsc::UnboundedSender<ClusterMessage>,
	) -> Arc<Self> {
		Arc::new(Self {
			id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
			node_id,
			pools,
			composite,
			driver,
			messages,
			detached: AtomicBool::new(false),
			ended: AtomicBool::new(false),
		})
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn node_id(&self) -> u64 {
		self.node_id
	}

	/// Pool memberships inherited from the owner node, in canonical order.
	pub fn pools(&self) -> &[String] {
		&self.pools
	}

	/// The owner node's composite queue key.
	pub fn composite(&self) -> &str {
		&self.composite
	}

	/// Execute a ready query context on this connection.
	pub async fn query(&self, ctx: &QueryContext) -> Result<QueryResult> {
		if self.ended.load(Ordering::Acquire) {
			return Err(ClusterError::Driver("connection is closed".to_string()));
		}
		if !ctx.is_ready() {
			return Err(ClusterError::BadInput(
				"query context has not been rendered".to_string(),
			));
		}
		self.driver.execute(ctx).await
	}

	/// Announce the connection idle so the scheduler can reuse it.
	///
	/// No-op for detached or closed connections.
	pub fn release(self: &Arc<Self>) {
		if self.detached.load(Ordering::Acquire) || self.ended.load(Ordering::Acquire) {
			return;
		}
		let _ = self.messages.send(ClusterMessage::Idle {
			connection: Arc::clone(self),
		});
	}

	/// Take the connection out of pool management.
	///
	/// The caller assumes ownership and must [`Connection::end`] it; the
	/// scheduler will never see it again.
	pub fn remove_from_pool(&self) {
		self.detached.store(true, Ordering::Release);
	}

	pub fn is_detached(&self) -> bool {
		self.detached.load(Ordering::Acquire)
	}

	pub fn is_ended(&self) -> bool {
		self.ended.load(Ordering::Acquire)
	}

	/// Close the underlying driver connection and announce `end`.
	pub async fn end(self: &Arc<Self>) -> Result<()> {
		if self.ended.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		let result = self.driver.close().await;
		let _ = self.messages.send(ClusterMessage::ConnectionEnd {
			connection: Arc::clone(self),
		});
		result
	}

	/// Mark the connection closed without announcing it.
	///
	/// Used when the cluster itself is tearing the node down and already
	/// holds the bookkeeping lock.
	pub(crate) fn mark_ended(&self) -> bool {
		!self.ended.swap(true, Ordering::AcqRel)
	}

	pub(crate) async fn close_driver(&self) -> Result<()> {
		self.driver.close().await
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("id", &self.id)
			.field("node_id", &self.node_id)
			.field("composite", &self.composite)
			.field("detached", &self.detached)
			.field("ended", &self.ended)
			.finish()
	}
}
