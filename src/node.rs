//! Cluster nodes
//!
//! A node is one database host. It owns its physical connections (opened
//! through the driver's connection factory, bounded by `max_connections`)
//! and announces them to the cluster as they become live. The initial batch
//! of `min_connections` is opened before the node reports ready; further
//! connections are opened on demand while requests queue up.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::cluster::ClusterMessage;
use crate::config::NodeConfig;
use crate::connection::Connection;
use crate::driver::Driver;
use crate::errors::Result;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Node {
	id: u64,
	config: NodeConfig,
	pools: Arc<[String]>,
	composite: Arc<str>,
	messages: mpsc::UnboundedSender<ClusterMessage>,
	/// Live connections plus in-flight connection attempts; guards the
	/// `max_connections` cap.
	slots: AtomicUsize,
	ended: AtomicBool,
	connections: Mutex<HashMap<u64, Arc<Connection>>>,
}

impl Node {
	/// `config` must already be normalized and validated.
	pub fn new(config: NodeConfig, messages: mpsc::UnboundedSender<ClusterMessage>) -> Arc<Self> {
		let pools: Arc<[String]> = config.pools.clone().into();
		let composite: Arc<str> = config.composite_name().into();
		Arc::new(Self {
			id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
			config,
			pools,
			composite,
			messages,
			slots: AtomicUsize::new(0),
			ended: AtomicBool::new(false),
			connections: Mutex::new(HashMap::new()),
		})
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn pools(&self) -> &[String] {
		&self.pools
	}

	pub fn composite(&self) -> &Arc<str> {
		&self.composite
	}

	pub fn serves(&self, pool: &str) -> bool {
		self.pools.iter().any(|p| p == pool)
	}

	/// Connections to open before the node reports ready.
	pub fn min_connections(&self) -> usize {
		self.config.min_connections
	}

	/// Open one physical connection on a slot reserved by the caller.
	///
	/// The connection is created but not yet announced; the caller decides
	/// whether to route it synchronously (initial load) or through the
	/// event loop (demand growth). The slot is released on failure.
	pub async fn open_driver_connection(
		self: &Arc<Self>,
		driver: &Arc<dyn Driver>,
	) -> Result<Arc<Connection>> {
		match driver.connect(&self.config).await {
			Ok(driver_connection) => Ok(Connection::new(
				self.id,
				Arc::clone(&self.pools),
				Arc::clone(&self.composite),
				driver_connection,
				self.messages.clone(),
			)),
			Err(error) => {
				self.release_slot();
				Err(error)
			}
		}
	}

	/// Open one more connection on demand and announce it to the event
	/// loop. The slot must already be reserved.
	pub async fn open_connection(self: &Arc<Self>, driver: Arc<dyn Driver>) -> Result<()> {
		let connection = self.open_driver_connection(&driver).await?;
		let _ = self.messages.send(ClusterMessage::ConnectionLive { connection });
		Ok(())
	}

	/// Reserve a connection slot if the node is alive and under its cap.
	pub fn try_reserve_slot(&self) -> bool {
		if self.ended.load(Ordering::Acquire) {
			return false;
		}
		self.slots
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |slots| {
				(slots < self.config.max_connections).then_some(slots + 1)
			})
			.is_ok()
	}

	pub fn release_slot(&self) {
		self.slots.fetch_sub(1, Ordering::AcqRel);
	}

	pub fn track(&self, connection: Arc<Connection>) {
		self.connections.lock().insert(connection.id(), connection);
	}

	/// Stop tracking a closed connection, freeing its slot.
	pub fn forget(&self, connection_id: u64) {
		if self.connections.lock().remove(&connection_id).is_some() {
			self.release_slot();
		}
	}

	pub fn mark_ended(&self) {
		self.ended.store(true, Ordering::Release);
	}

	/// Take every tracked connection for teardown.
	pub fn drain_connections(&self) -> Vec<Arc<Connection>> {
		self.connections.lock().drain().map(|(_, conn)| conn).collect()
	}
}

impl std::fmt::Debug for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Node")
			.field("id", &self.id)
			.field("composite", &self.composite)
			.field("slots", &self.slots)
			.field("ended", &self.ended)
			.finish()
	}
}
