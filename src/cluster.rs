//! Cluster orchestration
//!
//! The `Cluster` owns the node fleet, the idle-connection pools and the
//! request queues, and runs the dispatcher that couples them: every idle
//! announcement either completes the oldest compatible pending request or
//! parks the connection in the pools its node advertises.
//!
//! All bookkeeping lives behind one mutex and the lock is never held
//! across an await point; event handlers and public operations capture
//! what they need under the lock and complete requests outside it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ClusterConfig, NodeConfig};
use crate::connection::Connection;
use crate::driver::{self, Driver};
use crate::errors::{ClusterError, Result};
use crate::events::{ClusterEvent, ClusterEventListener, ListenerSet};
use crate::node::Node;
use crate::pools::PoolRegistry;
use crate::queues::QueueRegistry;
use crate::reaper::TtlReaper;
use crate::request::ConnectionRequest;

/// Messages from nodes and connections into the cluster's event loop.
///
/// One consumer task processes them in emission order, which serializes
/// dispatch decisions with respect to each connection's lifecycle.
pub(crate) enum ClusterMessage {
	/// A new physical connection became live
	ConnectionLive { connection: Arc<Connection> },
	/// A connection finished its work and is reusable
	Idle { connection: Arc<Connection> },
	/// A connection closed and must leave all bookkeeping
	ConnectionEnd { connection: Arc<Connection> },
}

pub(crate) struct ClusterState {
	pub ended: bool,
	pub nodes: HashMap<u64, Arc<Node>>,
	pub pools: PoolRegistry,
	pub queues: QueueRegistry,
}

pub(crate) struct ClusterShared {
	pub config: ClusterConfig,
	pub state: Mutex<ClusterState>,
	/// Distinct pending requests, observed by graceful shutdown. Updated
	/// while the state lock is held so counts are published in order.
	pub pending_tx: watch::Sender<usize>,
	pub listeners: ListenerSet,
	end_emitted: AtomicBool,
}

impl ClusterShared {
	/// Emit the terminal `End` event once the cluster is ended and the
	/// last node is gone.
	fn emit_end_if_done(&self) {
		let done = {
			let state = self.state.lock();
			state.ended && state.nodes.is_empty()
		};
		if done && !self.end_emitted.swap(true, Ordering::AcqRel) {
			self.listeners.emit(ClusterEvent::End);
		}
	}
}

/// Status snapshot of one pool, for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
	/// Idle connections currently parked in the pool
	pub idle: usize,
	/// Nodes advertising the pool
	pub node_count: usize,
}

/// A multi-node database connection cluster.
///
/// Nodes advertise logical pool memberships; callers ask for a connection
/// from a pool and are served by whichever compatible node first has an
/// idle connection. Requests queue (FIFO per composite pool-set) when no
/// connection is free, expire after the configured TTL, and are rejected
/// outright when no live node can ever serve them.
pub struct Cluster {
	shared: Arc<ClusterShared>,
	driver: Arc<dyn Driver>,
	messages: mpsc::UnboundedSender<ClusterMessage>,
	reaper: TtlReaper,
	event_loop: JoinHandle<()>,
}

impl Cluster {
	/// Create a cluster for the configured driver family.
	///
	/// Fails synchronously when the configuration is invalid or the driver
	/// name has not been registered. Must be called within a Tokio runtime;
	/// the cluster spawns its dispatcher and reaper tasks immediately.
	pub fn new(config: ClusterConfig) -> Result<Self> {
		config.validate()?;
		let driver = driver::lookup_driver(&config.driver)
			.ok_or_else(|| ClusterError::DriverLoad(config.driver.clone()))?;

		let (messages, inbox) = mpsc::unbounded_channel();
		let (pending_tx, _) = watch::channel(0usize);
		let shared = Arc::new(ClusterShared {
			config,
			state: Mutex::new(ClusterState {
				ended: false,
				nodes: HashMap::new(),
				pools: PoolRegistry::new(),
				queues: QueueRegistry::new(),
			}),
			pending_tx,
			listeners: ListenerSet::default(),
			end_emitted: AtomicBool::new(false),
		});

		let event_loop = tokio::spawn(run_event_loop(Arc::clone(&shared), inbox));
		let reaper = TtlReaper::spawn(Arc::clone(&shared));

		Ok(Self {
			shared,
			driver,
			messages,
			reaper,
			event_loop,
		})
	}

	pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
		&self.driver
	}

	/// Register an event listener.
	pub fn add_listener(&self, listener: Arc<dyn ClusterEventListener>) {
		self.shared.listeners.add(listener);
	}

	/// Add a node and wait for it to finish loading.
	///
	/// Pool memberships are sorted and de-duplicated before the node
	/// becomes observable. Resolves with the node's id once the initial
	/// connections are open.
	pub async fn add_node(&self, mut config: NodeConfig) -> Result<u64> {
		config.normalize();
		config.validate()?;

		let node = Node::new(config, self.messages.clone());
		{
			let mut state = self.shared.state.lock();
			if state.ended {
				return Err(ClusterError::Ended);
			}
			state.pools.register(node.pools());
			state.queues.register(node.pools(), node.composite());
			state.nodes.insert(node.id(), Arc::clone(&node));
		}

		match self.connect_initial(&node).await {
			Ok(()) => {
				tracing::debug!(
					node_id = node.id(),
					composite = node.composite().as_ref(),
					"node loaded"
				);
				self.shared.listeners.emit(ClusterEvent::NodeAdded {
					node_id: node.id(),
					composite: node.composite().to_string(),
				});
				Ok(node.id())
			}
			Err(error) => {
				tracing::warn!(node_id = node.id(), %error, "node failed to load");
				remove_node(&self.shared, node.id());
				Err(error)
			}
		}
	}

	/// Open the node's initial connection batch.
	///
	/// The connections are routed synchronously so the node is fully
	/// parked in the pools by the time `add_node` resolves.
	async fn connect_initial(&self, node: &Arc<Node>) -> Result<()> {
		for _ in 0..node.min_connections() {
			if !node.try_reserve_slot() {
				break;
			}
			let connection = node.open_driver_connection(&self.driver).await?;
			handle_connection_live(&self.shared, connection);
		}
		Ok(())
	}

	/// Remove a node, closing its connections.
	///
	/// Pending requests that no remaining node can serve are rejected with
	/// [`ClusterError::NoServer`].
	pub async fn end_node(&self, node_id: u64) -> Result<()> {
		if remove_node(&self.shared, node_id) {
			Ok(())
		} else {
			Err(ClusterError::Internal(format!(
				"node {node_id} is not registered"
			)))
		}
	}

	/// Acquire a pooled connection from the named pool.
	///
	/// The connection stays under pool management: release it with
	/// [`Connection::release`] (or let [`Cluster::query`] do so) and the
	/// scheduler will hand it to the next request.
	pub async fn get_db_connection(&self, pool: &str) -> Result<Arc<Connection>> {
		let (request_id, receiver, growth) = {
			let mut state = self.shared.state.lock();
			if state.ended {
				return Err(ClusterError::Ended);
			}
			if let Some(connection) = state.pools.unpark(pool) {
				tracing::debug!(pool, connection_id = connection.id(), "unparked idle connection");
				return Ok(connection);
			}
			if state.queues.serving(pool) == 0 {
				return Err(ClusterError::NoServer(pool.to_string()));
			}
			if state.queues.total_len() >= self.shared.config.max_queue_length {
				return Err(ClusterError::QueueFull);
			}

			let (request, receiver) = ConnectionRequest::new(pool);
			state.queues.enqueue(&request)?;
			self.shared.pending_tx.send_replace(state.queues.pending());
			let growth = reserve_growth(&state, pool);
			(request.id(), receiver, growth)
		};

		self.shared.listeners.emit(ClusterEvent::RequestQueued {
			request_id,
			pool: pool.to_string(),
		});
		if let Some(node) = growth {
			let driver = Arc::clone(&self.driver);
			tokio::spawn(async move {
				if let Err(error) = node.open_connection(driver).await {
					tracing::warn!(node_id = node.id(), %error, "demand connection failed");
				}
			});
		}

		match receiver.await {
			Ok(result) => result,
			Err(_) => Err(ClusterError::Internal(
				"connection request dropped without completion".to_string(),
			)),
		}
	}

	/// Acquire a connection detached from pool management.
	///
	/// The caller assumes ownership and must [`Connection::end`] it.
	pub async fn get_connection(&self, pool: &str) -> Result<Arc<Connection>> {
		let connection = self.get_db_connection(pool).await?;
		connection.remove_from_pool();
		Ok(connection)
	}

	/// End the cluster.
	///
	/// With `end_now` every pending request is rejected with
	/// [`ClusterError::Shutdown`]; otherwise the call waits for the queues
	/// to drain first. Either way all nodes are ended before returning.
	pub async fn end(&self, end_now: bool) -> Result<()> {
		{
			let mut state = self.shared.state.lock();
			state.ended = true;
		}
		self.reaper.stop();

		if end_now {
			let requests = {
				let mut state = self.shared.state.lock();
				let requests = state.queues.drain_all();
				self.shared.pending_tx.send_replace(state.queues.pending());
				requests
			};
			for request in requests {
				request.abort(ClusterError::Shutdown);
			}
		} else {
			let mut pending = self.shared.pending_tx.subscribe();
			pending
				.wait_for(|count| *count == 0)
				.await
				.map_err(|_| ClusterError::Internal("pending watch closed".to_string()))?;
		}

		let node_ids: Vec<u64> = {
			let state = self.shared.state.lock();
			state.nodes.keys().copied().collect()
		};
		for node_id in node_ids {
			remove_node(&self.shared, node_id);
		}
		self.shared.emit_end_if_done();
		Ok(())
	}

	/// Sum of queue lengths across all composite queues.
	///
	/// A request queued against several overlapping queues counts once per
	/// queue, so this over-counts distinct requests; it is the signal the
	/// backpressure cap applies to. See [`Cluster::pending_requests`] for
	/// the distinct count.
	pub fn queue_length(&self) -> usize {
		self.shared.state.lock().queues.total_len()
	}

	/// Distinct pending requests.
	pub fn pending_requests(&self) -> usize {
		self.shared.state.lock().queues.pending()
	}

	/// Snapshot of one pool's idle and node counts.
	pub fn pool_status(&self, pool: &str) -> Option<PoolStatus> {
		let state = self.shared.state.lock();
		if !state.pools.contains(pool) {
			return None;
		}
		Some(PoolStatus {
			idle: state.pools.idle_count(pool),
			node_count: state.pools.node_count(pool),
		})
	}

	/// Number of composite queues currently serving the named pool.
	pub fn serving_queues(&self, pool: &str) -> usize {
		self.shared.state.lock().queues.serving(pool)
	}
}

impl Drop for Cluster {
	fn drop(&mut self) {
		self.event_loop.abort();
		self.reaper.stop();
	}
}

impl std::fmt::Debug for Cluster {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Cluster")
			.field("driver", &self.shared.config.driver)
			.finish()
	}
}

/// Pick a node that serves the pool and has spare capacity, reserving the
/// slot while the state lock is held so concurrent growth can't overshoot.
fn reserve_growth(state: &ClusterState, pool: &str) -> Option<Arc<Node>> {
	state
		.nodes
		.values()
		.find(|node| node.serves(pool) && node.try_reserve_slot())
		.map(Arc::clone)
}

async fn run_event_loop(
	shared: Arc<ClusterShared>,
	mut inbox: mpsc::UnboundedReceiver<ClusterMessage>,
) {
	while let Some(message) = inbox.recv().await {
		match message {
			ClusterMessage::ConnectionLive { connection } => {
				handle_connection_live(&shared, connection)
			}
			ClusterMessage::Idle { connection } => handle_idle(&shared, connection),
			ClusterMessage::ConnectionEnd { connection } => {
				handle_connection_end(&shared, connection)
			}
		}
	}
}

fn handle_connection_live(shared: &Arc<ClusterShared>, connection: Arc<Connection>) {
	let tracked = {
		let state = shared.state.lock();
		match state.nodes.get(&connection.node_id()) {
			Some(node) => {
				node.track(Arc::clone(&connection));
				true
			}
			None => false,
		}
	};
	if !tracked {
		// The node went away while the connect was in flight.
		close_off_loop(connection);
		return;
	}

	shared.listeners.emit(ClusterEvent::ConnectionOpened {
		node_id: connection.node_id(),
		connection_id: connection.id(),
	});
	handle_idle(shared, connection);
}

/// Route an idle connection: complete the oldest request queued on its
/// node's composite, or park it in every pool the node advertises.
fn handle_idle(shared: &Arc<ClusterShared>, connection: Arc<Connection>) {
	if connection.is_detached() || connection.is_ended() {
		return;
	}

	let mut connection = connection;
	loop {
		let claimed = {
			let mut state = shared.state.lock();
			if !state.nodes.contains_key(&connection.node_id()) {
				drop(state);
				close_off_loop(connection);
				return;
			}
			match state.queues.claim_for_composite(connection.composite()) {
				Some(outcome) => {
					shared.pending_tx.send_replace(state.queues.pending());
					Some(outcome)
				}
				None => {
					state.pools.park(Arc::clone(&connection));
					None
				}
			}
		};

		let Some(outcome) = claimed else {
			tracing::debug!(connection_id = connection.id(), "parked idle connection");
			return;
		};

		for composite in outcome.drained {
			shared.listeners.emit(ClusterEvent::QueueDrained {
				composite: composite.to_string(),
			});
		}

		let request_id = outcome.request.id();
		match outcome.request.execute(Arc::clone(&connection)) {
			Ok(()) => {
				shared.listeners.emit(ClusterEvent::RequestDispatched {
					request_id,
					connection_id: connection.id(),
				});
				return;
			}
			Err(returned) => {
				// The caller stopped waiting; route the connection to the
				// next request instead.
				tracing::debug!(request_id, "request abandoned before dispatch");
				connection = returned;
			}
		}
	}
}

fn handle_connection_end(shared: &Arc<ClusterShared>, connection: Arc<Connection>) {
	{
		let mut state = shared.state.lock();
		state.pools.drop_connection(&connection);
		if let Some(node) = state.nodes.get(&connection.node_id()) {
			node.forget(connection.id());
		}
	}
	shared.listeners.emit(ClusterEvent::ConnectionClosed {
		node_id: connection.node_id(),
		connection_id: connection.id(),
	});
}

/// Tear a node down: drop its bookkeeping, orphan unservable requests,
/// close its connections. Returns `false` when the node is not registered.
fn remove_node(shared: &Arc<ClusterShared>, node_id: u64) -> bool {
	let (node, connections, orphans) = {
		let mut state = shared.state.lock();
		let Some(node) = state.nodes.remove(&node_id) else {
			return false;
		};
		node.mark_ended();

		let connections = node.drain_connections();
		for connection in &connections {
			state.pools.drop_connection(connection);
		}
		state.pools.unregister(node.pools());
		let orphans = state.queues.unregister(node.pools(), node.composite());
		shared.pending_tx.send_replace(state.queues.pending());
		(node, connections, orphans)
	};

	for request in orphans {
		request.abort(ClusterError::NoServer(request.pool().to_string()));
	}
	for connection in connections {
		if connection.mark_ended() {
			shared.listeners.emit(ClusterEvent::ConnectionClosed {
				node_id,
				connection_id: connection.id(),
			});
			close_driver_off_loop(connection);
		}
	}

	tracing::debug!(node_id = node.id(), composite = node.composite().as_ref(), "node ended");
	shared.listeners.emit(ClusterEvent::NodeEnded { node_id });
	shared.emit_end_if_done();
	true
}

/// Close a connection that never made it into the bookkeeping.
fn close_off_loop(connection: Arc<Connection>) {
	tokio::spawn(async move {
		let _ = connection.end().await;
	});
}

/// Close the driver side of a connection already marked ended.
fn close_driver_off_loop(connection: Arc<Connection>) {
	tokio::spawn(async move {
		if let Err(error) = connection.close_driver().await {
			tracing::warn!(connection_id = connection.id(), %error, "driver close failed");
		}
	});
}
