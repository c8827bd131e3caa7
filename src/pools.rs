//! Idle-connection pool registry
//!
//! Per-pool-name index of currently idle connections, with node refcounts.
//! A parked connection appears in every pool its node advertises; claiming
//! it through any one pool removes it from all of them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::Connection;
use crate::ordered_index::OrderedIndex;

pub(crate) struct PoolEntry {
	pub node_count: usize,
	pub idle: OrderedIndex<u64, Arc<Connection>>,
}

#[derive(Default)]
pub(crate) struct PoolRegistry {
	pools: HashMap<String, PoolEntry>,
}

impl PoolRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Count a node in for each of its pools, creating entries as needed.
	pub fn register(&mut self, pools: &[String]) {
		for pool in pools {
			let entry = self.pools.entry(pool.clone()).or_insert_with(|| PoolEntry {
				node_count: 0,
				idle: OrderedIndex::new(),
			});
			entry.node_count += 1;
		}
	}

	/// Count a node out; a pool with no remaining nodes is dropped.
	pub fn unregister(&mut self, pools: &[String]) {
		for pool in pools {
			let remove = match self.pools.get_mut(pool) {
				Some(entry) => {
					entry.node_count = entry.node_count.saturating_sub(1);
					entry.node_count == 0
				}
				None => {
					tracing::error!(pool = pool.as_str(), "unregister for an unknown pool");
					false
				}
			};
			if remove {
				self.pools.remove(pool);
			}
		}
	}

	/// Park an idle connection in every pool its node advertises.
	pub fn park(&mut self, connection: Arc<Connection>) {
		for pool in connection.pools() {
			if let Some(entry) = self.pools.get_mut(pool) {
				entry.idle.push(connection.id(), Arc::clone(&connection));
			}
		}
	}

	/// Extract the oldest idle connection from the named pool.
	///
	/// The winner is removed from every sibling pool it was parked in.
	pub fn unpark(&mut self, pool: &str) -> Option<Arc<Connection>> {
		let connection = self.pools.get_mut(pool)?.idle.shift()?;
		for sibling in connection.pools() {
			if sibling != pool {
				if let Some(entry) = self.pools.get_mut(sibling) {
					entry.idle.remove(&connection.id());
				}
			}
		}
		Some(connection)
	}

	/// Remove a connection from every pool it may be parked in.
	pub fn drop_connection(&mut self, connection: &Connection) {
		for pool in connection.pools() {
			if let Some(entry) = self.pools.get_mut(pool) {
				entry.idle.remove(&connection.id());
			}
		}
	}

	pub fn contains(&self, pool: &str) -> bool {
		self.pools.contains_key(pool)
	}

	pub fn idle_count(&self, pool: &str) -> usize {
		self.pools.get(pool).map_or(0, |entry| entry.idle.len())
	}

	pub fn node_count(&self, pool: &str) -> usize {
		self.pools.get(pool).map_or(0, |entry| entry.node_count)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cluster::ClusterMessage;
	use crate::driver::DriverConnection;
	use crate::errors::Result;
	use crate::query::QueryContext;
	use crate::types::QueryResult;
	use async_trait::async_trait;
	use tokio::sync::mpsc;

	struct NullConnection;

	#[async_trait]
	impl DriverConnection for NullConnection {
		async fn execute(&self, _ctx: &QueryContext) -> Result<QueryResult> {
			Ok(QueryResult::empty())
		}

		async fn close(&self) -> Result<()> {
			Ok(())
		}
	}

	fn connection(pools: &[&str]) -> (Arc<Connection>, mpsc::UnboundedReceiver<ClusterMessage>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let pools: Arc<[String]> = pools.iter().map(|p| p.to_string()).collect();
		let composite: Arc<str> = pools.join("/").into();
		(
			Connection::new(1, pools, composite, Box::new(NullConnection), tx),
			rx,
		)
	}

	#[tokio::test]
	async fn test_register_counts_nodes_per_pool() {
		// Arrange
		let mut registry = PoolRegistry::new();

		// Act
		registry.register(&["read".to_string(), "write".to_string()]);
		registry.register(&["read".to_string()]);

		// Assert
		assert_eq!(registry.node_count("read"), 2);
		assert_eq!(registry.node_count("write"), 1);
	}

	#[tokio::test]
	async fn test_unregister_drops_empty_pools() {
		// Arrange
		let mut registry = PoolRegistry::new();
		registry.register(&["read".to_string(), "write".to_string()]);
		registry.register(&["read".to_string()]);

		// Act
		registry.unregister(&["read".to_string(), "write".to_string()]);

		// Assert
		assert!(registry.contains("read"));
		assert!(!registry.contains("write"));
	}

	#[tokio::test]
	async fn test_unpark_removes_from_sibling_pools() {
		// Arrange
		let mut registry = PoolRegistry::new();
		registry.register(&["read".to_string(), "write".to_string()]);
		let (conn, _rx) = connection(&["read", "write"]);
		registry.park(Arc::clone(&conn));
		assert_eq!(registry.idle_count("read"), 1);
		assert_eq!(registry.idle_count("write"), 1);

		// Act
		let claimed = registry.unpark("read").expect("connection available");

		// Assert
		assert_eq!(claimed.id(), conn.id());
		assert_eq!(registry.idle_count("read"), 0);
		assert_eq!(registry.idle_count("write"), 0);
	}

	#[tokio::test]
	async fn test_unpark_is_fifo() {
		// Arrange
		let mut registry = PoolRegistry::new();
		registry.register(&["read".to_string()]);
		let (first, _rx1) = connection(&["read"]);
		let (second, _rx2) = connection(&["read"]);
		registry.park(Arc::clone(&first));
		registry.park(Arc::clone(&second));

		// Act & Assert
		assert_eq!(registry.unpark("read").unwrap().id(), first.id());
		assert_eq!(registry.unpark("read").unwrap().id(), second.id());
		assert!(registry.unpark("read").is_none());
	}

	#[tokio::test]
	async fn test_drop_connection_clears_all_pools() {
		// Arrange
		let mut registry = PoolRegistry::new();
		registry.register(&["read".to_string(), "write".to_string()]);
		let (conn, _rx) = connection(&["read", "write"]);
		registry.park(Arc::clone(&conn));

		// Act
		registry.drop_connection(&conn);

		// Assert
		assert_eq!(registry.idle_count("read"), 0);
		assert_eq!(registry.idle_count("write"), 0);
	}
}
