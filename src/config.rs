//! Cluster and node configuration

use std::time::Duration;

use crate::errors::{ClusterError, Result};

/// Cluster-level configuration
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use reinhardt_cluster::ClusterConfig;
///
/// let config = ClusterConfig::new("postgres")
///     .with_ttl(Duration::from_secs(30))
///     .with_max_queue_length(500);
/// assert_eq!(config.driver, "postgres");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ClusterConfig {
	/// Name of the registered driver family
	pub driver: String,

	/// How long a queued connection request may wait before it is expired
	pub ttl: Duration,

	/// Cadence of the TTL reaper
	pub ttl_check_interval: Duration,

	/// Aggregate upper bound on queued requests across all queues
	///
	/// A request queued against several overlapping queues counts once per
	/// queue; the cap applies to that sum.
	pub max_queue_length: usize,
}

impl Default for ClusterConfig {
	fn default() -> Self {
		Self {
			driver: String::new(),
			ttl: Duration::from_secs(60),
			ttl_check_interval: Duration::from_millis(30_000),
			max_queue_length: 10_000,
		}
	}
}

impl ClusterConfig {
	/// Create a configuration for the named driver with default values
	pub fn new(driver: impl Into<String>) -> Self {
		Self {
			driver: driver.into(),
			..Default::default()
		}
	}

	pub fn with_ttl(mut self, ttl: Duration) -> Self {
		self.ttl = ttl;
		self
	}

	pub fn with_ttl_check_interval(mut self, interval: Duration) -> Self {
		self.ttl_check_interval = interval;
		self
	}

	pub fn with_max_queue_length(mut self, max: usize) -> Self {
		self.max_queue_length = max;
		self
	}

	pub fn validate(&self) -> Result<()> {
		if self.driver.is_empty() {
			return Err(ClusterError::Config("driver name is required".to_string()));
		}
		if self.ttl.is_zero() {
			return Err(ClusterError::Config("ttl must be positive".to_string()));
		}
		if self.ttl_check_interval.is_zero() {
			return Err(ClusterError::Config(
				"ttl_check_interval must be positive".to_string(),
			));
		}
		if self.max_queue_length == 0 {
			return Err(ClusterError::Config(
				"max_queue_length must be positive".to_string(),
			));
		}
		Ok(())
	}
}

/// Per-node configuration
///
/// Credentials are passed through to the driver untouched; the cluster only
/// interprets `pools`, `min_connections` and `max_connections`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct NodeConfig {
	/// Database host
	pub host: String,

	/// Database port (driver default when `None`)
	pub port: Option<u16>,

	pub username: Option<String>,

	pub password: Option<String>,

	pub database: Option<String>,

	/// Upper bound on live connections the node may open
	pub max_connections: usize,

	/// Connections opened before the node reports ready
	pub min_connections: usize,

	/// Logical pool memberships (e.g. `read`, `write`, `analytics`)
	pub pools: Vec<String>,
}

impl Default for NodeConfig {
	fn default() -> Self {
		Self {
			host: "localhost".to_string(),
			port: None,
			username: None,
			password: None,
			database: None,
			max_connections: 100,
			min_connections: 1,
			pools: vec!["read".to_string(), "write".to_string()],
		}
	}
}

impl NodeConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_host(mut self, host: impl Into<String>) -> Self {
		self.host = host.into();
		self
	}

	pub fn with_port(mut self, port: u16) -> Self {
		self.port = Some(port);
		self
	}

	pub fn with_username(mut self, username: impl Into<String>) -> Self {
		self.username = Some(username.into());
		self
	}

	pub fn with_password(mut self, password: impl Into<String>) -> Self {
		self.password = Some(password.into());
		self
	}

	pub fn with_database(mut self, database: impl Into<String>) -> Self {
		self.database = Some(database.into());
		self
	}

	pub fn with_max_connections(mut self, max: usize) -> Self {
		self.max_connections = max;
		self
	}

	pub fn with_min_connections(mut self, min: usize) -> Self {
		self.min_connections = min;
		self
	}

	pub fn with_pools<I, S>(mut self, pools: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.pools = pools.into_iter().map(Into::into).collect();
		self
	}

	/// Sort and de-duplicate pool memberships.
	///
	/// Canonical ordering guarantees that two nodes with identical
	/// memberships produce the same composite key.
	pub(crate) fn normalize(&mut self) {
		self.pools.sort();
		self.pools.dedup();
	}

	pub fn validate(&self) -> Result<()> {
		if self.pools.is_empty() {
			return Err(ClusterError::Config(
				"node must advertise at least one pool".to_string(),
			));
		}
		if self.pools.iter().any(|p| p.is_empty()) {
			return Err(ClusterError::Config(
				"pool names must be non-empty".to_string(),
			));
		}
		if self.max_connections == 0 {
			return Err(ClusterError::Config(
				"max_connections must be positive".to_string(),
			));
		}
		if self.min_connections > self.max_connections {
			return Err(ClusterError::Config(
				"max_connections must be >= min_connections".to_string(),
			));
		}
		Ok(())
	}

	/// The sorted, slash-joined composite key of this node's memberships.
	pub fn composite_name(&self) -> String {
		let mut pools = self.pools.clone();
		pools.sort();
		pools.dedup();
		pools.join("/")
	}
}
