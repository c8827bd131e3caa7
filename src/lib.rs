//! # Reinhardt Cluster
//!
//! Multi-node database connection cluster for the Reinhardt framework.
//!
//! A cluster maintains a fleet of database nodes, each owning its physical
//! connections and advertising one or more logical **pools** (`read`,
//! `write`, `analytics`, …). Callers ask for a connection from a pool;
//! the scheduler hands the first idle connection from any compatible node
//! to the oldest compatible pending request, queueing requests (with TTL
//! expiry and a backpressure cap) when the fleet is busy.
//!
//! ## Overview
//!
//! - **Pools**: per-pool indexes of idle connections. A node's idle
//!   connection is parked in every pool the node advertises and claimed
//!   from all of them atomically.
//! - **Queues**: pending requests, ordered FIFO per *composite* pool-set.
//!   Nodes with identical memberships share one queue; a request lives in
//!   every queue that can serve its pool.
//! - **Drivers**: vendor specifics (connections, SQL rendering, AST
//!   compilation, schema analysis) live behind the capability traits in
//!   [`driver`], resolved by name from a process-wide registry. A
//!   scriptable [`drivers::MockDriver`] ships in-tree.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reinhardt_cluster::{Cluster, ClusterConfig, NodeConfig, QueryContext};
//!
//! # async fn example() -> reinhardt_cluster::Result<()> {
//! let cluster = Cluster::new(ClusterConfig::new("postgres"))?;
//! cluster
//!     .add_node(
//!         NodeConfig::new()
//!             .with_host("db-1.internal")
//!             .with_pools(["read", "write"]),
//!     )
//!     .await?;
//!
//! let result = cluster
//!     .query(QueryContext::new("read").with_sql("SELECT 1"))
//!     .await?;
//! # drop(result);
//!
//! cluster.end(false).await?;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod connection;
pub mod driver;
pub mod drivers;
pub mod errors;
pub mod events;
mod node;
mod ordered_index;
mod pools;
pub mod query;
mod queues;
mod reaper;
pub mod request;
pub mod types;

pub use cluster::{Cluster, PoolStatus};
pub use config::{ClusterConfig, NodeConfig};
pub use connection::Connection;
pub use driver::{register_driver, Analyzer, Driver, DriverConnection, QueryBuilder, QueryCompiler};
pub use errors::{ClusterError, Result};
pub use events::{ClusterEvent, ClusterEventListener};
pub use query::QueryContext;
pub use request::ConnectionRequest;
pub use types::{ColumnDescription, Description, QueryResult, Row, TableDescription};

/// Re-export commonly used types
pub mod prelude {
	pub use crate::cluster::{Cluster, PoolStatus};
	pub use crate::config::{ClusterConfig, NodeConfig};
	pub use crate::connection::Connection;
	pub use crate::errors::{ClusterError, Result};
	pub use crate::events::{ClusterEvent, ClusterEventListener};
	pub use crate::query::QueryContext;
	pub use crate::types::{Description, QueryResult};
}
