//! Request TTL tests
//! Covers reaper expiry and the survival of fresh requests across sweeps

use std::sync::Arc;
use std::time::Duration;

use reinhardt_cluster::drivers::{ConnectMode, MockDriver};
use reinhardt_cluster::{Cluster, ClusterConfig, ClusterError, NodeConfig};

#[tokio::test]
async fn test_request_expires_when_no_connection_appears() {
	// The node never produces a connection, so the queued request must be
	// rejected by the reaper once its TTL elapses
	let mock = MockDriver::install("mock-ttl-expire");
	mock.set_connect_mode(ConnectMode::Pending);
	let config = ClusterConfig::new("mock-ttl-expire")
		.with_ttl(Duration::from_millis(400))
		.with_ttl_check_interval(Duration::from_millis(100));
	let cluster = Cluster::new(config).expect("Failed to create cluster");
	cluster
		.add_node(
			NodeConfig::new()
				.with_pools(["analytics"])
				.with_min_connections(0)
				.with_max_connections(1),
		)
		.await
		.expect("Failed to add node");

	let result = tokio::time::timeout(
		Duration::from_secs(5),
		cluster.get_db_connection("analytics"),
	)
	.await
	.expect("request should be expired well before 5s");

	assert!(matches!(result, Err(ClusterError::Timeout(_))));
	assert_eq!(cluster.pending_requests(), 0);
	assert_eq!(cluster.queue_length(), 0);
}

#[tokio::test]
async fn test_fresh_requests_survive_sweeps() {
	// With a generous TTL the reaper must leave a waiting request alone
	MockDriver::install("mock-ttl-fresh");
	let config = ClusterConfig::new("mock-ttl-fresh")
		.with_ttl(Duration::from_secs(60))
		.with_ttl_check_interval(Duration::from_millis(50));
	let cluster = Arc::new(Cluster::new(config).expect("Failed to create cluster"));
	cluster
		.add_node(NodeConfig::new().with_pools(["read"]).with_max_connections(1))
		.await
		.expect("Failed to add node");

	let held = cluster
		.get_db_connection("read")
		.await
		.expect("Failed to get connection");
	let waiter = {
		let cluster = Arc::clone(&cluster);
		tokio::spawn(async move { cluster.get_db_connection("read").await })
	};

	// Let several sweeps pass over the queued request
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert_eq!(cluster.pending_requests(), 1);

	held.release();
	let connection = waiter
		.await
		.expect("waiter panicked")
		.expect("request should resolve after release");
	assert_eq!(cluster.pending_requests(), 0);
	drop(connection);
}

#[tokio::test]
async fn test_expired_request_leaves_overlapping_queues() {
	// The request sits in two queues; expiry must remove it from both
	let mock = MockDriver::install("mock-ttl-overlap");
	mock.set_connect_mode(ConnectMode::Pending);
	let config = ClusterConfig::new("mock-ttl-overlap")
		.with_ttl(Duration::from_millis(300))
		.with_ttl_check_interval(Duration::from_millis(100));
	let cluster = Cluster::new(config).expect("Failed to create cluster");
	cluster
		.add_node(NodeConfig::new().with_pools(["read"]).with_min_connections(0))
		.await
		.expect("Failed to add node A");
	cluster
		.add_node(
			NodeConfig::new()
				.with_pools(["read", "write"])
				.with_min_connections(0),
		)
		.await
		.expect("Failed to add node B");

	let result = tokio::time::timeout(Duration::from_secs(5), cluster.get_db_connection("read"))
		.await
		.expect("request should be expired well before 5s");

	assert!(matches!(result, Err(ClusterError::Timeout(_))));
	assert_eq!(cluster.queue_length(), 0);
	assert_eq!(cluster.pending_requests(), 0);
}
