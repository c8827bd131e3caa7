//! Basic cluster tests
//! Covers construction, node registration, and idle-connection routing

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reinhardt_cluster::drivers::{ConnectMode, MockDriver};
use reinhardt_cluster::{Cluster, ClusterConfig, ClusterError, ClusterEvent, NodeConfig};

async fn wait_until(mut condition: impl FnMut() -> bool) {
	for _ in 0..500 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("condition not reached within 5s");
}

#[tokio::test]
async fn test_unknown_driver_fails_construction() {
	// A missing driver must fail synchronously, before any node exists
	let result = Cluster::new(ClusterConfig::new("no-such-driver"));

	assert!(matches!(result, Err(ClusterError::DriverLoad(name)) if name == "no-such-driver"));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
	MockDriver::install("mock-invalid-config");

	let result = Cluster::new(ClusterConfig::new("mock-invalid-config").with_max_queue_length(0));

	assert!(matches!(result, Err(ClusterError::Config(_))));
}

#[tokio::test]
async fn test_single_node_happy_path() {
	// One node, one idle connection: get_connection hands it over and
	// empties every pool the node advertises
	let mock = MockDriver::install("mock-happy");
	let cluster = Cluster::new(ClusterConfig::new("mock-happy")).expect("Failed to create cluster");

	cluster
		.add_node(NodeConfig::new().with_pools(["read", "write"]))
		.await
		.expect("Failed to add node");

	assert_eq!(cluster.pool_status("read").unwrap().idle, 1);
	assert_eq!(cluster.pool_status("write").unwrap().idle, 1);
	assert_eq!(mock.connect_count(), 1);

	let connection = cluster
		.get_connection("read")
		.await
		.expect("Failed to get connection");

	assert_eq!(connection.pools(), ["read", "write"]);
	assert_eq!(cluster.pool_status("read").unwrap().idle, 0);
	assert_eq!(cluster.pool_status("write").unwrap().idle, 0);

	// Detached connections are the caller's to close
	connection.end().await.expect("Failed to end connection");
}

#[tokio::test]
async fn test_pooled_connection_returns_on_release() {
	MockDriver::install("mock-release");
	let cluster =
		Cluster::new(ClusterConfig::new("mock-release")).expect("Failed to create cluster");
	let _ = cluster
		.add_node(NodeConfig::new().with_pools(["read"]))
		.await
		.expect("Failed to add node");

	let connection = cluster
		.get_db_connection("read")
		.await
		.expect("Failed to get connection");
	assert_eq!(cluster.pool_status("read").unwrap().idle, 0);

	// Act: the connection re-enters the scheduler on release
	connection.release();

	wait_until(|| cluster.pool_status("read").unwrap().idle == 1).await;
}

#[tokio::test]
async fn test_no_server_without_nodes() {
	MockDriver::install("mock-empty");
	let cluster = Cluster::new(ClusterConfig::new("mock-empty")).expect("Failed to create cluster");

	let result = cluster.get_db_connection("read").await;

	assert!(matches!(result, Err(ClusterError::NoServer(pool)) if pool == "read"));
}

#[tokio::test]
async fn test_no_server_for_unadvertised_pool() {
	MockDriver::install("mock-unadvertised");
	let cluster =
		Cluster::new(ClusterConfig::new("mock-unadvertised")).expect("Failed to create cluster");
	cluster
		.add_node(NodeConfig::new().with_pools(["read", "write"]))
		.await
		.expect("Failed to add node");

	let result = cluster.get_db_connection("analytics").await;

	assert!(matches!(result, Err(ClusterError::NoServer(pool)) if pool == "analytics"));
}

#[tokio::test]
async fn test_node_config_defaults_are_applied() {
	let mock = MockDriver::install("mock-defaults");
	let cluster =
		Cluster::new(ClusterConfig::new("mock-defaults")).expect("Failed to create cluster");

	cluster
		.add_node(NodeConfig::new())
		.await
		.expect("Failed to add node");

	// Default pools are read and write, with one warm connection
	assert_eq!(cluster.pool_status("read").unwrap().node_count, 1);
	assert_eq!(cluster.pool_status("write").unwrap().node_count, 1);
	assert_eq!(mock.connect_count(), 1);
}

#[tokio::test]
async fn test_failed_initial_connect_rolls_back_registration() {
	let mock = MockDriver::install("mock-connect-fail");
	mock.set_connect_mode(ConnectMode::Fail);
	let cluster =
		Cluster::new(ClusterConfig::new("mock-connect-fail")).expect("Failed to create cluster");

	let result = cluster
		.add_node(NodeConfig::new().with_pools(["read"]))
		.await;

	assert!(matches!(result, Err(ClusterError::Driver(_))));
	assert!(cluster.pool_status("read").is_none());
	assert_eq!(cluster.serving_queues("read"), 0);
}

#[tokio::test]
async fn test_pool_refcounts_across_shared_pools() {
	MockDriver::install("mock-refcounts");
	let cluster =
		Cluster::new(ClusterConfig::new("mock-refcounts")).expect("Failed to create cluster");

	let first = cluster
		.add_node(NodeConfig::new().with_pools(["read"]))
		.await
		.expect("Failed to add first node");
	cluster
		.add_node(NodeConfig::new().with_pools(["read", "write"]))
		.await
		.expect("Failed to add second node");

	assert_eq!(cluster.pool_status("read").unwrap().node_count, 2);

	// Removing one node leaves the shared pool alive
	cluster.end_node(first).await.expect("Failed to end node");

	assert_eq!(cluster.pool_status("read").unwrap().node_count, 1);
	assert_eq!(cluster.pool_status("read").unwrap().idle, 1);
	cluster
		.get_db_connection("read")
		.await
		.expect("Surviving node should still serve");
}

#[tokio::test]
async fn test_duplicate_pool_names_are_normalized() {
	MockDriver::install("mock-normalize");
	let cluster =
		Cluster::new(ClusterConfig::new("mock-normalize")).expect("Failed to create cluster");

	cluster
		.add_node(NodeConfig::new().with_pools(["write", "read", "read"]))
		.await
		.expect("Failed to add node");

	let connection = cluster
		.get_db_connection("read")
		.await
		.expect("Failed to get connection");

	// Memberships are sorted and de-duplicated before the node is observable
	assert_eq!(connection.pools(), ["read", "write"]);
	assert_eq!(connection.composite(), "read/write");
}

#[tokio::test]
async fn test_listener_observes_lifecycle() {
	MockDriver::install("mock-listener");
	let cluster =
		Cluster::new(ClusterConfig::new("mock-listener")).expect("Failed to create cluster");

	let seen: Arc<Mutex<Vec<ClusterEvent>>> = Arc::default();
	let sink = Arc::clone(&seen);
	cluster.add_listener(Arc::new(move |event: &ClusterEvent| {
		sink.lock().unwrap().push(event.clone());
	}));

	let node_id = cluster
		.add_node(NodeConfig::new().with_pools(["read"]))
		.await
		.expect("Failed to add node");
	cluster.end(false).await.expect("Failed to end cluster");

	let seen = seen.lock().unwrap();
	assert!(seen.iter().any(|event| matches!(
		event,
		ClusterEvent::NodeAdded { node_id: id, composite } if *id == node_id && composite == "read"
	)));
	assert!(seen
		.iter()
		.any(|event| matches!(event, ClusterEvent::ConnectionOpened { .. })));
	assert!(seen
		.iter()
		.any(|event| matches!(event, ClusterEvent::NodeEnded { node_id: id } if *id == node_id)));
	assert_eq!(seen.last(), Some(&ClusterEvent::End));
}
