//! Cluster error types
//!
//! This module provides a unified error type for all cluster operations.
//! Operational errors surface to the caller through the future returned by
//! the public API; `Internal` indicates a broken invariant and is always a
//! bug in this crate.

use std::time::Duration;

use thiserror::Error;

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Unified error type for cluster operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
	/// Missing or invalid configuration
	#[error("Configuration error: {0}")]
	Config(String),

	/// The named driver has not been registered
	#[error("Unknown driver: {0}")]
	DriverLoad(String),

	/// Operation attempted after the cluster has been ended
	#[error("Cluster has been ended")]
	Ended,

	/// No live node currently advertises the requested pool
	#[error("No server available for pool '{0}'")]
	NoServer(String),

	/// Aggregate queued requests reached the configured cap
	#[error("Connection request queue is full")]
	QueueFull,

	/// The request expired before a connection became available
	#[error("Connection request timed out after {0:?}")]
	Timeout(Duration),

	/// The request was aborted because the cluster is force-ending
	#[error("Cluster is shutting down")]
	Shutdown,

	/// Ill-formed query context
	#[error("Bad input: {0}")]
	BadInput(String),

	/// Error reported by the vendor driver
	#[error("Driver error: {0}")]
	Driver(String),

	/// Broken invariant; always a bug in this crate
	#[error("Internal error: {0}")]
	Internal(String),
}

impl ClusterError {
	/// Whether this error means the request can never be served by the
	/// current cluster topology.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			ClusterError::Ended | ClusterError::NoServer(_) | ClusterError::Shutdown
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_error_display_includes_pool_name() {
		// Arrange
		let err = ClusterError::NoServer("analytics".to_string());

		// Act
		let message = err.to_string();

		// Assert
		assert!(message.contains("analytics"));
	}

	#[rstest]
	fn test_terminal_classification() {
		// Arrange & Act & Assert
		assert!(ClusterError::Ended.is_terminal());
		assert!(ClusterError::Shutdown.is_terminal());
		assert!(ClusterError::NoServer("read".into()).is_terminal());
		assert!(!ClusterError::QueueFull.is_terminal());
		assert!(!ClusterError::Timeout(Duration::from_secs(60)).is_terminal());
	}
}
