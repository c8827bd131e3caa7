//! In-memory mock driver
//!
//! Implements the whole driver surface without a database: connection
//! production is scriptable (immediate, never, failing), query results can
//! be canned, and every executed statement is recorded for inspection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::config::NodeConfig;
use crate::connection::Connection;
use crate::driver::{
	Analyzer, Driver, DriverConnection, QueryBuilder, QueryCompiler, register_driver,
};
use crate::errors::{ClusterError, Result};
use crate::query::QueryContext;
use crate::types::{ColumnDescription, Description, QueryResult, Row, TableDescription};

/// How the mock answers connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
	/// Every connect succeeds immediately
	Immediate,
	/// Connects never resolve; the node produces no connections
	Pending,
	/// Connects fail with a driver error
	Fail,
}

#[derive(Default)]
struct MockState {
	connect_mode: Mutex<Option<ConnectMode>>,
	connects: AtomicUsize,
	closed: AtomicUsize,
	executed: Mutex<Vec<String>>,
	canned_results: Mutex<VecDeque<QueryResult>>,
	analyzer_error: Mutex<Option<String>>,
}

/// A scriptable in-memory driver family.
///
/// # Examples
///
/// ```rust
/// use reinhardt_cluster::drivers::MockDriver;
/// use reinhardt_cluster::{Cluster, ClusterConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// MockDriver::install("mock-docs");
/// let cluster = Cluster::new(ClusterConfig::new("mock-docs")).unwrap();
/// # drop(cluster);
/// # }
/// ```
pub struct MockDriver {
	name: String,
	state: Arc<MockState>,
}

impl MockDriver {
	/// Create and register a mock driver under the given name.
	pub fn install(name: impl Into<String>) -> Arc<Self> {
		let driver = Arc::new(Self {
			name: name.into(),
			state: Arc::default(),
		});
		register_driver(Arc::clone(&driver) as Arc<dyn Driver>);
		driver
	}

	pub fn set_connect_mode(&self, mode: ConnectMode) {
		*self.state.connect_mode.lock() = Some(mode);
	}

	/// Number of successful connects so far.
	pub fn connect_count(&self) -> usize {
		self.state.connects.load(Ordering::Acquire)
	}

	/// Number of closed connections so far.
	pub fn closed_count(&self) -> usize {
		self.state.closed.load(Ordering::Acquire)
	}

	/// Every statement executed through this driver, in order.
	pub fn executed(&self) -> Vec<String> {
		self.state.executed.lock().clone()
	}

	/// Queue a canned result for the next execution.
	pub fn push_result(&self, result: QueryResult) {
		self.state.canned_results.lock().push_back(result);
	}

	/// Make the analyzer fail with the given message.
	pub fn fail_analyzer(&self, message: impl Into<String>) {
		*self.state.analyzer_error.lock() = Some(message.into());
	}
}

#[async_trait]
impl Driver for MockDriver {
	fn name(&self) -> &str {
		&self.name
	}

	async fn connect(&self, _config: &NodeConfig) -> Result<Box<dyn DriverConnection>> {
		let mode = (*self.state.connect_mode.lock()).unwrap_or(ConnectMode::Immediate);
		match mode {
			ConnectMode::Immediate => {
				self.state.connects.fetch_add(1, Ordering::AcqRel);
				Ok(Box::new(MockConnection {
					state: Arc::clone(&self.state),
				}))
			}
			ConnectMode::Pending => std::future::pending().await,
			ConnectMode::Fail => Err(ClusterError::Driver("mock connect refused".to_string())),
		}
	}

	fn query_builder(&self, _connection: Arc<Connection>) -> Box<dyn QueryBuilder> {
		Box::new(MockBuilder)
	}

	fn query_compiler(&self) -> Box<dyn QueryCompiler> {
		Box::new(MockCompiler)
	}

	fn analyzer(&self, _connection: Arc<Connection>) -> Box<dyn Analyzer> {
		Box::new(MockAnalyzer {
			state: Arc::clone(&self.state),
		})
	}
}

struct MockConnection {
	state: Arc<MockState>,
}

#[async_trait]
impl DriverConnection for MockConnection {
	async fn execute(&self, ctx: &QueryContext) -> Result<QueryResult> {
		let sql = ctx.sql.clone().unwrap_or_default();
		self.state.executed.lock().push(sql);

		if let Some(canned) = self.state.canned_results.lock().pop_front() {
			return Ok(canned);
		}
		let row: Row = match json!({"value": 1}) {
			serde_json::Value::Object(map) => map,
			_ => unreachable!("literal object"),
		};
		Ok(QueryResult {
			rows: vec![row],
			rows_affected: 0,
		})
	}

	async fn close(&self) -> Result<()> {
		self.state.closed.fetch_add(1, Ordering::AcqRel);
		Ok(())
	}
}

struct MockBuilder;

#[async_trait]
impl QueryBuilder for MockBuilder {
	async fn render(&mut self, ctx: &mut QueryContext) -> Result<()> {
		let sql = ctx.sql.clone().unwrap_or_else(|| "SELECT 1".to_string());
		ctx.finalize(sql);
		Ok(())
	}
}

struct MockCompiler;

#[async_trait]
impl QueryCompiler for MockCompiler {
	async fn compile(&self, ctx: &mut QueryContext) -> Result<()> {
		let sql = ctx
			.ast
			.as_ref()
			.and_then(|ast| ast.get("sql"))
			.and_then(|sql| sql.as_str())
			.ok_or_else(|| {
				ClusterError::BadInput("mock ast must carry a `sql` string".to_string())
			})?;
		ctx.finalize(format!("{sql};"));
		Ok(())
	}
}

struct MockAnalyzer {
	state: Arc<MockState>,
}

#[async_trait]
impl Analyzer for MockAnalyzer {
	async fn analyze(&self, names: &[String]) -> Result<Description> {
		if let Some(message) = self.state.analyzer_error.lock().clone() {
			return Err(ClusterError::Driver(message));
		}
		let tables = names
			.iter()
			.map(|name| {
				let table = TableDescription {
					name: name.clone(),
					columns: vec![ColumnDescription {
						name: "id".to_string(),
						column_type: "integer".to_string(),
						nullable: false,
					}],
				};
				(name.clone(), table)
			})
			.collect();
		Ok(Description { tables })
	}
}
