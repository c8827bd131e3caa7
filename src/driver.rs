//! Driver plug-in surface
//!
//! The cluster is vendor-agnostic: everything that touches a wire protocol
//! or a SQL dialect lives behind the capability traits below. A driver
//! family is registered once per process under its name; cluster
//! construction resolves the name and fails synchronously when it is
//! unknown.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::config::NodeConfig;
use crate::connection::Connection;
use crate::errors::Result;
use crate::query::QueryContext;
use crate::types::{Description, QueryResult};

/// A vendor driver family: connection factory plus the query toolchain.
#[async_trait]
pub trait Driver: Send + Sync {
	/// Name the driver registers under (e.g. `postgres`, `mock`)
	fn name(&self) -> &str;

	/// Open one physical connection with the node's credentials.
	async fn connect(&self, config: &NodeConfig) -> Result<Box<dyn DriverConnection>>;

	/// Builder that renders a context into executable SQL on a connection.
	fn query_builder(&self, connection: Arc<Connection>) -> Box<dyn QueryBuilder>;

	/// Compiler that turns an AST-bearing context into SQL.
	fn query_compiler(&self) -> Box<dyn QueryCompiler>;

	/// Schema analyzer bound to a connection.
	fn analyzer(&self, connection: Arc<Connection>) -> Box<dyn Analyzer>;
}

/// One physical database connection, as the driver sees it.
#[async_trait]
pub trait DriverConnection: Send + Sync {
	/// Execute a ready context.
	async fn execute(&self, ctx: &QueryContext) -> Result<QueryResult>;

	/// Close the connection. Idempotence is the driver's responsibility.
	async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait QueryBuilder: Send + Sync {
	/// Mutate `ctx` into a ready-to-execute form.
	async fn render(&mut self, ctx: &mut QueryContext) -> Result<()>;
}

#[async_trait]
pub trait QueryCompiler: Send + Sync {
	/// Compile `ctx.ast` into SQL, appending the statement terminator.
	async fn compile(&self, ctx: &mut QueryContext) -> Result<()>;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
	/// Introspect the named schemas.
	async fn analyze(&self, names: &[String]) -> Result<Description>;
}

static DRIVERS: Lazy<RwLock<HashMap<String, Arc<dyn Driver>>>> =
	Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a driver family under its [`Driver::name`].
///
/// Re-registering a name replaces the previous driver; clusters constructed
/// earlier keep the instance they resolved.
pub fn register_driver(driver: Arc<dyn Driver>) {
	let name = driver.name().to_string();
	DRIVERS.write().insert(name, driver);
}

/// Resolve a registered driver family by name.
pub fn lookup_driver(name: &str) -> Option<Arc<dyn Driver>> {
	DRIVERS.read().get(name).cloned()
}
