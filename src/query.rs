//! Query façade
//!
//! Thin surface over the scheduler: a [`QueryContext`] names its target
//! pool and carries either final SQL, or an AST to be compiled, or a form
//! the driver's builder renders against a live connection. The cluster
//! pipelines compile → acquire → render → execute and returns the
//! connection to the scheduler afterwards.

use serde_json::Value as JsonValue;

use crate::cluster::Cluster;
use crate::connection::Connection;
use crate::errors::{ClusterError, Result};
use crate::types::{Description, QueryResult};
use std::sync::Arc;

/// A query in flight: target pool, optional AST, and the SQL being built.
#[derive(Debug, Clone)]
pub struct QueryContext {
	/// The pool this query must run against
	pub pool: String,
	/// Optional AST consumed by the driver's compiler
	pub ast: Option<JsonValue>,
	/// SQL text, populated by the compiler or builder
	pub sql: Option<String>,
	ready: bool,
}

impl QueryContext {
	pub fn new(pool: impl Into<String>) -> Self {
		Self {
			pool: pool.into(),
			ast: None,
			sql: None,
			ready: false,
		}
	}

	/// Context carrying final SQL; render and compile are skipped.
	pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
		self.sql = Some(sql.into());
		self.ready = true;
		self
	}

	pub fn with_ast(mut self, ast: JsonValue) -> Self {
		self.ast = Some(ast);
		self
	}

	/// Whether the SQL is final and render/compile can be skipped.
	pub fn is_ready(&self) -> bool {
		self.ready
	}

	/// Install final SQL. Called by driver compilers and builders.
	pub fn finalize(&mut self, sql: impl Into<String>) {
		self.sql = Some(sql.into());
		self.ready = true;
	}
}

impl Cluster {
	/// Compile, render and execute a query context on its pool.
	pub async fn query(&self, mut ctx: QueryContext) -> Result<QueryResult> {
		if ctx.pool.is_empty() {
			return Err(ClusterError::BadInput(
				"query context has no pool".to_string(),
			));
		}

		if !ctx.is_ready() && ctx.ast.is_some() {
			self.render_ast_query(&mut ctx).await?;
		}

		let connection = self.get_db_connection(&ctx.pool).await?;
		let result = self.execute_on(&connection, &mut ctx).await;
		// Idle again; the scheduler takes the connection back either way.
		connection.release();
		result
	}

	async fn execute_on(
		&self,
		connection: &Arc<Connection>,
		ctx: &mut QueryContext,
	) -> Result<QueryResult> {
		if !ctx.is_ready() {
			self.render_query(connection, ctx).await?;
		}
		connection.query(ctx).await
	}

	/// Render a context into executable SQL against a connection.
	pub async fn render_query(
		&self,
		connection: &Arc<Connection>,
		ctx: &mut QueryContext,
	) -> Result<()> {
		let mut builder = self.driver().query_builder(Arc::clone(connection));
		builder.render(ctx).await
	}

	/// Compile an AST-bearing context into SQL (with statement terminator).
	pub async fn render_ast_query(&self, ctx: &mut QueryContext) -> Result<()> {
		if ctx.ast.is_none() {
			return Err(ClusterError::BadInput(
				"query context has no ast".to_string(),
			));
		}
		let compiler = self.driver().query_compiler();
		compiler.compile(ctx).await
	}

	/// Introspect the named schemas over a dedicated `read` connection.
	///
	/// The connection is detached from the pools and always closed, whether
	/// the analyzer succeeds or fails.
	pub async fn describe(&self, names: &[String]) -> Result<Description> {
		let connection = self.get_connection("read").await?;
		let analyzer = self.driver().analyzer(Arc::clone(&connection));
		let result = analyzer.analyze(names).await;
		if let Err(error) = connection.end().await {
			tracing::warn!(connection_id = connection.id(), %error, "describe connection close failed");
		}
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde_json::json;

	#[rstest]
	fn test_context_with_sql_is_ready() {
		// Arrange & Act
		let ctx = QueryContext::new("read").with_sql("SELECT 1");

		// Assert
		assert!(ctx.is_ready());
		assert_eq!(ctx.sql.as_deref(), Some("SELECT 1"));
	}

	#[rstest]
	fn test_context_with_ast_is_not_ready() {
		// Arrange & Act
		let ctx = QueryContext::new("read").with_ast(json!({"select": "1"}));

		// Assert
		assert!(!ctx.is_ready());
		assert!(ctx.sql.is_none());
	}

	#[rstest]
	fn test_finalize_marks_ready() {
		// Arrange
		let mut ctx = QueryContext::new("read");

		// Act
		ctx.finalize("SELECT 1;");

		// Assert
		assert!(ctx.is_ready());
		assert_eq!(ctx.sql.as_deref(), Some("SELECT 1;"));
	}
}
