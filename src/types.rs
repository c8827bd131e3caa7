//! Common result and schema description types
//!
//! These are the shapes exchanged with driver implementations: query results
//! as JSON-backed rows, and schema descriptions produced by an analyzer.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

/// A single result row, keyed by column name
pub type Row = serde_json::Map<String, JsonValue>;

/// Result of executing a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
	/// Rows returned by the query, in result order
	pub rows: Vec<Row>,
	/// Rows affected by a write statement
	pub rows_affected: u64,
}

impl QueryResult {
	pub fn empty() -> Self {
		Self::default()
	}
}

/// Schema information produced by `describe`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Description {
	/// Described tables, keyed by table name
	pub tables: HashMap<String, TableDescription>,
}

/// Table metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
	/// Table name
	pub name: String,
	/// Columns in declaration order
	pub columns: Vec<ColumnDescription>,
}

/// Column metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
	/// Column name
	pub name: String,
	/// Vendor type name as reported by the analyzer
	pub column_type: String,
	/// Whether the column is nullable
	pub nullable: bool,
}
