//! The narrow interface to one physical database connection. Per-dialect
//! SQL generation, escaping, and transport live behind implementations of
//! this trait; in production that is a driver adapter, in tests the
//! in-memory engine from `strata_memdb`.

use strata_common::{ResultSet, StrataError};

use crate::builder::CompiledQuery;

/// One physical connection capable of running a compiled single-connection
/// query. Implementations are shared via `Arc`; a single logical query uses
/// a connection from one thread at a time.
pub trait Connection: Send + Sync {
    /// Run a SELECT and return its rows.
    fn execute_rows(&self, query: &CompiledQuery) -> Result<ResultSet, StrataError>;

    /// Run an INSERT/UPDATE/DELETE and return the affected row count.
    fn execute_statement(&self, query: &CompiledQuery) -> Result<u64, StrataError>;

    /// The last id generated by an INSERT on this connection.
    fn last_insert_id(&self) -> Result<i64, StrataError>;
}
