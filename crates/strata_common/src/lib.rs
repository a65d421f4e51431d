//! Shared foundation for StrataDB: scalar values, newtype ids, row/result
//! types, the error taxonomy, and configuration.

pub mod config;
pub mod datum;
pub mod error;
pub mod observability;
pub mod types;

pub use config::{PartitionConfig, ShardConfig, StrataConfig};
pub use datum::Datum;
pub use error::{ExecError, PlanError, QueryError, ShardError, StrataError};
pub use types::{OwnedRow, PartitionId, ResultSet, ShardId};
