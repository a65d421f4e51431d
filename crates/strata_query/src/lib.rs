//! Query frontend: the expression model, the fluent single-connection
//! query builder, and the `Connection` trait everything executes through.

pub mod builder;
pub mod connection;
pub mod expr;

pub use builder::{
    CompiledQuery, JoinClause, JoinKind, OrderDir, QueryBuilder, QueryDescription, QueryKind,
    SelectItem, ShardScope, TableRef,
};
pub use connection::Connection;
pub use expr::{AggFunc, CastType, CmpOp, ColumnRef, Expr};
