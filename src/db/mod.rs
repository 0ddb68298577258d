//! Database layer - connection pooling, DDL and INSERT statements

pub mod pool;
pub mod schema;
pub mod statement;

pub use pool::{Pool, PoolArgsBuilder, PoolConnection};
pub use statement::to_insert_statement;
