//! Configuration constants for the data loader
//!
//! This module centralizes all tunable parameters and constants used throughout
//! the application.

use std::time::Duration;

use crate::db::schema::COLUMN_COUNT;

// ============================================================================
// Connection Pool Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_POOL_SIZE: u32 = 8;

pub const DEFAULT_PORT: u16 = 5432;

/// Server-side `statement_timeout` applied to every Postgres connection
///
/// Kept a little above `QUERY_TIMEOUT` so the client gives up first and the
/// error surfaces as a timeout rather than a cancelled statement.
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(200);

// ============================================================================
// Loader Configuration
// ============================================================================

/// Attempts made to acquire a connection before a file is given up on
pub const MAX_RETRIES: u32 = 5;

/// Timeout for individual database statements
///
/// Set to 3 minutes because a multi-row INSERT of a full batch can take time
/// on a busy server. This prevents queries from hanging indefinitely while
/// allowing legitimate long-running batches to complete.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(180); // 3 minutes

/// Rows per INSERT statement
pub const DEFAULT_BATCH_SIZE: usize = 3000;

/// Largest batch that fits in one statement
///
/// Postgres caps a statement at 65535 bind parameters and every row binds one
/// parameter per column.
pub const MAX_BATCH_SIZE: usize = u16::MAX as usize / COLUMN_COUNT;

/// Advisory lock key held while creating the table or index
pub const DDL_LOCK_KEY: i64 = 0x5342_4244_4154_4100;

/// Name of the destination table
pub const TABLE_NAME: &str = "SbbData";

/// Name of the secondary index on `stop_id`
pub const STOP_INDEX_NAME: &str = "SbbData_stop_id_idx";
