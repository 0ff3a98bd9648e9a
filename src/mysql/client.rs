//! MySQL client utilities
//!
//! This module provides utilities for creating and managing MySQL connection pools.

use mysql_async::Pool;
use replica_core::{Error, Result};

/// Create a new MySQL connection pool from a `mysql://` URL.
pub fn new_mysql_pool(connection_string: &str) -> Result<Pool> {
    let pool = Pool::from_url(connection_string)
        .map_err(|e| Error::config(format!("invalid MySQL connection string: {e}")))?;
    Ok(pool)
}
