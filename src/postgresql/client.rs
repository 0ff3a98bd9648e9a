//! PostgreSQL client utilities
//!
//! This module provides utilities for creating PostgreSQL client connections.

use tokio_postgres::{Client, NoTls};
use tracing::warn;

/// Connect to PostgreSQL and spawn the connection driver task.
///
/// The driver runs until the client is dropped; a connection-level error is
/// logged and surfaces to callers as failed statements on the client.
pub async fn new_postgres_client(uri: &str) -> Result<Client, tokio_postgres::Error> {
    let (client, connection) = tokio_postgres::connect(uri, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("PostgreSQL connection error: {e}");
        }
    });
    Ok(client)
}
