//! PostgreSQL destination backend.
//!
//! Creates destination tables from normalized schemas and applies row chunks
//! under the strategy contracts: `replace` stages inside one transaction and
//! swaps at commit, `append` and `merge` make each chunk visible as it lands.

pub mod client;
pub mod load;
pub mod schema;

pub use load::PostgresDestination;
