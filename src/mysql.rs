//! MySQL source backend.
//!
//! Reflects table schemas out of `INFORMATION_SCHEMA` and streams rows in
//! cursor order through buffered `SELECT` queries.

pub mod client;
pub mod schema;
pub mod source;

pub use source::MySqlSource;
