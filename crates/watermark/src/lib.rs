//! Per-table incremental watermark state.
//!
//! The watermark is the highest cursor value successfully processed for a
//! table. This crate owns its durability: the [`WatermarkStore`] trait,
//! the monotonicity guard (`advance` never regresses state), and two
//! implementations, [`FilesystemStore`] for real runs and [`MemoryStore`]
//! for tests.
//!
//! Ordering contract with the pipeline: a chunk's destination write lands
//! first, then `advance` persists, and only then does the pipeline treat
//! the chunk as committed and begin the next one. A crash between the two
//! steps re-delivers the chunk on restart; the persisted watermark can
//! never run ahead of destination state.
//!
//! # Example
//!
//! ```rust
//! use replica_core::CursorValue;
//! use watermark::{MemoryStore, WatermarkStore};
//!
//! # async fn example() -> replica_core::Result<()> {
//! let store = MemoryStore::new();
//! store.advance("orders", "updated_at", &CursorValue::Int(42)).await?;
//! let state = store.get("orders").await?.unwrap();
//! assert_eq!(state.value, CursorValue::Int(42));
//! # Ok(())
//! # }
//! ```

pub mod filesystem;
pub mod memory;
pub mod store;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use store::{StoredWatermark, WatermarkStore};
