//! Data layer: core types, loading, and row filtering.
//!
//! Architecture:
//! ```text
//!  .csv / .json / .parquet
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  parse file → WaterUseDataset
//!   └──────────┘
//!        │
//!        ▼
//!   ┌─────────────────┐
//!   │ WaterUseDataset │  Vec<Observation>, extent index
//!   └─────────────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  filter   │  apply the current scope → visible rows, Table view
//!   └──────────┘
//! ```

pub mod filter;
pub mod loader;
pub mod model;
