//! Scope narrowing, unit conversion and choropleth mapping over Chinese
//! municipal water-use statistics.
//!
//! The `china-water-use` binary is an egui explorer built on these modules;
//! `generate_sample` writes a synthetic dataset to try it on.

pub mod app;
pub mod color;
pub mod data;
pub mod geo;
pub mod scope;
pub mod state;
pub mod taxonomy;
pub mod ui;
pub mod units;
