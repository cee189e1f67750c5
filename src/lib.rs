//! WasteWise: asynchronous skill-execution engine for waste-service analysis.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod extraction;
pub mod formulas;
pub mod skills;
pub mod store;
pub mod worker;
