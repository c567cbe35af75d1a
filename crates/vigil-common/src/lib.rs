//! Shared domain types for the vigil alert evaluation engine.

pub mod types;
