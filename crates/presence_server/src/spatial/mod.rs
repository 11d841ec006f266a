//! Spatial zone lookup.
//!
//! Caches each world's zone definitions in memory so the movement hot path
//! can answer "which zone contains this point" without touching a store.

pub mod index;

pub use index::ZoneIndex;
