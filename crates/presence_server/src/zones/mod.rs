//! Ephemeral zone membership.
//!
//! Tracks which users currently occupy each declared zone. A zone's live
//! context exists only while someone is inside it: created by the first
//! `enter`, destroyed by the last `exit`. Nothing here is persisted.

pub mod lifecycle;

pub use lifecycle::{EnterOutcome, ZoneLifecycle, ZoneSnapshot};
