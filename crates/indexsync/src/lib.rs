//! Umbrella crate for indexsync.
//!
//! This crate re-exports all indexsync components for convenience.
//! Use feature flags to enable specific functionality.

#![doc = include_str!("../README.md")]

pub use indexsync_core as core;

#[cfg(feature = "graph")]
pub use indexsync_graph as graph;

#[cfg(feature = "fts")]
pub use indexsync_fts as fts;

#[cfg(feature = "coordination")]
pub use indexsync_coordination as coordination;
