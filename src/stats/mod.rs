//! Playback statistics
//!
//! Keeps the outcome of every round (full, short and abandoned writes,
//! recoveries) for the shutdown summary.

pub mod store;
