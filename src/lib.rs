//! DSML: dataset surrogate-key manager
//!
//! Interning caches that deduplicate dataset entities (features, samples,
//! value links) by their parameters and resolve integer surrogate keys
//! against a relational store with batched lookups and inserts.

pub mod cli;
pub mod core;
pub mod dataset;
