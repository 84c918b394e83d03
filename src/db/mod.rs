//! Database module for SQLite connection and statements
//!
//! This module provides the connection handle plus the read path (row
//! fetcher) and the mutating statements the reconciler issues.

pub mod connection;
pub mod fetch;
pub mod mutate;

pub use connection::{open, ConnectionDescriptor};
pub use fetch::{fetch, FetchOptions, RawRow};
