//! Typed RocksDB storage for the materialized graph.
//!
//! This module provides type-safe storage on a single RocksDB instance.
//! Each relation gets its own column family with strongly-typed key/value
//! pairs, and writes flow through [`WriteTxn`] batches.

pub mod codec;
pub mod context;
pub mod models;
pub mod table;

pub use context::{DbContextError, TypedDbContext, WriteTxn};
