#![forbid(unsafe_code)]
//! Durable job and worker persistence on SQLite.
//!
//! One file on local disk, ACID transactions, safe to share between worker
//! processes. Every public operation is a single transaction; write
//! transactions begin `IMMEDIATE` so concurrent writers serialise at BEGIN
//! instead of deadlocking on lock upgrade.

mod store;

pub use store::*;
