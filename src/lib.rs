//! Event-pairing and accumulation engine for kernel probe telemetry.
//!
//! Probe handlers turn raw events into bounded, lock-free aggregate tables
//! that a reader snapshots periodically.

pub mod config;
pub mod engine;
pub mod export;
pub mod probe;
pub mod table;
