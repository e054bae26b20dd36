//! Redlimit - Distributed Rate Limiting Engine
//!
//! This crate enforces per-key request quotas across many application
//! instances. Counters live in a shared Redis store and every quota check
//! runs as a single atomic Lua script, so concurrent requests from any
//! number of processes observe one serialized view of each counter.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
