//! Floodgate - Sliding-Window Rate Limiting Service
//!
//! This crate implements a per-key sliding-window rate limiting service
//! intended to sit in front of faucet-style endpoints that grant a scarce
//! resource per client address. It exposes `check` and `reset` actions as
//! JSON over HTTP and bounds its own memory with a periodic retention
//! sweep. Failures while deciding degrade to "allowed" by default, on the
//! grounds that the protected resource keeps its own last-line checks.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
