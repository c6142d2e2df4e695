//! Tollgate - Per-Client Admission Control
//!
//! This crate decides, per caller identity, whether a request may proceed
//! right now. A token-bucket rate limiter tracks an independent budget for
//! each key; around it sit the pieces a deployment needs: a TTL'd token
//! cache with a background sweeper, per-key request counters, quota rules
//! with cheap change detection, and a client for the quota control plane.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod upstream;
