//! Client for the quota control plane.

mod client;

pub use client::{ControlPlaneClient, QuotaAssignment};
