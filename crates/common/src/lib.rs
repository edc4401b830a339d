//! Shared types for the berth workspace.
//!
//! Keep cross-crate wire DTOs here so the control plane and the edge agent
//! agree on the poll protocol without depending on each other.

#![warn(missing_docs)]

/// Edge poll protocol DTOs.
pub mod api;
