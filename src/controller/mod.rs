//! Controller module for the observability operator.
//!
//! Contains the reconciliation loop, error handling, shared context and
//! status management for MultiClusterObservability.

pub mod common;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod status;
