//! Manifest rendering for the observability stack.
//!
//! Each component module generates typed k8s-openapi objects from a shared
//! `RenderContext`; `Renderer` gathers cluster inputs, drives the generators
//! and returns unstructured objects ready for server-side apply.

pub mod alertmanager;
pub mod common;
pub mod grafana;
pub mod images;
pub mod proxy;
pub mod renderer;
pub mod secrets;
pub mod thanos;

pub use common::{COMPONENT_LABEL, OWNER_LABEL, RenderContext, owner_reference};
pub use images::ImageSet;
pub use renderer::{Renderer, is_valid_quantity, validate_storage};
pub use secrets::ensure_seed_secrets;
