//! Origin classification and permission-gated dispatch.
//!
//! Provides:
//! - `PermissionClass` / `Surface` - the fixed classification table
//! - `Gated` - wraps an `Api` with per-operation required classes

pub mod gate;
pub mod permission;

pub use gate::{Api, Gated, Operation, PermissionDenied, PermissionTable};
pub use permission::{PermissionClass, Surface, classify_context, classify_origin};
