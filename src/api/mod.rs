//! Operator/observability HTTP surface.

pub mod routes;

pub use routes::{router, ApiState};
