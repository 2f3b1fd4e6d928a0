//! Route handlers, one module per resource.

pub mod decode;
pub mod health;
pub mod metrics;
