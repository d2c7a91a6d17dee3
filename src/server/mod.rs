//! Server module for exposing an `Api` over HTTP

pub mod builder;
pub mod exposure;

pub use builder::ServerBuilder;
pub use exposure::{Identity, QueryParams, RestExposure};
