//! API exposure modules
//!
//! Each exposure consumes an `Api` and produces a Router for its protocol.

pub mod rest;

pub use rest::{Identity, QueryParams, RestExposure};
