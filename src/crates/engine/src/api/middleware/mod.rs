//! API middleware layer
//!
//! Provides middleware for request processing including CORS, logging, and validation.

pub mod cors;
pub mod logging;
pub mod principal;
pub mod validation;

pub use cors::cors_layer;
pub use logging::logging_layer;
pub use principal::extract_principal;
pub use validation::{
    validate_not_empty, validate_string_length, validate_pagination, validate_uuid,
};
