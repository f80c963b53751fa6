//! # authgate-api
//!
//! Shared API types for the authgate service.
//! This crate is designed to be WASM-compatible and can be used in both
//! backend (Rust) and frontend (WASM/TypeScript via wasm-bindgen) applications.
//!
//! ## Features
//!
//! - Request DTOs with field validation (RegisterRequest, LoginRequest, etc.)
//! - Response DTOs (UserResponse, TokenPairResponse)
//! - Error envelope (ErrorResponse)
//! - Success envelope with pagination metadata (AppResponse, PaginationMeta)
//!
//! ## Example
//!
//! ```rust
//! use authgate_api::LoginRequest;
//! use validator::Validate;
//!
//! let request = LoginRequest {
//!     email: "user@example.com".to_string(),
//!     password: "password123".to_string(),
//! };
//! assert!(request.validate().is_ok());
//! ```

pub mod error;
pub mod requests;
pub mod responses;
pub mod result;

// Re-exports for convenient access
pub use error::{ErrorResponse, FieldErrors};
pub use requests::*;
pub use responses::*;
pub use result::{AppResponse, PaginationMeta, StatusCode};
