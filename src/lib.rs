//! # authgate
//!
//! Token-based authentication service: registration, login, and the
//! access/refresh token lifecycle on top of a descriptor-driven
//! persistence layer with Postgres and in-memory backends.

pub mod app;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod handlers;
pub mod response;
