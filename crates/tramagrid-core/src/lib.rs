//! Core types, config, errors, and durable session storage for the TramaGrid client.

pub mod config;
pub mod error;
pub mod session_store;
pub mod types;
