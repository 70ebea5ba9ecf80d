//! Roomcast API Library
//!
//! This crate contains the realtime chat broker and its HTTP/WebSocket
//! surface.

pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
