//! Transport-neutral handlers for `/health`, `/info` and `/predict`.
//!
//! A host HTTP server maps its requests onto these functions and writes the
//! returned status and JSON body back unchanged.

pub mod app;
pub mod auth;
pub mod handlers;

pub use app::ServingApp;
pub use handlers::{ApiResponse, RequestMeta};
