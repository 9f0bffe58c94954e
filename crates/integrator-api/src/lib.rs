//! HTTP surface for the integrator dispatcher.
//!
//! Provides the read-only queue listing and inspection API built on the
//! query builder and paginator, a thin ingest endpoint writing `ready`
//! rows through the request repository, the administrative delete, and
//! configuration loading for the whole service.

#![forbid(unsafe_code)]

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server, ApiCredentials, AppState};
