//! Core domain models and storage primitives for the integrator dispatcher.
//!
//! Provides the queued-request and destination entities, strongly-typed
//! identifiers, the pagination and query-building helpers used by the listing
//! API, and the repository layer over PostgreSQL. All other crates depend on
//! these foundational types.

#![forbid(unsafe_code)]

pub mod destinations;
pub mod error;
pub mod models;
pub mod paginator;
pub mod query;
pub mod storage;

pub use destinations::Destinations;
pub use error::{CoreError, Result};
pub use models::{
    AuthMethod, ClaimedRequest, NewRequest, Request, RequestId, RequestStatus, Server, ServerId,
};
pub use paginator::Paginator;
