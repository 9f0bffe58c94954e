//! Store-and-forward dispatch engine.
//!
//! Implements the producer/consumer pipeline that drains the request queue:
//! a producer polls for dispatchable rows and feeds their identifiers onto a
//! bounded work channel, and a fixed pool of workers claims each row
//! exclusively, applies the eligibility policy, delivers over HTTP, and
//! writes the outcome back under the claim transaction.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   bounded channel   ┌─────────────┐   ┌─────────────────┐
//! │ Producer │────────────────────▶│ Worker pool │──▶│ DeliveryClient  │
//! └──────────┘   (request ids)     └─────────────┘   └─────────────────┘
//!      │                                 │                    │
//!      ▼                                 ▼                    ▼
//! ┌──────────────┐            ┌──────────────────┐   ┌─────────────────┐
//! │ dispatchable │            │ FOR UPDATE       │   │ Destination     │
//! │ status scan  │            │ NOWAIT claim     │   │ servers         │
//! └──────────────┘            └──────────────────┘   └─────────────────┘
//! ```
//!
//! Workers re-read every row under its lock rather than trusting scan-time
//! state, so the channel carries identifiers, not payloads. The row lock is
//! held for the duration of the outbound call and always released by
//! committing the claim transaction, whatever the delivery outcome.

pub mod client;
pub mod engine;
pub mod error;
pub mod payload;
pub mod producer;
pub mod storage;
pub mod worker;

pub use client::{Auth, ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse};
pub use engine::{DispatchConfig, DispatchEngine, EngineStats};
pub use error::{DispatchError, Result};
pub use storage::{Claim, DispatchStorage, PostgresDispatchStorage};

/// Default number of concurrent delivery workers.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default maximum retries before a request expires.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Default capacity of the bounded work channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default producer poll interval in seconds.
pub const DEFAULT_PROCESS_INTERVAL_SECS: u64 = 5;

/// Default upper bound on identifiers fetched per producer scan.
pub const DEFAULT_SCAN_BATCH_LIMIT: i64 = 100_000;
