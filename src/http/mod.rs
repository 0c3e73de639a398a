//! HTTP client module
//!
//! The resilient request client underneath every crawl:
//!
//! - **Retries**: budgeted by attempts and by elapsed time, with
//!   configurable backoff; definitive client statuses short-circuit
//! - **Rate-limit cooldown**: a recognized throttle response sleeps a
//!   long fixed cooldown and restarts the identical request, on its
//!   own bounded budget
//! - **Token refresh**: a 401 with a configured [`TokenSource`] is
//!   refreshed once and retried, bounded separately
//! - **Cancellation**: checked before every attempt and during every
//!   retry sleep

mod client;
mod rate_limit;
mod token;

pub use client::{request_count, HttpClient, HttpClientConfig, RequestBody, RequestSpec};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use token::{StaticToken, TokenSource};
