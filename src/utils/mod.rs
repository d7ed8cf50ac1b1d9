//! # Utility Modules
//!
//! Supporting utilities for logging, timing, and observability.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Time**: Millisecond timestamps for activity tracking and idle checks
//! - **Timeout**: Async timeout wrappers
//! - **Metrics**: Thread-safe observability counters, one set per service

pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;
