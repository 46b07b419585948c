//! ztgate Common - Shared types for the zero trust access engine
//!
//! This crate provides the primitives every evaluator agrees on:
//! - The immutable access request model
//! - Unit-interval score helpers
//! - Local business-hours arithmetic
//! - Error handling
//!
//! # Score convention
//!
//! Every score that crosses a crate boundary (device trust, behavior risk,
//! threat level, composite risk) lives in `[0.0, 1.0]`. Helpers in
//! [`score`] clamp at the point of computation and map non-finite values
//! to the fail-closed extreme.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod request;
pub mod score;

pub use clock::{span_secs, LocalClock};
pub use error::*;
pub use request::AccessRequest;
pub use score::{clamp_risk, clamp_trust, unit};
